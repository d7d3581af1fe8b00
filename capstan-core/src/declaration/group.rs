//! Routers and skills: capabilities that group other capabilities

use super::capability::{Annotations, Hidden};
use serde_json::Value;

/// Separator between a router name and a member name
pub const NAMESPACE_SEPARATOR: &str = "__";

/// Qualified `{router}__{member}` name
pub fn namespaced(router: &str, member: &str) -> String {
    format!("{router}{NAMESPACE_SEPARATOR}{member}")
}

/// Tools grouped under one namespace
///
/// Members are tool names. Unless flattened, members are reached only as
/// `{router}__{member}` and listings show the router alone.
#[derive(Debug, Clone)]
pub struct RouterDeclaration {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    /// Per-router override of the server-wide flatten default
    pub flatten: Option<bool>,
    pub hidden: Hidden,
    pub annotations: Annotations,
}

impl RouterDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            members: Vec::new(),
            flatten: None,
            hidden: Hidden::default(),
            annotations: Annotations::new(),
        }
    }

    pub fn member(mut self, tool: impl Into<String>) -> Self {
        self.members.push(tool.into());
        self
    }

    pub fn members<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn flatten(mut self, flatten: bool) -> Self {
        self.flatten = Some(flatten);
        self
    }

    pub fn hidden(mut self, hidden: impl Into<Hidden>) -> Self {
        self.hidden = hidden.into();
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }
}

/// Documentation bundle over tools, prompts and resources
///
/// Listed as a `skill://{name}` resource whose content is generated from the
/// members; needs no implementation.
#[derive(Debug, Clone)]
pub struct SkillDeclaration {
    pub name: String,
    pub description: String,
    pub members: Vec<String>,
    /// Markdown appended to the generated document
    pub instructions: Option<String>,
    pub hidden: Hidden,
    pub annotations: Annotations,
}

impl SkillDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            members: Vec::new(),
            instructions: None,
            hidden: Hidden::default(),
            annotations: Annotations::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.members.push(name.into());
        self
    }

    pub fn members<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.members.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn instructions(mut self, markdown: impl Into<String>) -> Self {
        self.instructions = Some(markdown.into());
        self
    }

    pub fn hidden(mut self, hidden: impl Into<Hidden>) -> Self {
        self.hidden = hidden.into();
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }
}
