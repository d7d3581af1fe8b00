//! Capability kinds, hidden flags and the declaration sum type

use super::group::{RouterDeclaration, SkillDeclaration};
use super::prompt::PromptDeclaration;
use super::resource::ResourceDeclaration;
use super::tool::ToolDeclaration;
use crate::context::RequestContext;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind of a declared capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Prompt,
    Resource,
    Router,
    Skill,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 5] = [
        CapabilityKind::Tool,
        CapabilityKind::Prompt,
        CapabilityKind::Resource,
        CapabilityKind::Router,
        CapabilityKind::Skill,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityKind::Tool => "tool",
            CapabilityKind::Prompt => "prompt",
            CapabilityKind::Resource => "resource",
            CapabilityKind::Router => "router",
            CapabilityKind::Skill => "skill",
        }
    }
}

impl std::fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate deciding whether a capability is hidden for a request
///
/// An `Err` is treated as "visible" by the visibility engine.
pub type HiddenPredicate = Arc<dyn Fn(&RequestContext) -> Result<bool, String> + Send + Sync>;

/// Hidden flag of a declaration
#[derive(Clone)]
pub enum Hidden {
    /// Fixed at declaration time
    Static(bool),
    /// Evaluated against each request's context
    Dynamic(HiddenPredicate),
}

impl Hidden {
    /// Hidden whenever `predicate` returns true
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        Hidden::Dynamic(Arc::new(move |ctx| Ok(predicate(ctx))))
    }

    /// Fallible variant of [`Hidden::when`]
    pub fn try_when<F>(predicate: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<bool, String> + Send + Sync + 'static,
    {
        Hidden::Dynamic(Arc::new(predicate))
    }

    /// Hidden unless the caller holds `permission`
    pub fn unless_permitted(permission: impl Into<String>) -> Self {
        let permission = permission.into();
        Self::when(move |ctx| !ctx.has_permission(&permission))
    }

    /// Whether the flag is `Static(true)`
    pub fn is_always_hidden(&self) -> bool {
        matches!(self, Hidden::Static(true))
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Hidden::Dynamic(_))
    }
}

impl Default for Hidden {
    fn default() -> Self {
        Hidden::Static(false)
    }
}

impl From<bool> for Hidden {
    fn from(hidden: bool) -> Self {
        Hidden::Static(hidden)
    }
}

impl std::fmt::Debug for Hidden {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Hidden::Static(b) => f.debug_tuple("Static").field(b).finish(),
            Hidden::Dynamic(_) => f.write_str("Dynamic(<predicate>)"),
        }
    }
}

/// Open key/value bag surfaced in listings
pub type Annotations = BTreeMap<String, Value>;

/// Any capability declaration
#[derive(Debug, Clone)]
pub enum Declaration {
    Tool(ToolDeclaration),
    Prompt(PromptDeclaration),
    Resource(ResourceDeclaration),
    Router(RouterDeclaration),
    Skill(SkillDeclaration),
}

impl Declaration {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Declaration::Tool(_) => CapabilityKind::Tool,
            Declaration::Prompt(_) => CapabilityKind::Prompt,
            Declaration::Resource(_) => CapabilityKind::Resource,
            Declaration::Router(_) => CapabilityKind::Router,
            Declaration::Skill(_) => CapabilityKind::Skill,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Declaration::Tool(d) => &d.name,
            Declaration::Prompt(d) => &d.name,
            Declaration::Resource(d) => &d.name,
            Declaration::Router(d) => &d.name,
            Declaration::Skill(d) => &d.name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Declaration::Tool(d) => &d.description,
            Declaration::Prompt(d) => &d.description,
            Declaration::Resource(d) => &d.description,
            Declaration::Router(d) => &d.description,
            Declaration::Skill(d) => &d.description,
        }
    }

    pub fn hidden(&self) -> &Hidden {
        match self {
            Declaration::Tool(d) => &d.hidden,
            Declaration::Prompt(d) => &d.hidden,
            Declaration::Resource(d) => &d.hidden,
            Declaration::Router(d) => &d.hidden,
            Declaration::Skill(d) => &d.hidden,
        }
    }
}

impl From<ToolDeclaration> for Declaration {
    fn from(d: ToolDeclaration) -> Self {
        Declaration::Tool(d)
    }
}

impl From<PromptDeclaration> for Declaration {
    fn from(d: PromptDeclaration) -> Self {
        Declaration::Prompt(d)
    }
}

impl From<ResourceDeclaration> for Declaration {
    fn from(d: ResourceDeclaration) -> Self {
        Declaration::Resource(d)
    }
}

impl From<RouterDeclaration> for Declaration {
    fn from(d: RouterDeclaration) -> Self {
        Declaration::Router(d)
    }
}

impl From<SkillDeclaration> for Declaration {
    fn from(d: SkillDeclaration) -> Self {
        Declaration::Skill(d)
    }
}
