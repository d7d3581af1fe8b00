//! Immutable capability model
//!
//! Produced once by [`DeclarationRegistry::freeze`](crate::declaration::DeclarationRegistry::freeze)
//! and shared read-only (behind an `Arc`) by the visibility engine, the
//! dispatcher and every in-flight request.

use crate::declaration::{
    Annotations, CapabilityKind, Hidden, PromptHandler, ResourceHandler, ToolHandler,
};
use crate::schema::CompiledSchema;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Locator scheme of generated skill documents
pub const SKILL_SCHEME: &str = "skill://";

/// `skill://{name}` locator, with the name percent-encoded
pub fn skill_uri(name: &str) -> String {
    format!("{}{}", SKILL_SCHEME, urlencoding::encode(name))
}

#[derive(Clone)]
pub struct CompiledTool {
    pub name: String,
    pub description: String,
    pub schema: CompiledSchema,
    pub output_schema: Option<Value>,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub handler: Arc<dyn ToolHandler>,
}

#[derive(Clone)]
pub struct CompiledPrompt {
    pub name: String,
    pub description: String,
    pub schema: CompiledSchema,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub handler: Arc<dyn PromptHandler>,
}

/// Where a resource's content comes from
#[derive(Clone)]
pub enum ResourceContent {
    Static(Value),
    Dynamic(Arc<dyn ResourceHandler>),
}

#[derive(Clone)]
pub struct CompiledResource {
    pub name: String,
    pub description: String,
    pub uri: String,
    pub mime_type: String,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub content: ResourceContent,
}

#[derive(Debug, Clone)]
pub struct CompiledRouter {
    pub name: String,
    pub description: String,
    /// Member tool names in declaration order
    pub members: Vec<String>,
    /// Effective flatten flag (router override or server default)
    pub flatten: bool,
    pub hidden: Hidden,
    pub annotations: Annotations,
}

impl CompiledRouter {
    pub fn has_member(&self, tool: &str) -> bool {
        self.members.iter().any(|m| m == tool)
    }
}

/// A resolved skill member
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkillMember {
    pub name: String,
    /// Name a client calls it by: `{router}__{tool}` for grouped tools
    pub call_name: String,
    pub kind: CapabilityKind,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct CompiledSkill {
    pub name: String,
    pub description: String,
    pub uri: String,
    pub members: Vec<SkillMember>,
    pub hidden: Hidden,
    pub annotations: Annotations,
    /// Generated markdown served on read
    pub document: String,
}

macro_rules! debug_by_name {
    ($($ty:ident),*) => {
        $(
            impl std::fmt::Debug for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.debug_struct(stringify!($ty))
                        .field("name", &self.name)
                        .field("hidden", &self.hidden)
                        .finish_non_exhaustive()
                }
            }
        )*
    };
}

debug_by_name!(CompiledTool, CompiledPrompt, CompiledResource);

/// Frozen capability tables
pub struct CompiledModel {
    tools: Vec<CompiledTool>,
    prompts: Vec<CompiledPrompt>,
    resources: Vec<CompiledResource>,
    routers: Vec<CompiledRouter>,
    skills: Vec<CompiledSkill>,
    tool_index: HashMap<String, usize>,
    prompt_index: HashMap<String, usize>,
    resource_index: HashMap<String, usize>,
    uri_index: HashMap<String, usize>,
    router_index: HashMap<String, usize>,
    skill_index: HashMap<String, usize>,
    /// Tools reachable only through a non-flattened router
    grouped: HashSet<String>,
}

impl std::fmt::Debug for CompiledModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("tools", &self.tools.len())
            .field("prompts", &self.prompts.len())
            .field("resources", &self.resources.len())
            .field("routers", &self.routers.len())
            .field("skills", &self.skills.len())
            .field("grouped", &self.grouped)
            .finish()
    }
}

fn index_by<T>(items: &[T], key: impl Fn(&T) -> &str) -> HashMap<String, usize> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item).to_string(), i))
        .collect()
}

impl CompiledModel {
    pub(crate) fn new(
        tools: Vec<CompiledTool>,
        prompts: Vec<CompiledPrompt>,
        resources: Vec<CompiledResource>,
        routers: Vec<CompiledRouter>,
        skills: Vec<CompiledSkill>,
    ) -> Self {
        let flattened: HashSet<&str> = routers
            .iter()
            .filter(|r| r.flatten)
            .flat_map(|r| r.members.iter().map(String::as_str))
            .collect();
        let grouped = routers
            .iter()
            .filter(|r| !r.flatten)
            .flat_map(|r| r.members.iter())
            .filter(|m| !flattened.contains(m.as_str()))
            .cloned()
            .collect();

        Self {
            tool_index: index_by(&tools, |t| &t.name),
            prompt_index: index_by(&prompts, |p| &p.name),
            resource_index: index_by(&resources, |r| &r.name),
            uri_index: index_by(&resources, |r| &r.uri),
            router_index: index_by(&routers, |r| &r.name),
            skill_index: index_by(&skills, |s| &s.name),
            tools,
            prompts,
            resources,
            routers,
            skills,
            grouped,
        }
    }

    pub fn tools(&self) -> &[CompiledTool] {
        &self.tools
    }

    pub fn prompts(&self) -> &[CompiledPrompt] {
        &self.prompts
    }

    pub fn resources(&self) -> &[CompiledResource] {
        &self.resources
    }

    pub fn routers(&self) -> &[CompiledRouter] {
        &self.routers
    }

    pub fn skills(&self) -> &[CompiledSkill] {
        &self.skills
    }

    /// Tool by bare name, grouped or not
    pub fn tool(&self, name: &str) -> Option<&CompiledTool> {
        self.tool_index.get(name).map(|&i| &self.tools[i])
    }

    pub fn prompt(&self, name: &str) -> Option<&CompiledPrompt> {
        self.prompt_index.get(name).map(|&i| &self.prompts[i])
    }

    pub fn resource(&self, name: &str) -> Option<&CompiledResource> {
        self.resource_index.get(name).map(|&i| &self.resources[i])
    }

    pub fn resource_by_uri(&self, uri: &str) -> Option<&CompiledResource> {
        self.uri_index.get(uri).map(|&i| &self.resources[i])
    }

    pub fn router(&self, name: &str) -> Option<&CompiledRouter> {
        self.router_index.get(name).map(|&i| &self.routers[i])
    }

    pub fn skill(&self, name: &str) -> Option<&CompiledSkill> {
        self.skill_index.get(name).map(|&i| &self.skills[i])
    }

    /// Whether the tool is only reachable as `{router}__{tool}`
    pub fn is_grouped(&self, tool: &str) -> bool {
        self.grouped.contains(tool)
    }

    /// Number of frozen capabilities of `kind`
    pub fn count(&self, kind: CapabilityKind) -> usize {
        match kind {
            CapabilityKind::Tool => self.tools.len(),
            CapabilityKind::Prompt => self.prompts.len(),
            CapabilityKind::Resource => self.resources.len(),
            CapabilityKind::Router => self.routers.len(),
            CapabilityKind::Skill => self.skills.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        CapabilityKind::ALL.iter().all(|k| self.count(*k) == 0)
    }
}
