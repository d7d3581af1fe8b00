//! Visibility and grouping engine
//!
//! Decides, per request, which capabilities a listing shows:
//! - `Hidden::Static` flags are read directly
//! - `Hidden::Dynamic` predicates run against the [`RequestContext`]; a
//!   predicate that errors or panics leaves the capability visible
//! - members of a non-flattened router are listed only through the router
//! - skills are listed among resources as `skill://{name}` documents

mod skill_doc;

pub use skill_doc::render_skill_document;

use crate::context::RequestContext;
use crate::declaration::{Annotations, CapabilityKind, Hidden};
use crate::mcp::{
    McpPrompt, McpResource, McpTool, PromptArgument, PromptsListResult, ResourcesListResult,
    ToolsListResult,
};
use crate::model::{CompiledModel, CompiledPrompt, CompiledRouter, CompiledTool};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::warn;

/// MIME type of generated skill documents
pub const SKILL_MIME_TYPE: &str = "text/markdown";

/// Evaluate a hidden flag for one request
///
/// Fail-open: a predicate returning `Err` or panicking counts as visible.
pub fn is_visible(kind: CapabilityKind, name: &str, hidden: &Hidden, ctx: &RequestContext) -> bool {
    match hidden {
        Hidden::Static(hidden) => !hidden,
        Hidden::Dynamic(predicate) => match catch_unwind(AssertUnwindSafe(|| predicate(ctx))) {
            Ok(Ok(hidden)) => !hidden,
            Ok(Err(error)) => {
                warn!(%kind, name, %error, "Hidden predicate failed, treating as visible");
                true
            }
            Err(_) => {
                warn!(%kind, name, "Hidden predicate panicked, treating as visible");
                true
            }
        },
    }
}

/// Names discoverable for one request, per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilitySet {
    names: BTreeMap<CapabilityKind, BTreeSet<String>>,
}

impl VisibilitySet {
    fn insert(&mut self, kind: CapabilityKind, name: &str) {
        self.names.entry(kind).or_default().insert(name.to_string());
    }

    pub fn contains(&self, kind: CapabilityKind, name: &str) -> bool {
        self.names.get(&kind).is_some_and(|set| set.contains(name))
    }

    /// Sorted names of `kind`
    pub fn names(&self, kind: CapabilityKind) -> Vec<&str> {
        self.names
            .get(&kind)
            .map(|set| set.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.names.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One entry of a listing, in MCP wire shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CapabilitySummary {
    Tool(McpTool),
    Prompt(McpPrompt),
    Resource(McpResource),
}

impl CapabilitySummary {
    pub fn name(&self) -> &str {
        match self {
            CapabilitySummary::Tool(t) => &t.name,
            CapabilitySummary::Prompt(p) => &p.name,
            CapabilitySummary::Resource(r) => &r.name,
        }
    }
}

fn annotations_map(annotations: &Annotations) -> Option<Map<String, Value>> {
    if annotations.is_empty() {
        None
    } else {
        Some(annotations.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

/// Listing entry for a tool, under `name`
pub(crate) fn tool_summary(tool: &CompiledTool, name: &str) -> McpTool {
    McpTool {
        name: name.to_string(),
        description: tool.description.clone(),
        input_schema: tool.schema.json_schema().clone(),
        output_schema: tool.output_schema.clone(),
        annotations: annotations_map(&tool.annotations),
    }
}

/// Listing entry for a router, which appears as a tool that opens it
pub(crate) fn router_summary(router: &CompiledRouter) -> McpTool {
    let mut annotations = annotations_map(&router.annotations).unwrap_or_default();
    annotations
        .entry("readOnlyHint".to_string())
        .or_insert(Value::Bool(true));
    annotations.insert("router".to_string(), Value::Bool(true));
    McpTool {
        name: router.name.clone(),
        description: router.description.clone(),
        input_schema: json!({"type": "object", "properties": {}}),
        output_schema: None,
        annotations: Some(annotations),
    }
}

fn prompt_summary(prompt: &CompiledPrompt) -> McpPrompt {
    let properties = &prompt.schema.json_schema()["properties"];
    McpPrompt {
        name: prompt.name.clone(),
        description: Some(prompt.description.clone()),
        arguments: prompt
            .schema
            .params()
            .iter()
            .map(|p| PromptArgument {
                name: p.name.clone(),
                description: properties[p.name.as_str()]["description"]
                    .as_str()
                    .map(str::to_string),
                required: p.required,
            })
            .collect(),
    }
}

impl CompiledModel {
    /// Capabilities visible to `ctx`, per kind
    pub fn compute_visibility(&self, ctx: &RequestContext) -> VisibilitySet {
        let mut set = VisibilitySet::default();
        for kind in CapabilityKind::ALL {
            for (entry_kind, name) in self.discoverable_names(kind, ctx) {
                set.insert(entry_kind, name);
            }
        }
        set
    }

    /// Listing entries of `kind` visible to `ctx`, in declaration order
    ///
    /// Tool listings include router entries; resource listings include skill
    /// documents.
    pub fn list_discoverable(&self, kind: CapabilityKind, ctx: &RequestContext) -> Vec<CapabilitySummary> {
        let mut out = Vec::new();
        match kind {
            CapabilityKind::Tool => {
                out.extend(self.visible_tools(ctx).map(|t| CapabilitySummary::Tool(tool_summary(t, &t.name))));
                out.extend(self.visible_routers(ctx).map(|r| CapabilitySummary::Tool(router_summary(r))));
            }
            CapabilityKind::Router => {
                out.extend(self.visible_routers(ctx).map(|r| CapabilitySummary::Tool(router_summary(r))));
            }
            CapabilityKind::Prompt => {
                out.extend(
                    self.prompts()
                        .iter()
                        .filter(|p| is_visible(CapabilityKind::Prompt, &p.name, &p.hidden, ctx))
                        .map(|p| CapabilitySummary::Prompt(prompt_summary(p))),
                );
            }
            CapabilityKind::Resource | CapabilityKind::Skill => {
                if kind == CapabilityKind::Resource {
                    out.extend(
                        self.resources()
                            .iter()
                            .filter(|r| is_visible(CapabilityKind::Resource, &r.name, &r.hidden, ctx))
                            .map(|r| {
                                CapabilitySummary::Resource(McpResource {
                                    uri: r.uri.clone(),
                                    name: r.name.clone(),
                                    description: Some(r.description.clone()),
                                    mime_type: Some(r.mime_type.clone()),
                                })
                            }),
                    );
                }
                out.extend(
                    self.skills()
                        .iter()
                        .filter(|s| is_visible(CapabilityKind::Skill, &s.name, &s.hidden, ctx))
                        .map(|s| {
                            CapabilitySummary::Resource(McpResource {
                                uri: s.uri.clone(),
                                name: s.name.clone(),
                                description: Some(s.description.clone()),
                                mime_type: Some(SKILL_MIME_TYPE.to_string()),
                            })
                        }),
                );
            }
        }
        out
    }

    /// tools/list entries visible to `ctx`
    pub fn list_tools(&self, ctx: &RequestContext) -> ToolsListResult {
        let tools = self
            .list_discoverable(CapabilityKind::Tool, ctx)
            .into_iter()
            .filter_map(|entry| match entry {
                CapabilitySummary::Tool(tool) => Some(tool),
                _ => None,
            })
            .collect();
        ToolsListResult { tools }
    }

    /// prompts/list entries visible to `ctx`
    pub fn list_prompts(&self, ctx: &RequestContext) -> PromptsListResult {
        let prompts = self
            .list_discoverable(CapabilityKind::Prompt, ctx)
            .into_iter()
            .filter_map(|entry| match entry {
                CapabilitySummary::Prompt(prompt) => Some(prompt),
                _ => None,
            })
            .collect();
        PromptsListResult { prompts }
    }

    /// resources/list entries visible to `ctx`, skill documents included
    pub fn list_resources(&self, ctx: &RequestContext) -> ResourcesListResult {
        let resources = self
            .list_discoverable(CapabilityKind::Resource, ctx)
            .into_iter()
            .filter_map(|entry| match entry {
                CapabilitySummary::Resource(resource) => Some(resource),
                _ => None,
            })
            .collect();
        ResourcesListResult { resources }
    }

    /// Visible members of a router, under their namespaced names
    pub fn router_members(&self, router: &CompiledRouter, ctx: &RequestContext) -> Vec<McpTool> {
        router
            .members
            .iter()
            .filter_map(|m| self.tool(m))
            .filter(|t| is_visible(CapabilityKind::Tool, &t.name, &t.hidden, ctx))
            .map(|t| tool_summary(t, &crate::declaration::namespaced(&router.name, &t.name)))
            .collect()
    }

    fn visible_tools<'a>(&'a self, ctx: &'a RequestContext) -> impl Iterator<Item = &'a CompiledTool> + 'a {
        self.tools()
            .iter()
            .filter(move |t| !self.is_grouped(&t.name))
            .filter(move |t| is_visible(CapabilityKind::Tool, &t.name, &t.hidden, ctx))
    }

    fn visible_routers<'a>(&'a self, ctx: &'a RequestContext) -> impl Iterator<Item = &'a CompiledRouter> + 'a {
        self.routers()
            .iter()
            .filter(move |r| is_visible(CapabilityKind::Router, &r.name, &r.hidden, ctx))
    }

    fn discoverable_names<'a>(&'a self, kind: CapabilityKind, ctx: &'a RequestContext) -> Vec<(CapabilityKind, &'a str)> {
        match kind {
            CapabilityKind::Tool => self.visible_tools(ctx).map(|t| (kind, t.name.as_str())).collect(),
            CapabilityKind::Router => self.visible_routers(ctx).map(|r| (kind, r.name.as_str())).collect(),
            CapabilityKind::Prompt => self
                .prompts()
                .iter()
                .filter(|p| is_visible(kind, &p.name, &p.hidden, ctx))
                .map(|p| (kind, p.name.as_str()))
                .collect(),
            CapabilityKind::Resource => self
                .resources()
                .iter()
                .filter(|r| is_visible(kind, &r.name, &r.hidden, ctx))
                .map(|r| (kind, r.name.as_str()))
                .collect(),
            CapabilityKind::Skill => self
                .skills()
                .iter()
                .filter(|s| is_visible(kind, &s.name, &s.hidden, ctx))
                .map(|s| (kind, s.name.as_str()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{
        BuildOptions, DeclarationRegistry, Hidden, PromptDeclaration, ResourceDeclaration,
        RouterDeclaration, SkillDeclaration, ToolDeclaration,
    };
    use crate::error::HandlerError;
    use crate::schema::ParameterSpec;

    fn tool(name: &str) -> ToolDeclaration {
        ToolDeclaration::new(name, format!("{name} tool"))
            .handler_fn(|args, _ctx| async move { Ok::<_, HandlerError>(args) })
    }

    fn model(flatten: bool) -> CompiledModel {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("search")).unwrap();
        registry.register(tool("hidden_tool").hidden(true)).unwrap();
        registry
            .register(tool("admin_tool").hidden(Hidden::unless_permitted("admin")))
            .unwrap();
        registry
            .register(tool("flaky").hidden(Hidden::try_when(|_| Err("lookup failed".to_string()))))
            .unwrap();
        registry
            .register(tool("panicky").hidden(Hidden::when(|_| panic!("predicate bug"))))
            .unwrap();
        registry.register(tool("create_issue")).unwrap();
        registry.register(tool("close_issue")).unwrap();
        registry
            .register(RouterDeclaration::new("github", "GitHub operations").members(["create_issue", "close_issue"]))
            .unwrap();
        registry
            .register(
                PromptDeclaration::new("summarize", "Summarize text")
                    .param("text", ParameterSpec::string().describe("Input text"))
                    .param("style", ParameterSpec::string().optional())
                    .template("{{text}}"),
            )
            .unwrap();
        registry
            .register(ResourceDeclaration::new("readme", "Project readme").literal(serde_json::json!("# Hi")))
            .unwrap();
        registry
            .register(SkillDeclaration::new("triage", "Issue triage").members(["hidden_tool", "search"]))
            .unwrap();
        registry
            .freeze(&BuildOptions::default().with_flatten_routers(flatten))
            .unwrap()
    }

    fn names(summaries: &[CapabilitySummary]) -> Vec<&str> {
        summaries.iter().map(CapabilitySummary::name).collect()
    }

    #[test]
    fn test_hidden_default_and_dynamic() {
        let model = model(false);
        let anonymous = model.list_discoverable(CapabilityKind::Tool, &RequestContext::new());
        assert_eq!(names(&anonymous), vec!["search", "flaky", "panicky", "github"]);

        let admin = RequestContext::new().with_permission("admin");
        let listed = model.list_discoverable(CapabilityKind::Tool, &admin);
        assert_eq!(names(&listed), vec!["search", "admin_tool", "flaky", "panicky", "github"]);
    }

    #[test]
    fn test_flattened_routers_list_members() {
        let model = model(true);
        let listed = model.list_discoverable(CapabilityKind::Tool, &RequestContext::new());
        assert_eq!(
            names(&listed),
            vec!["search", "flaky", "panicky", "create_issue", "close_issue", "github"]
        );
    }

    #[test]
    fn test_router_entry_and_members() {
        let model = model(false);
        let ctx = RequestContext::new();
        let listed = model.list_discoverable(CapabilityKind::Router, &ctx);
        let CapabilitySummary::Tool(entry) = &listed[0] else {
            panic!("router should list as a tool");
        };
        assert_eq!(entry.annotations.as_ref().unwrap()["router"], Value::Bool(true));

        let router = model.router("github").unwrap();
        let members: Vec<String> = model.router_members(router, &ctx).into_iter().map(|t| t.name).collect();
        assert_eq!(members, vec!["github__create_issue", "github__close_issue"]);
    }

    #[test]
    fn test_resources_include_skills() {
        let model = model(false);
        let listed = model.list_discoverable(CapabilityKind::Resource, &RequestContext::new());
        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json[0]["uri"], "resource://readme");
        assert_eq!(json[0]["mimeType"], "text/plain");
        assert_eq!(json[1]["uri"], "skill://triage");
        assert_eq!(json[1]["mimeType"], "text/markdown");
    }

    #[test]
    fn test_prompt_arguments() {
        let model = model(false);
        let listed = model.list_discoverable(CapabilityKind::Prompt, &RequestContext::new());
        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json[0]["arguments"][0]["name"], "text");
        assert_eq!(json[0]["arguments"][0]["description"], "Input text");
        assert_eq!(json[0]["arguments"][0]["required"], true);
        assert_eq!(json[0]["arguments"][1]["required"], false);
    }

    #[test]
    fn test_compute_visibility() {
        let model = model(false);
        let set = model.compute_visibility(&RequestContext::new());
        assert!(set.contains(CapabilityKind::Tool, "search"));
        assert!(!set.contains(CapabilityKind::Tool, "hidden_tool"));
        assert!(!set.contains(CapabilityKind::Tool, "create_issue"));
        assert!(set.contains(CapabilityKind::Router, "github"));
        assert!(set.contains(CapabilityKind::Skill, "triage"));
        assert_eq!(set.names(CapabilityKind::Prompt), vec!["summarize"]);
    }
}
