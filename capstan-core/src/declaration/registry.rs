//! Declaration registry and the build step that freezes it
//!
//! The `DeclarationRegistry` provides:
//! - Registration with duplicate detection per `(kind, name)`
//! - Late attachment of handlers to declared capabilities
//! - Static validation of the whole declaration table
//! - `freeze`, producing the immutable [`CompiledModel`]
//!
//! # Example
//!
//! ```rust
//! use capstan_core::declaration::{BuildOptions, DeclarationRegistry, RouterDeclaration, ToolDeclaration};
//! use capstan_core::error::HandlerError;
//! use capstan_core::schema::ParameterSpec;
//!
//! let mut registry = DeclarationRegistry::new();
//! registry.register(
//!     ToolDeclaration::new("add", "Add two numbers")
//!         .param("a", ParameterSpec::number())
//!         .param("b", ParameterSpec::number())
//!         .handler_fn(|args, _ctx| async move {
//!             let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
//!             Ok::<_, HandlerError>(serde_json::json!(sum))
//!         }),
//! )?;
//! registry.register(RouterDeclaration::new("math", "Arithmetic").member("add"))?;
//!
//! let model = registry.freeze(&BuildOptions::default())?;
//! assert!(model.is_grouped("add"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use super::capability::{CapabilityKind, Declaration};
use super::group::{namespaced, NAMESPACE_SEPARATOR, RouterDeclaration, SkillDeclaration};
use super::prompt::{PromptDeclaration, PromptHandler};
use super::resource::{ResourceDeclaration, ResourceHandler};
use super::tool::{ToolDeclaration, ToolHandler};
use crate::error::{BuildFailure, DeclarationError, DeclarationWarning};
use crate::model::{
    skill_uri, CompiledModel, CompiledPrompt, CompiledResource, CompiledRouter, CompiledSkill,
    CompiledTool, ResourceContent, SkillMember, SKILL_SCHEME,
};
use crate::schema::{classify, compile, CompiledSchema, DataClass};
use crate::visibility::render_skill_document;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How `freeze` treats declaration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    /// Any error fails the build
    #[default]
    Strict,
    /// Offending capabilities are logged and skipped
    Lenient,
}

/// Options for [`DeclarationRegistry::freeze`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    /// Default for routers that do not set `flatten` themselves
    pub flatten_routers: bool,
}

impl BuildOptions {
    pub fn lenient() -> Self {
        Self {
            mode: BuildMode::Lenient,
            ..Self::default()
        }
    }

    pub fn with_flatten_routers(mut self, flatten: bool) -> Self {
        self.flatten_routers = flatten;
        self
    }
}

/// Outcome of [`DeclarationRegistry::validate`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<DeclarationError>,
    pub warnings: Vec<DeclarationWarning>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Registry collecting declarations before they are frozen
#[derive(Default)]
pub struct DeclarationRegistry {
    tools: Vec<ToolDeclaration>,
    prompts: Vec<PromptDeclaration>,
    resources: Vec<ResourceDeclaration>,
    routers: Vec<RouterDeclaration>,
    skills: Vec<SkillDeclaration>,
    index: HashMap<(CapabilityKind, String), usize>,
}

impl std::fmt::Debug for DeclarationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeclarationRegistry")
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .field("prompts", &self.prompts.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("resources", &self.resources.iter().map(|r| &r.name).collect::<Vec<_>>())
            .field("routers", &self.routers.iter().map(|r| &r.name).collect::<Vec<_>>())
            .field("skills", &self.skills.iter().map(|s| &s.name).collect::<Vec<_>>())
            .finish()
    }
}

/// Per-declaration results of the local checks
struct Analysis {
    errors: Vec<DeclarationError>,
    warnings: Vec<DeclarationWarning>,
    rejected: HashSet<(CapabilityKind, String)>,
    tool_schemas: HashMap<String, CompiledSchema>,
    prompt_schemas: HashMap<String, CompiledSchema>,
    resource_data: HashMap<String, DataClass>,
    skill_members: HashMap<String, Vec<(String, CapabilityKind)>>,
}

impl Analysis {
    fn reject(&mut self, kind: CapabilityKind, name: &str, errors: Vec<DeclarationError>) {
        if errors.is_empty() {
            return;
        }
        self.rejected.insert((kind, name.to_string()));
        self.errors.extend(errors);
    }

    fn is_rejected(&self, kind: CapabilityKind, name: &str) -> bool {
        self.rejected.contains(&(kind, name.to_string()))
    }
}

impl DeclarationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a declaration
    ///
    /// Returns an error if the same `(kind, name)` is already registered.
    pub fn register(&mut self, decl: impl Into<Declaration>) -> Result<(), DeclarationError> {
        let decl = decl.into();
        let key = (decl.kind(), decl.name().to_string());
        if self.index.contains_key(&key) {
            return Err(DeclarationError::DuplicateName {
                kind: key.0,
                name: key.1,
            });
        }

        let position = match decl {
            Declaration::Tool(d) => push(&mut self.tools, d),
            Declaration::Prompt(d) => push(&mut self.prompts, d),
            Declaration::Resource(d) => push(&mut self.resources, d),
            Declaration::Router(d) => push(&mut self.routers, d),
            Declaration::Skill(d) => push(&mut self.skills, d),
        };
        debug!(kind = %key.0, name = %key.1, "Registered declaration");
        self.index.insert(key, position);
        Ok(())
    }

    /// Register several declarations, stopping at the first duplicate
    pub fn register_all<I, D>(&mut self, decls: I) -> Result<(), DeclarationError>
    where
        I: IntoIterator<Item = D>,
        D: Into<Declaration>,
    {
        for decl in decls {
            self.register(decl)?;
        }
        Ok(())
    }

    pub fn contains(&self, kind: CapabilityKind, name: &str) -> bool {
        self.index.contains_key(&(kind, name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn position(&self, kind: CapabilityKind, name: &str) -> Result<usize, DeclarationError> {
        self.index
            .get(&(kind, name.to_string()))
            .copied()
            .ok_or_else(|| DeclarationError::NotDeclared {
                kind,
                name: name.to_string(),
            })
    }

    /// Attach an implementation to a declared tool
    pub fn attach_tool_handler(&mut self, name: &str, handler: Arc<dyn ToolHandler>) -> Result<(), DeclarationError> {
        let i = self.position(CapabilityKind::Tool, name)?;
        self.tools[i].handler = Some(handler);
        Ok(())
    }

    /// Attach an implementation to a declared prompt
    pub fn attach_prompt_handler(&mut self, name: &str, handler: Arc<dyn PromptHandler>) -> Result<(), DeclarationError> {
        let i = self.position(CapabilityKind::Prompt, name)?;
        self.prompts[i].handler = Some(handler);
        Ok(())
    }

    /// Attach an implementation to a declared resource
    pub fn attach_resource_handler(&mut self, name: &str, handler: Arc<dyn ResourceHandler>) -> Result<(), DeclarationError> {
        let i = self.position(CapabilityKind::Resource, name)?;
        self.resources[i].handler = Some(handler);
        Ok(())
    }

    /// Run every static rule without requiring implementations
    pub fn validate(&self, mode: BuildMode) -> ValidationReport {
        let analysis = self.analyze(mode, false);
        ValidationReport {
            errors: analysis.errors,
            warnings: analysis.warnings,
        }
    }

    /// Validate, compile and freeze into an immutable model
    ///
    /// Tools, prompts and dynamic resources must have implementations. In
    /// strict mode any error fails the build with the full error list; in
    /// lenient mode offending capabilities are skipped.
    pub fn freeze(self, options: &BuildOptions) -> Result<CompiledModel, BuildFailure> {
        let mut analysis = self.analyze(options.mode, true);

        for warning in &analysis.warnings {
            warn!(%warning, "Declaration warning");
        }

        if !analysis.errors.is_empty() {
            match options.mode {
                BuildMode::Strict => {
                    return Err(BuildFailure {
                        errors: analysis.errors,
                        warnings: analysis.warnings,
                    });
                }
                BuildMode::Lenient => {
                    for error in &analysis.errors {
                        warn!(%error, "Skipping declaration");
                    }
                }
            }
        }

        let tools: Vec<CompiledTool> = self
            .tools
            .into_iter()
            .filter_map(|t| {
                if analysis.is_rejected(CapabilityKind::Tool, &t.name) {
                    return None;
                }
                let schema = analysis.tool_schemas.remove(&t.name)?;
                let handler = t.handler?;
                Some(CompiledTool {
                    output_schema: t.returns.as_ref().map(|r| r.to_json_schema()),
                    name: t.name,
                    description: t.description,
                    schema,
                    hidden: t.hidden,
                    annotations: t.annotations,
                    handler,
                })
            })
            .collect();

        let prompts: Vec<CompiledPrompt> = self
            .prompts
            .into_iter()
            .filter_map(|p| {
                if analysis.is_rejected(CapabilityKind::Prompt, &p.name) {
                    return None;
                }
                let schema = analysis.prompt_schemas.remove(&p.name)?;
                let handler = p.handler?;
                Some(CompiledPrompt {
                    name: p.name,
                    description: p.description,
                    schema,
                    hidden: p.hidden,
                    annotations: p.annotations,
                    handler,
                })
            })
            .collect();

        let resources: Vec<CompiledResource> = self
            .resources
            .into_iter()
            .filter_map(|r| {
                if analysis.is_rejected(CapabilityKind::Resource, &r.name) {
                    return None;
                }
                let uri = r.resolved_uri();
                let content = match analysis.resource_data.remove(&r.name)? {
                    DataClass::Static(value) => ResourceContent::Static(value),
                    DataClass::Dynamic => ResourceContent::Dynamic(r.handler?),
                };
                let mime_type = r.mime_type.unwrap_or_else(|| match &content {
                    ResourceContent::Static(Value::String(_)) => "text/plain".to_string(),
                    _ => "application/json".to_string(),
                });
                Some(CompiledResource {
                    name: r.name,
                    description: r.description,
                    uri,
                    mime_type,
                    hidden: r.hidden,
                    annotations: r.annotations,
                    content,
                })
            })
            .collect();

        let routers: Vec<CompiledRouter> = self
            .routers
            .into_iter()
            .filter(|r| !analysis.is_rejected(CapabilityKind::Router, &r.name))
            .map(|r| CompiledRouter {
                flatten: r.flatten.unwrap_or(options.flatten_routers),
                name: r.name,
                description: r.description,
                members: r.members,
                hidden: r.hidden,
                annotations: r.annotations,
            })
            .collect();

        let describe = |name: &str, kind: CapabilityKind| -> String {
            let found = match kind {
                CapabilityKind::Tool => tools.iter().find(|t| t.name == name).map(|t| &t.description),
                CapabilityKind::Prompt => prompts.iter().find(|p| p.name == name).map(|p| &p.description),
                CapabilityKind::Resource => resources.iter().find(|r| r.name == name).map(|r| &r.description),
                CapabilityKind::Router | CapabilityKind::Skill => None,
            };
            found.cloned().unwrap_or_default()
        };

        // a tool under flattened routers only keeps its bare name
        let call_name = |name: &str, kind: CapabilityKind| -> String {
            if kind != CapabilityKind::Tool || routers.iter().any(|r| r.flatten && r.has_member(name)) {
                return name.to_string();
            }
            match routers.iter().find(|r| r.has_member(name)) {
                Some(router) => namespaced(&router.name, name),
                None => name.to_string(),
            }
        };

        let skills: Vec<CompiledSkill> = self
            .skills
            .into_iter()
            .filter_map(|s| {
                if analysis.is_rejected(CapabilityKind::Skill, &s.name) {
                    return None;
                }
                let members: Vec<SkillMember> = analysis
                    .skill_members
                    .remove(&s.name)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(name, kind)| SkillMember {
                        description: describe(&name, kind),
                        call_name: call_name(&name, kind),
                        name,
                        kind,
                    })
                    .collect();
                let document =
                    render_skill_document(&s.name, &s.description, &members, s.instructions.as_deref());
                Some(CompiledSkill {
                    uri: skill_uri(&s.name),
                    name: s.name,
                    description: s.description,
                    members,
                    hidden: s.hidden,
                    annotations: s.annotations,
                    document,
                })
            })
            .collect();

        let model = CompiledModel::new(tools, prompts, resources, routers, skills);
        info!(
            tools = model.count(CapabilityKind::Tool),
            prompts = model.count(CapabilityKind::Prompt),
            resources = model.count(CapabilityKind::Resource),
            routers = model.count(CapabilityKind::Router),
            skills = model.count(CapabilityKind::Skill),
            skipped = analysis.rejected.len(),
            "Froze capability model"
        );
        Ok(model)
    }

    fn analyze(&self, mode: BuildMode, require_impl: bool) -> Analysis {
        let mut analysis = Analysis {
            errors: Vec::new(),
            warnings: Vec::new(),
            rejected: HashSet::new(),
            tool_schemas: HashMap::new(),
            prompt_schemas: HashMap::new(),
            resource_data: HashMap::new(),
            skill_members: HashMap::new(),
        };

        for tool in &self.tools {
            let kind = CapabilityKind::Tool;
            let mut errors = check_common(kind, &tool.name, &tool.description);
            match compile(&tool.name, &tool.params) {
                Ok(schema) => {
                    analysis.tool_schemas.insert(tool.name.clone(), schema);
                }
                Err(e) => errors.push(e),
            }
            if let Some(returns) = &tool.returns {
                // Documentation only, but still has to be a well-formed descriptor
                if let Err(e) = compile(&tool.name, &[("$returns".to_string(), returns.clone().into())]) {
                    errors.push(e);
                }
            }
            if require_impl && tool.handler.is_none() {
                errors.push(missing_impl(kind, &tool.name));
            }
            analysis.reject(kind, &tool.name, errors);
        }

        for prompt in &self.prompts {
            let kind = CapabilityKind::Prompt;
            let mut errors = check_common(kind, &prompt.name, &prompt.description);
            match compile(&prompt.name, &prompt.params) {
                Ok(schema) => {
                    analysis.prompt_schemas.insert(prompt.name.clone(), schema);
                }
                Err(e) => errors.push(e),
            }
            if require_impl && prompt.handler.is_none() {
                errors.push(missing_impl(kind, &prompt.name));
            }
            analysis.reject(kind, &prompt.name, errors);
        }

        let mut uris: HashMap<String, &str> = HashMap::new();
        for resource in &self.resources {
            let kind = CapabilityKind::Resource;
            let mut errors = check_common(kind, &resource.name, &resource.description);
            let uri = resource.resolved_uri();
            if uri.starts_with(SKILL_SCHEME) {
                errors.push(invalid_name(kind, &resource.name, format!("uri '{uri}' uses the reserved skill scheme")));
            } else if let Some(other) = uris.get(&uri) {
                errors.push(invalid_name(kind, &resource.name, format!("uri '{uri}' is already used by resource '{other}'")));
            } else {
                uris.insert(uri, &resource.name);
            }

            let class = match &resource.data {
                Some(data) => classify(&resource.name, data),
                None => Ok(DataClass::Dynamic),
            };
            match class {
                Ok(class) => {
                    if class == DataClass::Dynamic && require_impl && resource.handler.is_none() {
                        errors.push(missing_impl(kind, &resource.name));
                    }
                    analysis.resource_data.insert(resource.name.clone(), class);
                }
                Err(e) => errors.push(e),
            }
            analysis.reject(kind, &resource.name, errors);
        }

        let tool_names: HashSet<&str> = self.tools.iter().map(|t| t.name.as_str()).collect();
        let prompt_names: HashSet<&str> = self.prompts.iter().map(|p| p.name.as_str()).collect();
        let resource_names: HashSet<&str> = self.resources.iter().map(|r| r.name.as_str()).collect();

        // In lenient mode a member skipped above no longer resolves
        let resolves = |analysis: &Analysis, kind: CapabilityKind, name: &str| -> Option<bool> {
            let declared = match kind {
                CapabilityKind::Tool => tool_names.contains(name),
                CapabilityKind::Prompt => prompt_names.contains(name),
                CapabilityKind::Resource => resource_names.contains(name),
                CapabilityKind::Router | CapabilityKind::Skill => false,
            };
            if !declared {
                return None;
            }
            Some(mode == BuildMode::Strict || !analysis.is_rejected(kind, name))
        };

        let mut referenced: HashSet<(CapabilityKind, &str)> = HashSet::new();

        for router in &self.routers {
            let kind = CapabilityKind::Router;
            let mut errors = check_common(kind, &router.name, &router.description);
            if router.name.contains(NAMESPACE_SEPARATOR) {
                errors.push(invalid_name(
                    kind,
                    &router.name,
                    format!("router names cannot contain '{NAMESPACE_SEPARATOR}'"),
                ));
            }
            if tool_names.contains(router.name.as_str()) {
                errors.push(invalid_name(kind, &router.name, "collides with a tool of the same name"));
            }
            let mut seen = HashSet::new();
            for member in &router.members {
                let reason = if !seen.insert(member.as_str()) {
                    Some("member is listed twice")
                } else {
                    match resolves(&analysis, CapabilityKind::Tool, member) {
                        None => Some("no tool with this name"),
                        Some(false) => Some("tool was skipped"),
                        Some(true) => None,
                    }
                };
                match reason {
                    Some(reason) => errors.push(invalid_ref(kind, &router.name, member, reason)),
                    None => {
                        referenced.insert((CapabilityKind::Tool, member.as_str()));
                    }
                }
            }
            analysis.reject(kind, &router.name, errors);
        }

        for skill in &self.skills {
            let kind = CapabilityKind::Skill;
            let mut errors = check_common(kind, &skill.name, &skill.description);
            let mut members = Vec::with_capacity(skill.members.len());
            let mut seen = HashSet::new();
            for member in &skill.members {
                if !seen.insert(member.as_str()) {
                    errors.push(invalid_ref(kind, &skill.name, member, "member is listed twice"));
                    continue;
                }
                let mut skipped = false;
                let mut found = None;
                for candidate in [CapabilityKind::Tool, CapabilityKind::Prompt, CapabilityKind::Resource] {
                    match resolves(&analysis, candidate, member) {
                        Some(true) => {
                            found = Some(candidate);
                            break;
                        }
                        Some(false) => skipped = true,
                        None => {}
                    }
                }
                match found {
                    Some(member_kind) => {
                        referenced.insert((member_kind, member.as_str()));
                        members.push((member.clone(), member_kind));
                    }
                    None if skipped => {
                        errors.push(invalid_ref(kind, &skill.name, member, "member was skipped"))
                    }
                    None => errors.push(invalid_ref(
                        kind,
                        &skill.name,
                        member,
                        "no tool, prompt or resource with this name",
                    )),
                }
            }
            if errors.is_empty() {
                if skill.members.is_empty() {
                    analysis.warnings.push(DeclarationWarning::EmptySkill {
                        name: skill.name.clone(),
                    });
                }
                analysis.skill_members.insert(skill.name.clone(), members);
            }
            analysis.reject(kind, &skill.name, errors);
        }

        let hidden_leaves = self
            .tools
            .iter()
            .map(|t| (CapabilityKind::Tool, &t.name, &t.hidden))
            .chain(self.prompts.iter().map(|p| (CapabilityKind::Prompt, &p.name, &p.hidden)))
            .chain(self.resources.iter().map(|r| (CapabilityKind::Resource, &r.name, &r.hidden)));
        for (kind, name, hidden) in hidden_leaves {
            if hidden.is_always_hidden()
                && !analysis.is_rejected(kind, name)
                && !referenced.contains(&(kind, name.as_str()))
            {
                analysis.warnings.push(DeclarationWarning::OrphanedHiddenCapability {
                    kind,
                    name: name.clone(),
                });
            }
        }

        analysis
    }
}

fn push<T>(items: &mut Vec<T>, item: T) -> usize {
    items.push(item);
    items.len() - 1
}

fn check_common(kind: CapabilityKind, name: &str, description: &str) -> Vec<DeclarationError> {
    let mut errors = Vec::new();
    if name.trim().is_empty() {
        errors.push(invalid_name(kind, name, "name is empty"));
    } else if name.chars().any(char::is_whitespace) {
        errors.push(invalid_name(kind, name, "name contains whitespace"));
    }
    if description.trim().is_empty() {
        errors.push(DeclarationError::MissingDescription {
            kind,
            name: name.to_string(),
        });
    }
    errors
}

fn invalid_name(kind: CapabilityKind, name: &str, reason: impl Into<String>) -> DeclarationError {
    DeclarationError::InvalidName {
        kind,
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn invalid_ref(owner_kind: CapabilityKind, owner: &str, member: &str, reason: &str) -> DeclarationError {
    DeclarationError::InvalidReference {
        owner_kind,
        owner: owner.to_string(),
        member: member.to_string(),
        reason: reason.to_string(),
    }
}

fn missing_impl(kind: CapabilityKind, name: &str) -> DeclarationError {
    DeclarationError::MissingImplementation {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::Hidden;
    use crate::error::HandlerError;
    use crate::schema::{ParamDecl, ParameterSpec};
    use serde_json::json;

    fn tool(name: &str) -> ToolDeclaration {
        ToolDeclaration::new(name, format!("The {name} tool"))
            .handler_fn(|args, _ctx| async move { Ok::<_, HandlerError>(args) })
    }

    #[test]
    fn test_duplicate_names_per_kind() {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("search")).unwrap();

        let err = registry.register(tool("search")).unwrap_err();
        assert_eq!(
            err,
            DeclarationError::DuplicateName {
                kind: CapabilityKind::Tool,
                name: "search".to_string()
            }
        );

        // Same name, different kind
        registry
            .register(PromptDeclaration::new("search", "Search prompt").template("find {{q}}"))
            .unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(CapabilityKind::Prompt, "search"));
    }

    #[test]
    fn test_invalid_references_fail_strict_build() {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("deploy")).unwrap();
        registry
            .register(RouterDeclaration::new("ops", "Operations").members(["deploy", "rollback"]))
            .unwrap();
        registry
            .register(SkillDeclaration::new("release", "Release flow").members(["deploy", "notes"]))
            .unwrap();

        let failure = registry.freeze(&BuildOptions::default()).unwrap_err();
        assert_eq!(failure.errors.len(), 2);
        assert!(failure.errors.iter().any(|e| matches!(
            e,
            DeclarationError::InvalidReference { owner, member, .. } if owner == "ops" && member == "rollback"
        )));
        assert!(failure.errors.iter().any(|e| matches!(
            e,
            DeclarationError::InvalidReference { owner, member, .. } if owner == "release" && member == "notes"
        )));
    }

    #[test]
    fn test_router_members_must_be_tools() {
        let mut registry = DeclarationRegistry::new();
        registry
            .register(PromptDeclaration::new("draft", "Draft text").template("x"))
            .unwrap();
        registry
            .register(RouterDeclaration::new("writing", "Writing").member("draft"))
            .unwrap();
        let report = registry.validate(BuildMode::Strict);
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0], DeclarationError::InvalidReference { .. }));
    }

    #[test]
    fn test_validate_does_not_require_handlers() {
        let mut registry = DeclarationRegistry::new();
        registry
            .register(ToolDeclaration::new("fetch", "Fetch a URL").param("url", ParameterSpec::string()))
            .unwrap();
        assert!(registry.validate(BuildMode::Strict).is_ok());

        let failure = registry.freeze(&BuildOptions::default()).unwrap_err();
        assert_eq!(
            failure.errors,
            vec![DeclarationError::MissingImplementation {
                kind: CapabilityKind::Tool,
                name: "fetch".to_string()
            }]
        );
    }

    #[test]
    fn test_lenient_build_skips_and_cascades() {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("good")).unwrap();
        registry
            .register(tool("bad").param(
                "filters",
                ParamDecl::merge(ParameterSpec::object(), ParameterSpec::object()),
            ))
            .unwrap();
        registry
            .register(RouterDeclaration::new("mixed", "Uses bad").members(["good", "bad"]))
            .unwrap();
        registry
            .register(RouterDeclaration::new("clean", "Uses good").member("good"))
            .unwrap();

        let model = registry.freeze(&BuildOptions::lenient()).unwrap();
        assert!(model.tool("good").is_some());
        assert!(model.tool("bad").is_none());
        assert!(model.router("mixed").is_none());
        assert!(model.router("clean").is_some());
    }

    #[test]
    fn test_strict_reports_every_error() {
        let mut registry = DeclarationRegistry::new();
        registry.register(ToolDeclaration::new("a", "")).unwrap();
        registry
            .register(ResourceDeclaration::new("status", "Status").data(
                crate::schema::DataSpec::from_json(&json!({"name": "x", "count": {"$type": "integer"}})).unwrap(),
            ))
            .unwrap();
        registry
            .register(RouterDeclaration::new("bad__name", "Router"))
            .unwrap();

        let failure = registry.freeze(&BuildOptions::default()).unwrap_err();
        let kinds: Vec<&str> = failure
            .errors
            .iter()
            .map(|e| match e {
                DeclarationError::MissingDescription { .. } => "description",
                DeclarationError::MissingImplementation { .. } => "impl",
                DeclarationError::MixedLiteralType { .. } => "mixed",
                DeclarationError::InvalidName { .. } => "name",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["description", "impl", "mixed", "name"]);
    }

    #[test]
    fn test_warnings() {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("secret").hidden(true)).unwrap();
        registry.register(tool("internal").hidden(true)).unwrap();
        registry
            .register(tool("gated").hidden(Hidden::unless_permitted("admin")))
            .unwrap();
        registry
            .register(SkillDeclaration::new("ops", "Ops").member("internal"))
            .unwrap();
        registry.register(SkillDeclaration::new("empty", "Nothing")).unwrap();

        let report = registry.validate(BuildMode::Strict);
        assert!(report.is_ok());
        assert_eq!(
            report.warnings,
            vec![
                DeclarationWarning::EmptySkill {
                    name: "empty".to_string()
                },
                DeclarationWarning::OrphanedHiddenCapability {
                    kind: CapabilityKind::Tool,
                    name: "secret".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_freeze_builds_skill_documents_and_resources() {
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("bump")).unwrap();
        registry
            .register(ResourceDeclaration::new("version", "Current version").literal(json!("1.4.0")))
            .unwrap();
        registry
            .register(
                SkillDeclaration::new("release", "Cut a release")
                    .members(["bump", "version"])
                    .instructions("Bump first."),
            )
            .unwrap();

        let model = registry.freeze(&BuildOptions::default()).unwrap();
        let skill = model.skill("release").unwrap();
        assert_eq!(skill.uri, "skill://release");
        assert_eq!(skill.members[1].kind, CapabilityKind::Resource);
        assert!(skill.document.contains("| `bump` | tool | The bump tool |"));

        let version = model.resource_by_uri("resource://version").unwrap();
        assert_eq!(version.mime_type, "text/plain");
        assert!(matches!(&version.content, ResourceContent::Static(v) if v == "1.4.0"));
    }

    #[test]
    fn test_skill_document_names_grouped_tools_by_route() {
        let mut registry = DeclarationRegistry::new();
        for name in ["bump", "publish", "lint"] {
            registry.register(tool(name)).unwrap();
        }
        registry
            .register(RouterDeclaration::new("ship", "Shipping").member("publish"))
            .unwrap();
        registry
            .register(RouterDeclaration::new("checks", "Checks").member("lint").flatten(true))
            .unwrap();
        registry
            .register(SkillDeclaration::new("release", "Cut a release").members(["bump", "publish", "lint"]))
            .unwrap();

        let model = registry.freeze(&BuildOptions::default()).unwrap();
        let skill = model.skill("release").unwrap();
        let call_names: Vec<&str> = skill.members.iter().map(|m| m.call_name.as_str()).collect();
        assert_eq!(call_names, vec!["bump", "ship__publish", "lint"]);
        assert_eq!(skill.members[1].name, "publish");
        assert!(skill.document.contains("| `ship__publish` | tool | The publish tool |"));
        assert!(!skill.document.contains("| `publish` |"));

        // flattened by default: every member keeps its bare name
        let mut registry = DeclarationRegistry::new();
        registry.register(tool("publish")).unwrap();
        registry
            .register(RouterDeclaration::new("ship", "Shipping").member("publish"))
            .unwrap();
        registry
            .register(SkillDeclaration::new("release", "Cut a release").member("publish"))
            .unwrap();
        let model = registry
            .freeze(&BuildOptions::default().with_flatten_routers(true))
            .unwrap();
        assert_eq!(model.skill("release").unwrap().members[0].call_name, "publish");
    }

    #[test]
    fn test_attach_handler_to_undeclared() {
        let mut registry = DeclarationRegistry::new();
        let handler = crate::declaration::tool_fn(|_a, _c| async { Ok::<_, HandlerError>(Value::Null) });
        let err = registry.attach_tool_handler("ghost", handler).unwrap_err();
        assert!(matches!(err, DeclarationError::NotDeclared { .. }));
    }
}
