//! Declaration manifests
//!
//! Capabilities can be described in a TOML, YAML or JSON file instead of
//! through the builder API. A manifest carries everything except handler
//! code: tools and dynamic resources get their handlers attached to the
//! registry afterwards.
//!
//! ```toml
//! [[tools]]
//! name = "add"
//! description = "Add two numbers"
//! annotations = { readOnlyHint = true }
//! params = [
//!     { name = "a", type = "number" },
//!     { name = "b", type = "number", default = 0 },
//! ]
//!
//! [[resources]]
//! name = "config"
//! description = "Current config"
//! data = { version = 3, mode = { "$type" = "string" } }
//! dynamic = true
//!
//! [[routers]]
//! name = "math"
//! description = "Math tools"
//! members = ["add"]
//! ```

use crate::declaration::{
    Annotations, DeclarationRegistry, Hidden, PromptDeclaration, PromptTemplate,
    ResourceDeclaration, RouterDeclaration, SkillDeclaration, ToolDeclaration,
};
use crate::error::{CapstanError, Result};
use crate::mcp::PromptRole;
use crate::schema::{DataSpec, ParamDecl, ParameterSpec};
use figment::Figment;
use figment::providers::{Format, Json, Toml, Yaml};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// On-disk format of a manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    Toml,
    Yaml,
    Json,
}

impl ManifestFormat {
    /// Format implied by a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "toml" => Some(ManifestFormat::Toml),
            "yaml" | "yml" => Some(ManifestFormat::Yaml),
            "json" => Some(ManifestFormat::Json),
            _ => None,
        }
    }
}

/// `hidden = true` or `hidden = { unless_permitted = "admin" }`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HiddenSpec {
    Flag(bool),
    UnlessPermitted { unless_permitted: String },
}

impl Default for HiddenSpec {
    fn default() -> Self {
        HiddenSpec::Flag(false)
    }
}

impl From<HiddenSpec> for Hidden {
    fn from(spec: HiddenSpec) -> Self {
        match spec {
            HiddenSpec::Flag(flag) => Hidden::Static(flag),
            HiddenSpec::UnlessPermitted { unless_permitted } => Hidden::unless_permitted(unless_permitted),
        }
    }
}

/// A named parameter descriptor; every key but `name` is the descriptor
#[derive(Debug, Clone, Deserialize)]
pub struct ParamEntry {
    pub name: String,
    #[serde(flatten)]
    pub descriptor: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamEntry>,
    #[serde(default)]
    pub returns: Option<Value>,
    #[serde(default)]
    pub hidden: HiddenSpec,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamEntry>,
    /// `{{variable}}` template; without one a handler must be attached
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub role: Option<PromptRole>,
    #[serde(default)]
    pub hidden: HiddenSpec,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Data tree; `{"$type": ...}` objects are type descriptors
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub dynamic: bool,
    #[serde(default)]
    pub hidden: HiddenSpec,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub flatten: Option<bool>,
    #[serde(default)]
    pub hidden: HiddenSpec,
    #[serde(default)]
    pub annotations: Annotations,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SkillEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub hidden: HiddenSpec,
    #[serde(default)]
    pub annotations: Annotations,
}

/// Capability declarations read from a file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub tools: Vec<ToolEntry>,
    pub prompts: Vec<PromptEntry>,
    pub resources: Vec<ResourceEntry>,
    pub routers: Vec<RouterEntry>,
    pub skills: Vec<SkillEntry>,
}

fn manifest_error(kind: &str, name: &str, message: impl std::fmt::Display) -> CapstanError {
    CapstanError::Manifest(format!("{} '{}': {}", kind, name, message))
}

fn params(kind: &str, owner: &str, entries: Vec<ParamEntry>) -> Result<Vec<(String, ParamDecl)>> {
    entries
        .into_iter()
        .map(|entry| {
            let decl = ParamDecl::from_json(&Value::Object(entry.descriptor))
                .map_err(|e| manifest_error(kind, owner, format!("parameter '{}': {}", entry.name, e)))?;
            Ok((entry.name, decl))
        })
        .collect()
}

impl Manifest {
    /// Load a manifest, picking the format from the file extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CapstanError::Manifest(format!(
                "manifest '{}' does not exist",
                path.display()
            )));
        }
        let format = ManifestFormat::from_path(path).ok_or_else(|| {
            CapstanError::Manifest(format!(
                "cannot tell the format of '{}' (expected .toml, .yaml, .yml or .json)",
                path.display()
            ))
        })?;

        let figment = match format {
            ManifestFormat::Toml => Figment::from(Toml::file(path)),
            ManifestFormat::Yaml => Figment::from(Yaml::file(path)),
            ManifestFormat::Json => Figment::from(Json::file(path)),
        };
        let manifest = Self::extract(figment)?;
        debug!(path = %path.display(), declarations = manifest.len(), "Loaded manifest");
        Ok(manifest)
    }

    /// Parse manifest text in `format`
    pub fn parse(content: &str, format: ManifestFormat) -> Result<Self> {
        let figment = match format {
            ManifestFormat::Toml => Figment::from(Toml::string(content)),
            ManifestFormat::Yaml => Figment::from(Yaml::string(content)),
            ManifestFormat::Json => Figment::from(Json::string(content)),
        };
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment
            .extract()
            .map_err(|e| CapstanError::Manifest(format!("invalid manifest: {}", e)))
    }

    /// Number of declarations
    pub fn len(&self) -> usize {
        self.tools.len() + self.prompts.len() + self.resources.len() + self.routers.len() + self.skills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build a registry from the manifest
    ///
    /// Descriptor syntax errors fail here; semantic problems (unsupported
    /// merged descriptors, dangling members, missing handlers) are reported
    /// by [`DeclarationRegistry::validate`] and `freeze`.
    pub fn into_registry(self) -> Result<DeclarationRegistry> {
        let mut registry = DeclarationRegistry::new();

        for entry in self.tools {
            let mut tool = ToolDeclaration::new(&entry.name, entry.description).hidden(entry.hidden);
            for (name, decl) in params("tool", &entry.name, entry.params)? {
                tool = tool.param(name, decl);
            }
            if let Some(returns) = entry.returns {
                let spec = ParameterSpec::from_json(&returns)
                    .map_err(|e| manifest_error("tool", &entry.name, format!("returns: {}", e)))?;
                tool = tool.returns(spec);
            }
            tool.annotations = entry.annotations;
            registry.register(tool)?;
        }

        for entry in self.prompts {
            let mut prompt = PromptDeclaration::new(&entry.name, entry.description).hidden(entry.hidden);
            for (name, decl) in params("prompt", &entry.name, entry.params)? {
                prompt = prompt.param(name, decl);
            }
            if let Some(template) = entry.template {
                let template = PromptTemplate::new(template).with_role(entry.role.unwrap_or(PromptRole::User));
                prompt = prompt.handler(Arc::new(template));
            }
            prompt.annotations = entry.annotations;
            registry.register(prompt)?;
        }

        for entry in self.resources {
            let mut resource = ResourceDeclaration::new(&entry.name, entry.description).hidden(entry.hidden);
            if let Some(uri) = entry.uri {
                resource = resource.uri(uri);
            }
            if let Some(mime_type) = entry.mime_type {
                resource = resource.mime_type(mime_type);
            }
            if let Some(data) = entry.data {
                let spec = DataSpec::from_json(&data)
                    .map_err(|e| manifest_error("resource", &entry.name, format!("data: {}", e)))?;
                resource = resource.data(spec);
            }
            if entry.dynamic {
                resource = resource.dynamic();
            }
            resource.annotations = entry.annotations;
            registry.register(resource)?;
        }

        for entry in self.routers {
            let mut router = RouterDeclaration::new(&entry.name, entry.description)
                .members(entry.members)
                .hidden(entry.hidden);
            if let Some(flatten) = entry.flatten {
                router = router.flatten(flatten);
            }
            router.annotations = entry.annotations;
            registry.register(router)?;
        }

        for entry in self.skills {
            let mut skill = SkillDeclaration::new(&entry.name, entry.description)
                .members(entry.members)
                .hidden(entry.hidden);
            if let Some(instructions) = entry.instructions {
                skill = skill.instructions(instructions);
            }
            skill.annotations = entry.annotations;
            registry.register(skill)?;
        }

        Ok(registry)
    }
}
