//! Capability declarations and the registry that freezes them
//!
//! A capability is declared once, through the builders in this module or a
//! [`Manifest`](crate::manifest::Manifest), and moved into the
//! [`DeclarationRegistry`]. `freeze` validates the whole table and produces
//! the immutable [`CompiledModel`](crate::model::CompiledModel) that serves
//! requests.

mod capability;
mod group;
mod prompt;
mod registry;
mod resource;
mod tool;

pub use capability::{Annotations, CapabilityKind, Declaration, Hidden, HiddenPredicate};
pub use group::{namespaced, RouterDeclaration, SkillDeclaration, NAMESPACE_SEPARATOR};
pub use prompt::{PromptDeclaration, PromptHandler, PromptTemplate};
pub use registry::{BuildMode, BuildOptions, DeclarationRegistry, ValidationReport};
pub use resource::{resource_fn, ResourceDeclaration, ResourceHandler, DEFAULT_RESOURCE_SCHEME};
pub use tool::{tool_fn, FnToolHandler, ToolDeclaration, ToolHandler};
