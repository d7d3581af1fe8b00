//! # Capstan - Declarative capabilities for MCP servers
//!
//! Capstan turns a table of declared tools, prompts, resources, routers and
//! skills into a validated, immutable model and serves it over the Model
//! Context Protocol:
//! - Declarations validated as a whole (strict or lenient)
//! - Parameter schemas compiled once, with type coercion at call time
//! - Per-request visibility and permission-gated capabilities
//! - Router namespacing (`{router}__{member}`) and skill documents
//! - JSON-RPC batches, sequential or parallel, under one deadline
//! - Idle-expiring sessions for stateful transports
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use capstan_core::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let mut registry = DeclarationRegistry::new();
//!     registry.register(
//!         ToolDeclaration::new("add", "Add two numbers")
//!             .param("a", ParameterSpec::number())
//!             .param("b", ParameterSpec::number().with_default(json!(0)))
//!             .handler_fn(|args, _ctx| async move {
//!                 let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
//!                 Ok::<_, HandlerError>(json!(sum))
//!             }),
//!     )?;
//!
//!     let server = McpServer::builder()
//!         .config(CapstanConfig::load()?)
//!         .registry(registry)
//!         .build()?;
//!
//!     server.run(&mut StdioTransport::new()).await
//! }
//! ```
//!
//! ## Layout
//!
//! - [`declaration`] and [`manifest`]: authoring capabilities
//! - [`schema`]: parameter descriptors and the compiled validator
//! - [`model`]: the frozen capability model
//! - [`visibility`]: what a request may see
//! - [`dispatch`] and [`batch`]: executing calls
//! - [`session`]: per-client state
//! - [`mcp`]: JSON-RPC framing, server and transports

pub mod batch;
pub mod config;
pub mod context;
pub mod declaration;
pub mod dispatch;
pub mod error;
pub mod manifest;
pub mod mcp;
pub mod model;
pub mod schema;
pub mod session;
pub mod visibility;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::batch::{BatchEntry, BatchExecutor, BatchItem, BatchResponse};
    pub use crate::config::{
        BatchConfig, BatchMode, BuildConfig, CapstanConfig, HiddenCallPolicy, ServerConfig,
        SessionConfig, VisibilityConfig,
    };
    pub use crate::context::RequestContext;
    pub use crate::declaration::{
        namespaced, resource_fn, tool_fn, Annotations, BuildMode, BuildOptions, CapabilityKind,
        Declaration, DeclarationRegistry, Hidden, PromptDeclaration, PromptHandler,
        PromptTemplate, ResourceDeclaration, ResourceHandler, RouterDeclaration,
        SkillDeclaration, ToolDeclaration, ToolHandler, ValidationReport,
    };
    pub use crate::dispatch::{Call, CallExecutor, Dispatcher, Target};
    pub use crate::error::{
        BuildFailure, CapstanError, DeclarationError, DeclarationWarning, DispatchError,
        HandlerError, Result, ValidationError, ValidationIssue,
    };
    pub use crate::manifest::{Manifest, ManifestFormat};
    pub use crate::mcp::{
        ContentBlock, JsonRpcError, JsonRpcRequest, JsonRpcResponse, McpPrompt, McpResource,
        McpServer, McpServerBuilder, McpTool, MemoryTransport, PromptRole, RequestId,
        StdioTransport, Transport,
    };
    pub use crate::model::{CompiledModel, ResourceContent};
    pub use crate::schema::{DataNode, DataSpec, ParamDecl, ParamType, ParameterSpec};
    pub use crate::session::{Session, SessionId, SessionStore};
    pub use crate::visibility::{CapabilitySummary, VisibilitySet};
}
