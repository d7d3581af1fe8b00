//! Model Context Protocol (MCP) surface
//!
//! JSON-RPC 2.0 framing over a frozen capability model.
//!
//! # Example
//!
//! ```rust,ignore
//! use capstan_core::mcp::{McpServer, StdioTransport};
//!
//! let server = McpServer::builder()
//!     .config(CapstanConfig::load()?)
//!     .registry(registry)
//!     .build()?;
//!
//! server.run(&mut StdioTransport::new()).await?;
//! ```
//!
//! # Methods
//!
//! - `initialize` / `notifications/initialized` / `ping`
//! - `tools/list`, `tools/call` (routers open as tools, members as `{router}__{member}`)
//! - `resources/list`, `resources/read` (skills as `skill://{name}`)
//! - `prompts/list`, `prompts/get`
//! - `session/terminate`
//!
//! A JSON array of requests is a batch; the reply is an array in the same
//! order, without entries for notifications.

mod protocol;
mod server;
mod transport;

pub use protocol::*;
pub use server::{McpServer, McpServerBuilder};
pub use transport::{MemoryTransport, StdioTransport, Transport};
