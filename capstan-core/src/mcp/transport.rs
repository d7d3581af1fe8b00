//! MCP Transport Implementations
//!
//! Transports move raw JSON-RPC messages. Parsing, batching and error
//! framing are the server's job, so a malformed line still gets a proper
//! parse-error response.

use super::protocol::JsonRpcRequest;
use crate::error::{CapstanError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin, Stdout};

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send {
    /// Receive the next raw message; `None` at end of input
    async fn receive(&mut self) -> Result<Option<String>>;

    /// Send one message (a response object or a batch array)
    async fn send(&mut self, message: Value) -> Result<()>;
}

/// Stdio transport for MCP
///
/// Messages are sent as newline-delimited JSON on stdin/stdout. Logs must
/// go to stderr.
pub struct StdioTransport {
    stdin: BufReader<Stdin>,
    stdout: Stdout,
}

impl StdioTransport {
    /// Create a new stdio transport
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        loop {
            let mut line = String::new();
            let read = self
                .stdin
                .read_line(&mut line)
                .await
                .map_err(|e| CapstanError::Transport(format!("Failed to read from stdin: {}", e)))?;

            if read == 0 {
                return Ok(None);
            }

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                return Ok(Some(trimmed.to_string()));
            }
        }
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        let json = serde_json::to_string(&message)?;

        self.stdout
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .map_err(|e| CapstanError::Transport(format!("Failed to write to stdout: {}", e)))?;

        self.stdout
            .flush()
            .await
            .map_err(|e| CapstanError::Transport(format!("Failed to flush stdout: {}", e)))?;

        Ok(())
    }
}

/// In-memory transport for testing
#[derive(Debug, Default)]
pub struct MemoryTransport {
    incoming: VecDeque<String>,
    sent: Vec<Value>,
}

impl MemoryTransport {
    /// Create a new memory transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a request to be received
    pub fn push_request(&mut self, request: JsonRpcRequest) {
        self.incoming
            .push_back(serde_json::to_string(&request).unwrap_or_default());
    }

    /// Queue a raw line, e.g. a batch array or malformed input
    pub fn push_raw(&mut self, line: impl Into<String>) {
        self.incoming.push_back(line.into());
    }

    /// Everything sent so far
    pub fn sent(&self) -> &[Value] {
        &self.sent
    }

    /// Take the last sent message
    pub fn pop_sent(&mut self) -> Option<Value> {
        self.sent.pop()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&mut self) -> Result<Option<String>> {
        Ok(self.incoming.pop_front())
    }

    async fn send(&mut self, message: Value) -> Result<()> {
        self.sent.push(message);
        Ok(())
    }
}
