//! MCP Server Implementation
//!
//! Frames JSON-RPC messages (single requests, batches and notifications)
//! around the dispatcher, the batch executor and the session store.

use super::protocol::*;
use super::transport::Transport;
use crate::batch::{BatchExecutor, BatchItem};
use crate::config::CapstanConfig;
use crate::context::RequestContext;
use crate::declaration::DeclarationRegistry;
use crate::dispatch::{Call, CallExecutor, Dispatcher};
use crate::error::{CapstanError, DispatchError, ValidationError, ValidationIssue};
use crate::model::CompiledModel;
use crate::session::SessionStore;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Methods handled by the server itself rather than the dispatcher
const INITIALIZE: &str = "initialize";
const TERMINATE_SESSION: &str = "session/terminate";
const INITIALIZED_NOTIFICATION: &str = "notifications/initialized";

/// MCP server over a frozen capability model
pub struct McpServer {
    config: CapstanConfig,
    dispatcher: Arc<Dispatcher>,
    batch: BatchExecutor<Dispatcher>,
    sessions: Option<Arc<SessionStore>>,
    initialized: AtomicBool,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("server", &self.config.server)
            .field("model", self.dispatcher.model())
            .field("sessions", &self.sessions.as_ref().map(|s| s.len()))
            .field("initialized", &self.initialized)
            .finish()
    }
}

fn to_value(response: JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

fn request_id(id: Value) -> RequestId {
    serde_json::from_value(id).unwrap_or(RequestId::Null)
}

fn invalid_params(method: &str, message: impl Into<String>) -> DispatchError {
    ValidationError::new(method, vec![ValidationIssue::new("$", "type", message)]).into()
}

impl McpServer {
    /// Create a new MCP server builder
    pub fn builder() -> McpServerBuilder {
        McpServerBuilder::new()
    }

    pub fn config(&self) -> &CapstanConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn model(&self) -> &Arc<CompiledModel> {
        self.dispatcher.model()
    }

    /// Session store, when sessions are enabled
    pub fn sessions(&self) -> Option<&Arc<SessionStore>> {
        self.sessions.as_ref()
    }

    /// Whether a client has completed `initialize`
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Handle one parsed request
    ///
    /// Returns `None` for notifications.
    pub async fn handle_request(&self, request: JsonRpcRequest, ctx: &RequestContext) -> Option<JsonRpcResponse> {
        let Some(id) = request.id.clone() else {
            self.handle_notification(request, ctx).await;
            return None;
        };
        debug!(method = %request.method, ?id, "Handling request");
        let outcome = self.respond(request.method.as_str(), request.params, ctx).await;
        Some(JsonRpcResponse::from_outcome(id, outcome))
    }

    async fn respond(&self, method: &str, params: Option<Value>, ctx: &RequestContext) -> Result<Value, DispatchError> {
        match method {
            INITIALIZE => self.initialize(params, ctx),
            TERMINATE_SESSION => self.terminate_session(params, ctx),
            _ => {
                let call = Call::from_method(method, params)?;
                self.dispatcher.execute(call, ctx).await
            }
        }
    }

    async fn handle_notification(&self, request: JsonRpcRequest, ctx: &RequestContext) {
        match request.method.as_str() {
            INITIALIZED_NOTIFICATION => {
                self.initialized.store(true, Ordering::Relaxed);
                debug!("Client initialized");
            }
            method if method.starts_with("notifications/") => {
                debug!(method, "Ignoring notification");
            }
            method => {
                // JSON-RPC: notifications still run, the result is dropped
                if let Err(e) = self.respond(method, request.params, ctx).await {
                    debug!(method, error = %e, "Notification failed");
                }
            }
        }
    }

    fn initialize(&self, params: Option<Value>, ctx: &RequestContext) -> Result<Value, DispatchError> {
        let params: InitializeParams = params
            .ok_or_else(|| invalid_params(INITIALIZE, "missing initialize params"))
            .and_then(|p| serde_json::from_value(p).map_err(|e| invalid_params(INITIALIZE, e.to_string())))?;

        info!(
            client = %params.client_info.name,
            client_version = %params.client_info.version,
            protocol = %params.protocol_version,
            "Client initializing"
        );

        let session_id = match (&self.sessions, &ctx.session_id) {
            (_, Some(existing)) => Some(existing.clone()),
            (Some(store), None) => Some(store.create(ctx)),
            (None, None) => None,
        };

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ListChanged::default()),
                resources: Some(ResourcesCapability::default()),
                prompts: Some(ListChanged::default()),
            },
            server_info: ServerInfo {
                name: self.config.server.name.clone(),
                version: self.config.server.version.clone(),
            },
            meta: session_id.map(|id| json!({"sessionId": id})),
        };

        serde_json::to_value(result).map_err(|e| DispatchError::HandlerExecution {
            name: INITIALIZE.to_string(),
            message: e.to_string(),
            data: None,
        })
    }

    /// End a session
    ///
    /// Within a session the attached session is terminated; a `sessionId`
    /// param naming any other session is rejected. Only a message with no
    /// session attached may name its target in params, which makes knowing
    /// the id enough to end it on a stateless transport.
    fn terminate_session(&self, params: Option<Value>, ctx: &RequestContext) -> Result<Value, DispatchError> {
        let requested = params
            .as_ref()
            .and_then(|p| p.get("sessionId"))
            .and_then(Value::as_str);

        let id = match (&ctx.session_id, requested) {
            (Some(attached), Some(other)) if attached != other => {
                return Err(invalid_params(
                    TERMINATE_SESSION,
                    "sessionId does not match the attached session",
                ));
            }
            (Some(attached), _) => attached.clone(),
            (None, Some(requested)) => requested.to_string(),
            (None, None) => return Err(invalid_params(TERMINATE_SESSION, "no session to terminate")),
        };

        let store = self
            .sessions
            .as_ref()
            .ok_or_else(|| DispatchError::SessionNotFound { id: id.clone() })?;
        store.terminate(&id)?;
        Ok(json!({}))
    }

    /// Handle one raw message outside any session
    ///
    /// Returns the serialized response (an object, or an array for a batch),
    /// or `None` when nothing should be sent back.
    pub async fn handle_message(&self, raw: &str) -> Option<Value> {
        self.process(raw, &RequestContext::new()).await
    }

    /// Handle one raw message within a session
    ///
    /// An unknown, terminated or expired session yields a
    /// `session_not_found` error response.
    pub async fn handle_session_message(&self, session_id: &str, raw: &str) -> Option<Value> {
        let session = match &self.sessions {
            Some(store) => store.get(session_id),
            None => Err(DispatchError::SessionNotFound {
                id: session_id.to_string(),
            }),
        };

        match session {
            Ok(session) => {
                session.touch();
                let ctx = session.context().await;
                self.process(raw, &ctx).await
            }
            Err(e) => {
                let id = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("id").cloned())
                    .map(request_id)
                    .unwrap_or(RequestId::Null);
                Some(to_value(JsonRpcResponse::error(id, e.into())))
            }
        }
    }

    async fn process(&self, raw: &str, ctx: &RequestContext) -> Option<Value> {
        let message: Value = match serde_json::from_str(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Unparseable message");
                return Some(to_value(JsonRpcResponse::error(
                    RequestId::Null,
                    JsonRpcError::parse_error(),
                )));
            }
        };

        match message {
            Value::Array(items) => self.handle_batch(items, ctx).await,
            single => match serde_json::from_value::<JsonRpcRequest>(single) {
                Ok(request) => self.handle_request(request, ctx).await.map(to_value),
                Err(e) => Some(to_value(JsonRpcResponse::from_outcome(
                    RequestId::Null,
                    Err(DispatchError::invalid_request(e.to_string())),
                ))),
            },
        }
    }

    /// Batch framing: one response per request with an id, in order;
    /// notifications run first and get no entry
    async fn handle_batch(&self, raw_items: Vec<Value>, ctx: &RequestContext) -> Option<Value> {
        if raw_items.is_empty() {
            return Some(to_value(JsonRpcResponse::from_outcome(
                RequestId::Null,
                Err(DispatchError::invalid_request("empty batch")),
            )));
        }

        let mut items = Vec::with_capacity(raw_items.len());
        for raw in raw_items {
            match serde_json::from_value::<JsonRpcRequest>(raw) {
                Ok(request) => match request.id.clone() {
                    None => self.handle_notification(request, ctx).await,
                    Some(id) => {
                        let id = serde_json::to_value(id).unwrap_or(Value::Null);
                        let call = match request.method.as_str() {
                            INITIALIZE | TERMINATE_SESSION => Err(DispatchError::invalid_request(format!(
                                "'{}' cannot be batched",
                                request.method
                            ))),
                            method => Call::from_method(method, request.params),
                        };
                        items.push(BatchItem { id, call });
                    }
                },
                Err(e) => items.push(BatchItem::failed(
                    Value::Null,
                    DispatchError::invalid_request(e.to_string()),
                )),
            }
        }

        if items.is_empty() {
            return None;
        }

        match self.batch.run(items, ctx).await {
            Ok(response) => Some(Value::Array(
                response
                    .into_iter()
                    .map(|entry| to_value(JsonRpcResponse::from_outcome(request_id(entry.id), entry.outcome)))
                    .collect(),
            )),
            Err(e) => Some(to_value(JsonRpcResponse::error(RequestId::Null, e.into()))),
        }
    }

    /// Start the idle-session sweeper, if sessions are enabled
    pub fn spawn_session_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.sessions
            .as_ref()
            .map(|store| store.spawn_sweeper(self.config.sessions.sweep_interval, cancel))
    }

    /// Serve a transport until it reaches end of input
    pub async fn run<T: Transport>(&self, transport: &mut T) -> crate::error::Result<()> {
        let cancel = CancellationToken::new();
        let sweeper = self.spawn_session_sweeper(cancel.clone());

        let result = loop {
            match transport.receive().await {
                Ok(Some(line)) => {
                    if let Some(response) = self.handle_message(&line).await {
                        if let Err(e) = transport.send(response).await {
                            break Err(e);
                        }
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => {
                    error!("Transport error: {}", e);
                    break Err(e);
                }
            }
        };

        cancel.cancel();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }
        info!("Transport closed");
        result
    }
}

/// Builder for MCP Server
#[derive(Default)]
pub struct McpServerBuilder {
    config: CapstanConfig,
    registry: Option<DeclarationRegistry>,
    model: Option<Arc<CompiledModel>>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: CapstanConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.server.name = name.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.server.version = version.into();
        self
    }

    /// Declarations to freeze with the configured build options
    pub fn registry(mut self, registry: DeclarationRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// An already frozen model; takes precedence over `registry`
    pub fn model(mut self, model: Arc<CompiledModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Freeze the registry (if needed) and assemble the server
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, a failed freeze, or when neither a
    /// registry nor a model was supplied.
    pub fn build(self) -> crate::error::Result<McpServer> {
        self.config.validate()?;

        let model = match (self.model, self.registry) {
            (Some(model), _) => model,
            (None, Some(registry)) => Arc::new(registry.freeze(&self.config.build_options())?),
            (None, None) => {
                return Err(CapstanError::Configuration(
                    "an MCP server needs a registry or a compiled model".to_string(),
                ));
            }
        };

        let dispatcher =
            Arc::new(Dispatcher::new(model).with_policy(self.config.visibility.hidden_call_policy));
        let batch = BatchExecutor::new(Arc::clone(&dispatcher), self.config.batch.clone());
        let sessions = self
            .config
            .sessions
            .enabled
            .then(|| Arc::new(SessionStore::from_config(&self.config.sessions)));

        Ok(McpServer {
            config: self.config,
            dispatcher,
            batch,
            sessions,
            initialized: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::ToolDeclaration;
    use crate::error::HandlerError;
    use crate::mcp::MemoryTransport;
    use crate::schema::ParameterSpec;

    fn server() -> McpServer {
        let mut registry = DeclarationRegistry::new();
        registry
            .register(
                ToolDeclaration::new("echo", "Echoes back the input")
                    .param("message", ParameterSpec::string())
                    .handler_fn(|args, _ctx| async move { Ok::<_, HandlerError>(args["message"].clone()) }),
            )
            .unwrap();
        McpServer::builder().name("test-server").registry(registry).build().unwrap()
    }

    fn init_request(id: i64) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "1.0"}
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_initialize_creates_session() {
        let server = server();
        let response = server.handle_message(&init_request(1)).await.unwrap();
        assert_eq!(response["result"]["serverInfo"]["name"], "test-server");
        let session_id = response["result"]["_meta"]["sessionId"].as_str().unwrap();
        assert!(server.sessions().unwrap().get(session_id).is_ok());
    }

    #[tokio::test]
    async fn test_initialized_notification_gets_no_response() {
        let server = server();
        let out = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert!(out.is_none());
        assert!(server.is_initialized());
    }

    #[tokio::test]
    async fn test_parse_error_and_unknown_method() {
        let server = server();
        let response = server.handle_message("{not json").await.unwrap();
        assert_eq!(response["error"]["code"], codes::PARSE_ERROR);
        assert_eq!(response["id"], Value::Null);

        let response = server
            .handle_message(r#"{"jsonrpc":"2.0","id":7,"method":"tools/explode"}"#)
            .await
            .unwrap();
        assert_eq!(response["id"], 7);
        assert_eq!(response["error"]["code"], codes::METHOD_NOT_FOUND);
        assert_eq!(response["error"]["data"]["type"], "unknown_method");
    }

    #[tokio::test]
    async fn test_run_over_memory_transport() {
        let server = server();
        let mut transport = MemoryTransport::new();
        transport.push_raw(init_request(1));
        transport.push_request(JsonRpcRequest::notification(INITIALIZED_NOTIFICATION));
        transport.push_request(
            JsonRpcRequest::new(2i64, "tools/call")
                .with_params(json!({"name": "echo", "arguments": {"message": "hi"}})),
        );

        server.run(&mut transport).await.unwrap();

        assert_eq!(transport.sent().len(), 2);
        assert_eq!(transport.sent()[1]["result"]["content"][0]["text"], "hi");
    }
}
