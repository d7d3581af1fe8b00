//! Tool declarations and handlers

use super::capability::{Annotations, Hidden};
use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::schema::{ParamDecl, ParameterSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Caller-supplied tool logic
///
/// Receives arguments already validated and coerced by the tool's schema.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &RequestContext) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`ToolHandler`]
pub struct FnToolHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnToolHandler<F>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, args: Value, ctx: &RequestContext) -> Result<Value, HandlerError> {
        (self.f)(args, ctx.clone()).await
    }
}

/// Wrap an async closure as a tool handler
///
/// ```rust
/// use capstan_core::declaration::tool_fn;
/// use capstan_core::error::HandlerError;
///
/// let handler = tool_fn(|args, _ctx| async move {
///     Ok::<_, HandlerError>(serde_json::json!({"echo": args}))
/// });
/// ```
pub fn tool_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnToolHandler { f })
}

/// Declaration of a callable tool
#[derive(Clone)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// Ordered parameter list
    pub params: Vec<(String, ParamDecl)>,
    /// Result shape, shown as `outputSchema` and never enforced
    pub returns: Option<ParameterSpec>,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub handler: Option<Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDeclaration")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("params", &self.params.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("hidden", &self.hidden)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl ToolDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            returns: None,
            hidden: Hidden::default(),
            annotations: Annotations::new(),
            handler: None,
        }
    }

    /// Append a parameter
    pub fn param(mut self, name: impl Into<String>, decl: impl Into<ParamDecl>) -> Self {
        self.params.push((name.into(), decl.into()));
        self
    }

    /// Document the result shape
    pub fn returns(mut self, spec: ParameterSpec) -> Self {
        self.returns = Some(spec);
        self
    }

    pub fn hidden(mut self, hidden: impl Into<Hidden>) -> Self {
        self.hidden = hidden.into();
        self
    }

    pub fn annotate(mut self, key: impl Into<String>, value: Value) -> Self {
        self.annotations.insert(key.into(), value);
        self
    }

    pub fn read_only(self) -> Self {
        self.annotate("readOnlyHint", Value::Bool(true))
    }

    pub fn destructive(self) -> Self {
        self.annotate("destructiveHint", Value::Bool(true))
    }

    pub fn idempotent(self) -> Self {
        self.annotate("idempotentHint", Value::Bool(true))
    }

    pub fn category(self, category: impl Into<String>) -> Self {
        self.annotate("category", Value::String(category.into()))
    }

    pub fn handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach an async closure as the handler
    pub fn handler_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(Value, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.handler(tool_fn(f))
    }
}
