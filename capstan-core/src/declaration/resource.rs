//! Resource declarations and handlers

use super::capability::{Annotations, Hidden};
use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::schema::{DataNode, DataSpec};
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// URI scheme given to resources declared without an explicit URI
pub const DEFAULT_RESOURCE_SCHEME: &str = "resource://";

/// Caller-supplied logic producing a dynamic resource's data
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(&self, ctx: &RequestContext) -> Result<Value, HandlerError>;
}

struct FnResourceHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ResourceHandler for FnResourceHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn read(&self, ctx: &RequestContext) -> Result<Value, HandlerError> {
        (self.f)(ctx.clone()).await
    }
}

/// Wrap an async closure as a resource handler
pub fn resource_fn<F, Fut>(f: F) -> Arc<dyn ResourceHandler>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnResourceHandler { f })
}

/// Declaration of a readable resource
///
/// Data is either a literal tree served verbatim or a shape that a handler
/// fills at read time. A declaration without data is dynamic.
#[derive(Clone)]
pub struct ResourceDeclaration {
    pub name: String,
    pub description: String,
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub data: Option<DataSpec>,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub handler: Option<Arc<dyn ResourceHandler>>,
}

impl std::fmt::Debug for ResourceDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDeclaration")
            .field("name", &self.name)
            .field("uri", &self.resolved_uri())
            .field("data", &self.data)
            .field("hidden", &self.hidden)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl ResourceDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            uri: None,
            mime_type: None,
            data: None,
            hidden: Hidden::default(),
            annotations: Annotations::new(),
            handler: None,
        }
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Serve `value` verbatim
    pub fn literal(mut self, value: Value) -> Self {
        self.data = Some(DataSpec::literal(value));
        self
    }

    /// Describe the data as a tree of literals and type descriptors
    pub fn shape(mut self, root: DataNode) -> Self {
        self.data = Some(DataSpec::typed(root));
        self
    }

    pub fn data(mut self, data: DataSpec) -> Self {
        self.data = Some(data);
        self
    }

    /// Force a handler even for literal data
    pub fn dynamic(mut self) -> Self {
        self.data = Some(match self.data.take() {
            Some(data) => data.dynamic(),
            None => DataSpec::typed(DataNode::Object(Vec::new())).dynamic(),
        });
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

    pub fn handler(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn handler_fn<F, Fut>(self, f: F) -> Self
    where
        F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.handler(resource_fn(f))
    }

    /// Declared URI, or `resource://{name}`
    pub fn resolved_uri(&self) -> String {
        self.uri
            .clone()
            .unwrap_or_else(|| format!("{}{}", DEFAULT_RESOURCE_SCHEME, self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_uri() {
        let res = ResourceDeclaration::new("config", "App config").literal(json!({"a": 1}));
        assert_eq!(res.resolved_uri(), "resource://config");

        let res = res.uri("file:///etc/app.json");
        assert_eq!(res.resolved_uri(), "file:///etc/app.json");
    }

    #[test]
    fn test_dynamic_keeps_data() {
        let res = ResourceDeclaration::new("clock", "Current time")
            .literal(json!({"now": "later"}))
            .dynamic();
        let data = res.data.unwrap();
        assert!(data.dynamic);
        assert_eq!(data.root, DataNode::Literal(json!({"now": "later"})));
    }
}
