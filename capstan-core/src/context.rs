//! Request context passed to visibility predicates and handlers

use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Per-request context
///
/// The permission set is opaque to Capstan: whatever the auth layer in front
/// of the transport grants is copied in here and only ever read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestContext {
    /// Session the request belongs to (stateful transports only)
    pub session_id: Option<String>,

    /// Trace ID for correlation
    pub trace_id: Option<String>,

    /// Granted permissions
    pub permissions: BTreeSet<String>,

    /// Request-scoped state
    pub state: Map<String, Value>,
}

impl RequestContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Set session ID
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Set trace ID
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Grant a permission
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.insert(permission.into());
        self
    }

    /// Grant several permissions
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Set a state value
    pub fn with_state(mut self, key: impl Into<String>, value: Value) -> Self {
        self.state.insert(key.into(), value);
        self
    }

    /// Check a permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    /// Read a state value
    pub fn get_state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }
}
