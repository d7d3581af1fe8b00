//! Error types for Capstan operations
//!
//! Errors are split by the phase that produces them:
//! - [`DeclarationError`] / [`DeclarationWarning`]: build time, before serving
//! - [`DispatchError`]: per call at runtime, always returned to the caller
//! - [`CapstanError`]: crate-level failures (config, manifests, transports)

use crate::declaration::CapabilityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Result type for Capstan operations
pub type Result<T> = std::result::Result<T, CapstanError>;

/// Error types for the Capstan framework
#[derive(Debug, thiserror::Error)]
pub enum CapstanError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Declaration manifest could not be loaded
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// A single declaration was rejected
    #[error(transparent)]
    Declaration(#[from] DeclarationError),

    /// Freezing the registry failed
    #[error(transparent)]
    Build(#[from] BuildFailure),

    /// Transport I/O failed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for CapstanError {
    fn from(s: String) -> Self {
        CapstanError::Other(s)
    }
}

impl From<&str> for CapstanError {
    fn from(s: &str) -> Self {
        CapstanError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for CapstanError {
    fn from(err: anyhow::Error) -> Self {
        CapstanError::Other(err.to_string())
    }
}

/// Build-time error attached to one declaration
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeclarationError {
    /// `(kind, name)` registered twice
    #[error("{kind} '{name}' is already registered")]
    DuplicateName { kind: CapabilityKind, name: String },

    /// Router or skill member that does not resolve
    #[error("{owner_kind} '{owner}' references '{member}': {reason}")]
    InvalidReference {
        owner_kind: CapabilityKind,
        owner: String,
        member: String,
        reason: String,
    },

    /// Composite or partial parameter descriptor
    #[error("unsupported parameter spec for '{param}' in '{owner}': {message}")]
    UnsupportedParamSpec {
        owner: String,
        param: String,
        message: String,
    },

    /// Descriptor whose constraints contradict themselves or the type
    #[error("malformed parameter spec for '{param}' in '{owner}': {message}")]
    MalformedParamSpec {
        owner: String,
        param: String,
        message: String,
    },

    /// Resource data mixing literal and type-descriptor leaves
    #[error(
        "resource '{resource}' mixes literal values ({}) with type descriptors ({}); \
         mark it dynamic and supply an implementation, or make every field a literal",
        literal_paths.join(", "),
        type_paths.join(", ")
    )]
    MixedLiteralType {
        resource: String,
        literal_paths: Vec<String>,
        type_paths: Vec<String>,
    },

    /// Tool, prompt or dynamic resource without a handler
    #[error("{kind} '{name}' has no implementation")]
    MissingImplementation { kind: CapabilityKind, name: String },

    /// Empty description
    #[error("{kind} '{name}' is missing a description")]
    MissingDescription { kind: CapabilityKind, name: String },

    /// Name that cannot be dispatched
    #[error("invalid {kind} name '{name}': {reason}")]
    InvalidName {
        kind: CapabilityKind,
        name: String,
        reason: String,
    },

    /// Handler attached to a name that was never declared
    #[error("{kind} '{name}' is not declared")]
    NotDeclared { kind: CapabilityKind, name: String },
}

impl DeclarationError {
    /// The `(kind, name)` of the declaration this error belongs to, when known
    pub fn subject(&self) -> Option<(CapabilityKind, &str)> {
        match self {
            DeclarationError::DuplicateName { kind, name }
            | DeclarationError::MissingImplementation { kind, name }
            | DeclarationError::MissingDescription { kind, name }
            | DeclarationError::InvalidName { kind, name, .. }
            | DeclarationError::NotDeclared { kind, name } => Some((*kind, name)),
            DeclarationError::InvalidReference {
                owner_kind, owner, ..
            } => Some((*owner_kind, owner)),
            DeclarationError::MixedLiteralType { resource, .. } => {
                Some((CapabilityKind::Resource, resource))
            }
            DeclarationError::UnsupportedParamSpec { .. }
            | DeclarationError::MalformedParamSpec { .. } => None,
        }
    }
}

/// Build-time diagnostic that never fails the build
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeclarationWarning {
    /// Hidden capability that no router or skill makes reachable
    #[error("{kind} '{name}' is hidden but referenced by no router or skill")]
    OrphanedHiddenCapability { kind: CapabilityKind, name: String },

    /// Skill without members
    #[error("skill '{name}' has no members")]
    EmptySkill { name: String },
}

/// Outcome of a failed `freeze`
#[derive(Debug, Clone, thiserror::Error)]
#[error("declaration build failed with {} error(s): {}", errors.len(), summarize(errors))]
pub struct BuildFailure {
    /// Every error found, in declaration order
    pub errors: Vec<DeclarationError>,
    /// Warnings collected before the failure
    pub warnings: Vec<DeclarationWarning>,
}

fn summarize(errors: &[DeclarationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// A single argument that failed validation or coercion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Path into the arguments (e.g. `filters.limit`, `tags[2]`)
    pub path: String,

    /// Human-readable message
    pub message: String,

    /// Stable error code
    pub code: String,
}

impl ValidationIssue {
    /// Create a new issue
    pub fn new(path: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            code: code.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.path, self.message)
    }
}

/// Argument validation failure for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Capability whose schema rejected the input
    pub target: String,

    /// Every issue found
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    /// Create a validation error from collected issues
    pub fn new(target: impl Into<String>, issues: Vec<ValidationIssue>) -> Self {
        Self {
            target: target.into(),
            issues,
        }
    }

    /// Whether any issue sits at `path`
    pub fn has_issue_at(&self, path: &str) -> bool {
        self.issues.iter().any(|i| i.path == path)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid arguments for '{}': {}",
            self.target,
            self.issues
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        )
    }
}

impl std::error::Error for ValidationError {}

/// Failure reported by caller-supplied handler logic
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    /// Human-readable message
    pub message: String,

    /// Additional structured context
    pub data: Option<Value>,
}

impl HandlerError {
    /// Create a new handler error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured context
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

/// Runtime error for a single call, never fatal to the process
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// Method or capability name that does not resolve
    #[error("unknown method '{name}'")]
    UnknownMethod { name: String },

    /// Arguments rejected by the compiled schema
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Handler returned an error or panicked
    #[error("handler for '{name}' failed: {message}")]
    HandlerExecution {
        name: String,
        message: String,
        data: Option<Value>,
    },

    /// Whole batch rejected before execution
    #[error("batch of {size} items exceeds the maximum of {max}")]
    BatchSizeExceeded { size: usize, max: usize },

    /// Item still pending when the batch deadline fired
    #[error("batch deadline of {timeout:?} elapsed before this item completed")]
    BatchTimeout { timeout: Duration },

    /// Unknown, terminated or expired session
    #[error("session '{id}' not found")]
    SessionNotFound { id: String },

    /// Structurally invalid request
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
}

impl DispatchError {
    /// Stable discriminator used in wire payloads and logs
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::UnknownMethod { .. } => "unknown_method",
            DispatchError::Validation(_) => "validation_error",
            DispatchError::HandlerExecution { .. } => "handler_execution_error",
            DispatchError::BatchSizeExceeded { .. } => "batch_size_exceeded",
            DispatchError::BatchTimeout { .. } => "batch_timeout",
            DispatchError::SessionNotFound { .. } => "session_not_found",
            DispatchError::InvalidRequest { .. } => "invalid_request",
        }
    }

    /// Create an invalid request error
    pub fn invalid_request(message: impl Into<String>) -> Self {
        DispatchError::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an unknown method error
    pub fn unknown(name: impl Into<String>) -> Self {
        DispatchError::UnknownMethod { name: name.into() }
    }

    /// Whether the caller's input was at fault
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DispatchError::UnknownMethod { .. }
                | DispatchError::Validation(_)
                | DispatchError::BatchSizeExceeded { .. }
                | DispatchError::SessionNotFound { .. }
                | DispatchError::InvalidRequest { .. }
        )
    }
}
