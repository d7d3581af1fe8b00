//! Calls the dispatcher understands, parsed from JSON-RPC method + params

use crate::error::{DispatchError, ValidationError, ValidationIssue};
use crate::mcp::{PromptGetParams, ResourceReadParams, ToolCallParams};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// One dispatchable request
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Ping,
    ListTools,
    ListPrompts,
    ListResources,
    CallTool { name: String, arguments: Value },
    GetPrompt { name: String, arguments: Value },
    ReadResource { uri: String },
}

impl Call {
    /// Parse a method and its params
    ///
    /// Unknown methods are `UnknownMethod`; missing or ill-shaped params are
    /// a `Validation` error against the method.
    pub fn from_method(method: &str, params: Option<Value>) -> Result<Self, DispatchError> {
        match method {
            "ping" => Ok(Call::Ping),
            "tools/list" => Ok(Call::ListTools),
            "prompts/list" => Ok(Call::ListPrompts),
            "resources/list" => Ok(Call::ListResources),
            "tools/call" => {
                let p: ToolCallParams = parse_params(method, params)?;
                Ok(Call::CallTool {
                    name: p.name,
                    arguments: p.arguments,
                })
            }
            "prompts/get" => {
                let p: PromptGetParams = parse_params(method, params)?;
                Ok(Call::GetPrompt {
                    name: p.name,
                    arguments: p.arguments,
                })
            }
            "resources/read" => {
                let p: ResourceReadParams = parse_params(method, params)?;
                Ok(Call::ReadResource { uri: p.uri })
            }
            other => Err(DispatchError::unknown(other)),
        }
    }

    /// JSON-RPC method this call answers
    pub fn method(&self) -> &'static str {
        match self {
            Call::Ping => "ping",
            Call::ListTools => "tools/list",
            Call::ListPrompts => "prompts/list",
            Call::ListResources => "resources/list",
            Call::CallTool { .. } => "tools/call",
            Call::GetPrompt { .. } => "prompts/get",
            Call::ReadResource { .. } => "resources/read",
        }
    }

    /// Capability name or URI the call targets, if any
    pub fn target(&self) -> Option<&str> {
        match self {
            Call::CallTool { name, .. } | Call::GetPrompt { name, .. } => Some(name),
            Call::ReadResource { uri } => Some(uri),
            _ => None,
        }
    }

    /// Target if present, else the method
    pub fn label(&self) -> String {
        self.target().unwrap_or(self.method()).to_string()
    }
}

fn parse_params<T: DeserializeOwned>(method: &str, params: Option<Value>) -> Result<T, DispatchError> {
    let Some(params) = params else {
        return Err(ValidationError::new(
            method,
            vec![ValidationIssue::new("$", "required", "missing params")],
        )
        .into());
    };
    serde_json::from_value(params).map_err(|e| {
        ValidationError::new(method, vec![ValidationIssue::new("$", "type", e.to_string())]).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call() {
        let call = Call::from_method(
            "tools/call",
            Some(json!({"name": "add", "arguments": {"a": 1}})),
        )
        .unwrap();
        assert_eq!(
            call,
            Call::CallTool {
                name: "add".to_string(),
                arguments: json!({"a": 1}),
            }
        );
        assert_eq!(call.method(), "tools/call");
        assert_eq!(call.target(), Some("add"));
    }

    #[test]
    fn test_arguments_default_to_null() {
        let call = Call::from_method("prompts/get", Some(json!({"name": "greet"}))).unwrap();
        assert_eq!(
            call,
            Call::GetPrompt {
                name: "greet".to_string(),
                arguments: Value::Null,
            }
        );
    }

    #[test]
    fn test_missing_params_is_validation_error() {
        let err = Call::from_method("tools/call", None).unwrap_err();
        assert_eq!(err.kind(), "validation_error");

        let err = Call::from_method("resources/read", Some(json!({"url": "x"}))).unwrap_err();
        match err {
            DispatchError::Validation(v) => {
                assert_eq!(v.target, "resources/read");
                assert!(v.has_issue_at("$"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            Call::from_method("tools/explode", None).unwrap_err(),
            DispatchError::unknown("tools/explode")
        );
        assert_eq!(Call::from_method("ping", None).unwrap().label(), "ping");
    }
}
