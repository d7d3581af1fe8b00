//! Prompt declarations, handlers and templates

use super::capability::{Annotations, Hidden};
use crate::context::RequestContext;
use crate::error::HandlerError;
use crate::mcp::{ContentBlock, PromptMessage, PromptRole};
use crate::schema::ParamDecl;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Caller-supplied prompt logic
#[async_trait]
pub trait PromptHandler: Send + Sync {
    async fn render(&self, args: Value, ctx: &RequestContext) -> Result<Vec<PromptMessage>, HandlerError>;
}

/// A prompt template with `{{variable}}` placeholders
///
/// Placeholders are filled from the (validated) prompt arguments. String
/// arguments are inserted verbatim, other values as JSON. Placeholders
/// without a matching argument are left in place.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub template: String,
    pub role: PromptRole,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            role: PromptRole::User,
        }
    }

    pub fn with_role(mut self, role: PromptRole) -> Self {
        self.role = role;
        self
    }

    /// Render the template with variable substitution
    ///
    /// A single pass over the template: text coming from an argument is never
    /// scanned for placeholders itself.
    pub fn render_text(&self, args: &Value) -> String {
        let map = match args {
            Value::Object(map) => Some(map),
            _ => None,
        };
        let mut result = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();
        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let value = after
                .find("}}")
                .and_then(|end| map.and_then(|m| m.get(&after[..end])).map(|v| (end, v)));
            match value {
                Some((end, value)) => {
                    match value {
                        Value::String(s) => result.push_str(s),
                        other => result.push_str(&other.to_string()),
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    // unmatched: keep one brace and rescan from the next
                    result.push('{');
                    rest = &rest[start + 1..];
                }
            }
        }
        result.push_str(rest);
        result
    }
}

#[async_trait]
impl PromptHandler for PromptTemplate {
    async fn render(&self, args: Value, _ctx: &RequestContext) -> Result<Vec<PromptMessage>, HandlerError> {
        Ok(vec![PromptMessage {
            role: self.role.clone(),
            content: ContentBlock::text(self.render_text(&args)),
        }])
    }
}

/// Declaration of a prompt
#[derive(Clone)]
pub struct PromptDeclaration {
    pub name: String,
    pub description: String,
    pub params: Vec<(String, ParamDecl)>,
    pub hidden: Hidden,
    pub annotations: Annotations,
    pub handler: Option<Arc<dyn PromptHandler>>,
}

impl std::fmt::Debug for PromptDeclaration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptDeclaration")
            .field("name", &self.name)
            .field("params", &self.params.iter().map(|(n, _)| n).collect::<Vec<_>>())
            .field("hidden", &self.hidden)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl PromptDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            hidden: Hidden::default(),
            annotations: Annotations::new(),
            handler: None,
        }
    }

    pub fn param(mut self, name: impl Into<String>, decl: impl Into<ParamDecl>) -> Self {
        self.params.push((name.into(), decl.into()));
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

    /// Render from a `{{variable}}` template
    pub fn template(self, template: impl Into<String>) -> Self {
        self.handler(Arc::new(PromptTemplate::new(template)))
    }

    pub fn handler(mut self, handler: Arc<dyn PromptHandler>) -> Self {
        self.handler = Some(handler);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_render() {
        let template = PromptTemplate::new("Review {{file}} at level {{level}}, keep {{missing}}");
        let text = template.render_text(&json!({"file": "main.rs", "level": 3}));
        assert_eq!(text, "Review main.rs at level 3, keep {{missing}}");
    }

    #[test]
    fn test_argument_text_is_not_expanded() {
        let template = PromptTemplate::new("{{a}} and {{b}}");
        let text = template.render_text(&json!({"a": "{{b}}", "b": "{{a}}"}));
        assert_eq!(text, "{{b}} and {{a}}");

        let template = PromptTemplate::new("{{{x}}} {{y");
        assert_eq!(template.render_text(&json!({"x": 1, "y": 2})), "{1} {{y");
        assert_eq!(template.render_text(&json!(null)), "{{{x}}} {{y");
    }

    #[tokio::test]
    async fn test_template_as_handler() {
        let prompt = PromptDeclaration::new("greet", "Greets someone").template("Hello {{name}}!");
        let handler = prompt.handler.unwrap();
        let messages = handler
            .render(json!({"name": "Ada"}), &RequestContext::new())
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        let rendered = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(rendered["role"], "user");
        assert_eq!(rendered["content"]["text"], "Hello Ada!");
    }
}
