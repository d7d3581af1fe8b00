//! Dispatch router
//!
//! Resolves a call to one capability of the [`CompiledModel`] and runs it:
//! arguments go through the compiled schema, then the handler is awaited
//! with the request context. Handler errors and panics become
//! [`DispatchError::HandlerExecution`]; nothing here is fatal to the server.
//!
//! Tool names resolve in two steps:
//! 1. exact match among ungrouped tools and routers
//! 2. `{router}__{member}`, split on the first `__`

mod call;

pub use call::Call;

use crate::config::HiddenCallPolicy;
use crate::context::RequestContext;
use crate::declaration::{namespaced, CapabilityKind, NAMESPACE_SEPARATOR};
use crate::error::DispatchError;
use crate::mcp::{PromptGetResult, ResourceContents, ResourceReadResult, ToolCallResult};
use crate::model::{
    CompiledModel, CompiledPrompt, CompiledResource, CompiledRouter, CompiledSkill, CompiledTool,
    ResourceContent, SKILL_SCHEME,
};
use crate::visibility::{is_visible, SKILL_MIME_TYPE};
use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes one resolved call; the seam the batch executor runs against
#[async_trait]
pub trait CallExecutor: Send + Sync + 'static {
    async fn execute(&self, call: Call, ctx: &RequestContext) -> Result<Value, DispatchError>;
}

/// A capability a name resolved to
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Tool(&'a CompiledTool),
    /// A tool reached through `{router}__{member}`
    RouterMember {
        router: &'a CompiledRouter,
        tool: &'a CompiledTool,
    },
    /// Calling a router opens it
    Router(&'a CompiledRouter),
    Prompt(&'a CompiledPrompt),
    Resource(&'a CompiledResource),
    Skill(&'a CompiledSkill),
}

impl Target<'_> {
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Target::Tool(_) | Target::RouterMember { .. } => CapabilityKind::Tool,
            Target::Router(_) => CapabilityKind::Router,
            Target::Prompt(_) => CapabilityKind::Prompt,
            Target::Resource(_) => CapabilityKind::Resource,
            Target::Skill(_) => CapabilityKind::Skill,
        }
    }

    /// Name the caller used, namespaced for router members
    pub fn display_name(&self) -> String {
        match self {
            Target::Tool(t) => t.name.clone(),
            Target::RouterMember { router, tool } => namespaced(&router.name, &tool.name),
            Target::Router(r) => r.name.clone(),
            Target::Prompt(p) => p.name.clone(),
            Target::Resource(r) => r.uri.clone(),
            Target::Skill(s) => s.uri.clone(),
        }
    }

    /// Whether the capability is hidden for `ctx`
    ///
    /// A router member follows its router: the namespace is the route to a
    /// hidden tool, but only while the router itself is visible.
    fn is_hidden(&self, ctx: &RequestContext) -> bool {
        match self {
            Target::Tool(t) => !is_visible(CapabilityKind::Tool, &t.name, &t.hidden, ctx),
            Target::RouterMember { router, .. } => {
                !is_visible(CapabilityKind::Router, &router.name, &router.hidden, ctx)
            }
            Target::Router(r) => !is_visible(CapabilityKind::Router, &r.name, &r.hidden, ctx),
            Target::Prompt(p) => !is_visible(CapabilityKind::Prompt, &p.name, &p.hidden, ctx),
            Target::Resource(r) => !is_visible(CapabilityKind::Resource, &r.name, &r.hidden, ctx),
            Target::Skill(s) => !is_visible(CapabilityKind::Skill, &s.name, &s.hidden, ctx),
        }
    }
}

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Await a handler future, turning errors and panics into `HandlerExecution`
async fn guarded<T, F>(name: &str, fut: F) -> Result<T, DispatchError>
where
    F: Future<Output = Result<T, crate::error::HandlerError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DispatchError::HandlerExecution {
            name: name.to_string(),
            message: e.message,
            data: e.data,
        }),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(name, %message, "Handler panicked");
            Err(DispatchError::HandlerExecution {
                name: name.to_string(),
                message: format!("handler panicked: {}", message),
                data: None,
            })
        }
    }
}

fn to_json<T: Serialize>(name: &str, value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::HandlerExecution {
        name: name.to_string(),
        message: format!("failed to serialize result: {}", e),
        data: None,
    })
}

fn resource_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_default(),
    }
}

/// Per-request front end over a frozen model
#[derive(Debug, Clone)]
pub struct Dispatcher {
    model: Arc<CompiledModel>,
    policy: HiddenCallPolicy,
}

impl Dispatcher {
    pub fn new(model: Arc<CompiledModel>) -> Self {
        Self {
            model,
            policy: HiddenCallPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: HiddenCallPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn model(&self) -> &Arc<CompiledModel> {
        &self.model
    }

    pub fn policy(&self) -> HiddenCallPolicy {
        self.policy
    }

    /// Resolve `name` among capabilities of `kind`, ignoring visibility
    ///
    /// Resources resolve by URI; `skill://{name}` resolves to the skill
    /// document.
    pub fn resolve(&self, kind: CapabilityKind, name: &str) -> Result<Target<'_>, DispatchError> {
        let model = self.model.as_ref();
        let found = match kind {
            CapabilityKind::Tool => model
                .tool(name)
                .filter(|t| !model.is_grouped(&t.name))
                .map(Target::Tool)
                .or_else(|| model.router(name).map(Target::Router))
                .or_else(|| self.resolve_namespaced(name)),
            CapabilityKind::Router => model.router(name).map(Target::Router),
            CapabilityKind::Prompt => model.prompt(name).map(Target::Prompt),
            CapabilityKind::Resource => match name.strip_prefix(SKILL_SCHEME) {
                Some(encoded) => urlencoding::decode(encoded)
                    .ok()
                    .and_then(|skill| model.skill(&skill))
                    .map(Target::Skill),
                None => model.resource_by_uri(name).map(Target::Resource),
            },
            CapabilityKind::Skill => model.skill(name).map(Target::Skill),
        };
        found.ok_or_else(|| DispatchError::unknown(name))
    }

    fn resolve_namespaced(&self, name: &str) -> Option<Target<'_>> {
        let (router, member) = name.split_once(NAMESPACE_SEPARATOR)?;
        let router = self.model.router(router)?;
        if !router.has_member(member) {
            return None;
        }
        let tool = self.model.tool(member)?;
        Some(Target::RouterMember { router, tool })
    }

    /// Resolve and apply the hidden-call policy for `ctx`
    pub fn resolve_for(
        &self,
        kind: CapabilityKind,
        name: &str,
        ctx: &RequestContext,
    ) -> Result<Target<'_>, DispatchError> {
        let target = self.resolve(kind, name)?;
        if self.policy == HiddenCallPolicy::Deny && target.is_hidden(ctx) {
            debug!(%kind, name, "Rejecting call to hidden capability");
            return Err(DispatchError::unknown(name));
        }
        Ok(target)
    }

    /// Call a tool, or open a router, returning the handler's raw value
    pub async fn call_tool(
        &self,
        name: &str,
        args: Value,
        ctx: &RequestContext,
    ) -> Result<Value, DispatchError> {
        match self.resolve_for(CapabilityKind::Tool, name, ctx)? {
            Target::Tool(tool) => self.invoke_tool(tool, name, args, ctx).await,
            Target::RouterMember { tool, .. } => self.invoke_tool(tool, name, args, ctx).await,
            Target::Router(router) => Ok(self.open_router(router, ctx)),
            _ => Err(DispatchError::unknown(name)),
        }
    }

    async fn invoke_tool(
        &self,
        tool: &CompiledTool,
        called_as: &str,
        args: Value,
        ctx: &RequestContext,
    ) -> Result<Value, DispatchError> {
        let args = tool.schema.validate(&args)?;
        debug!(tool = called_as, "Dispatching tool call");
        guarded(called_as, tool.handler.call(args, ctx)).await
    }

    /// Member summaries of a router, under their namespaced names
    fn open_router(&self, router: &CompiledRouter, ctx: &RequestContext) -> Value {
        debug!(router = %router.name, "Opening router");
        json!({
            "router": router.name,
            "description": router.description,
            "tools": self.model.router_members(router, ctx),
        })
    }

    /// Render a prompt
    pub async fn get_prompt(
        &self,
        name: &str,
        args: Value,
        ctx: &RequestContext,
    ) -> Result<PromptGetResult, DispatchError> {
        let Target::Prompt(prompt) = self.resolve_for(CapabilityKind::Prompt, name, ctx)? else {
            return Err(DispatchError::unknown(name));
        };
        let args = prompt.schema.validate(&args)?;
        debug!(prompt = name, "Rendering prompt");
        let messages = guarded(name, prompt.handler.render(args, ctx)).await?;
        Ok(PromptGetResult {
            description: Some(prompt.description.clone()),
            messages,
        })
    }

    /// Read a resource or a generated skill document by URI
    pub async fn read_resource(
        &self,
        uri: &str,
        ctx: &RequestContext,
    ) -> Result<ResourceReadResult, DispatchError> {
        let contents = match self.resolve_for(CapabilityKind::Resource, uri, ctx)? {
            Target::Resource(resource) => {
                let value = match &resource.content {
                    ResourceContent::Static(value) => value.clone(),
                    ResourceContent::Dynamic(handler) => {
                        debug!(resource = %resource.name, "Reading dynamic resource");
                        guarded(&resource.name, handler.read(ctx)).await?
                    }
                };
                ResourceContents {
                    uri: resource.uri.clone(),
                    mime_type: Some(resource.mime_type.clone()),
                    text: Some(resource_text(value)),
                }
            }
            Target::Skill(skill) => ResourceContents {
                uri: skill.uri.clone(),
                mime_type: Some(SKILL_MIME_TYPE.to_string()),
                text: Some(skill.document.clone()),
            },
            _ => return Err(DispatchError::unknown(uri)),
        };
        Ok(ResourceReadResult {
            contents: vec![contents],
        })
    }
}

#[async_trait]
impl CallExecutor for Dispatcher {
    async fn execute(&self, call: Call, ctx: &RequestContext) -> Result<Value, DispatchError> {
        match call {
            Call::Ping => Ok(json!({})),
            Call::ListTools => to_json("tools/list", &self.model.list_tools(ctx)),
            Call::ListPrompts => to_json("prompts/list", &self.model.list_prompts(ctx)),
            Call::ListResources => to_json("resources/list", &self.model.list_resources(ctx)),
            Call::CallTool { name, arguments } => {
                let value = self.call_tool(&name, arguments, ctx).await?;
                to_json(&name, &ToolCallResult::from_value(value))
            }
            Call::GetPrompt { name, arguments } => {
                let result = self.get_prompt(&name, arguments, ctx).await?;
                to_json(&name, &result)
            }
            Call::ReadResource { uri } => {
                let result = self.read_resource(&uri, ctx).await?;
                to_json(&uri, &result)
            }
        }
    }
}
