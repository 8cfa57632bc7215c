//! Tool invocation: argument access, per-request hooks, and the loop step
//! that runs every tool call a model asked for.

use crate::data::{ToolCall, ToolResult};
use crate::error::{AiError, Result};
use crate::traits::Tool;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Arguments the model passed to a tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolRequest {
    arguments: Map<String, Value>,
}

impl ToolRequest {
    pub fn new(arguments: Map<String, Value>) -> Self {
        Self { arguments }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.arguments.get(key)
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.arguments.get(key).and_then(Value::as_i64)
    }

    /// Deserialize all arguments into a typed struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(Value::Object(self.arguments.clone()))?)
    }

    pub fn arguments(&self) -> &Map<String, Value> {
        &self.arguments
    }
}

type InvokingHook = Arc<dyn Fn(&str, &ToolCall) + Send + Sync>;
type InvokedHook = Arc<dyn Fn(&str, &ToolCall, &ToolResult) + Send + Sync>;

/// Callbacks fired around each tool invocation.
///
/// Hooks travel with the request rather than living on the gateway, so
/// concurrent invocations sharing a gateway never see each other's hooks.
/// Both receive the invocation id first.
#[derive(Clone, Default)]
pub struct ToolInvocationHooks {
    invoking: Option<InvokingHook>,
    invoked: Option<InvokedHook>,
}

impl ToolInvocationHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_invoking(mut self, hook: impl Fn(&str, &ToolCall) + Send + Sync + 'static) -> Self {
        self.invoking = Some(Arc::new(hook));
        self
    }

    pub fn on_invoked(
        mut self,
        hook: impl Fn(&str, &ToolCall, &ToolResult) + Send + Sync + 'static,
    ) -> Self {
        self.invoked = Some(Arc::new(hook));
        self
    }

    pub(crate) fn invoking(&self, invocation_id: &str, call: &ToolCall) {
        if let Some(hook) = &self.invoking {
            hook(invocation_id, call);
        }
    }

    pub(crate) fn invoked(&self, invocation_id: &str, call: &ToolCall, result: &ToolResult) {
        if let Some(hook) = &self.invoked {
            hook(invocation_id, call, result);
        }
    }
}

impl std::fmt::Debug for ToolInvocationHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolInvocationHooks")
            .field("invoking", &self.invoking.is_some())
            .field("invoked", &self.invoked.is_some())
            .finish()
    }
}

/// Find a tool by the name the model used.
pub fn find_tool<'a>(tools: &'a [Arc<dyn Tool>], name: &str) -> Option<&'a Arc<dyn Tool>> {
    tools.iter().find(|tool| tool.name() == name)
}

/// Run one tool call, firing the hooks around it.
pub async fn invoke_tool_call(
    invocation_id: &str,
    tools: &[Arc<dyn Tool>],
    call: &ToolCall,
    hooks: &ToolInvocationHooks,
) -> Result<ToolResult> {
    let tool = find_tool(tools, &call.name).ok_or_else(|| AiError::Tool {
        tool: call.name.clone(),
        source: anyhow::anyhow!("the model called a tool that was not offered"),
    })?;

    hooks.invoking(invocation_id, call);
    tracing::debug!(invocation_id, tool = %call.name, "Invoking tool");

    let output = tool
        .handle(ToolRequest::new(call.arguments.clone()))
        .await
        .map_err(|source| AiError::Tool {
            tool: call.name.clone(),
            source,
        })?;

    let result = ToolResult::for_call(call, output);
    hooks.invoked(invocation_id, call, &result);
    Ok(result)
}

/// Run every tool call of one round, in order.
pub async fn invoke_tool_calls(
    invocation_id: &str,
    tools: &[Arc<dyn Tool>],
    calls: &[ToolCall],
    hooks: &ToolInvocationHooks,
) -> Result<Vec<ToolResult>> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        results.push(invoke_tool_call(invocation_id, tools, call, hooks).await?);
    }
    Ok(results)
}
