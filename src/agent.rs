//! Agent definitions.
//!
//! An agent bundles instructions with optional conversation history, tools,
//! a structured output schema, middleware, and a preferred provider/model.
//! Applications usually implement [`Agent`] on their own types; one-off
//! agents can be built with [`agent`].

use crate::api::ProviderModelList;
use crate::data::Message;
use crate::middleware::Middleware;
use crate::prompt::TextOptions;
use crate::traits::Tool;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Stable identity of an agent type, used to fake and assert on agents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentKey(String);

impl AgentKey {
    /// Key derived from the agent's Rust type.
    pub fn of<T: ?Sized>() -> Self {
        Self(std::any::type_name::<T>().to_string())
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AgentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an agent brings beyond plain instructions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentCapabilities {
    pub conversational: bool,
    pub tools: bool,
    pub structured_output: bool,
}

pub trait Agent: Send + Sync {
    /// Identity used by fakes and assertions. Defaults to the type name.
    fn key(&self) -> AgentKey {
        AgentKey::of::<Self>()
    }

    /// System instructions.
    fn instructions(&self) -> String;

    /// Prior conversation, oldest first.
    fn messages(&self) -> Vec<Message> {
        Vec::new()
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// JSON schema the response must satisfy.
    fn schema(&self) -> Option<Value> {
        None
    }

    /// Middleware wrapped around every invocation, outermost first.
    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        Vec::new()
    }

    /// Preferred provider(s), used when the caller names none.
    fn provider(&self) -> Option<ProviderModelList> {
        None
    }

    /// Preferred model, used when the resolved pair names none.
    fn model(&self) -> Option<String> {
        None
    }

    fn options(&self) -> TextOptions {
        TextOptions::default()
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            conversational: !self.messages().is_empty(),
            tools: !self.tools().is_empty(),
            structured_output: self.schema().is_some(),
        }
    }
}

/// An agent assembled at the call site.
#[derive(Clone)]
pub struct AnonymousAgent {
    key: Option<AgentKey>,
    instructions: String,
    messages: Vec<Message>,
    tools: Vec<Arc<dyn Tool>>,
    schema: Option<Value>,
    middleware: Vec<Arc<dyn Middleware>>,
    provider: Option<ProviderModelList>,
    model: Option<String>,
    options: TextOptions,
}

/// Start building an [`AnonymousAgent`].
pub fn agent(instructions: impl Into<String>) -> AnonymousAgent {
    AnonymousAgent::new(instructions)
}

impl AnonymousAgent {
    pub fn new(instructions: impl Into<String>) -> Self {
        Self {
            key: None,
            instructions: instructions.into(),
            messages: Vec::new(),
            tools: Vec::new(),
            schema: None,
            middleware: Vec::new(),
            provider: None,
            model: None,
            options: TextOptions::default(),
        }
    }

    /// Give this agent its own key so it can be faked apart from other
    /// anonymous agents.
    pub fn named(mut self, key: impl Into<String>) -> Self {
        self.key = Some(AgentKey::named(key));
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tools(mut self, tools: Vec<Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn provider(mut self, provider: impl Into<ProviderModelList>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.options.max_steps = max_steps;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }
}

impl Agent for AnonymousAgent {
    fn key(&self) -> AgentKey {
        self.key.clone().unwrap_or_else(AgentKey::of::<Self>)
    }

    fn instructions(&self) -> String {
        self.instructions.clone()
    }

    fn messages(&self) -> Vec<Message> {
        self.messages.clone()
    }

    fn tools(&self) -> Vec<Arc<dyn Tool>> {
        self.tools.clone()
    }

    fn schema(&self) -> Option<Value> {
        self.schema.clone()
    }

    fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        self.middleware.clone()
    }

    fn provider(&self) -> Option<ProviderModelList> {
        self.provider.clone()
    }

    fn model(&self) -> Option<String> {
        self.model.clone()
    }

    fn options(&self) -> TextOptions {
        self.options.clone()
    }
}

impl std::fmt::Debug for AnonymousAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymousAgent")
            .field("key", &self.key())
            .field("instructions", &self.instructions)
            .field("messages", &self.messages.len())
            .field("tools", &self.tools.len())
            .field("schema", &self.schema.is_some())
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish()
    }
}
