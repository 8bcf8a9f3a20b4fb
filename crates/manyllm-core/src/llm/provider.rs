//! Chat provider abstraction.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Abstraction over chat backends (Gemini, GPT, GLM, Claude, ...).
///
/// One implementation exists per backend. Implementations are pure adapters:
/// they do not retry, fail over or pick credentials; the orchestrator does.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Sends the conversation and returns the full reply text.
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String>;

    /// Sends the conversation and returns the reply as a stream of text chunks.
    ///
    /// Errors may surface either from this call (before any chunk) or as an
    /// item of the returned stream.
    async fn chat_stream(&self, messages: &[Message], options: &ChatOptions)
    -> Result<ChunkStream>;

    /// The provider name for diagnostics.
    fn name(&self) -> &str;
}

/// Finite, single-pass stream of reply chunks.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Message content
    pub content: String,
}

impl Message {
    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant message
    #[serde(alias = "model")]
    Assistant,
    /// System / steering message
    System,
}

/// Generation options for a chat call.
///
/// Recognized keys are typed fields. Anything else lands in `extra` and is
/// ignored by providers that do not understand it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Sampling temperature; backend default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Output length cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Steering instruction, placed however each backend expects it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    /// Reasoning budget for backends that support one. `0` disables thinking.
    #[serde(default, alias = "thinking", skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,

    /// Unrecognized keys, carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatOptions {
    /// Creates empty options (all backend defaults).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Sets the maximum tokens.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the thinking budget.
    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    /// Fill unset fields from `defaults`. Fields already set win.
    pub fn or(mut self, defaults: &ChatOptions) -> Self {
        if self.temperature.is_none() {
            self.temperature = defaults.temperature;
        }
        if self.max_tokens.is_none() {
            self.max_tokens = defaults.max_tokens;
        }
        if self.system_prompt.is_none() {
            self.system_prompt.clone_from(&defaults.system_prompt);
        }
        if self.thinking_budget.is_none() {
            self.thinking_budget = defaults.thinking_budget;
        }
        for (key, value) in &defaults.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// The effective system text: `system_prompt` followed by any
    /// system-role messages, joined by blank lines.
    pub fn system_text(&self, messages: &[Message]) -> Option<String> {
        let parts: Vec<&str> = self
            .system_prompt
            .as_deref()
            .into_iter()
            .chain(
                messages
                    .iter()
                    .filter(|m| m.role == Role::System)
                    .map(|m| m.content.as_str()),
            )
            .filter(|s| !s.trim().is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n\n"))
        }
    }
}
