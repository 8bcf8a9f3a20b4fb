//! Claude API provider implementation.

use async_trait::async_trait;
use manyllm_core::{
    ChatOptions, ChatProvider, ChunkStream, Credential, Error, Message, Result, Role,
};
use reqwest::header::HeaderValue;
use serde_json::{Value, json};

use crate::http;

/// Default API root.
pub const CLAUDE_BASE_URL: &str = "https://api.anthropic.com/v1";

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const BACKEND: &str = "Claude";

/// Chat provider using Anthropic's Messages API.
pub struct ClaudeProvider {
    api_key: HeaderValue,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl ClaudeProvider {
    /// Creates a new Claude provider.
    ///
    /// # Arguments
    ///
    /// * `model` - Model ID (e.g., "claude-sonnet-4-20250514")
    /// * `credential` - Anthropic API key
    ///
    /// # Errors
    ///
    /// [`Error::ProviderInit`] if the key cannot be sent as a header.
    pub fn new(model: impl Into<String>, credential: &Credential) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), model, credential)
    }

    /// Like [`Self::new`], reusing an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        model: impl Into<String>,
        credential: &Credential,
    ) -> Result<Self> {
        let model = model.into();
        Ok(Self {
            api_key: http::secret_header(&model, "", credential.expose())?,
            model,
            base_url: CLAUDE_BASE_URL.to_string(),
            client,
        })
    }

    /// Overrides the API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key.clone())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
    }

    pub(crate) fn request_body(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> Value {
        let wire: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": wire,
        });

        if stream {
            body["stream"] = json!(true);
        }

        if let Some(system) = options.system_text(messages) {
            body["system"] = json!(system);
        }

        if let Some(temp) = options.temperature {
            body["temperature"] = json!(temp);
        }

        if let Some(budget) = options.thinking_budget.filter(|b| *b > 0) {
            body["thinking"] = json!({"type": "enabled", "budget_tokens": budget});
        }

        body
    }
}

/// Concatenated text blocks of a Messages API response.
pub(crate) fn parse_response(body: &Value) -> Result<String> {
    if let Some(message) = http::error_message(body) {
        return Err(Error::provider(format!("{BACKEND} API error: {message}")));
    }
    let blocks = body["content"]
        .as_array()
        .ok_or_else(|| Error::provider("Missing content in Claude response"))?;
    Ok(blocks
        .iter()
        .filter(|block| block["type"] == "text")
        .filter_map(|block| block["text"].as_str())
        .collect())
}

fn parse_event(data: &str) -> Result<Vec<String>> {
    let event = http::parse_event_json(data, BACKEND)?;
    match event["type"].as_str() {
        Some("content_block_delta") if event["delta"]["type"] == "text_delta" => Ok(event["delta"]
            ["text"]
            .as_str()
            .map(str::to_string)
            .into_iter()
            .collect()),
        Some("error") => Err(Error::provider(format!(
            "{BACKEND} stream error: {}",
            http::error_message(&event).unwrap_or_else(|| event.to_string())
        ))),
        _ => Ok(Vec::new()),
    }
}

#[async_trait]
impl ChatProvider for ClaudeProvider {
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String> {
        let body = self.request_body(messages, options, false);
        let response = http::send(self.request(&body), BACKEND).await?;
        let response_body = http::json_body(response, BACKEND).await?;
        parse_response(&response_body)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        let body = self.request_body(messages, options, true);
        let response = http::send(self.request(&body), BACKEND).await?;
        Ok(http::sse_chunks(response, BACKEND, parse_event))
    }

    fn name(&self) -> &str {
        "claude"
    }
}
