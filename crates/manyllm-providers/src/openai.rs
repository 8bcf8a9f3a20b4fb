//! OpenAI-style `/chat/completions` backends.
//!
//! ZhipuAI's GLM endpoint speaks the same protocol with two additions: a
//! `thinking` switch in the request, and `reasoning_content` deltas in the
//! stream. [`Flavor`] selects between them.

use async_trait::async_trait;
use manyllm_core::{
    ChatOptions, ChatProvider, ChunkStream, Credential, Error, Message, Result, Role,
};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde_json::{Value, json};

use crate::http;

/// Default OpenAI API root.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default ZhipuAI API root.
pub const ZHIPU_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";

/// Which OpenAI-compatible service a provider talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// api.openai.com
    OpenAi,
    /// ZhipuAI GLM (open.bigmodel.cn)
    Zhipu,
}

impl Flavor {
    /// Default API root for this flavor.
    pub fn base_url(self) -> &'static str {
        match self {
            Self::OpenAi => OPENAI_BASE_URL,
            Self::Zhipu => ZHIPU_BASE_URL,
        }
    }

    fn backend(self) -> &'static str {
        match self {
            Self::OpenAi => "OpenAI",
            Self::Zhipu => "ZhipuAI",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Zhipu => "zhipu",
        }
    }
}

/// Chat provider for OpenAI-compatible endpoints.
pub struct OpenAiCompatProvider {
    flavor: Flavor,
    model: String,
    auth: HeaderValue,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Creates a provider for `flavor`.
    ///
    /// # Errors
    ///
    /// [`Error::ProviderInit`] if the key cannot be sent as a header.
    pub fn new(flavor: Flavor, model: impl Into<String>, credential: &Credential) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), flavor, model, credential)
    }

    /// Like [`Self::new`], reusing an existing HTTP client.
    pub fn with_client(
        client: reqwest::Client,
        flavor: Flavor,
        model: impl Into<String>,
        credential: &Credential,
    ) -> Result<Self> {
        let model = model.into();
        let auth = http::secret_header(&model, "Bearer ", credential.expose())?;
        Ok(Self {
            flavor,
            model,
            auth,
            base_url: flavor.base_url().to_string(),
            client,
        })
    }

    /// Shorthand for an [`Flavor::OpenAi`] provider.
    pub fn openai(model: impl Into<String>, credential: &Credential) -> Result<Self> {
        Self::new(Flavor::OpenAi, model, credential)
    }

    /// Shorthand for a [`Flavor::Zhipu`] provider.
    pub fn zhipu(model: impl Into<String>, credential: &Credential) -> Result<Self> {
        Self::new(Flavor::Zhipu, model, credential)
    }

    /// Overrides the API root (proxies, self-hosted gateways, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/chat/completions", self.base_url))
            .header(AUTHORIZATION, self.auth.clone())
            .json(body)
    }

    /// Build a `/chat/completions` request body.
    pub(crate) fn request_body(
        &self,
        messages: &[Message],
        options: &ChatOptions,
        stream: bool,
    ) -> Value {
        let mut wire: Vec<Value> = Vec::with_capacity(messages.len() + 1);
        if let Some(system) = options.system_text(messages) {
            wire.push(json!({"role": "system", "content": system}));
        }
        wire.extend(
            messages
                .iter()
                .filter(|m| m.role != Role::System)
                .map(|m| json!({"role": m.role, "content": m.content})),
        );

        let mut body = json!({
            "model": self.model,
            "messages": wire,
            "stream": stream,
        });

        match self.flavor {
            Flavor::OpenAi => {
                if let Some(temp) = options.temperature {
                    body["temperature"] = json!(temp);
                }
                if let Some(max_tokens) = options.max_tokens {
                    body["max_completion_tokens"] = json!(max_tokens);
                }
            }
            Flavor::Zhipu => {
                body["temperature"] = json!(options.temperature.unwrap_or(0.6));
                body["max_tokens"] = json!(options.max_tokens.unwrap_or(4096));
                let thinking = match options.thinking_budget {
                    Some(budget) if budget > 0 => "enabled",
                    _ => "disabled",
                };
                body["thinking"] = json!({"type": thinking});
            }
        }

        body
    }
}

/// Extract the reply from a non-streaming response.
pub(crate) fn parse_response(body: &Value, backend: &str) -> Result<String> {
    if let Some(message) = http::error_message(body) {
        return Err(Error::provider(format!("{backend} API error: {message}")));
    }
    body["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::provider(format!("Missing content in {backend} response")))
}

/// Reasoning text (if any) followed by content text of one stream delta.
fn delta_chunks(data: &str, backend: &str) -> Result<Vec<String>> {
    let body = http::parse_event_json(data, backend)?;
    if let Some(message) = http::error_message(&body) {
        return Err(Error::provider(format!("{backend} stream error: {message}")));
    }
    let delta = &body["choices"][0]["delta"];
    Ok(["reasoning_content", "content"]
        .iter()
        .filter_map(|key| delta[*key].as_str())
        .map(str::to_string)
        .collect())
}

fn parse_openai_event(data: &str) -> Result<Vec<String>> {
    delta_chunks(data, Flavor::OpenAi.backend())
}

fn parse_zhipu_event(data: &str) -> Result<Vec<String>> {
    delta_chunks(data, Flavor::Zhipu.backend())
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String> {
        let backend = self.flavor.backend();
        let body = self.request_body(messages, options, false);
        let response = http::send(self.request(&body), backend).await?;
        let response_body = http::json_body(response, backend).await?;
        parse_response(&response_body, backend)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        let backend = self.flavor.backend();
        let body = self.request_body(messages, options, true);
        let response = http::send(self.request(&body), backend).await?;
        let parse: http::ParseEvent = match self.flavor {
            Flavor::OpenAi => parse_openai_event,
            Flavor::Zhipu => parse_zhipu_event,
        };
        Ok(http::sse_chunks(response, backend, parse))
    }

    fn name(&self) -> &str {
        self.flavor.name()
    }
}
