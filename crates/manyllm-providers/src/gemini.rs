//! Google Gemini (and Gemma) via the Generative Language REST API.

use async_trait::async_trait;
use manyllm_core::{
    ChatOptions, ChatProvider, ChunkStream, Credential, Error, Message, Result, Role,
};
use reqwest::header::HeaderValue;
use serde_json::{Value, json};

use crate::http;

/// Default API root.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const BACKEND: &str = "Gemini";

/// Chat provider for Gemini and Gemma models.
pub struct GeminiProvider {
    model: String,
    api_key: HeaderValue,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Creates a new Gemini provider.
    ///
    /// # Arguments
    ///
    /// * `model` - Model ID (e.g., "gemini-2.0-flash"); a leading `models/` is accepted
    /// * `credential` - Google AI Studio API key
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
        let api_key = http::secret_header(&model, "", credential.expose())?;
        let model = model
            .strip_prefix("models/")
            .map(str::to_string)
            .unwrap_or(model);
        Ok(Self {
            model,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
            client,
        })
    }

    /// Overrides the API root (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, method: &str) -> String {
        format!("{}/models/{}:{method}", self.base_url, self.model)
    }

    fn request(&self, url: String, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .header("x-goog-api-key", self.api_key.clone())
            .json(body)
    }
}

/// Build a `generateContent` request body.
pub(crate) fn request_body(messages: &[Message], options: &ChatOptions) -> Value {
    let contents: Vec<Value> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({"role": role, "parts": [{"text": m.content}]})
        })
        .collect();

    let mut body = json!({ "contents": contents });

    if let Some(system) = options.system_text(messages) {
        body["systemInstruction"] = json!({"parts": [{"text": system}]});
    }

    let mut config = serde_json::Map::new();
    if let Some(temp) = options.temperature {
        config.insert("temperature".into(), json!(temp));
    }
    if let Some(max_tokens) = options.max_tokens {
        config.insert("maxOutputTokens".into(), json!(max_tokens));
    }
    if let Some(budget) = options.thinking_budget {
        config.insert("thinkingConfig".into(), json!({"thinkingBudget": budget}));
    }
    if !config.is_empty() {
        body["generationConfig"] = Value::Object(config);
    }

    body
}

/// Text of the first candidate, thought parts excluded.
///
/// `Ok(None)` means the candidate carried no text (e.g. a keep-alive chunk).
fn candidate_text(body: &Value) -> Result<Option<String>> {
    if let Some(message) = http::error_message(body) {
        return Err(Error::provider(format!("{BACKEND} API error: {message}")));
    }
    let Some(candidate) = body["candidates"].get(0) else {
        if let Some(reason) = body["promptFeedback"]["blockReason"].as_str() {
            return Err(Error::provider(format!("{BACKEND} blocked the prompt: {reason}")));
        }
        return Ok(None);
    };
    let text: String = candidate["content"]["parts"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|part| !part["thought"].as_bool().unwrap_or(false))
        .filter_map(|part| part["text"].as_str())
        .collect();
    Ok(if text.is_empty() { None } else { Some(text) })
}

/// Extract the reply from a `generateContent` response.
pub(crate) fn parse_response(body: &Value) -> Result<String> {
    candidate_text(body)?.ok_or_else(|| {
        let reason = body["candidates"][0]["finishReason"]
            .as_str()
            .unwrap_or("no candidates");
        Error::provider(format!("Missing content in {BACKEND} response ({reason})"))
    })
}

fn parse_event(data: &str) -> Result<Vec<String>> {
    let body = http::parse_event_json(data, BACKEND)?;
    Ok(candidate_text(&body)?.into_iter().collect())
}

#[async_trait]
impl ChatProvider for GeminiProvider {
    async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Result<String> {
        let body = request_body(messages, options);
        let response = http::send(self.request(self.url("generateContent"), &body), BACKEND).await?;
        let response_body = http::json_body(response, BACKEND).await?;
        parse_response(&response_body)
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> Result<ChunkStream> {
        let body = request_body(messages, options);
        let url = format!("{}?alt=sse", self.url("streamGenerateContent"));
        let response = http::send(self.request(url, &body), BACKEND).await?;
        Ok(http::sse_chunks(response, BACKEND, parse_event))
    }

    fn name(&self) -> &str {
        "gemini"
    }
}
