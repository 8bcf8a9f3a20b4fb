//! Request plumbing shared by every backend.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use manyllm_core::{ChunkStream, Error, Result};
use reqwest::header::HeaderValue;
use reqwest::{RequestBuilder, Response};
use tracing::{debug, trace};

/// Terminal sentinel used by OpenAI-style SSE streams.
pub(crate) const DONE: &str = "[DONE]";

/// Turns one SSE `data:` payload into zero or more text chunks.
pub(crate) type ParseEvent = fn(&str) -> Result<Vec<String>>;

/// Build a sensitive header value from a credential.
///
/// Keys containing characters that cannot appear in a header are rejected
/// here, while the provider is being built, instead of on the first call.
pub(crate) fn secret_header(model_id: &str, prefix: &str, secret: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("{prefix}{}", secret.trim())).map_err(|_| {
        Error::provider_init(model_id, "credential is not a valid HTTP header value")
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Send a request and turn transport failures and non-2xx statuses into
/// provider errors.
pub(crate) async fn send(request: RequestBuilder, backend: &str) -> Result<Response> {
    let response = request
        .send()
        .await
        .map_err(|e| Error::provider_with_source(format!("failed to call {backend} API: {e}"), e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(Error::provider(format!(
            "{backend} API error {status}: {}",
            error_text.trim()
        )));
    }
    debug!(backend, %status, "request accepted");
    Ok(response)
}

/// Read a successful response body as JSON.
pub(crate) async fn json_body(response: Response, backend: &str) -> Result<serde_json::Value> {
    response.json().await.map_err(|e| {
        Error::provider_with_source(format!("failed to parse {backend} response: {e}"), e)
    })
}

/// Relay an SSE response as text chunks.
pub(crate) fn sse_chunks(
    response: Response,
    backend: &'static str,
    parse: ParseEvent,
) -> ChunkStream {
    event_chunks(response.bytes_stream(), backend, parse)
}

/// Decode an SSE byte stream into text chunks.
///
/// Empty events are skipped and a `[DONE]` event ends the stream. The first
/// transport or parse error is yielded and ends the stream.
pub(crate) fn event_chunks<S, B, E>(
    bytes: S,
    backend: &'static str,
    parse: ParseEvent,
) -> ChunkStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut events = Box::pin(bytes.eventsource());
    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(Error::provider(format!("{backend} stream error: {e}")));
                    return;
                }
            };
            let data = event.data.trim();
            if data.is_empty() {
                continue;
            }
            if data == DONE {
                trace!(backend, "stream done");
                return;
            }
            match parse(data) {
                Ok(chunks) => {
                    for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
                        yield Ok(chunk);
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Parse one SSE payload as JSON.
pub(crate) fn parse_event_json(data: &str, backend: &str) -> Result<serde_json::Value> {
    serde_json::from_str(data)
        .map_err(|e| Error::provider_with_source(format!("malformed {backend} stream event"), e))
}

/// Error text carried in an `{"error": {"message": ...}}` body, if any.
pub(crate) fn error_message(body: &serde_json::Value) -> Option<String> {
    let error = body.get("error")?;
    Some(
        error
            .get("message")
            .and_then(|m| m.as_str())
            .map_or_else(|| error.to_string(), ToString::to_string),
    )
}
