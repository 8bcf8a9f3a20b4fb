//! Mock chat provider and resolver for testing.

use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use tokio::sync::Mutex;

use super::provider::{ChatOptions, ChatProvider, ChunkStream, Message};
use crate::pool::{Credential, Identifier};
use crate::resolver::ProviderResolver;
use crate::{Error, Result};

/// Scripted behavior for one mock call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Succeed with this text (a single chunk when streamed).
    Reply(String),
    /// Fail the call outright.
    Fail(String),
    /// Stream these chunks, then end cleanly.
    Stream(Vec<String>),
    /// Stream these chunks, then fail.
    StreamThenFail(Vec<String>, String),
}

impl MockBehavior {
    /// Shorthand for [`MockBehavior::Reply`].
    pub fn reply(text: impl Into<String>) -> Self {
        Self::Reply(text.into())
    }

    /// Shorthand for [`MockBehavior::Fail`].
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail(message.into())
    }

    /// Shorthand for [`MockBehavior::Stream`].
    pub fn stream<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stream(chunks.into_iter().map(Into::into).collect())
    }

    /// Shorthand for [`MockBehavior::StreamThenFail`].
    pub fn stream_then_fail<I, S>(chunks: I, message: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StreamThenFail(chunks.into_iter().map(Into::into).collect(), message.into())
    }
}

/// Mock chat provider that plays back scripted behaviors.
///
/// Behaviors are used in order. After all are used, the provider cycles back
/// to the first one.
#[derive(Clone)]
pub struct MockChatProvider {
    name: String,
    script: Arc<Mutex<Script>>,
}

struct Script {
    behaviors: Vec<MockBehavior>,
    index: usize,
}

impl MockChatProvider {
    /// Creates a new mock provider with scripted behaviors.
    ///
    /// # Examples
    ///
    /// ```
    /// use manyllm_core::llm::{MockBehavior, MockChatProvider};
    ///
    /// let provider = MockChatProvider::new(vec![
    ///     MockBehavior::fail("rate limited"),
    ///     MockBehavior::reply("Second try"),
    /// ]);
    /// ```
    pub fn new(behaviors: Vec<MockBehavior>) -> Self {
        let behaviors = if behaviors.is_empty() {
            vec![MockBehavior::Reply(String::new())]
        } else {
            behaviors
        };
        Self {
            name: "mock".to_string(),
            script: Arc::new(Mutex::new(Script {
                behaviors,
                index: 0,
            })),
        }
    }

    /// Creates a mock provider with a single response.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self::new(vec![MockBehavior::Reply(response.into())])
    }

    /// Creates a mock provider that always fails.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(vec![MockBehavior::Fail(message.into())])
    }

    /// Overrides the provider name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    async fn next_behavior(&self) -> MockBehavior {
        let mut script = self.script.lock().await;
        let behavior = script.behaviors[script.index].clone();
        script.index = (script.index + 1) % script.behaviors.len();
        behavior
    }
}

#[async_trait]
impl ChatProvider for MockChatProvider {
    async fn chat(&self, _messages: &[Message], _options: &ChatOptions) -> Result<String> {
        match self.next_behavior().await {
            MockBehavior::Reply(text) => Ok(text),
            MockBehavior::Stream(chunks) => Ok(chunks.concat()),
            MockBehavior::Fail(message) | MockBehavior::StreamThenFail(_, message) => {
                Err(Error::provider(message))
            }
        }
    }

    async fn chat_stream(
        &self,
        _messages: &[Message],
        _options: &ChatOptions,
    ) -> Result<ChunkStream> {
        let items: Vec<Result<String>> = match self.next_behavior().await {
            MockBehavior::Reply(text) => vec![Ok(text)],
            MockBehavior::Fail(message) => return Err(Error::provider(message)),
            MockBehavior::Stream(chunks) => chunks.into_iter().map(Ok).collect(),
            MockBehavior::StreamThenFail(chunks, message) => chunks
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(Error::provider(message))))
                .collect(),
        };
        Ok(Box::pin(stream::iter(items)))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Resolver that hands out [`MockChatProvider`]s scripted per model or per
/// identifier, and records every resolve attempt.
///
/// Models with no script resolve to [`Error::UnsupportedModel`]; empty
/// credentials resolve to [`Error::MissingCredential`].
#[derive(Clone, Default)]
pub struct ScriptedResolver {
    by_model: HashMap<String, MockBehavior>,
    by_identifier: HashMap<Identifier, MockBehavior>,
    attempts: Arc<std::sync::Mutex<Vec<Identifier>>>,
}

impl ScriptedResolver {
    /// Creates a resolver with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts every credential of `model_id`.
    pub fn with_model(mut self, model_id: impl Into<String>, behavior: MockBehavior) -> Self {
        self.by_model.insert(model_id.into(), behavior);
        self
    }

    /// Scripts one `(model, credential)` pair; overrides [`Self::with_model`].
    pub fn with_identifier(mut self, identifier: Identifier, behavior: MockBehavior) -> Self {
        self.by_identifier.insert(identifier, behavior);
        self
    }

    /// Every identifier passed to `resolve`, in call order.
    pub fn attempts(&self) -> Vec<Identifier> {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProviderResolver for ScriptedResolver {
    fn resolve(&self, model_id: &str, credential: &Credential) -> Result<Arc<dyn ChatProvider>> {
        let identifier = Identifier::new(model_id, credential.clone());
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(identifier.clone());

        let behavior = self
            .by_identifier
            .get(&identifier)
            .or_else(|| self.by_model.get(model_id))
            .cloned()
            .ok_or_else(|| Error::UnsupportedModel(model_id.to_string()))?;

        if credential.is_empty() {
            return Err(Error::MissingCredential(model_id.to_string()));
        }

        Ok(Arc::new(
            MockChatProvider::new(vec![behavior]).named(model_id),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn hello() -> Vec<Message> {
        vec![Message::user("Hello")]
    }

    #[tokio::test]
    async fn test_mock_provider_single_response() {
        let provider = MockChatProvider::with_response("Test response");
        let content = provider.chat(&hello(), &ChatOptions::new()).await.unwrap();
        assert_eq!(content, "Test response");
    }

    #[tokio::test]
    async fn test_mock_provider_cycles_behaviors() {
        let provider = MockChatProvider::new(vec![
            MockBehavior::fail("first fails"),
            MockBehavior::reply("Second"),
        ]);
        let options = ChatOptions::new();

        assert!(provider.chat(&hello(), &options).await.is_err());
        assert_eq!(provider.chat(&hello(), &options).await.unwrap(), "Second");
        // Cycles back
        assert!(provider.chat(&hello(), &options).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_stream_then_fail() {
        let provider =
            MockChatProvider::new(vec![MockBehavior::stream_then_fail(["a", "b"], "cut")]);
        let items: Vec<_> = provider
            .chat_stream(&hello(), &ChatOptions::new())
            .await
            .unwrap()
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_deref().unwrap(), "a");
        assert_eq!(items[1].as_deref().unwrap(), "b");
        assert!(items[2].is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_fail_on_open() {
        let provider = MockChatProvider::failing("down");
        assert!(provider.chat_stream(&hello(), &ChatOptions::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_provider_clone_shares_script() {
        let provider = MockChatProvider::new(vec![
            MockBehavior::reply("one"),
            MockBehavior::reply("two"),
        ]);
        let provider2 = provider.clone();
        let options = ChatOptions::new();

        provider.chat(&hello(), &options).await.unwrap();
        assert_eq!(provider2.chat(&hello(), &options).await.unwrap(), "two");
    }

    #[test]
    fn test_scripted_resolver_records_attempts() {
        let resolver = ScriptedResolver::new().with_model("m1", MockBehavior::reply("x"));
        assert!(resolver.resolve("m1", &Credential::new("k1")).is_ok());
        assert!(matches!(
            resolver.resolve("nope", &Credential::new("k1")),
            Err(Error::UnsupportedModel(_))
        ));
        assert!(matches!(
            resolver.resolve("m1", &Credential::new("")),
            Err(Error::MissingCredential(_))
        ));
        assert_eq!(resolver.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_scripted_resolver_identifier_override() {
        let resolver = ScriptedResolver::new()
            .with_model("m", MockBehavior::fail("bad key"))
            .with_identifier(Identifier::new("m", "good"), MockBehavior::reply("ok"));

        let good = resolver.resolve("m", &Credential::new("good")).unwrap();
        let bad = resolver.resolve("m", &Credential::new("other")).unwrap();
        assert_eq!(good.chat(&hello(), &ChatOptions::new()).await.unwrap(), "ok");
        assert!(bad.chat(&hello(), &ChatOptions::new()).await.is_err());
    }
}
