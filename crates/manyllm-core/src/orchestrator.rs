//! Failover orchestration over a candidate pool.
//!
//! The [`Orchestrator`] drives one logical request at a time through
//!
//! ```text
//! Selecting ──► Invoking ──► Success (terminal)
//!     ▲             │
//!     │             ▼
//!     └──── Recording-Failure
//!
//! Selecting ──► Exhausted (terminal, when the policy returns None)
//! ```
//!
//! Each request owns a fresh [`FailedSet`]. A candidate that fails (at
//! resolution or during the call) is added to it and never tried again within
//! that request. Since the pool is finite and every iteration either succeeds
//! or grows the failed-set, the loop always terminates.
//!
//! Streaming follows the same rules up to the first emitted chunk. After that
//! the output cannot be taken back, so a failure ends the stream with
//! [`StreamEvent::Interrupted`] instead of switching candidates.

use std::sync::Arc;

use async_stream::stream;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::llm::{ChatOptions, ChatProvider, ChunkStream, Message};
use crate::pool::{Candidate, FailedSet, Identifier, Metadata, Pool};
use crate::resolver::ProviderResolver;
use crate::selection::SelectionPolicy;
use crate::{Error, Result};

/// Prefix of the in-band text rendering of a terminal stream error.
pub const ERROR_MARKER: &str = "[manyllm:error] ";

/// Text used when exhaustion happens without any recorded error.
pub const NO_ERROR_RECORDED: &str = "no error recorded";

// ============================================================================
// Outcome
// ============================================================================

/// A successful chat: which candidate answered, and what it said.
#[derive(Debug, Clone)]
pub struct Success {
    /// Model that produced the reply.
    pub model_id: String,
    /// Failure-tracking key of the winning candidate.
    pub identifier: Identifier,
    /// Metadata of the winning candidate.
    pub metadata: Metadata,
    /// Reply text.
    pub content: String,
    /// Identifiers that failed before this one, in order.
    pub failed: FailedSet,
}

/// Every candidate failed.
#[derive(Debug)]
pub struct Exhausted {
    /// Identifiers that failed, in order. Equals the pool's identifiers.
    pub failed: FailedSet,
    /// The most recent underlying error.
    pub last_error: Option<Error>,
}

impl Exhausted {
    /// Rendering of the last error, or [`NO_ERROR_RECORDED`].
    pub fn last_error_message(&self) -> String {
        self.last_error
            .as_ref()
            .map_or_else(|| NO_ERROR_RECORDED.to_string(), ToString::to_string)
    }
}

/// Terminal result of [`Orchestrator::chat`].
#[derive(Debug)]
pub enum Outcome {
    /// A candidate answered.
    Success(Success),
    /// The pool ran out.
    Exhausted(Exhausted),
}

impl Outcome {
    /// Whether the request succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Identifiers that failed during the request.
    pub fn failed(&self) -> &FailedSet {
        match self {
            Self::Success(s) => &s.failed,
            Self::Exhausted(e) => &e.failed,
        }
    }

    /// Convert to a `Result`, turning exhaustion into [`Error::Exhausted`].
    pub fn into_result(self) -> Result<Success> {
        match self {
            Self::Success(s) => Ok(s),
            Self::Exhausted(e) => Err(Error::Exhausted {
                attempts: e.failed.len(),
                last_error: e.last_error_message(),
            }),
        }
    }

    /// Flat, serializable view of the outcome.
    pub fn summary(&self) -> OutcomeSummary {
        match self {
            Self::Success(s) => OutcomeSummary {
                status: OutcomeStatus::Success,
                model: Some(s.model_id.clone()),
                key: Some(s.identifier.credential.redacted()),
                content: Some(s.content.clone()),
                message: None,
            },
            Self::Exhausted(e) => OutcomeSummary {
                status: OutcomeStatus::Error,
                model: None,
                key: None,
                content: None,
                message: Some(format!(
                    "all models failed to handle the request; last error: {}",
                    e.last_error_message()
                )),
            },
        }
    }
}

/// `status` field of an [`OutcomeSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    /// A candidate answered.
    Success,
    /// The request failed.
    Error,
}

/// `{status, model, key, content | message}` record describing an outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    /// Success or error.
    pub status: OutcomeStatus,
    /// Winning model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Redacted suffix of the winning credential.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Reply text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OutcomeSummary {
    /// An error summary for a request that never reached the orchestrator.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            model: None,
            key: None,
            content: None,
            message: Some(message.into()),
        }
    }
}

// ============================================================================
// Stream events
// ============================================================================

/// One item of [`Orchestrator::chat_stream`].
///
/// The stream yields any number of `Chunk`s followed by exactly one terminal
/// event (`Completed`, `Interrupted` or `Exhausted`).
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Output relayed from the serving provider.
    Chunk(String),
    /// The serving provider finished cleanly.
    Completed {
        /// Model that served the stream.
        model_id: String,
        /// Its failure-tracking key.
        identifier: Identifier,
        /// Its metadata.
        metadata: Metadata,
    },
    /// The serving provider failed after output was already emitted.
    Interrupted {
        /// Model that was serving the stream.
        model_id: String,
        /// Its failure-tracking key.
        identifier: Identifier,
        /// Rendering of the failure.
        error: String,
    },
    /// No candidate managed to produce any output.
    Exhausted {
        /// Number of identifiers tried.
        attempts: usize,
        /// Rendering of the last error.
        last_error: String,
    },
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk(_))
    }

    /// In-band text rendering.
    ///
    /// Chunks render verbatim, `Completed` renders as nothing, and the error
    /// events render as a single line starting with [`ERROR_MARKER`].
    pub fn as_text(&self) -> Option<String> {
        match self {
            Self::Chunk(text) => Some(text.clone()),
            Self::Completed { .. } => None,
            Self::Interrupted { model_id, error, .. } => Some(format!(
                "{ERROR_MARKER}stream from {model_id} interrupted: {error}"
            )),
            Self::Exhausted { last_error, .. } => Some(format!(
                "{ERROR_MARKER}all models failed to handle the request; last error: {last_error}"
            )),
        }
    }
}

/// Stream of [`StreamEvent`]s for one logical request.
pub type EventStream = BoxStream<'static, StreamEvent>;

/// Flatten an event stream into plain text chunks with in-band error markers.
pub fn into_text_stream(events: EventStream) -> BoxStream<'static, String> {
    events
        .filter_map(|event| futures::future::ready(event.as_text()))
        .boxed()
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Runs chat requests against a pool with failover.
///
/// Cloning is cheap; clones share the pool, policy and resolver, all of which
/// are read-only while requests run. Concurrent requests never share a
/// failed-set.
#[derive(Clone)]
pub struct Orchestrator {
    pool: Arc<Pool>,
    policy: Arc<dyn SelectionPolicy>,
    resolver: Arc<dyn ProviderResolver>,
}

impl Orchestrator {
    /// Create an orchestrator over an already-built pool.
    pub fn new(
        pool: impl Into<Arc<Pool>>,
        policy: Arc<dyn SelectionPolicy>,
        resolver: Arc<dyn ProviderResolver>,
    ) -> Self {
        Self {
            pool: pool.into(),
            policy,
            resolver,
        }
    }

    /// Create an orchestrator from raw candidates.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyPool`] if `candidates` is empty.
    pub fn from_candidates(
        candidates: Vec<Candidate>,
        policy: Arc<dyn SelectionPolicy>,
        resolver: Arc<dyn ProviderResolver>,
    ) -> Result<Self> {
        Ok(Self::new(Pool::new(candidates)?, policy, resolver))
    }

    /// The shared pool.
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The selection policy name.
    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    /// Send a chat request, failing over until a candidate answers or the
    /// pool is exhausted. Stops at the first success.
    pub async fn chat(&self, messages: &[Message], options: &ChatOptions) -> Outcome {
        let mut failed = FailedSet::new();
        let mut last_error: Option<Error> = None;

        debug!(policy = self.policy.name(), pool = self.pool.len(), "starting chat");

        loop {
            let Some(candidate) = self.policy.select(&self.pool, &failed) else {
                error!(attempts = failed.len(), "all candidates failed");
                return Outcome::Exhausted(Exhausted { failed, last_error });
            };
            let identifier = candidate.identifier();
            info!(model = %candidate.model_id, key = %candidate.credential, "trying candidate");

            let attempt = match self.resolve(candidate) {
                Ok(provider) => provider.chat(messages, options).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(content) => {
                    info!(model = %candidate.model_id, "candidate succeeded");
                    return Outcome::Success(Success {
                        model_id: candidate.model_id.clone(),
                        identifier,
                        metadata: candidate.metadata.clone(),
                        content,
                        failed,
                    });
                }
                Err(e) => {
                    warn!(
                        model = %candidate.model_id,
                        key = %candidate.credential,
                        error = %e,
                        "candidate failed"
                    );
                    failed.insert(identifier);
                    last_error = Some(e);
                }
            }
        }
    }

    /// Streaming variant of [`Self::chat`].
    ///
    /// Candidates that fail before emitting their first chunk are failed over
    /// exactly as in `chat`. Once a chunk has been emitted the candidate is
    /// committed: a later failure yields [`StreamEvent::Interrupted`] and ends
    /// the stream. A provider stream that ends without output still counts as
    /// a success.
    pub fn chat_stream(&self, messages: Vec<Message>, options: ChatOptions) -> EventStream {
        let pool = Arc::clone(&self.pool);
        let policy = Arc::clone(&self.policy);
        let resolver = Arc::clone(&self.resolver);

        Box::pin(stream! {
            let mut failed = FailedSet::new();
            let mut last_error: Option<Error> = None;

            'select: loop {
                let Some(candidate) = policy.select(&pool, &failed) else {
                    error!(attempts = failed.len(), "all candidates failed (stream)");
                    yield StreamEvent::Exhausted {
                        attempts: failed.len(),
                        last_error: last_error
                            .as_ref()
                            .map_or_else(|| NO_ERROR_RECORDED.to_string(), ToString::to_string),
                    };
                    return;
                };
                let candidate = candidate.clone();
                let identifier = candidate.identifier();
                info!(
                    model = %candidate.model_id,
                    key = %candidate.credential,
                    "trying candidate (stream)"
                );

                let opened = match resolve_with(resolver.as_ref(), &candidate) {
                    Ok(provider) => provider.chat_stream(&messages, &options).await,
                    Err(e) => Err(e),
                };
                let mut chunks: ChunkStream = match opened {
                    Ok(chunks) => chunks,
                    Err(e) => {
                        warn!(
                            model = %candidate.model_id,
                            error = %e,
                            "candidate failed to open stream"
                        );
                        failed.insert(identifier);
                        last_error = Some(e);
                        continue 'select;
                    }
                };

                // First-chunk boundary: failover is only allowed while false.
                // Empty chunks carry no output and do not cross it.
                let mut emitted = false;
                while let Some(item) = chunks.next().await {
                    match item {
                        Ok(chunk) if chunk.is_empty() => {}
                        Ok(chunk) => {
                            emitted = true;
                            yield StreamEvent::Chunk(chunk);
                        }
                        Err(e) if !emitted => {
                            warn!(
                                model = %candidate.model_id,
                                error = %e,
                                "candidate failed before first chunk"
                            );
                            failed.insert(identifier);
                            last_error = Some(e);
                            continue 'select;
                        }
                        Err(e) => {
                            error!(
                                model = %candidate.model_id,
                                error = %e,
                                "stream interrupted after output was emitted"
                            );
                            yield StreamEvent::Interrupted {
                                model_id: candidate.model_id.clone(),
                                identifier,
                                error: e.to_string(),
                            };
                            return;
                        }
                    }
                }

                info!(model = %candidate.model_id, emitted, "stream completed");
                yield StreamEvent::Completed {
                    model_id: candidate.model_id.clone(),
                    identifier,
                    metadata: candidate.metadata.clone(),
                };
                return;
            }
        })
    }

    fn resolve(&self, candidate: &Candidate) -> Result<Arc<dyn ChatProvider>> {
        resolve_with(self.resolver.as_ref(), candidate)
    }
}

fn resolve_with(
    resolver: &dyn ProviderResolver,
    candidate: &Candidate,
) -> Result<Arc<dyn ChatProvider>> {
    resolver.resolve(&candidate.model_id, &candidate.credential)
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("pool", &self.pool.len())
            .field("policy", &self.policy.name())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::llm::{MockBehavior, ScriptedResolver};
    use crate::selection::{PolicyKind, Random, Sequential};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn hi() -> Vec<Message> {
        vec![Message::user("hi")]
    }

    fn orchestrator(
        candidates: Vec<Candidate>,
        policy: Arc<dyn SelectionPolicy>,
        resolver: &ScriptedResolver,
    ) -> Orchestrator {
        Orchestrator::from_candidates(candidates, policy, Arc::new(resolver.clone())).unwrap()
    }

    async fn collect(stream: EventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    // ------------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------------

    #[test]
    fn test_empty_pool_is_construction_error() {
        let err = Orchestrator::from_candidates(
            Vec::new(),
            Arc::new(Sequential),
            Arc::new(ScriptedResolver::new()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::EmptyPool));
    }

    #[test]
    fn test_orchestrator_is_send_sync_clone() {
        fn assert_send_sync<T: Send + Sync + Clone>() {}
        assert_send_sync::<Orchestrator>();
    }

    // ------------------------------------------------------------------------
    // chat
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_first_fails_second_succeeds() {
        let resolver = ScriptedResolver::new()
            .with_model("m1", MockBehavior::fail("quota exceeded"))
            .with_model("m2", MockBehavior::reply("hi"));
        let orch = orchestrator(
            vec![
                Candidate::new("m1", "k1").with_priority(1),
                Candidate::new("m2", "k2").with_priority(2),
            ],
            Arc::new(Sequential),
            &resolver,
        );

        let outcome = orch.chat(&hi(), &ChatOptions::new()).await;
        let summary = outcome.summary();
        assert_eq!(summary.status, OutcomeStatus::Success);
        assert_eq!(summary.model.as_deref(), Some("m2"));
        assert_eq!(summary.content.as_deref(), Some("hi"));

        let success = outcome.into_result().unwrap();
        assert_eq!(success.identifier, Identifier::new("m2", "k2"));
        assert_eq!(success.metadata.get("priority"), Some(&serde_json::json!(2)));
        assert_eq!(success.failed.len(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::reply("from a"))
            .with_model("b", MockBehavior::reply("from b"));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        let success = orch.chat(&hi(), &ChatOptions::new()).await.into_result().unwrap();
        assert_eq!(success.content, "from a");
        assert_eq!(resolver.attempts(), vec![Identifier::new("a", "k")]);
    }

    #[tokio::test]
    async fn test_exhausted_when_all_fail() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::fail("a down"))
            .with_model("b", MockBehavior::fail("b down"))
            .with_model("c", MockBehavior::fail("c down"));
        let pool = vec![
            Candidate::new("a", "k"),
            Candidate::new("b", "k"),
            Candidate::new("c", "k"),
        ];
        let orch = orchestrator(pool, Arc::new(Sequential), &resolver);

        let outcome = orch.chat(&hi(), &ChatOptions::new()).await;
        assert!(!outcome.is_success());
        assert_eq!(outcome.failed().as_set(), &orch.pool().identifiers());

        let Outcome::Exhausted(exhausted) = outcome else {
            unreachable!("checked above");
        };
        assert!(exhausted.last_error_message().contains("c down"));
        let summary = Outcome::Exhausted(exhausted).summary();
        assert_eq!(summary.status, OutcomeStatus::Error);
        assert!(summary.message.unwrap().contains("c down"));
    }

    #[tokio::test]
    async fn test_resolution_failures_count_as_failures() {
        // "x" has no script (unsupported); "y" has an empty key.
        let resolver = ScriptedResolver::new()
            .with_model("y", MockBehavior::reply("never"))
            .with_model("z", MockBehavior::reply("ok"));
        let orch = orchestrator(
            vec![
                Candidate::new("x", "k"),
                Candidate::new("y", ""),
                Candidate::new("z", "k"),
            ],
            Arc::new(Sequential),
            &resolver,
        );

        let success = orch.chat(&hi(), &ChatOptions::new()).await.into_result().unwrap();
        assert_eq!(success.model_id, "z");
        assert_eq!(success.failed.len(), 2);
    }

    #[tokio::test]
    async fn test_all_resolution_failures_exhaust_with_last_error() {
        let resolver = ScriptedResolver::new();
        let orch = orchestrator(vec![Candidate::new("x", "k")], Arc::new(Sequential), &resolver);

        let err = orch.chat(&hi(), &ChatOptions::new()).await.into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::Exhausted { attempts: 1, ref last_error }
                if last_error.contains("unsupported model")
        ));
    }

    #[tokio::test]
    async fn test_shared_identifier_fails_together() {
        let resolver = ScriptedResolver::new()
            .with_model("m", MockBehavior::fail("bad key"))
            .with_model("n", MockBehavior::reply("ok"));
        let orch = orchestrator(
            vec![
                Candidate::new("m", "k").with_priority(1),
                Candidate::new("m", "k").with_priority(2).with_provider("other"),
                Candidate::new("n", "k").with_priority(3),
            ],
            Arc::new(Sequential),
            &resolver,
        );

        let success = orch.chat(&hi(), &ChatOptions::new()).await.into_result().unwrap();
        assert_eq!(success.model_id, "n");
        // The duplicate "m" entry is never tried a second time.
        assert_eq!(
            resolver.attempts(),
            vec![Identifier::new("m", "k"), Identifier::new("n", "k")]
        );
    }

    #[tokio::test]
    async fn test_failed_set_is_request_scoped() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::fail("down"))
            .with_model("b", MockBehavior::reply("ok"));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        orch.chat(&hi(), &ChatOptions::new()).await;
        orch.chat(&hi(), &ChatOptions::new()).await;
        // "a" is tried again by the second request.
        let attempts: Vec<_> = resolver
            .attempts()
            .into_iter()
            .map(|id| id.model_id)
            .collect();
        assert_eq!(attempts, vec!["a", "b", "a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_pool() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::fail("down"))
            .with_model("b", MockBehavior::reply("ok"));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Random),
            &resolver,
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let orch = orch.clone();
                tokio::spawn(
                    async move { orch.chat(&hi(), &ChatOptions::new()).await.is_success() },
                )
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    // ------------------------------------------------------------------------
    // chat_stream
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_stream_success_relays_chunks() {
        let resolver =
            ScriptedResolver::new().with_model("a", MockBehavior::stream(["Hel", "lo"]));
        let orch = orchestrator(vec![Candidate::new("a", "k")], Arc::new(Sequential), &resolver);

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Chunk("Hel".into()));
        assert_eq!(events[1], StreamEvent::Chunk("lo".into()));
        assert!(matches!(
            events[2],
            StreamEvent::Completed { ref model_id, .. } if model_id == "a"
        ));
    }

    #[tokio::test]
    async fn test_stream_fails_over_before_first_chunk() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::fail("open failed"))
            .with_model(
                "b",
                MockBehavior::stream_then_fail(Vec::<String>::new(), "first item failed"),
            )
            .with_model("c", MockBehavior::stream(["ok"]));
        let orch = orchestrator(
            vec![
                Candidate::new("a", "k"),
                Candidate::new("b", "k"),
                Candidate::new("c", "k"),
            ],
            Arc::new(Sequential),
            &resolver,
        );

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events[0], StreamEvent::Chunk("ok".into()));
        assert!(matches!(
            events[1],
            StreamEvent::Completed { ref model_id, .. } if model_id == "c"
        ));
        assert_eq!(resolver.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_stream_no_failover_after_first_chunk() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::stream_then_fail(["partial"], "connection reset"))
            .with_model("b", MockBehavior::stream(["never"]));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Chunk("partial".into()));
        assert!(matches!(
            events[1],
            StreamEvent::Interrupted { ref model_id, ref error, .. }
                if model_id == "a" && error.contains("connection reset")
        ));
        assert_eq!(resolver.attempts(), vec![Identifier::new("a", "k")]);
    }

    #[tokio::test]
    async fn test_stream_empty_chunks_do_not_commit_candidate() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::stream_then_fail(["", ""], "reset before output"))
            .with_model("b", MockBehavior::stream(["", "ok"]));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Chunk("ok".into()));
        assert!(matches!(
            events[1],
            StreamEvent::Completed { ref model_id, .. } if model_id == "b"
        ));
        assert_eq!(resolver.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_stream_exhaustion_emits_single_marker() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::fail("a down"))
            .with_model("b", MockBehavior::fail("b down"));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Exhausted { attempts: 2, ref last_error } if last_error.contains("b down")
        ));
    }

    #[tokio::test]
    async fn test_stream_empty_output_counts_as_success() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::stream(Vec::<String>::new()))
            .with_model("b", MockBehavior::stream(["unused"]));
        let orch = orchestrator(
            vec![Candidate::new("a", "k"), Candidate::new("b", "k")],
            Arc::new(Sequential),
            &resolver,
        );

        let events = collect(orch.chat_stream(hi(), ChatOptions::new())).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Completed { ref model_id, .. } if model_id == "a"
        ));
    }

    #[tokio::test]
    async fn test_text_stream_in_band_markers() {
        let resolver = ScriptedResolver::new()
            .with_model("a", MockBehavior::stream_then_fail(["x"], "cut"));
        let orch = orchestrator(vec![Candidate::new("a", "k")], Arc::new(Sequential), &resolver);

        let text: Vec<String> = into_text_stream(orch.chat_stream(hi(), ChatOptions::new()))
            .collect()
            .await;
        assert_eq!(text.len(), 2);
        assert_eq!(text[0], "x");
        assert!(text[1].starts_with(ERROR_MARKER));

        let resolver = ScriptedResolver::new();
        let orch = orchestrator(vec![Candidate::new("a", "k")], Arc::new(Sequential), &resolver);
        let text: Vec<String> = into_text_stream(orch.chat_stream(hi(), ChatOptions::new()))
            .collect()
            .await;
        assert_eq!(text.len(), 1);
        assert!(text[0].starts_with(ERROR_MARKER));
        assert!(text[0].contains("unsupported model"));
    }

    #[test]
    fn test_stream_event_terminal_flags() {
        assert!(!StreamEvent::Chunk("x".into()).is_terminal());
        assert!(
            StreamEvent::Exhausted {
                attempts: 0,
                last_error: NO_ERROR_RECORDED.into()
            }
            .is_terminal()
        );
        assert_eq!(
            StreamEvent::Completed {
                model_id: "m".into(),
                identifier: Identifier::new("m", "k"),
                metadata: Metadata::new(),
            }
            .as_text(),
            None
        );
    }

    #[test]
    fn test_summary_serialization_skips_empty_fields() {
        let json = serde_json::to_value(OutcomeSummary::error("bad line")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "bad line"}));
    }

    // ------------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------------

    /// Pool entries: (model index, key index, succeeds?).
    fn pool_strategy() -> impl Strategy<Value = Vec<(u8, u8, bool)>> {
        prop::collection::vec((0u8..4, 0u8..3, any::<bool>()), 1..10)
    }

    /// Builds the pool and a resolver scripted per identifier. The first
    /// entry for an identifier decides whether it succeeds. Also returns
    /// whether any identifier succeeds.
    fn scripted(entries: &[(u8, u8, bool)]) -> (Vec<Candidate>, ScriptedResolver, bool) {
        let mut resolver = ScriptedResolver::new();
        let mut seen = HashSet::new();
        let mut any_ok = false;
        let mut candidates = Vec::new();
        for (i, (m, k, ok)) in entries.iter().enumerate() {
            let candidate =
                Candidate::new(format!("m{m}"), format!("key-{k}")).with_priority(i as i64 + 1);
            if seen.insert(candidate.identifier()) {
                any_ok |= *ok;
                let behavior = if *ok {
                    MockBehavior::reply("ok")
                } else {
                    MockBehavior::fail(format!("m{m} rejected key-{k}"))
                };
                resolver = resolver.with_identifier(candidate.identifier(), behavior);
            }
            candidates.push(candidate);
        }
        (candidates, resolver, any_ok)
    }

    proptest! {
        #[test]
        fn prop_never_retries_and_succeeds_iff_any_succeeds(
            entries in pool_strategy(),
            policy in prop::sample::select(vec![
                PolicyKind::Sequential,
                PolicyKind::Random,
                PolicyKind::PriorityWeighted,
            ]),
        ) {
            let (candidates, resolver, any_ok) = scripted(&entries);
            let orch = orchestrator(candidates, policy.build(), &resolver);

            let outcome = tokio_test::block_on(orch.chat(&hi(), &ChatOptions::new()));
            let attempts = resolver.attempts();

            let unique: HashSet<_> = attempts.iter().cloned().collect();
            prop_assert_eq!(unique.len(), attempts.len(), "an identifier was tried twice");
            prop_assert_eq!(outcome.is_success(), any_ok);

            if outcome.is_success() {
                prop_assert_eq!(outcome.failed().len() + 1, attempts.len());
            } else {
                prop_assert_eq!(outcome.failed().as_set(), &orch.pool().identifiers());
            }
        }

        #[test]
        fn prop_sequential_tries_in_pool_order(entries in pool_strategy()) {
            let failing: Vec<_> = entries.iter().map(|(m, k, _)| (*m, *k, false)).collect();
            let (candidates, resolver, _) = scripted(&failing);
            let orch = orchestrator(candidates.clone(), Arc::new(Sequential), &resolver);
            tokio_test::block_on(orch.chat(&hi(), &ChatOptions::new()));

            let mut expected = Vec::new();
            for c in &candidates {
                let id = c.identifier();
                if !expected.contains(&id) {
                    expected.push(id);
                }
            }
            prop_assert_eq!(resolver.attempts(), expected);
        }

        #[test]
        fn prop_stream_never_retries_an_identifier(entries in pool_strategy()) {
            let (candidates, resolver, any_ok) = scripted(&entries);
            let orch = orchestrator(candidates, Arc::new(Random), &resolver);

            let events = tokio_test::block_on(collect(orch.chat_stream(hi(), ChatOptions::new())));
            let attempts = resolver.attempts();
            let unique: HashSet<_> = attempts.iter().cloned().collect();
            prop_assert_eq!(unique.len(), attempts.len());

            let terminal = events.iter().filter(|e| e.is_terminal()).count();
            prop_assert_eq!(terminal, 1);
            let completed = matches!(events.last(), Some(StreamEvent::Completed { .. }));
            prop_assert_eq!(completed, any_ok);
        }
    }
}
