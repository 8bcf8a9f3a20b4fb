//! manyllm core: candidate pool, selection policies and failover orchestration.
//!
//! This crate knows nothing about HTTP or any particular backend. Backends
//! plug in through [`ChatProvider`](llm::ChatProvider), and model routing
//! through [`ProviderResolver`](resolver::ProviderResolver).
//!
//! # Modules
//!
//! - [`error`]: Error types and Result alias
//! - [`pool`]: Candidates, identifiers, the pool and the per-request failed-set
//! - [`selection`]: Selection policies (sequential, random, priority-weighted)
//! - [`resolver`]: Model name routing to provider factories
//! - [`orchestrator`]: The failover loop, blocking and streaming
//! - [`llm`]: Provider trait, message types and mocks

#![doc = include_str!("../README.md")]

pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pool;
pub mod resolver;
pub mod selection;

// Re-export key types at crate root for convenience
pub use error::{Error, Result};
pub use llm::{ChatOptions, ChatProvider, ChunkStream, Message, Role};
pub use orchestrator::{
    ERROR_MARKER, EventStream, Exhausted, Orchestrator, Outcome, OutcomeStatus, OutcomeSummary,
    StreamEvent, Success, into_text_stream,
};
pub use pool::{Candidate, Credential, FailedSet, Identifier, Metadata, Pool};
pub use resolver::{ModelPattern, ModelRegistry, ProviderFactory, ProviderResolver};
pub use selection::{PolicyKind, PriorityWeighted, Random, SelectionPolicy, Sequential};
