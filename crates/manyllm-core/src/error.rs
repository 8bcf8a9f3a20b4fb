//! Error types for manyllm operations.
//!
//! This module provides the common `Error` type and `Result<T>` alias used
//! across all manyllm crates. Uses `thiserror` for derive macros.
//!
//! Per-candidate errors (resolution failures and provider-call failures) never
//! escape the orchestrator: they are folded into the request's failed-set.
//! Only [`Error::EmptyPool`] is raised eagerly, at construction time.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that can occur in manyllm operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The candidate pool was empty at construction time.
    #[error("candidate pool is empty")]
    EmptyPool,

    /// No registered route recognizes the model name.
    #[error("unsupported model: {0}")]
    UnsupportedModel(String),

    /// The candidate carries an empty credential.
    #[error("missing credential for model {0}")]
    MissingCredential(String),

    /// A route matched, but building its provider failed.
    #[error("failed to construct provider for {model_id}: {reason}")]
    ProviderInit {
        /// Model the provider was being built for.
        model_id: String,
        /// Why construction failed.
        reason: String,
    },

    /// A provider call failed (transport, auth, quota, malformed response).
    #[error("provider error: {message}")]
    Provider {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Every candidate in the pool failed.
    #[error("all {attempts} candidates failed; last error: {last_error}")]
    Exhausted {
        /// Number of distinct identifiers tried.
        attempts: usize,
        /// Rendering of the most recent underlying error.
        last_error: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// I/O error tied to a specific file.
    #[error("I/O error at {path}: {source}")]
    IoPath {
        /// File that was being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a provider-call error.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a provider-call error wrapping an underlying cause.
    pub fn provider_with_source<E>(msg: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Provider {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a provider construction error.
    pub fn provider_init(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProviderInit {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Attach a path to an I/O error.
    pub fn io_with_path(source: std::io::Error, path: impl AsRef<Path>) -> Self {
        Self::IoPath {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// True for errors raised while resolving a candidate to a provider,
    /// before any provider call was attempted.
    pub fn is_resolution(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedModel(_) | Self::MissingCredential(_) | Self::ProviderInit { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type alias using manyllm's Error type.
pub type Result<T> = std::result::Result<T, Error>;
