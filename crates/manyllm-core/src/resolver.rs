//! Provider resolution: model name + credential → provider instance.
//!
//! [`ModelRegistry`] is an ordered list of routes. Each route pairs a
//! [`ModelPattern`] with a factory; the first route whose pattern matches the
//! model name builds the provider.

use std::fmt;
use std::sync::Arc;

use crate::llm::ChatProvider;
use crate::pool::Credential;
use crate::{Error, Result};

/// Maps a `(model_id, credential)` pair to a concrete provider.
pub trait ProviderResolver: Send + Sync {
    /// Resolve a provider.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedModel`] when no backend recognizes the model
    /// - [`Error::MissingCredential`] when the credential is empty
    /// - [`Error::ProviderInit`] when building the provider fails
    fn resolve(&self, model_id: &str, credential: &Credential) -> Result<Arc<dyn ChatProvider>>;
}

/// Builds a provider for a model once its route has matched.
pub type ProviderFactory =
    Arc<dyn Fn(&str, &Credential) -> Result<Arc<dyn ChatProvider>> + Send + Sync>;

/// How a route recognizes model names. Matching is case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelPattern {
    /// Model name contains this substring.
    Contains(String),
    /// Model name starts with this prefix.
    Prefix(String),
}

impl ModelPattern {
    /// Substring pattern.
    pub fn contains(needle: impl Into<String>) -> Self {
        Self::Contains(needle.into().to_lowercase())
    }

    /// Prefix pattern.
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into().to_lowercase())
    }

    /// Whether `model_id` matches.
    pub fn matches(&self, model_id: &str) -> bool {
        let model = model_id.to_lowercase();
        match self {
            Self::Contains(needle) => model.contains(needle.as_str()),
            Self::Prefix(prefix) => model.starts_with(prefix.as_str()),
        }
    }
}

impl fmt::Display for ModelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Contains(s) => write!(f, "*{s}*"),
            Self::Prefix(s) => write!(f, "{s}*"),
        }
    }
}

struct Route {
    backend: String,
    patterns: Vec<ModelPattern>,
    factory: ProviderFactory,
}

/// Ordered table of model routes. Routes are tried in registration order.
#[derive(Default)]
pub struct ModelRegistry {
    routes: Vec<Route>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route (lowest priority so far).
    ///
    /// `backend` names the route for diagnostics; any pattern in `patterns`
    /// selects it.
    pub fn register<F>(
        &mut self,
        backend: impl Into<String>,
        patterns: Vec<ModelPattern>,
        factory: F,
    ) -> &mut Self
    where
        F: Fn(&str, &Credential) -> Result<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            backend: backend.into(),
            patterns,
            factory: Arc::new(factory),
        });
        self
    }

    /// Builder-style [`Self::register`].
    pub fn with_route<F>(
        mut self,
        backend: impl Into<String>,
        patterns: Vec<ModelPattern>,
        factory: F,
    ) -> Self
    where
        F: Fn(&str, &Credential) -> Result<Arc<dyn ChatProvider>> + Send + Sync + 'static,
    {
        self.register(backend, patterns, factory);
        self
    }

    /// Name of the backend that would serve `model_id`, if any.
    pub fn backend_for(&self, model_id: &str) -> Option<&str> {
        self.route_for(model_id).map(|r| r.backend.as_str())
    }

    /// Registered backend names, in route order.
    pub fn backends(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.backend.as_str()).collect()
    }

    fn route_for(&self, model_id: &str) -> Option<&Route> {
        self.routes
            .iter()
            .find(|route| route.patterns.iter().any(|p| p.matches(model_id)))
    }
}

impl ProviderResolver for ModelRegistry {
    fn resolve(&self, model_id: &str, credential: &Credential) -> Result<Arc<dyn ChatProvider>> {
        let route = self
            .route_for(model_id)
            .ok_or_else(|| Error::UnsupportedModel(model_id.to_string()))?;

        if credential.is_empty() {
            return Err(Error::MissingCredential(model_id.to_string()));
        }

        (route.factory)(model_id, credential).map_err(|e| match e {
            Error::ProviderInit { .. } => e,
            other => Error::provider_init(model_id, other.to_string()),
        })
    }
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for route in &self.routes {
            let patterns: Vec<String> = route.patterns.iter().map(ToString::to_string).collect();
            list.entry(&(route.backend.as_str(), patterns));
        }
        list.finish()
    }
}
