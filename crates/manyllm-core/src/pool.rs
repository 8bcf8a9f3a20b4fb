//! Candidate pool data model.
//!
//! A [`Pool`] is an ordered, non-empty list of [`Candidate`]s built once by
//! an external loader and shared read-only across logical requests. Failure
//! tracking lives outside the pool, in a request-scoped [`FailedSet`] keyed by
//! [`Identifier`].

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;

use crate::{Error, Result};

/// Open metadata attached to a candidate (`priority`, `provider`, ...).
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding the numeric priority (lower is tried earlier).
pub const PRIORITY_KEY: &str = "priority";

/// Metadata key holding the provider tag.
pub const PROVIDER_KEY: &str = "provider";

/// Priority assumed for candidates whose metadata carries none.
pub const DEFAULT_PRIORITY: i64 = 99;

// ============================================================================
// Credential
// ============================================================================

/// An opaque API secret.
///
/// `Debug` and `Display` only ever show a short suffix, so a credential can be
/// logged or embedded in error messages without leaking it.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for handing to a backend client.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when the secret is empty or whitespace.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Redacted form: `...` followed by at most the last four characters.
    ///
    /// Short secrets reveal at most half of their characters.
    pub fn redacted(&self) -> String {
        let count = self.0.chars().count();
        let shown = (count / 2).min(4);
        let suffix: String = self.0.chars().skip(count - shown).collect();
        format!("...{suffix}")
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&self.redacted()).finish()
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl From<&str> for Credential {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Credential {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Identifier
// ============================================================================

/// The failure-tracking key of a candidate: `(model_id, credential)`.
///
/// Metadata is not part of the key. Two candidates that differ only in
/// metadata are the same identifier, and failing one fails both.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// Backend model name.
    pub model_id: String,
    /// Credential used with that model.
    pub credential: Credential,
}

impl Identifier {
    /// Create an identifier.
    pub fn new(model_id: impl Into<String>, credential: impl Into<Credential>) -> Self {
        Self {
            model_id: model_id.into(),
            credential: credential.into(),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (key {})", self.model_id, self.credential)
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// One usable `(model, credential, metadata)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    /// Backend model name.
    pub model_id: String,
    /// Secret used to call the model.
    pub credential: Credential,
    /// Advisory metadata; no key is guaranteed to be present.
    pub metadata: Metadata,
}

impl Candidate {
    /// Create a candidate with empty metadata.
    pub fn new(model_id: impl Into<String>, credential: impl Into<Credential>) -> Self {
        Self {
            model_id: model_id.into(),
            credential: credential.into(),
            metadata: Metadata::new(),
        }
    }

    /// Set a metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the `priority` metadata entry.
    pub fn with_priority(self, priority: i64) -> Self {
        self.with_meta(PRIORITY_KEY, priority)
    }

    /// Set the `provider` metadata entry.
    pub fn with_provider(self, provider: impl Into<String>) -> Self {
        self.with_meta(PROVIDER_KEY, provider.into())
    }

    /// The failure-tracking key for this candidate.
    pub fn identifier(&self) -> Identifier {
        Identifier {
            model_id: self.model_id.clone(),
            credential: self.credential.clone(),
        }
    }

    fn is_failed(&self, failed: &FailedSet) -> bool {
        !failed.is_empty() && failed.contains(&self.identifier())
    }

    /// Priority from metadata, if present and integral.
    pub fn priority(&self) -> Option<i64> {
        self.metadata.get(PRIORITY_KEY).and_then(Value::as_i64)
    }

    /// Priority from metadata, falling back to [`DEFAULT_PRIORITY`].
    pub fn effective_priority(&self) -> i64 {
        self.priority().unwrap_or(DEFAULT_PRIORITY)
    }

    /// Provider tag from metadata, if present.
    pub fn provider(&self) -> Option<&str> {
        self.metadata.get(PROVIDER_KEY).and_then(Value::as_str)
    }
}

// ============================================================================
// Pool
// ============================================================================

/// Ordered, non-empty collection of candidates.
///
/// Order is significant: it is the try-order for the sequential policy and
/// the tie-break for everything else. The pool is not re-sorted here; the
/// builder is expected to hand it over sorted by ascending priority.
#[derive(Debug, Clone)]
pub struct Pool {
    candidates: Vec<Candidate>,
}

impl Pool {
    /// Build a pool, rejecting an empty candidate list.
    pub fn new(candidates: Vec<Candidate>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(Error::EmptyPool);
        }
        Ok(Self { candidates })
    }

    /// All candidates, in pool order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Iterate candidates in pool order.
    pub fn iter(&self) -> std::slice::Iter<'_, Candidate> {
        self.candidates.iter()
    }

    /// Number of candidates (duplicates included).
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Always false; an empty pool cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Distinct identifiers present in the pool.
    pub fn identifiers(&self) -> HashSet<Identifier> {
        self.candidates.iter().map(Candidate::identifier).collect()
    }

    /// Candidates not yet in `failed`, in pool order.
    pub fn eligible<'a, 'f>(
        &'a self,
        failed: &'f FailedSet,
    ) -> impl Iterator<Item = &'a Candidate> + use<'a, 'f> {
        self.candidates.iter().filter(move |c| !c.is_failed(failed))
    }
}

impl<'a> IntoIterator for &'a Pool {
    type Item = &'a Candidate;
    type IntoIter = std::slice::Iter<'a, Candidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

// ============================================================================
// FailedSet
// ============================================================================

/// Identifiers that failed within one logical request.
///
/// Grows monotonically: there is no way to remove an entry. Insertion order is
/// kept so diagnostics can report the order candidates failed in.
#[derive(Debug, Clone, Default)]
pub struct FailedSet {
    members: HashSet<Identifier>,
    order: Vec<Identifier>,
}

impl FailedSet {
    /// Create an empty failed-set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure. Returns false if the identifier was already present.
    pub fn insert(&mut self, identifier: Identifier) -> bool {
        if self.members.contains(&identifier) {
            return false;
        }
        self.members.insert(identifier.clone());
        self.order.push(identifier);
        true
    }

    /// Whether the identifier has failed.
    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.members.contains(identifier)
    }

    /// Number of distinct failed identifiers.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing has failed yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Failed identifiers in the order they failed.
    pub fn iter(&self) -> std::slice::Iter<'_, Identifier> {
        self.order.iter()
    }

    /// Failed identifiers as an unordered set.
    pub fn as_set(&self) -> &HashSet<Identifier> {
        &self.members
    }
}

// ============================================================================
// Tests
// ============================================================================
