//! Selection policies: which candidate to try next.
//!
//! A policy sees the full pool and the request's failed-set and returns an
//! eligible candidate (one whose identifier has not failed), or `None` once
//! every identifier has failed. Policies carry no state of their own, so the
//! orchestrator can call them in a loop and share them across requests.
//!
//! # Policies
//!
//! - [`Sequential`]: first eligible candidate in pool order
//! - [`Random`]: uniform over the eligible candidates
//! - [`PriorityWeighted`]: random, biased toward low `priority` values

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rand::Rng;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::pool::{Candidate, FailedSet, Pool};
use crate::{Error, Result};

/// Chooses the next candidate to try within one logical request.
pub trait SelectionPolicy: Send + Sync {
    /// Returns an eligible candidate, or `None` if every identifier in the
    /// pool is in `failed`.
    fn select<'a>(&self, pool: &'a Pool, failed: &FailedSet) -> Option<&'a Candidate>;

    /// The policy name for diagnostics.
    fn name(&self) -> &str;
}

// ============================================================================
// Sequential
// ============================================================================

/// Fixed-priority failover: the first eligible candidate in pool order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl SelectionPolicy for Sequential {
    fn select<'a>(&self, pool: &'a Pool, failed: &FailedSet) -> Option<&'a Candidate> {
        pool.eligible(failed).next()
    }

    fn name(&self) -> &str {
        "sequential"
    }
}

// ============================================================================
// Random
// ============================================================================

/// Load spreading: a uniformly random eligible candidate.
///
/// Failed candidates are removed from the distribution, not down-weighted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Random;

impl Random {
    /// Select using an explicit RNG.
    pub fn select_with<'a, R: Rng + ?Sized>(
        pool: &'a Pool,
        failed: &FailedSet,
        rng: &mut R,
    ) -> Option<&'a Candidate> {
        let eligible: Vec<&Candidate> = pool.eligible(failed).collect();
        eligible.choose(rng).copied()
    }
}

impl SelectionPolicy for Random {
    fn select<'a>(&self, pool: &'a Pool, failed: &FailedSet) -> Option<&'a Candidate> {
        Self::select_with(pool, failed, &mut rand::rng())
    }

    fn name(&self) -> &str {
        "random"
    }
}

// ============================================================================
// PriorityWeighted
// ============================================================================

/// Random selection weighted by `1 / max(priority, 1)`.
///
/// Candidates without a priority use [`DEFAULT_PRIORITY`](crate::pool::DEFAULT_PRIORITY).
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityWeighted;

impl PriorityWeighted {
    fn weight(candidate: &Candidate) -> f64 {
        1.0 / candidate.effective_priority().max(1) as f64
    }

    /// Select using an explicit RNG.
    pub fn select_with<'a, R: Rng + ?Sized>(
        pool: &'a Pool,
        failed: &FailedSet,
        rng: &mut R,
    ) -> Option<&'a Candidate> {
        let eligible: Vec<&Candidate> = pool.eligible(failed).collect();
        match eligible.choose_weighted(rng, |c| Self::weight(c)) {
            Ok(chosen) => Some(*chosen),
            // Only reachable when nothing is eligible; weights are always > 0.
            Err(_) => eligible.first().copied(),
        }
    }
}

impl SelectionPolicy for PriorityWeighted {
    fn select<'a>(&self, pool: &'a Pool, failed: &FailedSet) -> Option<&'a Candidate> {
        Self::select_with(pool, failed, &mut rand::rng())
    }

    fn name(&self) -> &str {
        "priority-weighted"
    }
}

// ============================================================================
// PolicyKind
// ============================================================================

/// Named policy, as written in configuration or on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    /// [`Sequential`]
    Sequential,
    /// [`Random`]
    #[default]
    Random,
    /// [`PriorityWeighted`]
    PriorityWeighted,
}

impl PolicyKind {
    /// Instantiate the policy.
    pub fn build(self) -> Arc<dyn SelectionPolicy> {
        match self {
            Self::Sequential => Arc::new(Sequential),
            Self::Random => Arc::new(Random),
            Self::PriorityWeighted => Arc::new(PriorityWeighted),
        }
    }

    /// The canonical name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Random => "random",
            Self::PriorityWeighted => "priority-weighted",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "sequential" => Ok(Self::Sequential),
            "random" => Ok(Self::Random),
            "priority-weighted" | "weighted" => Ok(Self::PriorityWeighted),
            other => Err(Error::config(format!(
                "unknown selection policy '{other}' \
                 (expected sequential, random or priority-weighted)"
            ))),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
