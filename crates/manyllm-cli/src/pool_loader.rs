//! Builds the candidate pool from configured sources and numbered env keys.
//!
//! Every [`ModelSource`] names an env prefix such as `GEMINI_API_KEY`. The
//! loader scans `GEMINI_API_KEY_1` through `GEMINI_API_KEY_{max_key_slots}`
//! and emits one candidate per key found, so a source with three keys
//! contributes three candidates.

use std::path::Path;

use manyllm_core::{Candidate, Error, Pool, Result};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;

/// Metadata key recording which numbered slot a key came from.
pub const KEY_SLOT_KEY: &str = "key_slot";

/// Load a dotenv file into the process environment.
///
/// Variables already set are left alone. Returns `false` if the file does
/// not exist.
pub fn load_env_file(path: impl AsRef<Path>) -> Result<bool> {
    let path = path.as_ref();
    if !path.exists() {
        debug!(path = %path.display(), "no env file");
        return Ok(false);
    }
    dotenvy::from_path(path)
        .map_err(|e| Error::config(format!("failed to load {}: {e}", path.display())))?;
    info!(path = %path.display(), "loaded env file");
    Ok(true)
}

/// Collect candidates from `config.sources`, looking keys up with `lookup`.
///
/// The result is stable-sorted by ascending priority (missing = 99), so
/// sources keep their configured order within one priority.
pub fn collect_candidates<F>(config: &PoolConfig, lookup: F) -> Vec<Candidate>
where
    F: Fn(&str) -> Option<String>,
{
    let mut candidates = Vec::new();
    for source in &config.sources {
        for slot in 1..=config.max_key_slots {
            let var = format!("{}_{slot}", source.key_env);
            let Some(key) = lookup(&var).filter(|k| !k.trim().is_empty()) else {
                continue;
            };
            let mut candidate = Candidate::new(&source.model, key.trim())
                .with_provider(&source.provider)
                .with_meta(KEY_SLOT_KEY, slot);
            if let Some(priority) = source.priority {
                candidate = candidate.with_priority(priority);
            }
            candidates.push(candidate);
        }
    }
    candidates.sort_by_key(Candidate::effective_priority);
    candidates
}

/// Build the pool from the process environment.
///
/// Loads `config.env_file` first, when set.
///
/// # Errors
///
/// [`Error::EmptyPool`] if no source has any key.
pub fn load_pool(config: &PoolConfig) -> Result<Pool> {
    if let Some(env_file) = &config.env_file {
        load_env_file(env_file)?;
    }
    build_pool(config, |var| std::env::var(var).ok())
}

/// Build the pool from keys provided by `lookup`, logging each entry.
pub fn build_pool<F>(config: &PoolConfig, lookup: F) -> Result<Pool>
where
    F: Fn(&str) -> Option<String>,
{
    let candidates = collect_candidates(config, lookup);
    if candidates.is_empty() {
        let prefixes: Vec<&str> = config.sources.iter().map(|s| s.key_env.as_str()).collect();
        warn!(
            prefixes = ?prefixes,
            "no API keys found; set {{PREFIX}}_1 .. {{PREFIX}}_{} in the environment or env file",
            config.max_key_slots
        );
        return Err(Error::EmptyPool);
    }

    info!(candidates = candidates.len(), policy = %config.policy, "candidate pool loaded");
    for candidate in &candidates {
        info!(
            model = %candidate.model_id,
            provider = candidate.provider().unwrap_or("-"),
            priority = candidate.effective_priority(),
            key = %candidate.credential,
            "pool entry"
        );
    }

    Pool::new(candidates)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::ModelSource;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_one_candidate_per_key_sorted_by_priority() {
        let config = PoolConfig::default();
        let lookup = env(&[
            ("GEMINI_API_KEY_1", "g-key-one"),
            ("GEMINI_API_KEY_3", "g-key-three"),
            ("OPENAI_API_KEY_1", "sk-openai"),
        ]);
        let candidates = collect_candidates(&config, lookup);

        // 3 gemini models x 2 keys + 1 openai model x 1 key
        assert_eq!(candidates.len(), 7);
        let models: Vec<&str> = candidates.iter().map(|c| c.model_id.as_str()).collect();
        assert_eq!(
            models,
            vec![
                "gemma-3-27b-it",
                "gemma-3-27b-it",
                "gemini-2.0-flash-lite",
                "gemini-2.0-flash-lite",
                "gemini-2.0-flash",
                "gemini-2.0-flash",
                "gpt-4o",
            ]
        );
        assert_eq!(candidates[1].credential.expose(), "g-key-three");
        assert_eq!(candidates[1].metadata.get(KEY_SLOT_KEY), Some(&serde_json::json!(3)));
        assert_eq!(candidates[6].provider(), Some("openai"));
    }

    #[test]
    fn test_slots_beyond_max_are_ignored() {
        let config = PoolConfig {
            max_key_slots: 2,
            sources: vec![ModelSource::new("zhipuai", "glm-4.5-flash", 4, "ZHIPUAI_API_KEY")],
            ..PoolConfig::default()
        };
        let lookup = env(&[("ZHIPUAI_API_KEY_2", "z2"), ("ZHIPUAI_API_KEY_3", "z3")]);
        let candidates = collect_candidates(&config, lookup);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].credential.expose(), "z2");
    }

    #[test]
    fn test_blank_keys_are_skipped_and_missing_priority_sorts_last() {
        let config = PoolConfig {
            sources: vec![
                ModelSource {
                    priority: None,
                    ..ModelSource::new("x", "unranked", 0, "X_KEY")
                },
                ModelSource::new("y", "ranked", 5, "Y_KEY"),
            ],
            ..PoolConfig::default()
        };
        let lookup = env(&[("X_KEY_1", "x"), ("X_KEY_2", "   "), ("Y_KEY_1", "y")]);
        let candidates = collect_candidates(&config, lookup);
        let models: Vec<&str> = candidates.iter().map(|c| c.model_id.as_str()).collect();
        assert_eq!(models, vec!["ranked", "unranked"]);
    }

    #[test]
    fn test_no_keys_is_empty_pool() {
        let err = build_pool(&PoolConfig::default(), env(&[])).unwrap_err();
        assert!(matches!(err, Error::EmptyPool));
    }

    #[test]
    fn test_build_pool() {
        let pool = build_pool(&PoolConfig::default(), env(&[("ZHIPUAI_API_KEY_1", "z")])).unwrap();
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.candidates()[0].model_id, "glm-4.5-flash");
    }

    #[test]
    fn test_load_env_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(!load_env_file(dir.path().join("missing.env")).unwrap());

        let path = dir.path().join("keys.env");
        std::fs::write(&path, "MANYLLM_TEST_ENV_FILE_KEY_1=from-file\n").unwrap();
        assert!(load_env_file(&path).unwrap());
        assert_eq!(
            std::env::var("MANYLLM_TEST_ENV_FILE_KEY_1").unwrap(),
            "from-file"
        );
    }
}
