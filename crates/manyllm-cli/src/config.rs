//! Configuration for the manyllm CLI.
//!
//! Provides the [`ManyllmConfig`] struct that loads from TOML files,
//! environment variables, and defaults using the `confyg` crate.
//!
//! # Loading Priority
//!
//! 1. Explicit `--config <path>` flag
//! 2. `MANYLLM_CONFIG` environment variable
//! 3. XDG default: `~/.config/manyllm/config.toml`
//! 4. Built-in defaults

use confyg::{Confygery, env};
use manyllm_core::{ChatOptions, Error, PolicyKind, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "MANYLLM_CONFIG";

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration for the manyllm CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManyllmConfig {
    /// Candidate pool configuration.
    pub pool: PoolConfig,

    /// Generation defaults for `chat`.
    pub generation: GenerationConfig,

    /// Generation defaults for `batch`.
    pub batch: BatchConfig,
}

/// Where candidates come from and how they are chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Selection policy.
    pub policy: PolicyKind,

    /// Dotenv file loaded before the pool is built. Missing files are ignored.
    pub env_file: Option<String>,

    /// Highest numbered key slot scanned per source (`{key_env}_1` ..).
    pub max_key_slots: u32,

    /// Model sources.
    pub sources: Vec<ModelSource>,
}

/// One model, offered once per API key found in its env slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSource {
    /// Provider tag recorded in candidate metadata.
    pub provider: String,

    /// Model name sent to the backend.
    pub model: String,

    /// Lower is preferred. Missing means 99.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    /// Env var prefix holding the keys.
    pub key_env: String,
}

/// Defaults applied to interactive chat requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Output length cap.
    pub max_tokens: Option<u32>,

    /// Reasoning budget; `0` disables thinking where supported.
    pub thinking_budget: Option<u32>,

    /// Inline system prompt.
    pub system_prompt: Option<String>,

    /// File holding the system prompt; used when `system_prompt` is unset.
    pub system_prompt_file: Option<String>,
}

/// Defaults applied to every batch line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Sampling temperature.
    pub temperature: Option<f32>,

    /// Output length cap.
    pub max_tokens: Option<u32>,
}

// ============================================================================
// Default implementations
// ============================================================================

impl ModelSource {
    /// Create a source.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        priority: i64,
        key_env: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            priority: Some(priority),
            key_env: key_env.into(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            env_file: Some(".env".to_string()),
            max_key_slots: 9,
            sources: vec![
                ModelSource::new("google", "gemma-3-27b-it", 1, "GEMINI_API_KEY"),
                ModelSource::new("google", "gemini-2.0-flash-lite", 2, "GEMINI_API_KEY"),
                ModelSource::new("google", "gemini-2.0-flash", 3, "GEMINI_API_KEY"),
                ModelSource::new("openai", "gpt-4o", 3, "OPENAI_API_KEY"),
                ModelSource::new("zhipuai", "glm-4.5-flash", 4, "ZHIPUAI_API_KEY"),
            ],
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.7),
            max_tokens: Some(1000),
            thinking_budget: None,
            system_prompt: None,
            system_prompt_file: None,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.3),
            max_tokens: Some(2048),
        }
    }
}

// ============================================================================
// Option building
// ============================================================================

impl GenerationConfig {
    /// Chat options built from these defaults.
    ///
    /// Reads `system_prompt_file` when no inline prompt is set.
    pub fn chat_options(&self) -> Result<ChatOptions> {
        let system_prompt = match (&self.system_prompt, &self.system_prompt_file) {
            (Some(prompt), _) => Some(prompt.clone()),
            (None, Some(file)) => Some(read_prompt_file(file)?),
            (None, None) => None,
        };
        Ok(ChatOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            thinking_budget: self.thinking_budget,
            system_prompt,
            ..ChatOptions::default()
        })
    }
}

impl BatchConfig {
    /// Chat options built from these defaults.
    pub fn chat_options(&self) -> ChatOptions {
        ChatOptions {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..ChatOptions::default()
        }
    }
}

/// Read a system prompt file, trimming surrounding whitespace.
pub fn read_prompt_file(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| Error::io_with_path(e, path))?;
    Ok(text.trim().to_string())
}

// ============================================================================
// Config loading
// ============================================================================

impl ManyllmConfig {
    /// Load configuration from file, environment, and defaults.
    ///
    /// Loading priority:
    /// 1. Explicit `config_path` (from `--config` flag)
    /// 2. `MANYLLM_CONFIG` env var
    /// 3. XDG default: `~/.config/manyllm/config.toml`
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path)
            && path.exists()
        {
            builder
                .add_file(&path.to_string_lossy())
                .map_err(|e| Error::config(format!("config file: {e}")))?;
        }

        let mut env_opts = env::Options::with_top_level("MANYLLM");
        env_opts.add_section("pool");
        env_opts.add_section("generation");
        env_opts.add_section("batch");
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        Ok(config)
    }

    /// Resolve the config file path from explicit flag, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("manyllm").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }
}

// ============================================================================
// Tests
// ============================================================================
