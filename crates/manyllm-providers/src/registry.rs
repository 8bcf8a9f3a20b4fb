//! The built-in model routing table.

use std::sync::Arc;

use manyllm_core::{ChatProvider, Credential, ModelPattern, ModelRegistry, Result};

use crate::claude::ClaudeProvider;
use crate::gemini::GeminiProvider;
use crate::openai::{Flavor, OpenAiCompatProvider};

/// Registry covering every backend in this crate, with a fresh HTTP client.
pub fn default_registry() -> ModelRegistry {
    registry_with_client(reqwest::Client::new())
}

/// Registry covering every backend in this crate.
///
/// Routes, in priority order:
///
/// | Backend | Model names |
/// |---|---|
/// | `gemini` | containing `gemini` or `gemma` |
/// | `zhipu` | starting with `glm` |
/// | `openai` | starting with `gpt`, `o1`, `o3` or `o4` |
/// | `claude` | containing `claude` |
///
/// All providers share `client` and its connection pool.
pub fn registry_with_client(client: reqwest::Client) -> ModelRegistry {
    let gemini = client.clone();
    let zhipu = client.clone();
    let openai = client.clone();
    let claude = client;

    ModelRegistry::new()
        .with_route(
            "gemini",
            vec![ModelPattern::contains("gemini"), ModelPattern::contains("gemma")],
            move |model: &str, key: &Credential| -> Result<Arc<dyn ChatProvider>> {
                Ok(Arc::new(GeminiProvider::with_client(gemini.clone(), model, key)?))
            },
        )
        .with_route(
            "zhipu",
            vec![ModelPattern::prefix("glm")],
            move |model: &str, key: &Credential| -> Result<Arc<dyn ChatProvider>> {
                Ok(Arc::new(OpenAiCompatProvider::with_client(
                    zhipu.clone(),
                    Flavor::Zhipu,
                    model,
                    key,
                )?))
            },
        )
        .with_route(
            "openai",
            ["gpt", "o1", "o3", "o4"].into_iter().map(ModelPattern::prefix).collect(),
            move |model: &str, key: &Credential| -> Result<Arc<dyn ChatProvider>> {
                Ok(Arc::new(OpenAiCompatProvider::with_client(
                    openai.clone(),
                    Flavor::OpenAi,
                    model,
                    key,
                )?))
            },
        )
        .with_route(
            "claude",
            vec![ModelPattern::contains("claude")],
            move |model: &str, key: &Credential| -> Result<Arc<dyn ChatProvider>> {
                Ok(Arc::new(ClaudeProvider::with_client(claude.clone(), model, key)?))
            },
        )
}
