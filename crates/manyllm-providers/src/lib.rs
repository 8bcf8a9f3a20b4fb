//! HTTP chat backends for manyllm.
//!
//! Each provider is a thin adapter from [`ChatProvider`](manyllm_core::ChatProvider)
//! to one vendor API. None of them retry; failover is the orchestrator's job.
//!
//! # Modules
//!
//! - [`gemini`]: Google Gemini / Gemma
//! - [`openai`]: OpenAI and ZhipuAI GLM (`/chat/completions`)
//! - [`claude`]: Anthropic Messages API
//! - [`registry`]: [`default_registry`], routing model names to the above

#![doc = include_str!("../README.md")]

pub mod claude;
pub mod gemini;
mod http;
pub mod openai;
pub mod registry;

pub use claude::ClaudeProvider;
pub use gemini::GeminiProvider;
pub use openai::{Flavor, OpenAiCompatProvider};
pub use registry::{default_registry, registry_with_client};
