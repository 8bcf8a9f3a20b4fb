//! CLI argument parsing and command definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use manyllm_core::PolicyKind;

use crate::config::CONFIG_ENV;

// ============================================================================
// CLI argument types
// ============================================================================

/// Chat with a pool of models, failing over between model/key pairs.
#[derive(Parser, Debug)]
#[command(name = "manyllm", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = CONFIG_ENV, global = true)]
    pub config: Option<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one prompt and print the reply.
    Chat(ChatArgs),

    /// Process a JSONL file of requests, resuming where a previous run stopped.
    Batch(BatchArgs),

    /// List the candidate pool built from the environment.
    Pool,

    /// Print version information.
    Version,

    /// Configuration operations.
    Config(ConfigCommand),
}

/// Generation flags shared by `chat` and `batch`.
#[derive(Args, Debug, Clone, Default)]
pub struct GenerationArgs {
    /// File holding the system prompt.
    #[arg(long, value_name = "FILE")]
    pub system_prompt_file: Option<PathBuf>,

    /// Sampling temperature.
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Output length cap.
    #[arg(short, long)]
    pub max_tokens: Option<u32>,

    /// Selection policy (sequential, random, priority-weighted).
    #[arg(short, long)]
    pub policy: Option<PolicyKind>,
}

/// Arguments for `chat`.
#[derive(Args, Debug, Clone)]
pub struct ChatArgs {
    /// The user message.
    pub prompt: String,

    /// Inline system prompt.
    #[arg(short, long, conflicts_with = "system_prompt_file")]
    pub system_prompt: Option<String>,

    /// Reasoning budget; 0 disables thinking where supported.
    #[arg(long)]
    pub thinking_budget: Option<u32>,

    /// Print the reply as it arrives.
    #[arg(long)]
    pub stream: bool,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

/// Arguments for `batch`.
#[derive(Args, Debug, Clone)]
pub struct BatchArgs {
    /// Input JSONL file.
    pub input: PathBuf,

    /// Output JSONL file (appended to).
    pub output: PathBuf,

    #[command(flatten)]
    pub generation: GenerationArgs,
}

/// Config-specific subcommands.
#[derive(Parser, Debug)]
pub struct ConfigCommand {
    /// Config subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigAction,
}

/// Available config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path.
    Path,

    /// Create a default configuration file.
    Init {
        /// Output file path (defaults to XDG config path).
        #[arg(short, long)]
        file: Option<String>,

        /// Overwrite existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as TOML.
    Show,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        CliArgs::command().debug_assert();
    }

    #[test]
    fn test_parse_chat() {
        let args = CliArgs::try_parse_from([
            "manyllm",
            "-v",
            "chat",
            "What is quantum mechanics?",
            "--policy",
            "sequential",
            "--temperature",
            "0.2",
            "--stream",
        ])
        .unwrap();
        assert!(args.verbose);
        let Some(Command::Chat(chat)) = args.command else {
            unreachable!("parsed as chat");
        };
        assert_eq!(chat.prompt, "What is quantum mechanics?");
        assert_eq!(chat.generation.policy, Some(PolicyKind::Sequential));
        assert_eq!(chat.generation.temperature, Some(0.2));
        assert!(chat.stream);
    }

    #[test]
    fn test_parse_batch() {
        let args = CliArgs::try_parse_from([
            "manyllm",
            "batch",
            "in.jsonl",
            "out.jsonl",
            "--system-prompt-file",
            "prompt.md",
            "--max-tokens",
            "2048",
        ])
        .unwrap();
        let Some(Command::Batch(batch)) = args.command else {
            unreachable!("parsed as batch");
        };
        assert_eq!(batch.input, PathBuf::from("in.jsonl"));
        assert_eq!(batch.generation.system_prompt_file, Some(PathBuf::from("prompt.md")));
        assert_eq!(batch.generation.max_tokens, Some(2048));
    }

    #[test]
    fn test_system_prompt_flags_conflict() {
        let result = CliArgs::try_parse_from([
            "manyllm",
            "chat",
            "hi",
            "--system-prompt",
            "a",
            "--system-prompt-file",
            "b.md",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let result = CliArgs::try_parse_from(["manyllm", "chat", "hi", "--policy", "round-robin"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_config_init() {
        let args = CliArgs::try_parse_from([
            "manyllm", "config", "init", "--file", "/tmp/c.toml", "--force",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Some(Command::Config(ConfigCommand {
                command: ConfigAction::Init { force: true, .. }
            }))
        ));
    }
}
