//! Application wiring: logging, pool, orchestrator and command dispatch.

use std::io::Write;
use std::sync::Arc;

use futures::StreamExt;
use manyllm_core::{
    ChatOptions, Error, Message, Orchestrator, PolicyKind, Result, StreamEvent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::batch;
use crate::cli::{BatchArgs, ChatArgs, CliArgs, Command};
use crate::config::{ManyllmConfig, read_prompt_file};
use crate::config_handlers;
use crate::pool_loader;

/// Parse-independent entry point: set up logging and run the command.
pub async fn run(args: CliArgs) -> Result<()> {
    init_logging(args.verbose, args.quiet);

    match args.command {
        // Config commands must work even when the config file is broken.
        Some(Command::Config(config_cmd)) => {
            config_handlers::handle_config_command(args.config.as_deref(), config_cmd.command)
        }
        command => {
            let config = ManyllmConfig::load(args.config.as_deref())?;
            App::new(config)
                .with_config_path(args.config)
                .with_quiet(args.quiet)
                .dispatch(command)
                .await
        }
    }
}

/// Initialise tracing-based logging on stderr.
///
/// Uses `RUST_LOG` env var if set, otherwise defaults based on verbosity flags.
pub fn init_logging(verbose: bool, quiet: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if quiet {
        EnvFilter::new("warn")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    // Ignore error if a subscriber is already set (e.g. in tests).
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// App
// ============================================================================

/// The CLI application with its loaded configuration.
pub struct App {
    config: ManyllmConfig,
    config_path: Option<String>,
    version: String,
    quiet: bool,
}

impl App {
    /// Create an application from a loaded config.
    pub fn new(config: ManyllmConfig) -> Self {
        Self {
            config,
            config_path: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
            quiet: false,
        }
    }

    /// Remember the `--config` path for `config` subcommands.
    pub fn with_config_path(mut self, config_path: Option<String>) -> Self {
        self.config_path = config_path;
        self
    }

    /// Suppress the model banner printed to stderr.
    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ManyllmConfig {
        &self.config
    }

    async fn dispatch(&self, command: Option<Command>) -> Result<()> {
        match command {
            Some(Command::Chat(args)) => self.cmd_chat(args).await,
            Some(Command::Batch(args)) => self.cmd_batch(args).await,
            Some(Command::Pool) => self.cmd_pool(),
            Some(Command::Version) => {
                println!("manyllm {}", self.version);
                Ok(())
            }
            Some(Command::Config(config_cmd)) => config_handlers::handle_config_command(
                self.config_path.as_deref(),
                config_cmd.command,
            ),
            None => {
                println!("manyllm {}; use --help for usage", self.version);
                Ok(())
            }
        }
    }

    /// Build an orchestrator over the env-loaded pool and the default registry.
    pub fn orchestrator(&self, policy: Option<PolicyKind>) -> Result<Orchestrator> {
        let pool = pool_loader::load_pool(&self.config.pool)?;
        let policy = policy.unwrap_or(self.config.pool.policy);
        info!(policy = %policy, "selection policy");
        Ok(Orchestrator::new(
            pool,
            policy.build(),
            Arc::new(manyllm_providers::default_registry()),
        ))
    }

    /// Options for `chat`: flags first, then `[generation]`.
    pub fn chat_options(&self, args: &ChatArgs) -> Result<ChatOptions> {
        let system_prompt = match (&args.system_prompt, &args.generation.system_prompt_file) {
            (Some(prompt), _) => Some(prompt.clone()),
            (None, Some(file)) => Some(read_prompt_file(file)?),
            (None, None) => None,
        };

        let mut defaults = self.config.generation.clone();
        if system_prompt.is_some() {
            defaults.system_prompt = None;
            defaults.system_prompt_file = None;
        }

        let flags = ChatOptions {
            temperature: args.generation.temperature,
            max_tokens: args.generation.max_tokens,
            thinking_budget: args.thinking_budget,
            system_prompt,
            ..ChatOptions::default()
        };
        Ok(flags.or(&defaults.chat_options()?))
    }

    /// Options for `batch`: flags first, then `[batch]`; the system prompt
    /// comes from `--system-prompt-file` or `[generation]`.
    pub fn batch_options(&self, args: &BatchArgs) -> Result<ChatOptions> {
        let system_prompt = match &args.generation.system_prompt_file {
            Some(file) => Some(read_prompt_file(file)?),
            None => self.config.generation.chat_options()?.system_prompt,
        };
        let flags = ChatOptions {
            temperature: args.generation.temperature,
            max_tokens: args.generation.max_tokens,
            system_prompt,
            ..ChatOptions::default()
        };
        Ok(flags.or(&self.config.batch.chat_options()))
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn cmd_chat(&self, args: ChatArgs) -> Result<()> {
        let options = self.chat_options(&args)?;
        let orchestrator = self.orchestrator(args.generation.policy)?;
        let messages = vec![Message::user(args.prompt)];

        if args.stream {
            return self.stream_chat(&orchestrator, messages, options).await;
        }

        let success = orchestrator.chat(&messages, &options).await.into_result()?;
        if !self.quiet {
            eprintln!("model: {}", success.identifier);
        }
        println!("{}", success.content);
        Ok(())
    }

    async fn stream_chat(
        &self,
        orchestrator: &Orchestrator,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<()> {
        let mut events = orchestrator.chat_stream(messages, options);
        let mut stdout = std::io::stdout();

        while let Some(event) = events.next().await {
            match &event {
                StreamEvent::Chunk(text) => {
                    write!(stdout, "{text}")?;
                    stdout.flush()?;
                }
                StreamEvent::Completed { identifier, .. } => {
                    writeln!(stdout)?;
                    if !self.quiet {
                        eprintln!("model: {identifier}");
                    }
                    return Ok(());
                }
                StreamEvent::Interrupted { error, .. } => {
                    writeln!(stdout, "\n{}", event.as_text().unwrap_or_default())?;
                    return Err(Error::provider(error.clone()));
                }
                StreamEvent::Exhausted { attempts, last_error } => {
                    writeln!(stdout, "{}", event.as_text().unwrap_or_default())?;
                    return Err(Error::Exhausted {
                        attempts: *attempts,
                        last_error: last_error.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn cmd_batch(&self, args: BatchArgs) -> Result<()> {
        let options = self.batch_options(&args)?;
        let orchestrator = self.orchestrator(args.generation.policy)?;
        let report = batch::run_batch(&orchestrator, &args.input, &args.output, &options).await?;
        info!(
            total = report.total,
            resumed_from = report.resumed_from,
            succeeded = report.succeeded,
            failed = report.failed,
            "batch finished"
        );
        println!("{}", serde_json::to_string(&report)?);
        Ok(())
    }

    fn cmd_pool(&self) -> Result<()> {
        let pool = pool_loader::load_pool(&self.config.pool)?;
        println!("{:>8}  {:<28} {:<10} KEY", "PRIORITY", "MODEL", "PROVIDER");
        for candidate in &pool {
            println!(
                "{:>8}  {:<28} {:<10} {}",
                candidate.effective_priority(),
                candidate.model_id,
                candidate.provider().unwrap_or("-"),
                candidate.credential
            );
        }
        Ok(())
    }
}
