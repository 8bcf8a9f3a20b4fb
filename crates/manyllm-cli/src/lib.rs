//! Command-line front end for manyllm.
//!
//! # Modules
//!
//! - [`cli`]: clap argument definitions
//! - [`config`]: [`ManyllmConfig`](config::ManyllmConfig), loaded with `confyg`
//! - [`config_handlers`]: `manyllm config ...`
//! - [`pool_loader`]: builds the candidate pool from numbered env keys
//! - [`batch`]: resumable JSONL batch processing
//! - [`app`]: logging setup and command dispatch

#![doc = include_str!("../README.md")]

pub mod app;
pub mod batch;
pub mod cli;
pub mod config;
pub mod config_handlers;
pub mod pool_loader;

pub use app::{App, run};
pub use cli::CliArgs;
pub use config::ManyllmConfig;
