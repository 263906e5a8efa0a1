//! CLI entry point for the assistant driver.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{DriverConfig, LifecycleMode, DEFAULT_POLL_INTERVAL_MS};
use crate::error::{DriverError, Result};

/// Assistant driver CLI
#[derive(Parser, Debug)]
#[command(
    name = "assistant-driver",
    version,
    about = "Drive an OpenAI assistant the way an orchestration host would"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one or more prompts to a fresh assistant
    Chat(ChatArgs),
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Agent name the assistant is created under
    #[arg(short, long, default_value = "assistant")]
    pub agent: String,

    /// Model to use (e.g. gpt-4o-mini)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Assistant instructions
    #[arg(short, long)]
    pub instructions: Option<String>,

    /// Poll run status instead of streaming
    #[arg(long)]
    pub poll: bool,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Keep the remote thread after exiting
    #[arg(long)]
    pub keep_thread: bool,

    /// Keep the remote assistant after exiting
    #[arg(long)]
    pub keep_assistant: bool,

    /// TOML config file (same keys as the JSON driver options)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Prompts, sent in order as one batch
    #[arg(required = true)]
    pub prompt: Vec<String>,
}

impl ChatArgs {
    /// Config file first, then flags on top.
    pub fn driver_config(&self) -> Result<DriverConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let source = std::fs::read_to_string(path).map_err(|e| {
                    DriverError::Configuration(format!("cannot read {}: {e}", path.display()))
                })?;
                DriverConfig::from_toml_str(&source)?
            }
            None => DriverConfig::default(),
        };

        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(instructions) = &self.instructions {
            config.instructions = instructions.clone();
        }
        if self.poll {
            config.lifecycle = LifecycleMode::Polling {
                interval_ms: self.poll_interval_ms,
            };
        }
        config.keep_thread |= self.keep_thread;
        config.keep_assistant |= self.keep_assistant;
        config.validate()?;
        Ok(config)
    }
}
