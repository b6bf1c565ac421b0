//! Command-line interface parsing and handling
//!
//! This module handles parsing command-line arguments and executing the appropriate commands.

pub mod settings;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::debug;

use crate::cli::settings::{set_value, unset_value, SettingError, SettingRegistry};
use crate::core::config::data::path_display;
use crate::core::config::Config;
use crate::ui::repl::run_repl;
use crate::utils::logging::init_tracing;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("VERGEN_GIT_DESCRIBE"),
    ", built ",
    env!("VERGEN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "azchat")]
#[command(version, long_version = LONG_VERSION)]
#[command(about = "A terminal chat client for Azure OpenAI deployments")]
#[command(
    long_about = "azchat streams answers from an Azure OpenAI chat deployment into your terminal. \
Conversations live in memory for the session; settings are saved to a config file.\n\n\
Setup:\n\
  azchat set endpoint https://my-resource.openai.azure.com/\n\
  azchat set deployment gpt-4o\n\
  azchat set api-key <key>\n\n\
Environment Variables (override saved settings):\n\
  AZURE_OPENAI_API_KEY      API key for the resource\n\
  AZURE_OPENAI_ENDPOINT     Resource endpoint URL\n\
  AZURE_OPENAI_DEPLOYMENT   Deployment name\n\
  AZCHAT_LOG                Diagnostic log filter (default: warn)\n\n\
Controls:\n\
  Enter             Send the message\n\
  Ctrl+C            Cancel the response being streamed, or quit at the prompt\n\
  /help             List chat commands"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Use this config file instead of the default location
    #[arg(short = 'c', long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write diagnostic logs to this file instead of stderr
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// Start the chat interface (default)
    Chat,
    /// Set configuration values
    Set {
        /// Configuration key to set
        key: String,
        /// Value to set for the key (can be multiple words for system-prompt)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset {
        /// Configuration key to unset
        key: String,
    },
    /// Show the current configuration
    Show,
}

pub fn main() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(async_main());
    // A pending stdin read sits on a blocking thread and never finishes on its own.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log_file.as_deref())?;

    let config_path = match args.config {
        Some(path) => path,
        None => Config::default_config_path()?,
    };
    debug!(path = %path_display(&config_path), "Using config file");

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_repl(&config_path).await,
        Commands::Set { key, value } => {
            let registry = SettingRegistry::new();
            report(&registry, set_value(&registry, &config_path, &key, &value));
            Ok(())
        }
        Commands::Unset { key } => {
            let registry = SettingRegistry::new();
            report(&registry, unset_value(&registry, &config_path, &key));
            Ok(())
        }
        Commands::Show => {
            show(&config_path);
            Ok(())
        }
    }
}

fn report(registry: &SettingRegistry, result: Result<String, SettingError>) {
    match result {
        Ok(message) => println!("{message}"),
        Err(err) => {
            err.print();
            if matches!(err, SettingError::UnknownKey(_)) {
                eprintln!(
                    "   Available keys: {}",
                    registry.keys_display_order().join(", ")
                );
            }
            std::process::exit(err.exit_code());
        }
    }
}

/// Load the saved config with environment overrides applied.
pub fn load_effective_config(config_path: &Path) -> Config {
    let mut config = Config::load_saved(config_path).unwrap_or_default();
    config.apply_env_overrides();
    config
}

fn show(config_path: &Path) {
    println!("Config file: {}", path_display(config_path));
    load_effective_config(config_path).print_all();
}
