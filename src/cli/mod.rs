//! Command-line interface parsing and handling

pub mod auth;
pub mod chat;
pub mod say;

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::auth::{run_auth, run_deauth};
use crate::cli::chat::run_chat;
use crate::cli::say::run_say;
use crate::core::config::data::path_display;
use crate::core::config::{ChatSettings, Config};
use crate::utils::logging::init_tracing;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "A streaming terminal chat client for OpenAI-compatible APIs")]
#[command(
    long_about = "Parley streams chat completions into the terminal. Replies appear as they are \
generated; typing a new message while a reply is streaming interrupts it.\n\n\
Authentication:\n\
  Use 'parley auth' to validate an API key and store it (system keyring by default).\n\n\
Chat commands:\n\
  /edit N text      Replace message N and regenerate from there\n\
  /history          Show the transcript with message numbers\n\
  /stop             Stop the current reply\n\
  /key              Enter a new API key\n\
  /quit             Leave the chat\n\n\
Logging:\n\
  PARLEY_LOG sets the log filter (default: warn)."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Model to use for this session instead of the configured one
    #[arg(short = 'm', long, global = true, value_name = "MODEL")]
    pub model: Option<String>,

    /// Write log output to the given file instead of stderr
    #[arg(short = 'l', long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the chat interface (default)
    Chat,
    /// Send a single prompt and stream the reply to stdout
    Say {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        prompt: Vec<String>,
    },
    /// Validate and store an API key
    Auth,
    /// Remove the stored API key
    Deauth,
    /// Show the effective configuration
    Config,
    /// Set a configuration value
    Set {
        /// Configuration key to set
        key: String,
        /// Value for the key (multiple words are joined with spaces)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        value: Vec<String>,
    },
    /// Reset a configuration value to its default
    Unset {
        /// Configuration key to unset
        key: String,
    },
}

pub fn main() -> Result<(), Box<dyn Error>> {
    tokio::runtime::Runtime::new()?.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(args.log.as_deref())?;

    let config = Config::load()?;

    match args.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(&config, session_settings(&config, args.model)).await,
        Commands::Say { prompt } => {
            run_say(&config, session_settings(&config, args.model), prompt).await
        }
        Commands::Auth => run_auth(&config, session_settings(&config, args.model)).await,
        Commands::Deauth => run_deauth(&config),
        Commands::Config => {
            println!("Config file: {}", path_display(Config::config_path()?));
            for line in config.describe() {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Set { key, value } => {
            let mut config = config;
            let value = value.join(" ");
            if let Err(err) = config.set_value(&key, &value) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Set {key} to: {}", value.trim());
            Ok(())
        }
        Commands::Unset { key } => {
            let mut config = config;
            if let Err(err) = config.unset_value(&key) {
                eprintln!("❌ {err}");
                std::process::exit(1);
            }
            config.save()?;
            println!("✅ Unset {key}");
            Ok(())
        }
    }
}

fn session_settings(config: &Config, model: Option<String>) -> ChatSettings {
    let mut settings = config.chat_settings();
    if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
        settings.model = model;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_chat_without_subcommand() {
        let args = Args::try_parse_from(["parley"]).unwrap();
        assert!(args.command.is_none());
        assert!(args.model.is_none());
    }

    #[test]
    fn set_joins_trailing_words() {
        let args =
            Args::try_parse_from(["parley", "set", "system-prompt", "Be", "brief."]).unwrap();
        match args.command {
            Some(Commands::Set { key, value }) => {
                assert_eq!(key, "system-prompt");
                assert_eq!(value.join(" "), "Be brief.");
            }
            _ => panic!("expected set command"),
        }
    }

    #[test]
    fn say_collects_prompt_words() {
        let args =
            Args::try_parse_from(["parley", "-m", "openai/gpt-4o", "say", "hello", "there"])
                .unwrap();
        assert_eq!(args.model.as_deref(), Some("openai/gpt-4o"));
        match args.command {
            Some(Commands::Say { prompt }) => assert_eq!(prompt, vec!["hello", "there"]),
            _ => panic!("expected say command"),
        }
    }

    #[test]
    fn model_override_ignores_blank_values() {
        let config = Config::default();
        assert_eq!(
            session_settings(&config, Some("  ".to_string())).model,
            config.chat_settings().model
        );
        assert_eq!(
            session_settings(&config, Some("x/y".to_string())).model,
            "x/y"
        );
    }
}
