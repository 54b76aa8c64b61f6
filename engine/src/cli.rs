//! CLI interface for Helix
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ContextMode;

/// Helix genome browser assistant
///
/// Chat with a language model that navigates a genome view and runs
/// sequence-analysis tools on your behalf.
#[derive(Parser, Debug)]
#[command(name = "helix")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one conversational turn
    Run {
        /// The message to send
        message: String,

        /// Override the round budget for this turn
        #[arg(long, value_name = "N")]
        max_rounds: Option<usize>,

        /// Override the context mode (full_history, current_message)
        #[arg(long, value_name = "MODE")]
        context_mode: Option<ContextMode>,
    },

    /// List registered tools per capability source
    Tools,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["helix", "tools"]);
        assert!(matches!(cli.command, Command::Tools));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["helix", "--json", "--log", "debug", "tools"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from([
            "helix",
            "run",
            "go to chr1:1-100",
            "--max-rounds",
            "5",
            "--context-mode",
            "current_message",
        ]);
        if let Command::Run {
            message,
            max_rounds,
            context_mode,
        } = cli.command
        {
            assert_eq!(message, "go to chr1:1-100");
            assert_eq!(max_rounds, Some(5));
            assert_eq!(context_mode, Some(ContextMode::CurrentMessage));
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_run_rejects_unknown_context_mode() {
        let result = Cli::try_parse_from(["helix", "run", "hi", "--context-mode", "everything"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_show() {
        let cli = Cli::parse_from(["helix", "config", "show", "--config", "/tmp/helix.toml"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                action: ConfigAction::Show
            }
        ));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/helix.toml")));
    }
}
