//! Command-line interface definition for Cliniq
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat and thread history.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Cliniq - evidence-backed clinical question answering in the terminal
#[derive(Parser, Debug, Clone)]
#[command(name = "cliniq")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the generation service endpoint
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Override the thread store directory
    #[arg(long)]
    pub store: Option<PathBuf>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive question-answering session
    Chat {
        /// Resume an existing conversation by id
        #[arg(long)]
        conversation: Option<String>,

        /// User id sent with every request
        #[arg(long, default_value = "local-user")]
        user: String,
    },

    /// List the stored threads of a conversation
    History {
        /// Conversation id
        #[arg(long)]
        conversation: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_defaults() {
        let cli = Cli::try_parse_from(["cliniq", "chat"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some("config/config.yaml"));
        match cli.command {
            Commands::Chat { conversation, user } => {
                assert!(conversation.is_none());
                assert_eq!(user, "local-user");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_chat_resume() {
        let cli = Cli::try_parse_from([
            "cliniq",
            "--endpoint",
            "https://answers.example.org/stream",
            "chat",
            "--conversation",
            "01HZY",
            "--user",
            "u1",
        ])
        .unwrap();
        assert_eq!(
            cli.endpoint.as_deref(),
            Some("https://answers.example.org/stream")
        );
        assert!(matches!(
            cli.command,
            Commands::Chat { conversation: Some(ref c), ref user } if c == "01HZY" && user == "u1"
        ));
    }

    #[test]
    fn test_parse_history() {
        let cli = Cli::try_parse_from([
            "cliniq",
            "-v",
            "--store",
            "/tmp/threads",
            "history",
            "--conversation",
            "c1",
            "--json",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/threads")));
        assert!(matches!(
            cli.command,
            Commands::History { ref conversation, json: true } if conversation == "c1"
        ));
    }

    #[test]
    fn test_history_requires_conversation() {
        assert!(Cli::try_parse_from(["cliniq", "history"]).is_err());
    }
}
