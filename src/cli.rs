// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "crew", version, about = "Multi-agent conversational runtime")]
pub struct Cli {
    /// Path to the global config JSON (defaults to the platform config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose tracing to stderr.
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Interactive chat with the agent population.
    Chat {
        /// Start on this provider's first model instead of the default.
        #[arg(long)]
        provider: Option<String>,

        /// Agents file (TOML).  A single general assistant is used when
        /// absent.
        #[arg(long)]
        agent_config: Option<PathBuf>,

        /// MCP servers file (JSON).
        #[arg(long)]
        mcp_config: Option<PathBuf>,

        /// Plain line-oriented console (no ANSI styling).
        #[arg(long)]
        console: bool,
    },

    /// Expose each local agent at `<base-url>/<agent-name>`.
    A2aServer {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8310)]
        port: u16,

        /// Public base URL advertised in the agent listing.
        #[arg(long)]
        base_url: Option<String>,

        #[arg(long)]
        provider: Option<String>,

        /// Agents file (TOML).
        #[arg(long)]
        agent_config: Option<PathBuf>,

        /// MCP servers file (JSON).
        #[arg(long)]
        mcp_config: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_parses_with_flags() {
        let cli = Cli::parse_from([
            "crew",
            "chat",
            "--provider",
            "groq",
            "--agent-config",
            "/tmp/agents.toml",
            "--console",
        ]);
        match cli.command {
            Commands::Chat { provider, agent_config, console, .. } => {
                assert_eq!(provider.as_deref(), Some("groq"));
                assert!(agent_config.is_some());
                assert!(console);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn a2a_server_has_defaults() {
        let cli = Cli::parse_from(["crew", "a2a-server"]);
        match cli.command {
            Commands::A2aServer { host, port, base_url, .. } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8310);
                assert!(base_url.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
