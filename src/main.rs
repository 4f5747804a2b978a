// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod bootstrap;
mod cli;
mod commands;
mod console;

use std::sync::Arc;

use clap::Parser;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crew_config::ConfigError;
use crew_core::CoreError;
use crew_mcp::McpError;
use crew_model::ProviderError;

use bootstrap::{bootstrap, BootstrapOptions};
use cli::{Cli, Commands};

const EXIT_CONFIG: i32 = 1;
const EXIT_CREDENTIALS: i32 = 2;
const EXIT_INTERNAL: i32 = 3;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(e) = run(cli).await {
        eprintln!("crew: {e:#}");
        std::process::exit(exit_code_for(&e));
    }
}

fn init_logging(debug: bool) {
    let default = if debug { "crew=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_env("CREW_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Chat { provider, agent_config, mcp_config, console: plain } => {
            let runtime = bootstrap(BootstrapOptions {
                config_path: cli.config,
                agent_config,
                mcp_config,
                provider,
            })
            .await?;
            console::run(runtime, plain, cli.debug).await
        }
        Commands::A2aServer {
            host,
            port,
            base_url,
            provider,
            agent_config,
            mcp_config,
        } => {
            let runtime = bootstrap(BootstrapOptions {
                config_path: cli.config,
                agent_config,
                mcp_config,
                provider,
            })
            .await?;
            let config = crew_a2a::A2aConfig {
                base_url: base_url.unwrap_or_else(|| format!("http://{host}:{port}")),
                host,
                port,
            };
            crew_a2a::serve(Arc::new(Mutex::new(runtime.session)), config).await
        }
    }
}

/// Map the error chain onto the documented exit codes: 1 configuration,
/// 2 missing credentials, 3 anything else.
fn exit_code_for(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if let Some(provider) = cause.downcast_ref::<ProviderError>() {
            if matches!(provider, ProviderError::MissingCredentials(_)) {
                return EXIT_CREDENTIALS;
            }
        }
        if let Some(core) = cause.downcast_ref::<CoreError>() {
            match core {
                CoreError::Config(_) => return EXIT_CONFIG,
                CoreError::Provider(ProviderError::MissingCredentials(_)) => {
                    return EXIT_CREDENTIALS;
                }
                _ => {}
            }
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return EXIT_CONFIG;
        }
        if let Some(McpError::Manifest(_)) = cause.downcast_ref::<McpError>() {
            return EXIT_CONFIG;
        }
    }
    EXIT_INTERNAL
}
