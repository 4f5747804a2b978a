// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod error;
mod loader;
mod schema;

pub use error::ConfigError;
pub use loader::{default_config_path, load_agents_file, load_global_config};
pub use schema::{
    AgentConfig, AgentsFile, CustomModel, CustomProvider, GlobalConfig,
};
