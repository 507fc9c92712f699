// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for SMCP.
//!
//! A Computer is configured from one file, searched in this order:
//! - Workspace config: smcp.json, .smcp/config.json, or smcp.yaml
//! - Global config: ~/.smcp/config.json
//!
//! An explicit `--config` path skips the search.

mod loader;
mod types;

pub use loader::{
    find_config_file, get_global_config_dir, get_global_config_path, load_config,
    load_config_file, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};
pub use types::ComputerConfig;
