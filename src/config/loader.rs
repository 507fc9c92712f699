// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in various locations.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::ComputerConfig;

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &["smcp.json", ".smcp/config.json", "smcp.yaml"];

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".smcp";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Find the config file to use.
///
/// Searches `workspace_root` for the names in [`CONFIG_FILES`], then falls
/// back to ~/.smcp/config.json.
pub fn find_config_file(workspace_root: &Path) -> Option<PathBuf> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return Some(path);
        }
    }
    get_global_config_path().filter(|path| path.exists())
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<ComputerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Load the explicit file if given, otherwise the discovered one. No file at
/// all yields an empty configuration.
pub fn load_config(
    explicit: Option<&Path>,
    workspace_root: &Path,
) -> Result<(ComputerConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        return Ok((load_config_file(path)?, Some(path.to_path_buf())));
    }
    match find_config_file(workspace_root) {
        Some(path) => Ok((load_config_file(&path)?, Some(path))),
        None => Ok((ComputerConfig::default(), None)),
    }
}
