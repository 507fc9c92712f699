// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for SMCP.
//!
//! This module provides strongly-typed errors for the parts of the system that
//! sit outside the MCP layer (configuration files, input acquisition and the
//! real-time session channel), using `thiserror` for ergonomic error
//! definitions and `anyhow` for error propagation in the binary.
//!
//! MCP-side failures live in [`crate::mcp::McpError`].

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Errors that can occur while acquiring an input value.
#[derive(Error, Debug)]
pub enum InputError {
    #[error("Input not defined: {0}")]
    NotFound(String),

    #[error("No value available for input: {0}")]
    NoValue(String),

    #[error("Input cancelled: {0}")]
    Cancelled(String),

    #[error("Command failed for input {id}: {message}")]
    Command { id: String, message: String },

    #[error("Command timed out for input {id} after {timeout_secs}s")]
    CommandTimeout { id: String, timeout_secs: u64 },

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for InputError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

/// Errors that can occur on the real-time session channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Join rejected: {0}")]
    JoinRejected(String),

    #[error("Role mismatch: session is {actual}, request needs {expected}")]
    RoleMismatch { expected: String, actual: String },

    #[error("Session has not joined an office")]
    NotInOffice,

    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    #[error("Request {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Remote error ({kind}): {message}")]
    Remote {
        code: i64,
        kind: String,
        message: String,
    },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Session closed")]
    Closed,

    #[error("IO error: {0}")]
    IoError(String),
}

impl SessionError {
    /// Check if the channel itself is gone, as opposed to one request failing.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::IoError(_))
    }
}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFrame(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
