// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::ConnectionState;

/// Coarse classification of an [`McpError`].
///
/// The routing layer forwards this to remote callers so they can react to the
/// category of a failure without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connect or IO failure on a transport.
    Transport,
    /// Malformed configuration or an unresolvable tool-name conflict.
    Configuration,
    /// A forbidden tool was invoked.
    Policy,
    /// The operation did not complete in time.
    Timeout,
    /// The operation was cancelled by the caller.
    Cancelled,
    /// The target server does not support the requested capability.
    Capability,
    /// Unknown tool, resource, or server.
    NotFound,
    /// The peer answered with a protocol-level error.
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Configuration => "configuration",
            Self::Policy => "policy",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Capability => "capability",
            Self::NotFound => "not_found",
            Self::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server not found in the manager.
    #[error("MCP server not found: {0}")]
    ServerNotFound(String),

    /// Tool not found on any connected server.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Resource URI is not owned by any connected server.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Connection failed.
    #[error("Failed to connect to MCP server '{server}': {message}")]
    ConnectionFailed { server: String, message: String },

    /// Connection timeout.
    #[error("Connection to MCP server '{server}' timed out after {timeout_secs}s")]
    ConnectionTimeout { server: String, timeout_secs: u64 },

    /// Transport error after the connection was established.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Two servers expose the same tool name and neither is aliased.
    #[error("Tool '{tool}' exists in multiple servers: {}. Use tool_meta.alias to resolve the conflict", servers.join(", "))]
    ToolConflict { tool: String, servers: Vec<String> },

    /// Tool is forbidden by the owning server's configuration.
    #[error("Tool '{0}' is disabled by configuration")]
    Policy(String),

    /// Tool call timeout.
    #[error("Tool call '{tool}' timed out after {timeout_ms}ms")]
    ToolCallTimeout { tool: String, timeout_ms: u64 },

    /// A JSON-RPC request got no answer in time.
    #[error("Request '{method}' timed out after {timeout_ms}ms")]
    RequestTimeout { method: String, timeout_ms: u64 },

    /// Request was cancelled before it completed.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Server lacks the capability needed for the request.
    #[error("MCP server '{server}' does not support {capability}")]
    Capability { server: String, capability: String },

    /// Requested lifecycle transition is not valid from the current state.
    #[error("Invalid connection transition: {from} -> {trigger}")]
    InvalidTransition {
        from: ConnectionState,
        trigger: String,
    },

    /// Server not ready (still connecting or initializing).
    #[error("MCP server '{0}' is not ready")]
    NotReady(String),

    /// Invalid response from server.
    #[error("Invalid response from MCP server: {0}")]
    InvalidResponse(String),

    /// Protocol error (JSON-RPC).
    #[error("Protocol error: code={code}, message={message}")]
    Protocol { code: i64, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Create a capability error.
    pub fn capability(server: impl Into<String>, capability: impl Into<String>) -> Self {
        Self::Capability {
            server: server.into(),
            capability: capability.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(code: i64, message: impl Into<String>) -> Self {
        Self::Protocol {
            code,
            message: message.into(),
        }
    }

    /// Map this error onto the coarse taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ConnectionTimeout { .. }
            | Self::Transport(_)
            | Self::NotReady(_)
            | Self::Io(_) => ErrorKind::Transport,
            Self::Configuration(_) | Self::ToolConflict { .. } | Self::InvalidTransition { .. } => {
                ErrorKind::Configuration
            }
            Self::Policy(_) => ErrorKind::Policy,
            Self::ToolCallTimeout { .. } | Self::RequestTimeout { .. } => ErrorKind::Timeout,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::Capability { .. } => ErrorKind::Capability,
            Self::ServerNotFound(_) | Self::ToolNotFound(_) | Self::ResourceNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InvalidResponse(_) | Self::Protocol { .. } | Self::Json(_) => ErrorKind::Protocol,
        }
    }

    /// Whether the failure is a transport-level one that warrants a reconnect.
    pub fn is_transport(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::ServerNotFound("test_server".to_string());
        assert!(err.to_string().contains("test_server"));

        let err = McpError::ToolConflict {
            tool: "search".to_string(),
            servers: vec!["a".to_string(), "b".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("search"));
        assert!(text.contains("a, b"));
        assert!(text.contains("alias"));

        let err = McpError::protocol(-32600, "Invalid Request");
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            McpError::connection_failed("s", "refused").kind(),
            ErrorKind::Transport
        );
        assert_eq!(McpError::Policy("rm".into()).kind(), ErrorKind::Policy);
        assert_eq!(
            McpError::ToolCallTimeout {
                tool: "t".into(),
                timeout_ms: 10
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(McpError::capability("s", "subscribe").kind(), ErrorKind::Capability);
        assert_eq!(
            McpError::ResourceNotFound("file:///x".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            McpError::Configuration("bad".into()).kind(),
            ErrorKind::Configuration
        );
        assert!(McpError::Transport("eof".into()).is_transport());
        assert!(!McpError::Policy("x".into()).is_transport());
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not_found");
        assert_eq!(ErrorKind::Policy.to_string(), "policy");
    }
}
