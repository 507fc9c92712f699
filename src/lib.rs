// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SMCP - remote access to MCP servers through an office-based hub.
//!
//! A Computer hosts any number of MCP servers (stdio, SSE or streamable
//! HTTP) and publishes their combined tools and resources. Agents reach
//! those Computers through a signaling hub that groups sessions into
//! offices: an office holds at most one Agent and any number of uniquely
//! named Computers.
//!
//! # Architecture
//!
//! - [`mcp`] - MCP clients, transports, the server manager and window URIs
//! - [`inputs`] - `${input:<id>}` placeholders and how their values are acquired
//! - [`config`] - Computer configuration files
//! - [`protocol`] - Signaling frames, method names and payloads
//! - [`computer`] - The Computer facade and its hub session
//! - [`server`] - The hub: office membership and request routing
//! - [`agent`] - The Agent-side client
//! - [`telemetry`] - Logging setup, metrics and correlation ids
//! - [`error`] - Error types outside the MCP layer
//!
//! # Example
//!
//! ```rust,ignore
//! use smcp::agent::{Agent, AgentCallbacks};
//!
//! let agent = Agent::connect("127.0.0.1:7300", "agent-1", AgentCallbacks::default()).await?;
//! agent.join_office("room-1").await?;
//! let result = agent
//!     .call_tool("comp-1", "add", serde_json::json!({"a": 1, "b": 2}), None)
//!     .await?;
//! ```

pub mod agent;
pub mod computer;
pub mod config;
pub mod error;
pub mod inputs;
pub mod mcp;
pub mod protocol;
pub mod server;
pub mod telemetry;

pub use agent::{Agent, AgentCallbacks, AgentEvent};
pub use computer::{Computer, ComputerEvent, ComputerSession, SessionOptions};
pub use error::{ConfigError, InputError, Result, SessionError};
pub use mcp::{ErrorKind, Manager, McpError, ServerConfig, ToolResult};
pub use server::Hub;

/// SMCP version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
