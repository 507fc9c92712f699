// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Initialized MCP sessions with one server.
//!
//! The wire protocol (framing, request ids, the initialize handshake,
//! cancellation notices) belongs to the `rmcp` client service. This module
//! puts it behind [`McpTransport`] so the rest of the crate sees typed
//! operations and tests can swap in in-memory servers:
//!
//! - [`service`]: an `rmcp` client over a child process or streamable HTTP
//! - [`handler`]: turns server notifications into [`TransportEvent`]s

pub mod handler;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::config::ServerConfig;
use super::error::McpError;
use super::types::{
    ResourceContents, ResourcePage, ResourceTemplatePage, ServerInfo, ToolPage, ToolResult,
};

pub use handler::EventForwarder;
pub use service::RmcpTransport;

/// Something a session observed without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The peer went away (process exit, stream end).
    Closed,
    /// `notifications/tools/list_changed`.
    ToolListChanged,
    /// `notifications/resources/list_changed`.
    ResourceListChanged,
    /// `notifications/resources/updated`.
    ResourceUpdated { uri: String },
}

/// A live, initialized session with one server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// What the server reported during the handshake.
    fn server_info(&self) -> ServerInfo;

    /// One page of `tools/list`.
    async fn list_tools(&self, cursor: Option<String>, timeout: Duration)
        -> Result<ToolPage, McpError>;

    /// Call a tool. Dropping the returned future cancels the call on the
    /// server.
    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError>;

    /// One page of `resources/list`.
    async fn list_resources(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourcePage, McpError>;

    /// One page of `resources/templates/list`.
    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourceTemplatePage, McpError>;

    async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError>;

    async fn subscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError>;

    async fn unsubscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError>;

    async fn ping(&self, timeout: Duration) -> Result<(), McpError>;

    /// Shut the session down.
    async fn close(&self) -> Result<(), McpError>;

    /// Whether the session has ended, from either side.
    fn is_closed(&self) -> bool;
}

/// Opens sessions for server configurations.
///
/// The Manager builds every connection through a factory so that tests can
/// substitute in-memory servers.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Open a session and complete the handshake. Notifications observed
    /// afterwards go to `events`.
    async fn open(
        &self,
        config: &ServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// Factory that opens real `rmcp` sessions.
#[derive(Debug, Default, Clone)]
pub struct DefaultTransportFactory;

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn open(
        &self,
        config: &ServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn McpTransport>, McpError> {
        let transport = RmcpTransport::open(config, events).await?;
        Ok(Arc::new(transport))
    }
}
