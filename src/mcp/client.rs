// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP protocol client for a single server.
//!
//! [`McpClient`] wraps one initialized [`McpTransport`] session: paginated
//! listing, tool calls, resource reads and subscriptions, and `ping`, each
//! gated on the capabilities the server advertised. It owns no lifecycle
//! policy; reconnects and health checks live in `connection`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, instrument};

use super::config::ServerConfig;
use super::error::McpError;
use super::transport::{McpTransport, TransportEvent, TransportFactory};
use super::types::{
    ResourceContents, ResourcePage, ResourceTemplate, ServerInfo, ToolInfo, ToolResult,
};

#[cfg(feature = "telemetry")]
use std::time::Instant;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Timeout for listing and other metadata requests.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on pages drained from one listing, against cursor loops.
const MAX_PAGES: usize = 1000;

/// Client for one initialized MCP server.
pub struct McpClient {
    name: String,
    transport: Arc<dyn McpTransport>,
    server_info: ServerInfo,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("name", &self.name)
            .field("server_info", &self.server_info)
            .finish()
    }
}

impl McpClient {
    /// Open a session for `config`; the handshake must finish within the
    /// server's startup timeout.
    #[instrument(skip_all, fields(server = %config.name, transport = config.transport.kind()))]
    pub async fn connect(
        config: &ServerConfig,
        factory: &dyn TransportFactory,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, McpError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let startup = Duration::from_secs(config.startup_timeout_secs);
        let result = tokio::time::timeout(startup, factory.open(config, events))
            .await
            .map_err(|_| McpError::ConnectionTimeout {
                server: config.name.clone(),
                timeout_secs: config.startup_timeout_secs,
            })
            .and_then(|opened| opened)
            .map(|transport| {
                let server_info = transport.server_info();
                debug!(
                    remote = %server_info.name,
                    version = %server_info.version,
                    tools = server_info.capabilities.tools,
                    resources = server_info.capabilities.resources,
                    "MCP client ready"
                );
                Self {
                    name: config.name.clone(),
                    transport,
                    server_info,
                }
            });

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.client.connect", start.elapsed());

        result
    }

    /// Server name from the configuration.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server info reported during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Whether the underlying session has closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// List every tool, following pagination cursors to the end.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        if !self.server_info.capabilities.tools {
            return Ok(Vec::new());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = self.transport.list_tools(cursor, METADATA_TIMEOUT).await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }
        Err(McpError::InvalidResponse(format!(
            "tools/list from '{}' did not terminate",
            self.name
        )))
    }

    /// Call a tool.
    ///
    /// Dropping the returned future cancels the call on the server.
    #[instrument(skip(self, arguments), fields(server = %self.name))]
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self
            .transport
            .call_tool(tool, arguments, timeout)
            .await
            .map_err(|e| match e {
                McpError::RequestTimeout { timeout_ms, .. } => McpError::ToolCallTimeout {
                    tool: tool.to_string(),
                    timeout_ms,
                },
                other => other,
            });

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_tool(
            &format!("mcp.{}.{}", self.name, tool),
            start.elapsed(),
            matches!(&result, Ok(r) if !r.is_error),
        );

        result
    }

    /// Fetch one page of resources.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ResourcePage, McpError> {
        self.require_resources()?;
        self.transport
            .list_resources(cursor.map(str::to_string), METADATA_TIMEOUT)
            .await
    }

    /// List every resource template, following pagination cursors.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, McpError> {
        self.require_resources()?;

        let mut templates = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let page = self
                .transport
                .list_resource_templates(cursor, METADATA_TIMEOUT)
                .await?;
            templates.extend(page.resource_templates);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(templates),
            }
        }
        Err(McpError::InvalidResponse(format!(
            "resources/templates/list from '{}' did not terminate",
            self.name
        )))
    }

    /// Read a resource.
    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError> {
        self.require_resources()?;

        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let result = self.transport.read_resource(uri, timeout).await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.resources.read", start.elapsed());

        result
    }

    /// Subscribe to updates of one resource.
    pub async fn subscribe(&self, uri: &str) -> Result<(), McpError> {
        self.require_subscribe()?;
        self.transport.subscribe(uri, METADATA_TIMEOUT).await
    }

    /// Cancel a subscription.
    pub async fn unsubscribe(&self, uri: &str) -> Result<(), McpError> {
        self.require_subscribe()?;
        self.transport.unsubscribe(uri, METADATA_TIMEOUT).await
    }

    /// Heartbeat.
    pub async fn ping(&self, timeout: Duration) -> Result<(), McpError> {
        self.transport.ping(timeout).await
    }

    /// Close the session.
    pub async fn close(&self) -> Result<(), McpError> {
        self.transport.close().await
    }

    /// Whether the server supports resources.
    pub fn supports_resources(&self) -> bool {
        self.server_info.capabilities.resources
    }

    fn require_resources(&self) -> Result<(), McpError> {
        if self.supports_resources() {
            Ok(())
        } else {
            Err(McpError::capability(&self.name, "resources"))
        }
    }

    fn require_subscribe(&self) -> Result<(), McpError> {
        if self.server_info.capabilities.resources_subscribe {
            Ok(())
        } else {
            Err(McpError::capability(&self.name, "resource subscriptions"))
        }
    }
}
