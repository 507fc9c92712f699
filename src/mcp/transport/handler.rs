// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Client-side `rmcp` handler.

use std::future::Future;

use rmcp::model::{ClientInfo, ResourceUpdatedNotificationParam};
use rmcp::service::NotificationContext;
use rmcp::{ClientHandler, RoleClient};
use tokio::sync::mpsc;
use tracing::trace;

use super::TransportEvent;

/// Forwards server notifications to the owning connection.
#[derive(Debug, Clone)]
pub struct EventForwarder {
    server: String,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl EventForwarder {
    pub fn new(server: impl Into<String>, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            server: server.into(),
            events,
        }
    }

    /// Send `event`; a connection that stopped listening is not an error.
    pub fn forward(&self, event: TransportEvent) {
        trace!(server = %self.server, ?event, "MCP notification");
        let _ = self.events.send(event);
    }
}

impl ClientHandler for EventForwarder {
    fn get_info(&self) -> ClientInfo {
        let mut info = ClientInfo::default();
        info.client_info.name = "smcp".to_string();
        info.client_info.version = env!("CARGO_PKG_VERSION").to_string();
        info
    }

    fn on_tool_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        self.forward(TransportEvent::ToolListChanged);
        std::future::ready(())
    }

    fn on_resource_list_changed(
        &self,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        self.forward(TransportEvent::ResourceListChanged);
        std::future::ready(())
    }

    fn on_resource_updated(
        &self,
        params: ResourceUpdatedNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) -> impl Future<Output = ()> + Send + '_ {
        self.forward(TransportEvent::ResourceUpdated { uri: params.uri });
        std::future::ready(())
    }
}
