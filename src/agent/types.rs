// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent events and callbacks.

use std::sync::Arc;

use serde_json::Value;

use crate::protocol::methods;
use crate::protocol::{
    parse_params, ComputerNotification, OfficeNotification, ResourceUpdatedNotification,
};

/// Something the hub told the Agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// A Computer entered the office.
    EnterOffice(OfficeNotification),
    /// A Computer left the office.
    LeaveOffice(OfficeNotification),
    /// A Computer's server configuration changed.
    ConfigChanged { computer: String },
    /// A Computer's tool list changed.
    ToolsChanged { computer: String },
    /// A Computer's resource list changed.
    ResourceListChanged { computer: String },
    /// A subscribed resource changed.
    ResourceUpdated(ResourceUpdatedNotification),
}

impl AgentEvent {
    /// Decode a hub notification. Unknown or malformed ones yield `None`.
    pub fn from_notification(method: &str, params: Value) -> Option<Self> {
        let computer = |params: Value| {
            parse_params::<ComputerNotification>(params)
                .ok()
                .map(|n| n.computer)
        };
        match method {
            methods::NOTIFY_ENTER_OFFICE => parse_params(params).ok().map(Self::EnterOffice),
            methods::NOTIFY_LEAVE_OFFICE => parse_params(params).ok().map(Self::LeaveOffice),
            methods::NOTIFY_UPDATE_MCP_CONFIG => {
                computer(params).map(|computer| Self::ConfigChanged { computer })
            }
            methods::NOTIFY_UPDATE_TOOL_LIST => {
                computer(params).map(|computer| Self::ToolsChanged { computer })
            }
            methods::NOTIFY_RESOURCES_LIST_CHANGED => {
                computer(params).map(|computer| Self::ResourceListChanged { computer })
            }
            methods::NOTIFY_RESOURCES_UPDATED => {
                parse_params(params).ok().map(Self::ResourceUpdated)
            }
            _ => None,
        }
    }
}

/// Callbacks for hub notifications.
///
/// Called on the channel's reader task, in arrival order; keep them short.
#[derive(Default, Clone)]
pub struct AgentCallbacks {
    /// Called when a Computer enters or leaves the office (event, entered).
    pub on_office_change: Option<Arc<dyn Fn(&OfficeNotification, bool) + Send + Sync>>,
    /// Called when a Computer's configuration or tool list changed (computer).
    pub on_config_change: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Called when a Computer's resource list changed (computer).
    pub on_resource_list_change: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// Called when a subscribed resource changed.
    pub on_resource_update: Option<Arc<dyn Fn(&ResourceUpdatedNotification) + Send + Sync>>,
}

impl AgentCallbacks {
    pub(crate) fn dispatch(&self, event: &AgentEvent) {
        match event {
            AgentEvent::EnterOffice(note) => {
                if let Some(cb) = &self.on_office_change {
                    cb(note, true);
                }
            }
            AgentEvent::LeaveOffice(note) => {
                if let Some(cb) = &self.on_office_change {
                    cb(note, false);
                }
            }
            AgentEvent::ConfigChanged { computer } | AgentEvent::ToolsChanged { computer } => {
                if let Some(cb) = &self.on_config_change {
                    cb(computer);
                }
            }
            AgentEvent::ResourceListChanged { computer } => {
                if let Some(cb) = &self.on_resource_list_change {
                    cb(computer);
                }
            }
            AgentEvent::ResourceUpdated(note) => {
                if let Some(cb) = &self.on_resource_update {
                    cb(note);
                }
            }
        }
    }
}
