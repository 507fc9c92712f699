// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Method and notification names.
//!
//! `server:` methods are executed by the hub. `client:` and `resources/`
//! methods are sent by an Agent, addressed to one Computer and forwarded to it
//! by the hub. `notify:` notifications are only ever emitted by the hub.

pub const JOIN_OFFICE: &str = "server:join_office";
pub const LEAVE_OFFICE: &str = "server:leave_office";
pub const LIST_ROOM: &str = "server:list_room";
pub const UPDATE_MCP_CONFIG: &str = "server:update_mcp_config";
pub const UPDATE_TOOL_LIST: &str = "server:update_tool_list";
pub const TOOL_CALL_CANCEL: &str = "server:tool_call_cancel";
pub const RESOURCES_LIST_CHANGED: &str = "server:resources/list_changed";
pub const RESOURCES_UPDATED: &str = "server:resources/updated";

pub const TOOL_CALL: &str = "client:tool_call";
pub const GET_TOOLS: &str = "client:get_tools";
pub const GET_MCP_CONFIG: &str = "client:get_mcp_config";
pub const GET_DESKTOP: &str = "client:get_desktop";

pub const RESOURCES_LIST: &str = "resources/list";
pub const RESOURCES_READ: &str = "resources/read";
pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
pub const RESOURCES_UNSUBSCRIBE: &str = "resources/unsubscribe";

pub const NOTIFY_ENTER_OFFICE: &str = "notify:enter_office";
pub const NOTIFY_LEAVE_OFFICE: &str = "notify:leave_office";
pub const NOTIFY_UPDATE_MCP_CONFIG: &str = "notify:update_mcp_config";
pub const NOTIFY_UPDATE_TOOL_LIST: &str = "notify:update_tool_list";
pub const NOTIFY_TOOL_CALL_CANCEL: &str = "notify:tool_call_cancel";
pub const NOTIFY_RESOURCES_LIST_CHANGED: &str = "notify:resources/list_changed";
pub const NOTIFY_RESOURCES_UPDATED: &str = "notify:resources/updated";

/// Agent requests the hub forwards to the addressed Computer unchanged.
pub const FORWARDED: &[&str] = &[
    GET_TOOLS,
    GET_MCP_CONFIG,
    GET_DESKTOP,
    RESOURCES_LIST,
    RESOURCES_READ,
    RESOURCES_TEMPLATES_LIST,
];

/// Whether the hub forwards `method` as is.
pub fn is_forwarded(method: &str) -> bool {
    FORWARDED.contains(&method)
}
