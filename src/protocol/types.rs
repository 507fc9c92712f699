// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request, response and notification payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::inputs::InputDefinition;
use crate::mcp::{ResourceContents, ResourceEntry, ResourceTemplate};

/// Role a session joins an office with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Agent,
    Computer,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Agent => write!(f, "agent"),
            Role::Computer => write!(f, "computer"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOfficeReq {
    pub role: Role,
    pub name: String,
    pub office_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveOfficeReq {
    pub office_id: String,
}

/// A member of an office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListRoomRet {
    pub office_id: String,
    pub members: Vec<RoomMember>,
}

/// Agent call addressed to one Computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerReq {
    pub computer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallReq {
    /// Set by the hub when forwarding; ignored from Agents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub computer: String,
    pub req_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallCancelReq {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    pub req_id: String,
}

/// Tool as presented to Agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmcpTool {
    pub name: String,
    pub description: String,
    pub params_schema: Value,
    pub return_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetToolsRet {
    pub tools: Vec<SmcpTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetMcpConfigRet {
    pub servers: BTreeMap<String, Value>,
    #[serde(default)]
    pub inputs: Vec<InputDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDesktopReq {
    pub computer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desktop_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

/// One window placed on a desktop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesktopWindow {
    pub uri: String,
    pub server: String,
    pub fullscreen: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetDesktopRet {
    pub windows: Vec<DesktopWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceListReq {
    pub computer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceListRet {
    pub resources: Vec<ResourceEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplatesRet {
    pub resource_templates: Vec<ResourceTemplate>,
}

/// Read, subscribe and unsubscribe all address one uri.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUriReq {
    pub computer: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReadRet {
    pub contents: Vec<ResourceContents>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficeNotification {
    pub office_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
}

/// Config or tool list of a Computer changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputerNotification {
    pub computer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceUpdatedNotification {
    /// Filled in by the hub.
    #[serde(default)]
    pub computer: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Parse request params into a payload type.
pub fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, super::ErrorBody> {
    serde_json::from_value(params).map_err(|e| super::ErrorBody::invalid_params(e.to_string()))
}

/// Serialize a payload as a response result.
pub fn to_result<T: Serialize>(value: &T) -> Result<Value, super::ErrorBody> {
    serde_json::to_value(value).map_err(|e| {
        super::ErrorBody::new(super::frame::CODE_INTERNAL, "internal", e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_call_req_defaults() {
        let req: ToolCallReq = serde_json::from_value(json!({
            "computer": "comp-1",
            "req_id": "r1",
            "tool_name": "add"
        }))
        .unwrap();
        assert!(req.params.is_null());
        assert_eq!(req.timeout_ms, None);
        assert_eq!(req.agent, None);
    }

    #[test]
    fn test_role_wire_names() {
        let req: JoinOfficeReq = serde_json::from_value(json!({
            "role": "computer",
            "name": "comp-1",
            "office_id": "room-1"
        }))
        .unwrap();
        assert_eq!(req.role, Role::Computer);
        assert_eq!(Role::Agent.to_string(), "agent");
    }

    #[test]
    fn test_parse_params_error() {
        let err = parse_params::<ResourceUriReq>(json!({"computer": "c"})).unwrap_err();
        assert_eq!(err.kind, "invalid_params");
    }
}
