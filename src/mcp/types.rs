// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP types for tool, resource and content handling.
//!
//! Wire-facing structs use the camelCase field names of the Model Context
//! Protocol, so `rmcp` model values convert into them through serde.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which effective tool metadata travels in `_meta` maps.
pub const A2C_TOOL_META: &str = "a2c_tool_meta";

/// A tool as reported by one MCP server (`tools/list`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInfo {
    /// Tool name as declared by the server.
    pub name: String,

    /// Optional human-readable title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Tool description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// JSON Schema for tool input.
    #[serde(default = "empty_schema")]
    pub input_schema: Value,

    /// JSON Schema for structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,

    /// Behavioural hints (readOnlyHint, destructiveHint, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,

    /// Server-provided metadata.
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

fn empty_schema() -> Value {
    serde_json::json!({ "type": "object" })
}

impl ToolInfo {
    /// Create a tool with an empty object schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: None,
            description: None,
            input_schema: empty_schema(),
            output_schema: None,
            annotations: None,
            meta: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A tool after alias substitution and policy evaluation.
///
/// Derived from a [`ToolInfo`] and the owning server's configuration; rebuilt
/// whenever either changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Name as declared by the server (pre-alias).
    pub name: String,

    /// Name exposed to callers (post-alias, unique per Computer).
    pub display_name: String,

    /// Server that owns the tool.
    pub owner_server: String,

    /// Description.
    pub description: Option<String>,

    /// Input schema.
    pub schema: Value,

    /// Output schema, if the server declared one.
    pub output_schema: Option<Value>,

    /// Annotations declared by the server.
    pub annotations: Option<Value>,

    /// Whether calls are rejected by policy.
    pub forbidden: bool,

    /// Hint to the caller that no confirmation is needed.
    pub auto_apply: bool,

    /// Result reshaping map.
    pub ret_object_mapper: Option<Value>,

    /// Effective tool metadata, serialized.
    pub tool_meta: Option<Value>,
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Result content (text, images, etc.).
    #[serde(default)]
    pub content: Vec<McpContent>,

    /// Structured result, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,

    /// Whether there was an error.
    #[serde(default)]
    pub is_error: bool,

    /// Result metadata.
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
}

impl ToolResult {
    /// Create a successful text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text { text: text.into() }],
            structured_content: None,
            is_error: false,
            meta: None,
        }
    }

    /// Create an error result.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![McpContent::Text {
                text: message.into(),
            }],
            structured_content: None,
            is_error: true,
            meta: None,
        }
    }

    /// Create an error result that also carries the error category.
    pub fn error_with_kind(message: impl Into<String>, kind: &str) -> Self {
        let message = message.into();
        let mut result = Self::error(message.clone());
        result.structured_content = Some(serde_json::json!({
            "error": message,
            "error_type": kind,
        }));
        result
    }

    /// Get the text content as a single string.
    pub fn as_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                McpContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Insert a value into the `_meta` map.
    pub fn insert_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }
}

/// Content types that can be returned by MCP tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpContent {
    /// Plain text content.
    Text {
        /// The text content.
        text: String,
    },

    /// Image content.
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Audio content.
    Audio {
        /// Base64-encoded audio data.
        data: String,
        /// MIME type of the audio.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Embedded resource.
    Resource {
        /// The embedded contents.
        resource: ResourceContents,
    },

    /// Link to a resource the caller can read separately.
    ResourceLink {
        /// URI of the resource.
        uri: String,
        /// Resource name.
        name: String,
        /// Optional MIME type.
        #[serde(default, rename = "mimeType", skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// A resource listed by a server (`resources/list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEntry {
    /// Resource URI.
    pub uri: String,

    /// Resource name.
    pub name: String,

    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceEntry {
    /// Create an entry with just a URI and name.
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            title: None,
            description: None,
            mime_type: None,
        }
    }
}

/// A parameterised resource (`resources/templates/list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    /// RFC 6570 URI template.
    pub uri_template: String,

    /// Template name.
    pub name: String,

    /// Optional title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Optional MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Contents returned by `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI of the contents.
    pub uri: String,

    /// Optional MIME type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Base64 payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// One page of resources from a single server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePage {
    /// Resources on this page.
    pub resources: Vec<ResourceEntry>,

    /// Cursor for the next page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One page of tools from a single server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPage {
    /// Tools on this page.
    pub tools: Vec<ToolInfo>,

    /// Cursor for the next page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// One page of resource templates from a single server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplatePage {
    #[serde(default)]
    pub resource_templates: Vec<ResourceTemplate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Server capabilities reported during initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Whether the server supports tools.
    #[serde(default)]
    pub tools: bool,

    /// Whether the server announces tool list changes.
    #[serde(default)]
    pub tools_list_changed: bool,

    /// Whether the server supports resources.
    #[serde(default)]
    pub resources: bool,

    /// Whether the server supports per-resource subscriptions.
    #[serde(default)]
    pub resources_subscribe: bool,

    /// Whether the server announces resource list changes.
    #[serde(default)]
    pub resources_list_changed: bool,

    /// Whether the server supports prompts.
    #[serde(default)]
    pub prompts: bool,

    /// Whether the server supports logging.
    #[serde(default)]
    pub logging: bool,
}

impl ServerCapabilities {
    /// Decode the `capabilities` object of an `initialize` result.
    pub fn from_json(value: &Value) -> Self {
        let flag = |section: &str, key: &str| {
            value
                .get(section)
                .and_then(|s| s.get(key))
                .and_then(Value::as_bool)
                .unwrap_or(false)
        };

        Self {
            tools: value.get("tools").is_some(),
            tools_list_changed: flag("tools", "listChanged"),
            resources: value.get("resources").is_some(),
            resources_subscribe: flag("resources", "subscribe"),
            resources_list_changed: flag("resources", "listChanged"),
            prompts: value.get("prompts").is_some(),
            logging: value.get("logging").is_some(),
        }
    }
}

/// Server information reported during initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name.
    pub name: String,

    /// Server version.
    pub version: String,

    /// Server capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,

    /// Protocol version supported.
    #[serde(default)]
    pub protocol_version: Option<String>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "0.0.0".to_string(),
            capabilities: ServerCapabilities::default(),
            protocol_version: None,
        }
    }
}

impl ServerInfo {
    /// Decode an `initialize` result.
    pub fn from_initialize(result: &Value) -> Self {
        let info = result.get("serverInfo");
        Self {
            name: info
                .and_then(|s| s.get("name"))
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            version: info
                .and_then(|s| s.get("version"))
                .and_then(Value::as_str)
                .unwrap_or("0.0.0")
                .to_string(),
            capabilities: result
                .get("capabilities")
                .map(ServerCapabilities::from_json)
                .unwrap_or_default(),
            protocol_version: result
                .get("protocolVersion")
                .and_then(Value::as_str)
                .map(str::to_string),
        }
    }
}

/// Lifecycle state of a single server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected.
    Disconnected,

    /// Transport is being established.
    Connecting,

    /// Initialized and serving requests.
    Connected,

    /// Lost the transport; retrying while serving stale metadata.
    Reconnecting,

    /// Last connect attempt failed.
    Error,

    /// Terminal: configuration removed or Computer shut down.
    Stopped,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_info_from_wire() {
        let tool: ToolInfo = serde_json::from_value(serde_json::json!({
            "name": "add",
            "description": "Add two numbers",
            "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}}},
            "annotations": {"readOnlyHint": true}
        }))
        .unwrap();

        assert_eq!(tool.name, "add");
        assert_eq!(tool.description.as_deref(), Some("Add two numbers"));
        assert!(tool.input_schema.get("properties").is_some());
        assert!(tool.output_schema.is_none());
    }

    #[test]
    fn test_tool_result_text() {
        let result = ToolResult::text("Hello, world!");
        assert!(!result.is_error);
        assert_eq!(result.as_text(), "Hello, world!");
    }

    #[test]
    fn test_tool_result_error_with_kind() {
        let result = ToolResult::error_with_kind("nope", "policy");
        assert!(result.is_error);
        assert_eq!(result.as_text(), "nope");
        assert_eq!(
            result.structured_content.unwrap()["error_type"],
            serde_json::json!("policy")
        );
    }

    #[test]
    fn test_tool_result_wire_names() {
        let mut result = ToolResult::text("3");
        result.insert_meta(A2C_TOOL_META, serde_json::json!({"auto_apply": true}));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["isError"], serde_json::json!(false));
        assert_eq!(json["content"][0]["type"], serde_json::json!("text"));
        assert!(json["_meta"][A2C_TOOL_META].is_object());
    }

    #[test]
    fn test_content_resource_link() {
        let content: McpContent = serde_json::from_value(serde_json::json!({
            "type": "resource_link",
            "uri": "file:///a.txt",
            "name": "a"
        }))
        .unwrap();
        assert!(matches!(content, McpContent::ResourceLink { .. }));
    }

    #[test]
    fn test_capabilities_from_json() {
        let caps = ServerCapabilities::from_json(&serde_json::json!({
            "tools": {"listChanged": true},
            "resources": {"subscribe": true}
        }));
        assert!(caps.tools);
        assert!(caps.tools_list_changed);
        assert!(caps.resources);
        assert!(caps.resources_subscribe);
        assert!(!caps.resources_list_changed);
        assert!(!caps.prompts);
    }

    #[test]
    fn test_server_info_from_initialize() {
        let info = ServerInfo::from_initialize(&serde_json::json!({
            "protocolVersion": "2025-06-18",
            "serverInfo": {"name": "calc", "version": "1.2.0"},
            "capabilities": {"tools": {}}
        }));
        assert_eq!(info.name, "calc");
        assert_eq!(info.version, "1.2.0");
        assert!(info.capabilities.tools);
        assert_eq!(info.protocol_version.as_deref(), Some("2025-06-18"));
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert_eq!(ConnectionState::Stopped.to_string(), "stopped");
    }
}
