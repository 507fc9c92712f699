// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP server configuration.
//!
//! One [`ServerConfig`] describes one server a Computer hosts. Unknown fields
//! are rejected so that typos surface at load time instead of being ignored.
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "name": "calc",
//!   "transport": {
//!     "type": "stdio",
//!     "command": "python",
//!     "args": ["calc_server.py"],
//!     "env": {"API_KEY": "${input:api_key}"}
//!   },
//!   "forbidden_tools": ["shutdown"],
//!   "tool_meta": {
//!     "search": {"alias": "calc_search", "auto_apply": true}
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::McpError;

/// Per-tool metadata applied by the Computer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolMeta {
    /// Hint that the caller may run the tool without confirmation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_apply: Option<bool>,

    /// Name exposed instead of the server-declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Reshapes a successful result; see `computer::mapper`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ret_object_mapper: Option<Value>,

    /// Free-form tags forwarded to callers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl ToolMeta {
    /// Fill unset fields from `fallback`. The alias never falls back.
    pub fn or_fallback(&self, fallback: &ToolMeta) -> ToolMeta {
        ToolMeta {
            auto_apply: self.auto_apply.or(fallback.auto_apply),
            alias: self.alias.clone(),
            ret_object_mapper: self
                .ret_object_mapper
                .clone()
                .or_else(|| fallback.ret_object_mapper.clone()),
            tags: if self.tags.is_empty() {
                fallback.tags.clone()
            } else {
                self.tags.clone()
            },
        }
    }

    fn without_alias(mut self) -> Self {
        self.alias = None;
        self
    }
}

/// Transport used to reach a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransportConfig {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },

    /// Legacy HTTP+SSE endpoint, reached through the streamable HTTP client.
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_sse_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_sse_read_timeout")]
        sse_read_timeout_secs: u64,
    },

    /// Streamable HTTP transport.
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
        #[serde(default = "default_http_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_sse_read_timeout")]
        sse_read_timeout_secs: u64,
        /// Accepted for compatibility; the client always ends the HTTP
        /// session when the connection closes.
        #[serde(default = "default_true")]
        terminate_on_close: bool,
    },
}

impl TransportConfig {
    /// Short transport name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Sse { .. } => "sse",
            Self::StreamableHttp { .. } => "streamable_http",
        }
    }
}

fn default_sse_timeout() -> u64 {
    5
}

fn default_http_timeout() -> u64 {
    30
}

fn default_sse_read_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

fn default_startup_timeout() -> u64 {
    30
}

fn default_tool_timeout() -> u64 {
    60
}

/// Configuration for a single MCP server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server id, unique within a Computer. Filled from the map key when the
    /// config file uses the map form.
    #[serde(default)]
    pub name: String,

    /// Transport parameters.
    pub transport: TransportConfig,

    /// Disabled servers are kept in the configuration but never connected.
    #[serde(default)]
    pub disabled: bool,

    /// Tools that may not be called (matched by declared or display name).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub forbidden_tools: BTreeSet<String>,

    /// Per-tool metadata keyed by the server-declared tool name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_meta: BTreeMap<String, ToolMeta>,

    /// Fallback metadata for tools without an entry in `tool_meta`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_tool_meta: Option<ToolMeta>,

    /// Startup (connect + initialize) timeout in seconds.
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    /// Default tool call timeout in seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

impl ServerConfig {
    /// Create a stdio server configuration.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args,
                env: BTreeMap::new(),
                cwd: None,
            },
        )
    }

    /// Create a streamable HTTP server configuration.
    pub fn streamable_http(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::StreamableHttp {
                url: url.into(),
                headers: BTreeMap::new(),
                timeout_secs: default_http_timeout(),
                sse_read_timeout_secs: default_sse_read_timeout(),
                terminate_on_close: true,
            },
        )
    }

    /// Create an SSE server configuration.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse {
                url: url.into(),
                headers: BTreeMap::new(),
                timeout_secs: default_sse_timeout(),
                sse_read_timeout_secs: default_sse_read_timeout(),
            },
        )
    }

    /// Create a configuration around an arbitrary transport.
    pub fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            disabled: false,
            forbidden_tools: BTreeSet::new(),
            tool_meta: BTreeMap::new(),
            default_tool_meta: None,
            startup_timeout_secs: default_startup_timeout(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }

    /// Set tool metadata for one tool.
    pub fn with_tool_meta(mut self, tool: impl Into<String>, meta: ToolMeta) -> Self {
        self.tool_meta.insert(tool.into(), meta);
        self
    }

    /// Forbid a tool.
    pub fn with_forbidden_tool(mut self, tool: impl Into<String>) -> Self {
        self.forbidden_tools.insert(tool.into());
        self
    }

    /// Effective metadata for a server-declared tool name.
    pub fn effective_tool_meta(&self, tool: &str) -> Option<ToolMeta> {
        match (self.tool_meta.get(tool), &self.default_tool_meta) {
            (Some(meta), Some(fallback)) => Some(meta.or_fallback(fallback)),
            (Some(meta), None) => Some(meta.clone()),
            (None, Some(fallback)) => Some(fallback.clone().without_alias()),
            (None, None) => None,
        }
    }

    /// Name a tool is exposed under.
    pub fn display_name(&self, tool: &str) -> String {
        self.tool_meta
            .get(tool)
            .and_then(|m| m.alias.clone())
            .unwrap_or_else(|| tool.to_string())
    }

    /// Whether a tool is forbidden, by declared or display name.
    pub fn is_forbidden(&self, tool: &str, display_name: &str) -> bool {
        self.forbidden_tools.contains(tool) || self.forbidden_tools.contains(display_name)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), McpError> {
        if self.name.trim().is_empty() {
            return Err(McpError::Configuration(
                "server name must not be empty".to_string(),
            ));
        }

        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.trim().is_empty() {
                    return Err(McpError::Configuration(format!(
                        "server '{}': stdio transport requires a command",
                        self.name
                    )));
                }
            }
            TransportConfig::Sse { url, .. } | TransportConfig::StreamableHttp { url, .. } => {
                let parsed = url::Url::parse(url).map_err(|e| {
                    McpError::Configuration(format!(
                        "server '{}': invalid url '{}': {}",
                        self.name, url, e
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(McpError::Configuration(format!(
                        "server '{}': url must use http or https, got '{}'",
                        self.name,
                        parsed.scheme()
                    )));
                }
            }
        }

        let mut aliases = HashSet::new();
        for (tool, meta) in &self.tool_meta {
            if let Some(alias) = &meta.alias {
                if alias.trim().is_empty() {
                    return Err(McpError::Configuration(format!(
                        "server '{}': alias for tool '{}' must not be empty",
                        self.name, tool
                    )));
                }
                if !aliases.insert(alias.as_str()) {
                    return Err(McpError::Configuration(format!(
                        "server '{}': alias '{}' is used more than once",
                        self.name, alias
                    )));
                }
            }
        }

        Ok(())
    }
}
