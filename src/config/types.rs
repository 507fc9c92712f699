// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Computer configuration file types.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::inputs::InputDefinition;

/// Configuration a Computer starts with.
///
/// Server entries stay raw JSON until their `${input:<id>}` placeholders are
/// rendered; only then are they parsed into [`crate::mcp::ServerConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ComputerConfig {
    /// Server entries, each carrying its `name`.
    pub servers: Vec<Value>,

    /// Declared inputs.
    pub inputs: Vec<InputDefinition>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ServersShape {
    Map(BTreeMap<String, Value>),
    List(Vec<Value>),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ComputerConfigFile {
    #[serde(default)]
    servers: Option<ServersShape>,
    #[serde(default)]
    inputs: Vec<InputDefinition>,
}

impl<'de> Deserialize<'de> for ComputerConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let file = ComputerConfigFile::deserialize(deserializer)?;
        let servers = match file.servers {
            None => Vec::new(),
            Some(ServersShape::List(list)) => list,
            Some(ServersShape::Map(map)) => map
                .into_iter()
                .map(|(name, mut server)| {
                    if let Value::Object(fields) = &mut server {
                        fields.entry("name").or_insert(Value::String(name));
                    }
                    server
                })
                .collect(),
        };
        Ok(Self {
            servers,
            inputs: file.inputs,
        })
    }
}

impl ComputerConfig {
    /// Name of a raw server entry, if it has one.
    pub fn server_name(server: &Value) -> Option<&str> {
        server.get("name").and_then(Value::as_str)
    }

    /// Names of every server entry, in file order.
    pub fn server_names(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter_map(|s| Self::server_name(s).map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_servers_as_map() {
        let config: ComputerConfig = serde_json::from_value(json!({
            "servers": {
                "calc": {"transport": {"type": "stdio", "command": "calc-mcp"}},
                "web": {"name": "web", "transport": {"type": "sse", "url": "http://localhost/sse"}}
            }
        }))
        .unwrap();
        assert_eq!(config.server_names(), vec!["calc", "web"]);
        assert!(config.inputs.is_empty());
    }

    #[test]
    fn test_servers_as_list_with_inputs() {
        let config: ComputerConfig = serde_json::from_value(json!({
            "servers": [{"name": "calc", "transport": {"type": "stdio", "command": "${input:cmd}"}}],
            "inputs": [{"type": "promptString", "id": "cmd"}]
        }))
        .unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.inputs[0].id(), "cmd");
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let result: Result<ComputerConfig, _> =
            serde_json::from_value(json!({"servers": [], "plugins": []}));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_config() {
        let config: ComputerConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, ComputerConfig::default());
    }
}
