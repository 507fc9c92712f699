// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Input definitions referenced by `${input:<id>}` placeholders.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A declared input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
pub enum InputDefinition {
    /// Free-form text typed by the operator.
    #[serde(rename = "promptString")]
    PromptString {
        id: String,
        #[serde(default)]
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
        #[serde(default)]
        password: bool,
    },

    /// One value chosen from a fixed list.
    #[serde(rename = "pickString")]
    PickString {
        id: String,
        #[serde(default)]
        description: String,
        options: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },

    /// Output of a shell command.
    #[serde(rename = "command")]
    Command {
        id: String,
        #[serde(default)]
        description: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<BTreeMap<String, String>>,
    },
}

impl InputDefinition {
    /// Create a prompt input.
    pub fn prompt(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::PromptString {
            id: id.into(),
            description: description.into(),
            default: None,
            password: false,
        }
    }

    /// Create a pick input.
    pub fn pick(id: impl Into<String>, options: Vec<String>, default: Option<String>) -> Self {
        Self::PickString {
            id: id.into(),
            description: String::new(),
            options,
            default,
        }
    }

    /// Create a command input.
    pub fn command(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::Command {
            id: id.into(),
            description: String::new(),
            command: command.into(),
            args: None,
        }
    }

    /// Set the default value. Command inputs have none.
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        match &mut self {
            Self::PromptString { default, .. } | Self::PickString { default, .. } => {
                *default = Some(value.into());
            }
            Self::Command { .. } => {}
        }
        self
    }

    pub fn id(&self) -> &str {
        match self {
            Self::PromptString { id, .. } | Self::PickString { id, .. } | Self::Command { id, .. } => id,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::PromptString { description, .. }
            | Self::PickString { description, .. }
            | Self::Command { description, .. } => description,
        }
    }

    pub fn default_value(&self) -> Option<&str> {
        match self {
            Self::PromptString { default, .. } | Self::PickString { default, .. } => {
                default.as_deref()
            }
            Self::Command { .. } => None,
        }
    }

    /// Wire name of the input type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PromptString { .. } => "promptString",
            Self::PickString { .. } => "pickString",
            Self::Command { .. } => "command",
        }
    }
}
