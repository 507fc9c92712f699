// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Input resolution with a per-session cache.
//!
//! An input id is acquired at most once per resolution session. The cache is
//! only cleared by [`InputResolver::begin_session`] or an explicit cache
//! operation, never between placeholder lookups.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use super::provider::{CommandRequest, InputProvider, PickRequest, PromptRequest, COMMAND_TIMEOUT};
use super::types::InputDefinition;
use crate::error::InputError;

/// Resolves input ids to values.
pub struct InputResolver {
    definitions: RwLock<BTreeMap<String, InputDefinition>>,
    cache: Mutex<HashMap<String, Value>>,
    provider: Arc<dyn InputProvider>,
    /// Serializes acquisition so concurrent lookups of one id prompt once.
    acquire: tokio::sync::Mutex<()>,
    command_timeout: Duration,
}

impl InputResolver {
    pub fn new(definitions: Vec<InputDefinition>, provider: Arc<dyn InputProvider>) -> Self {
        Self {
            definitions: RwLock::new(index(definitions)),
            cache: Mutex::new(HashMap::new()),
            provider,
            acquire: tokio::sync::Mutex::new(()),
            command_timeout: COMMAND_TIMEOUT,
        }
    }

    /// Override the bound on command inputs.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn defs(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, InputDefinition>> {
        self.definitions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn defs_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, InputDefinition>> {
        self.definitions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new resolution session. Every cached value is dropped.
    pub fn begin_session(&self) {
        self.cache().clear();
    }

    /// Resolve one input id, acquiring it on a cache miss.
    pub async fn resolve(&self, id: &str) -> Result<Value, InputError> {
        if let Some(value) = self.cache().get(id) {
            return Ok(value.clone());
        }

        let _guard = self.acquire.lock().await;
        if let Some(value) = self.cache().get(id) {
            return Ok(value.clone());
        }

        let definition = self
            .get_definition(id)
            .ok_or_else(|| InputError::NotFound(id.to_string()))?;
        let value = Value::String(self.acquire_value(&definition).await?);
        debug!(input = id, kind = definition.kind(), "Input resolved");

        self.cache().insert(id.to_string(), value.clone());
        Ok(value)
    }

    async fn acquire_value(&self, definition: &InputDefinition) -> Result<String, InputError> {
        match definition {
            InputDefinition::PromptString {
                id,
                description,
                default,
                password,
            } => {
                let message = if description.is_empty() {
                    format!("Please input {}", id)
                } else {
                    description.clone()
                };
                self.provider
                    .prompt(&PromptRequest {
                        id: id.clone(),
                        message,
                        default: default.clone(),
                        password: *password,
                    })
                    .await
            }
            InputDefinition::PickString {
                id,
                description,
                options,
                default,
            } => {
                let message = if description.is_empty() {
                    format!("Please pick {}", id)
                } else {
                    description.clone()
                };
                let default_index = default
                    .as_ref()
                    .and_then(|d| options.iter().position(|o| o == d));
                let picked = self
                    .provider
                    .pick(&PickRequest {
                        id: id.clone(),
                        message,
                        options: options.clone(),
                        default_index,
                    })
                    .await?;
                if picked.is_empty() {
                    Ok(default.clone().unwrap_or_default())
                } else {
                    Ok(picked)
                }
            }
            InputDefinition::Command { id, command, .. } => {
                self.provider
                    .run_command(&CommandRequest {
                        id: id.clone(),
                        command: command.clone(),
                        timeout: self.command_timeout,
                    })
                    .await
            }
        }
    }

    pub fn get_definition(&self, id: &str) -> Option<InputDefinition> {
        self.defs().get(id).cloned()
    }

    /// Definitions ordered by id.
    pub fn definitions(&self) -> Vec<InputDefinition> {
        self.defs().values().cloned().collect()
    }

    /// Replace every definition and clear the cache.
    pub fn set_definitions(&self, definitions: Vec<InputDefinition>) {
        *self.defs_mut() = index(definitions);
        self.cache().clear();
    }

    /// Add or replace one definition. Its cached value is dropped.
    pub fn upsert_definition(&self, definition: InputDefinition) {
        let id = definition.id().to_string();
        self.defs_mut().insert(id.clone(), definition);
        self.cache().remove(&id);
    }

    /// Remove one definition and its cached value.
    pub fn remove_definition(&self, id: &str) -> bool {
        self.cache().remove(id);
        self.defs_mut().remove(id).is_some()
    }

    pub fn get_value(&self, id: &str) -> Option<Value> {
        self.cache().get(id).cloned()
    }

    /// Set a cached value. Only defined ids are accepted.
    pub fn set_value(&self, id: &str, value: Value) -> bool {
        if !self.defs().contains_key(id) {
            return false;
        }
        self.cache().insert(id.to_string(), value);
        true
    }

    pub fn remove_value(&self, id: &str) -> bool {
        self.cache().remove(id).is_some()
    }

    /// Cached values ordered by id.
    pub fn values(&self) -> BTreeMap<String, Value> {
        self.cache()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Clear one cached value, or all of them.
    pub fn clear_values(&self, id: Option<&str>) {
        match id {
            Some(id) => {
                self.cache().remove(id);
            }
            None => self.cache().clear(),
        }
    }
}

fn index(definitions: Vec<InputDefinition>) -> BTreeMap<String, InputDefinition> {
    definitions
        .into_iter()
        .map(|d| (d.id().to_string(), d))
        .collect()
}
