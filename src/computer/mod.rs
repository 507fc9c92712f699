// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The Computer: policy and protocol-facing facade over the [`Manager`].
//!
//! ```text
//!   session ──► Computer ──► ConfigRenderer ──► InputResolver
//!                  │
//!                  ├──► Manager ──► Connection ──► transport
//!                  │
//!                  └──► ToolHistory / desktop organizer
//! ```
//!
//! The Manager owns connections and raw aggregation; the Computer adds tool
//! policy (forbidden tools, result mapping), input rendering of server
//! configs, desktop composition and the event stream the session forwards to
//! the hub.

pub mod desktop;
pub mod history;
pub mod mapper;
pub mod session;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ComputerConfig;
use crate::inputs::{ConfigRenderer, InputDefinition, InputResolver};
use crate::mcp::{
    ConnectionOptions, ConnectionState, Manager, ManagerEvent, McpError, ResourceContents,
    ResourceTemplate, ServerConfig, ToolConflict, ToolResult, TransportFactory, A2C_TOOL_META,
};
use crate::protocol::{error_kind_name, DesktopWindow, GetMcpConfigRet, ResourceListRet, SmcpTool};

pub use history::{ToolCallRecord, ToolHistory, HISTORY_CAPACITY};
pub use session::{ComputerSession, SessionOptions};

/// Bound on resource reads issued by the Computer itself.
pub const RESOURCE_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Something the hub should hear about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputerEvent {
    /// The server configuration converged after a change.
    ConfigChanged,
    /// The aggregate tool list may have changed.
    ToolsChanged,
    ResourceListChanged { server: String },
    ResourceUpdated { server: String, uri: String },
}

/// Outcome of applying a set of server configs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyReport {
    /// Servers now configured, with their state.
    pub applied: BTreeMap<String, ConnectionState>,
    /// Servers whose config was rejected, with the reason.
    pub failed: BTreeMap<String, String>,
    /// Servers removed because they were absent from the new set.
    pub removed: Vec<String>,
    /// Placeholder rendering warnings.
    pub warnings: Vec<String>,
}

pub struct Computer {
    name: String,
    manager: Arc<Manager>,
    resolver: Arc<InputResolver>,
    renderer: ConfigRenderer,
    raw_configs: RwLock<BTreeMap<String, Value>>,
    history: ToolHistory,
    in_flight: Mutex<HashMap<String, oneshot::Sender<()>>>,
    events: broadcast::Sender<ComputerEvent>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    /// Serializes whole-config reloads.
    reload: tokio::sync::Mutex<()>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn error_result(err: &McpError) -> ToolResult {
    ToolResult::error_with_kind(err.to_string(), error_kind_name(err.kind()))
}

impl Computer {
    pub fn new(
        name: impl Into<String>,
        factory: Arc<dyn TransportFactory>,
        resolver: Arc<InputResolver>,
        options: ConnectionOptions,
    ) -> Arc<Self> {
        let manager = Manager::new(factory, options);
        let (events, _) = broadcast::channel(256);

        let computer = Arc::new(Self {
            name: name.into(),
            manager: Arc::clone(&manager),
            resolver,
            renderer: ConfigRenderer::default(),
            raw_configs: RwLock::new(BTreeMap::new()),
            history: ToolHistory::default(),
            in_flight: Mutex::new(HashMap::new()),
            events: events.clone(),
            forwarder: Mutex::new(None),
            reload: tokio::sync::Mutex::new(()),
        });

        let handle = tokio::spawn(forward_events(manager.subscribe_events(), events));
        *lock(&computer.forwarder) = Some(handle);
        computer
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ComputerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ComputerEvent) {
        let _ = self.events.send(event);
    }

    fn raw_configs(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.raw_configs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn raw_configs_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Value>> {
        self.raw_configs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Apply a whole configuration file: inputs first, then servers.
    pub async fn boot(&self, config: ComputerConfig) -> ApplyReport {
        self.resolver.set_definitions(config.inputs);
        self.update_servers(config.servers).await
    }

    /// Render and apply one server config without starting a new input
    /// session.
    pub async fn apply_server_config(&self, raw: Value) -> Result<ConnectionState, McpError> {
        let mut warnings = Vec::new();
        let result = self.apply_one(&raw, &mut warnings).await;
        self.emit(ComputerEvent::ConfigChanged);
        result
    }

    async fn apply_one(
        &self,
        raw: &Value,
        warnings: &mut Vec<String>,
    ) -> Result<ConnectionState, McpError> {
        let name = ComputerConfig::server_name(raw)
            .ok_or_else(|| McpError::Configuration("server config has no name".to_string()))?
            .to_string();

        let rendered = self.renderer.render(raw, &self.resolver).await;
        for warning in &rendered.warnings {
            warn!(server = %name, warning = %warning, "Input placeholder left unresolved");
        }
        warnings.extend(rendered.warnings);

        let config: ServerConfig = serde_json::from_value(rendered.value).map_err(|e| {
            McpError::Configuration(format!("server '{}': {}", name, e))
        })?;
        let state = self.manager.add_or_update(config).await?;
        self.raw_configs_mut().insert(name, raw.clone());
        Ok(state)
    }

    /// Replace the server set.
    ///
    /// Starts a new input session, applies every config, then removes
    /// servers absent from `servers`. A config-changed event is emitted once
    /// the set has converged, whatever the individual outcomes.
    pub async fn update_servers(&self, servers: Vec<Value>) -> ApplyReport {
        let _reload = self.reload.lock().await;
        self.resolver.begin_session();

        let mut report = ApplyReport::default();
        let mut wanted = Vec::new();
        for raw in &servers {
            let name = ComputerConfig::server_name(raw).unwrap_or_default().to_string();
            wanted.push(name.clone());
            match self.apply_one(raw, &mut report.warnings).await {
                Ok(state) => {
                    report.applied.insert(name, state);
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Server config rejected");
                    report.failed.insert(name, e.to_string());
                }
            }
        }

        let existing: Vec<String> = self.manager.configs().into_iter().map(|c| c.name).collect();
        for name in existing {
            if wanted.contains(&name) {
                continue;
            }
            if let Err(e) = self.remove_quietly(&name).await {
                warn!(server = %name, error = %e, "Failed to remove server");
                continue;
            }
            report.removed.push(name);
        }

        info!(
            computer = %self.name,
            applied = report.applied.len(),
            failed = report.failed.len(),
            removed = report.removed.len(),
            "Server configuration applied"
        );
        self.emit(ComputerEvent::ConfigChanged);
        report
    }

    async fn remove_quietly(&self, name: &str) -> Result<(), McpError> {
        self.manager.remove(name).await?;
        self.raw_configs_mut().remove(name);
        Ok(())
    }

    /// Remove one server. Removing an unknown server succeeds.
    pub async fn remove_server(&self, name: &str) -> Result<(), McpError> {
        self.remove_quietly(name).await?;
        self.emit(ComputerEvent::ConfigChanged);
        Ok(())
    }

    /// Active server configs as written (placeholders unrendered) and inputs.
    pub fn get_mcp_config(&self) -> GetMcpConfigRet {
        GetMcpConfigRet {
            servers: self.raw_configs().clone(),
            inputs: self.resolver.definitions(),
        }
    }

    pub fn server_states(&self) -> BTreeMap<String, ConnectionState> {
        self.manager.server_states()
    }

    pub fn conflicts(&self) -> Vec<ToolConflict> {
        self.manager.conflicts()
    }

    // ------------------------------------------------------------------
    // Inputs
    // ------------------------------------------------------------------

    /// Replace every input definition. Cached values are dropped.
    pub fn update_inputs(&self, inputs: Vec<InputDefinition>) {
        self.resolver.set_definitions(inputs);
    }

    pub fn add_or_update_input(&self, input: InputDefinition) {
        self.resolver.upsert_definition(input);
    }

    pub fn remove_input(&self, id: &str) -> bool {
        self.resolver.remove_definition(id)
    }

    pub fn get_input(&self, id: &str) -> Option<InputDefinition> {
        self.resolver.get_definition(id)
    }

    pub fn list_inputs(&self) -> Vec<InputDefinition> {
        self.resolver.definitions()
    }

    pub fn get_input_value(&self, id: &str) -> Option<Value> {
        self.resolver.get_value(id)
    }

    /// Seed the cache for a defined input. Returns false for unknown ids.
    pub fn set_input_value(&self, id: &str, value: Value) -> bool {
        self.resolver.set_value(id, value)
    }

    pub fn remove_input_value(&self, id: &str) -> bool {
        self.resolver.remove_value(id)
    }

    pub fn list_input_values(&self) -> BTreeMap<String, Value> {
        self.resolver.values()
    }

    pub fn clear_input_values(&self, id: Option<&str>) {
        self.resolver.clear_values(id)
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Tools as exposed to Agents.
    pub fn list_tools(&self) -> Vec<SmcpTool> {
        self.manager
            .list_tools()
            .into_iter()
            .map(|tool| {
                let mut meta = Map::new();
                let mut tool_meta = tool
                    .tool_meta
                    .clone()
                    .unwrap_or_else(|| Value::Object(Map::new()));
                if let Value::Object(fields) = &mut tool_meta {
                    fields.insert("auto_apply".to_string(), Value::Bool(tool.auto_apply));
                }
                meta.insert(A2C_TOOL_META.to_string(), tool_meta);
                if let Some(annotations) = &tool.annotations {
                    meta.insert("annotations".to_string(), annotations.clone());
                }
                SmcpTool {
                    name: tool.display_name,
                    description: tool.description.unwrap_or_default(),
                    params_schema: tool.schema,
                    return_schema: tool.output_schema,
                    meta: Some(Value::Object(meta)),
                }
            })
            .collect()
    }

    /// Run a tool by display name.
    ///
    /// Never fails: every error comes back as an error-flagged result whose
    /// structured content names the error kind. `timeout` defaults to the
    /// owning server's `tool_timeout_secs`.
    pub async fn execute_tool(
        &self,
        req_id: &str,
        tool: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> ToolResult {
        let (connection, descriptor) = match self.manager.resolve_tool(tool) {
            Ok(found) => found,
            Err(e) => {
                debug!(req_id, tool, error = %e, "Tool not routable");
                return error_result(&e);
            }
        };
        let server = descriptor.owner_server.clone();

        if descriptor.forbidden {
            let err = McpError::Policy(tool.to_string());
            warn!(req_id, tool, server = %server, "Forbidden tool call rejected");
            self.record(req_id, &server, tool, &params, timeout, Err(&err));
            return error_result(&err);
        }

        let timeout =
            timeout.unwrap_or_else(|| Duration::from_secs(connection.config().tool_timeout_secs));
        let (cancel_tx, cancel_rx) = oneshot::channel();
        if lock(&self.in_flight)
            .insert(req_id.to_string(), cancel_tx)
            .is_some()
        {
            warn!(req_id, "Duplicate request id; the earlier call can no longer be cancelled");
        }

        debug!(req_id, tool, server = %server, timeout_ms = timeout.as_millis() as u64, "Calling tool");
        let outcome = tokio::select! {
            result = connection.call_tool(&descriptor.name, params.clone(), timeout) => result,
            _ = cancel_rx => Err(McpError::Cancelled(req_id.to_string())),
        };
        lock(&self.in_flight).remove(req_id);

        let recorded = Some(timeout);
        match outcome {
            Ok(mut result) => {
                if let Some(mapper) = &descriptor.ret_object_mapper {
                    mapper::map_result(&mut result, mapper);
                }
                if let Some(tool_meta) = &descriptor.tool_meta {
                    result.insert_meta(A2C_TOOL_META, tool_meta.clone());
                }
                let error = result.is_error.then(|| result.as_text());
                self.record_raw(req_id, &server, tool, &params, recorded, !result.is_error, error);
                result
            }
            Err(e) => {
                self.record(req_id, &server, tool, &params, recorded, Err(&e));
                error_result(&e)
            }
        }
    }

    fn record(
        &self,
        req_id: &str,
        server: &str,
        tool: &str,
        params: &Value,
        timeout: Option<Duration>,
        outcome: Result<(), &McpError>,
    ) {
        let error = outcome.err().map(ToString::to_string);
        self.record_raw(req_id, server, tool, params, timeout, error.is_none(), error);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_raw(
        &self,
        req_id: &str,
        server: &str,
        tool: &str,
        params: &Value,
        timeout: Option<Duration>,
        success: bool,
        error: Option<String>,
    ) {
        self.history.push(ToolCallRecord {
            timestamp: Utc::now(),
            req_id: req_id.to_string(),
            server: server.to_string(),
            tool: tool.to_string(),
            parameters: params.clone(),
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
            success,
            error,
        });
    }

    /// Cancel an in-flight call. Returns false if it is not running.
    pub fn cancel(&self, req_id: &str) -> bool {
        match lock(&self.in_flight).remove(req_id) {
            Some(tx) => {
                info!(req_id, "Cancelling tool call");
                tx.send(()).is_ok()
            }
            None => {
                debug!(req_id, "Cancel for a call that is not running");
                false
            }
        }
    }

    pub fn tool_history(&self) -> Vec<ToolCallRecord> {
        self.history.snapshot()
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ResourceListRet, McpError> {
        let page = self.manager.list_resources(cursor).await?;
        Ok(ResourceListRet {
            resources: page.resources,
            next_cursor: page.next_cursor,
        })
    }

    pub async fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.manager.list_resource_templates().await
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Vec<ResourceContents>, McpError> {
        self.manager.read_resource(uri, RESOURCE_READ_TIMEOUT).await
    }

    pub async fn subscribe(&self, uri: &str) -> Result<String, McpError> {
        self.manager.subscribe(uri).await
    }

    pub async fn unsubscribe(&self, uri: &str) -> Result<String, McpError> {
        self.manager.unsubscribe(uri).await
    }

    /// Compose the desktop: window resources ordered for layout, each with
    /// its text contents. An explicit `window` returns just that window.
    pub async fn get_desktop(
        &self,
        size: Option<usize>,
        window: Option<&str>,
    ) -> Result<Vec<DesktopWindow>, McpError> {
        let mut windows = self.manager.list_windows();
        if let Some(uri) = window {
            windows.retain(|w| w.resource.uri == uri);
            if windows.is_empty() {
                return Err(McpError::ResourceNotFound(uri.to_string()));
            }
        }

        let recent = self.history.recent_servers();
        let mut desktop = Vec::new();
        for entry in desktop::organize(windows, &recent, size) {
            let contents = match self.read_resource(&entry.resource.uri).await {
                Ok(contents) => contents,
                Err(e) => {
                    warn!(uri = %entry.resource.uri, error = %e, "Skipping unreadable window");
                    continue;
                }
            };
            let text = contents
                .iter()
                .filter_map(|c| c.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n");
            desktop.push(DesktopWindow {
                uri: entry.resource.uri,
                server: entry.server,
                fullscreen: entry.fullscreen,
                text,
            });
        }
        Ok(desktop)
    }

    /// Cancel running calls and stop every connection.
    pub async fn shutdown(&self) {
        let pending: Vec<_> = lock(&self.in_flight).drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(());
        }
        self.manager.shutdown().await;
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
    }
}

impl Drop for Computer {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.forwarder).take() {
            handle.abort();
        }
    }
}

async fn forward_events(
    mut source: broadcast::Receiver<ManagerEvent>,
    sink: broadcast::Sender<ComputerEvent>,
) {
    loop {
        let event = match source.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Manager events lagged; refreshing tools");
                let _ = sink.send(ComputerEvent::ToolsChanged);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let mapped = match event {
            ManagerEvent::ToolsChanged => ComputerEvent::ToolsChanged,
            ManagerEvent::ResourceListChanged { server } => {
                ComputerEvent::ResourceListChanged { server }
            }
            ManagerEvent::ResourceUpdated { server, uri } => {
                ComputerEvent::ResourceUpdated { server, uri }
            }
            ManagerEvent::ConnectionChanged { server, state } => {
                debug!(server = %server, state = %state, "Connection changed");
                continue;
            }
        };
        let _ = sink.send(mapped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{MockInputProvider, StaticProvider};
    use crate::mcp::testing::{ScriptedFactory, ScriptedServer};
    use crate::mcp::{BackoffConfig, WindowUri};
    use serde_json::json;

    fn options() -> ConnectionOptions {
        ConnectionOptions {
            auto_reconnect: false,
            backoff: BackoffConfig {
                initial_delay_ms: 10,
                max_delay_ms: 20,
                multiplier: 2.0,
            },
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(1),
            close_timeout: Duration::from_secs(1),
        }
    }

    fn computer(servers: &[&ScriptedServer]) -> Arc<Computer> {
        let factory = ScriptedFactory::new();
        for server in servers {
            factory.insert(server.name(), (*server).clone());
        }
        let resolver = Arc::new(InputResolver::new(vec![], Arc::new(StaticProvider::new())));
        Computer::new("comp-1", Arc::new(factory), resolver, options())
    }

    fn raw(name: &str) -> Value {
        json!({"name": name, "transport": {"type": "stdio", "command": "unused"}})
    }

    fn calc() -> ScriptedServer {
        ScriptedServer::new("calc").with_tool("add", |args| {
            let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
            ToolResult::text(sum.to_string())
        })
    }

    #[tokio::test]
    async fn test_execute_tool() {
        let calc = calc();
        let computer = computer(&[&calc]);
        let report = computer.update_servers(vec![raw("calc")]).await;
        assert_eq!(report.applied["calc"], ConnectionState::Connected);

        let result = computer
            .execute_tool("r1", "add", json!({"a": 1, "b": 2}), None)
            .await;
        assert!(!result.is_error);
        assert_eq!(result.as_text(), "3");

        let history = computer.tool_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].server, "calc");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result() {
        let computer = computer(&[]);
        let result = computer.execute_tool("r1", "nope", json!({}), None).await;
        assert!(result.is_error);
        assert_eq!(
            result.structured_content.unwrap()["error_type"],
            json!("not_found")
        );
    }

    #[tokio::test]
    async fn test_forbidden_tool_not_dispatched() {
        let calc = ScriptedServer::new("calc").with_slow_tool("add", Duration::from_secs(5));
        let computer = computer(&[&calc]);
        let mut config = raw("calc");
        config["forbidden_tools"] = json!(["add"]);
        computer.update_servers(vec![config]).await;

        let result = computer.execute_tool("r1", "add", json!({}), None).await;
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["error_type"], json!("policy"));
        assert!(calc.cancelled_calls().is_empty());
        assert!(!computer.tool_history()[0].success);
    }

    #[tokio::test]
    async fn test_result_mapper_applied() {
        let server = ScriptedServer::new("weather").with_tool("forecast", |_| {
            ToolResult::text(r#"{"data": {"temp": 21, "city": "Oslo"}}"#)
        });
        let computer = computer(&[&server]);
        let mut config = raw("weather");
        config["tool_meta"] = json!({
            "forecast": {"auto_apply": true, "ret_object_mapper": {"t": "data.temp", "src": 1}}
        });
        computer.update_servers(vec![config]).await;

        let result = computer.execute_tool("r1", "forecast", json!({}), None).await;
        assert_eq!(result.structured_content, Some(json!({"t": 21, "src": 1})));
        assert!(result.as_text().contains("Oslo"));

        let tools = computer.list_tools();
        let meta = &tools[0].meta.as_ref().unwrap()[A2C_TOOL_META];
        assert_eq!(meta["auto_apply"], json!(true));
    }

    #[tokio::test]
    async fn test_cancel_unblocks_caller() {
        let slow = ScriptedServer::new("slow").with_slow_tool("wait", Duration::from_secs(30));
        let computer = computer(&[&slow]);
        computer.update_servers(vec![raw("slow")]).await;

        let runner = Arc::clone(&computer);
        let call = tokio::spawn(async move {
            runner.execute_tool("r9", "wait", json!({}), None).await
        });
        for _ in 0..100 {
            if lock(&computer.in_flight).contains_key("r9") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(computer.cancel("r9"));
        let result = call.await.unwrap();
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["error_type"], json!("cancelled"));

        assert!(!computer.cancel("r9"));
    }

    #[tokio::test]
    async fn test_timeout_returns_error_result() {
        let slow = ScriptedServer::new("slow").with_slow_tool("wait", Duration::from_secs(30));
        let computer = computer(&[&slow]);
        computer.update_servers(vec![raw("slow")]).await;

        let started = std::time::Instant::now();
        let result = computer
            .execute_tool("r1", "wait", json!({}), Some(Duration::from_millis(100)))
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.is_error);
        assert_eq!(result.structured_content.unwrap()["error_type"], json!("timeout"));
    }

    #[tokio::test]
    async fn test_update_servers_removes_absent_and_emits() {
        let calc = calc();
        let other = ScriptedServer::new("other").with_tool("echo", |_| ToolResult::text("hi"));
        let computer = computer(&[&calc, &other]);
        let mut events = computer.subscribe_events();

        computer.update_servers(vec![raw("calc"), raw("other")]).await;
        let report = computer.update_servers(vec![raw("calc")]).await;
        assert_eq!(report.removed, vec!["other"]);
        assert_eq!(
            computer.server_states().keys().cloned().collect::<Vec<_>>(),
            vec!["calc"]
        );
        assert!(computer.get_mcp_config().servers.contains_key("calc"));
        assert!(!computer.get_mcp_config().servers.contains_key("other"));

        let mut saw_config_changed = false;
        while let Ok(event) = events.try_recv() {
            saw_config_changed |= event == ComputerEvent::ConfigChanged;
        }
        assert!(saw_config_changed);
    }

    #[tokio::test]
    async fn test_rejected_config_reported_and_still_emits() {
        let computer = computer(&[]);
        let mut events = computer.subscribe_events();
        let report = computer
            .update_servers(vec![json!({"name": "bad", "transport": {"type": "stdio", "command": ""}})])
            .await;
        assert!(report.failed.contains_key("bad"));
        assert_eq!(events.recv().await.unwrap(), ComputerEvent::ConfigChanged);
    }

    #[tokio::test]
    async fn test_inputs_resolved_once_per_session() {
        let mut provider = MockInputProvider::new();
        provider
            .expect_prompt()
            .times(2)
            .returning(|_| Ok("calc".to_string()));
        let factory = ScriptedFactory::new().with_server(calc());
        let resolver = Arc::new(InputResolver::new(
            vec![InputDefinition::prompt("cmd", "command to run")],
            Arc::new(provider),
        ));
        let computer = Computer::new("comp-1", Arc::new(factory), resolver, options());

        let servers = vec![json!({
            "name": "calc",
            "transport": {"type": "stdio", "command": "${input:cmd}", "args": ["${input:cmd}"]}
        })];
        let report = computer.update_servers(servers.clone()).await;
        assert!(report.warnings.is_empty());
        assert_eq!(computer.get_input_value("cmd"), Some(json!("calc")));
        assert_eq!(
            computer.get_mcp_config().servers["calc"]["transport"]["command"],
            json!("${input:cmd}")
        );

        // A new reload starts a new session and prompts again.
        computer.update_servers(servers).await;
    }

    #[tokio::test]
    async fn test_input_value_crud() {
        let computer = computer(&[]);
        computer.update_inputs(vec![InputDefinition::prompt("region", "Region")]);
        assert!(computer.set_input_value("region", json!("eu")));
        assert!(!computer.set_input_value("missing", json!("x")));
        assert_eq!(computer.list_input_values().len(), 1);
        computer.clear_input_values(None);
        assert!(computer.get_input_value("region").is_none());
        assert!(computer.remove_input("region"));
        assert!(computer.list_inputs().is_empty());
    }

    #[tokio::test]
    async fn test_desktop_reads_windows() {
        let uri = WindowUri::build("ui", vec!["main".to_string()], Some(80), None).to_string();
        let ui = ScriptedServer::new("ui").with_resource(&uri, "main", "hello desktop");
        let computer = computer(&[&ui]);
        computer.update_servers(vec![raw("ui")]).await;

        let desktop = computer.get_desktop(None, None).await.unwrap();
        assert_eq!(desktop.len(), 1);
        assert_eq!(desktop[0].text, "hello desktop");
        assert_eq!(desktop[0].server, "ui");

        let err = computer
            .get_desktop(None, Some("window://ui/missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound(_)));
    }
}
