// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-server connection lifecycle.
//!
//! A [`Connection`] owns one [`ServerConfig`] and at most one live
//! [`McpClient`]. Its lifecycle is an explicit transition table:
//!
//! | trigger       | from                          | to             |
//! |---------------|-------------------------------|----------------|
//! | `Connect`     | Disconnected, Error           | Connecting     |
//! | `Established` | Connecting, Reconnecting      | Connected      |
//! | `Fail`        | Connecting, Reconnecting      | Error          |
//! | `Retry`       | Error                         | Reconnecting   |
//! | `HealthLost`  | Connected                     | Reconnecting   |
//! | `Disconnect`  | any but Stopped               | Disconnected   |
//! | `Stop`        | any but Stopped               | Stopped        |
//!
//! Once connected, a supervisor task watches transport events and sends a
//! `ping` heartbeat. When either reports the server gone, the connection
//! moves to `Reconnecting`, keeps its last tool and resource lists marked
//! stale, and retries with capped exponential backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::client::McpClient;
use super::config::ServerConfig;
use super::error::McpError;
use super::transport::{TransportEvent, TransportFactory};
use super::types::{
    ConnectionState, ResourceContents, ResourceEntry, ResourcePage, ResourceTemplate, ServerInfo,
    ToolInfo, ToolResult,
};

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

/// Inputs to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Connect,
    Established,
    Fail,
    Retry,
    HealthLost,
    Disconnect,
    Stop,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connect => "connect",
            Self::Established => "established",
            Self::Fail => "fail",
            Self::Retry => "retry",
            Self::HealthLost => "health_lost",
            Self::Disconnect => "disconnect",
            Self::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Compute the state `trigger` leads to from `from`.
pub fn transition(from: ConnectionState, trigger: Trigger) -> Result<ConnectionState, McpError> {
    use ConnectionState::*;

    let to = match (from, trigger) {
        (Stopped, _) => None,
        (Disconnected | Error, Trigger::Connect) => Some(Connecting),
        (Connecting | Reconnecting, Trigger::Established) => Some(Connected),
        (Connecting | Reconnecting, Trigger::Fail) => Some(Error),
        (Error, Trigger::Retry) => Some(Reconnecting),
        (Connected, Trigger::HealthLost) => Some(Reconnecting),
        (_, Trigger::Disconnect) => Some(Disconnected),
        (_, Trigger::Stop) => Some(Stopped),
        _ => None,
    };

    to.ok_or_else(|| McpError::InvalidTransition {
        from,
        trigger: trigger.to_string(),
    })
}

/// Reconnect backoff: `initial * multiplier^attempt`, capped at `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.multiplier.powi(attempt.min(64) as i32);
        let ms = if raw.is_finite() {
            (raw as u64).min(self.max_delay_ms)
        } else {
            self.max_delay_ms
        };
        Duration::from_millis(ms)
    }
}

/// Knobs for connection supervision.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Retry failed connects and lost connections.
    pub auto_reconnect: bool,
    pub backoff: BackoffConfig,
    /// Time between heartbeats.
    pub heartbeat_interval: Duration,
    /// How long a heartbeat may take.
    pub heartbeat_timeout: Duration,
    /// Upper bound on a graceful transport shutdown.
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            auto_reconnect: true,
            backoff: BackoffConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time view of a connection, replaced wholesale on every change.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceEntry>,
    /// Metadata is from before the current outage.
    pub stale: bool,
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    /// Whether listings from this connection should be served.
    ///
    /// During an outage the last-known metadata stays listed, including
    /// after failed reconnect attempts leave the connection in `Error`.
    pub fn is_listable(&self) -> bool {
        match self.state {
            ConnectionState::Connected => true,
            ConnectionState::Reconnecting | ConnectionState::Error => self.stale,
            _ => false,
        }
    }

    /// Whether the server declared resource support.
    pub fn supports_resources(&self) -> bool {
        self.server_info
            .as_ref()
            .map(|i| i.capabilities.resources)
            .unwrap_or(false)
    }

    /// Whether the server declared resource subscriptions.
    pub fn supports_subscribe(&self) -> bool {
        self.server_info
            .as_ref()
            .map(|i| i.capabilities.resources_subscribe)
            .unwrap_or(false)
    }
}

/// What happened on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The connection entered or left `Connected`, or started or stopped
    /// being listable.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Tool list was re-read.
    ToolsChanged,
    /// Resource list was re-read.
    ResourceListChanged,
    /// One resource changed.
    ResourceUpdated { uri: String },
}

/// Event emitted to the owner of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub server: String,
    /// Identifies the emitting [`Connection`] instance; a replaced connection
    /// keeps emitting under its old instance id until it is stopped.
    pub instance: u64,
    pub kind: ConnectionEventKind,
}

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// A supervised connection to one MCP server.
pub struct Connection {
    inner: Arc<Inner>,
}

struct Inner {
    instance: u64,
    config: ServerConfig,
    factory: Arc<dyn TransportFactory>,
    options: ConnectionOptions,
    state: Mutex<ConnectionState>,
    snapshot: RwLock<Arc<ConnectionSnapshot>>,
    client: tokio::sync::RwLock<Option<Arc<McpClient>>>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl Connection {
    /// Create a disconnected connection.
    pub fn new(
        config: ServerConfig,
        factory: Arc<dyn TransportFactory>,
        options: ConnectionOptions,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
                config,
                factory,
                options,
                state: Mutex::new(ConnectionState::Disconnected),
                snapshot: RwLock::new(Arc::new(ConnectionSnapshot::default())),
                client: tokio::sync::RwLock::new(None),
                events,
                supervisor: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Instance id carried by this connection's events.
    pub fn instance(&self) -> u64 {
        self.inner.instance
    }

    /// Configuration this connection was built from.
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.inner.state)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        self.inner.snapshot()
    }

    /// Spawn/connect the transport and load metadata.
    ///
    /// On failure the connection is left in `Error`; with auto-reconnect it
    /// keeps retrying in the background.
    pub async fn connect(&self) -> Result<(), McpError> {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.fire(Trigger::Connect)?;

        match self.inner.attempt().await {
            Ok(events) => {
                self.inner.fire(Trigger::Established)?;
                self.spawn_supervisor(Some(events));
                Ok(())
            }
            Err(e) => {
                self.inner.record_error(&e);
                self.inner.fire(Trigger::Fail)?;
                if self.inner.options.auto_reconnect {
                    self.spawn_supervisor(None);
                }
                Err(e)
            }
        }
    }

    /// Close the transport and settle in `Disconnected`.
    pub async fn disconnect(&self) -> Result<(), McpError> {
        self.shutdown(Trigger::Disconnect).await
    }

    /// Close the transport and settle in the terminal `Stopped` state.
    pub async fn stop(&self) -> Result<(), McpError> {
        self.shutdown(Trigger::Stop).await
    }

    async fn shutdown(&self, trigger: Trigger) -> Result<(), McpError> {
        let _guard = self.inner.lifecycle.lock().await;
        transition(self.state(), trigger)?;

        if let Some(handle) = lock(&self.inner.supervisor).take() {
            handle.abort();
        }
        self.inner.close_client().await;
        self.inner.fire(trigger)?;
        debug!(server = %self.name(), %trigger, "Connection shut down");
        Ok(())
    }

    fn spawn_supervisor(&self, events: Option<mpsc::UnboundedReceiver<TransportEvent>>) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(supervise(inner, events));
        if let Some(old) = lock(&self.inner.supervisor).replace(handle) {
            old.abort();
        }
    }

    async fn client(&self) -> Result<Arc<McpClient>, McpError> {
        self.inner
            .client
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::NotReady(self.name().to_string()))
    }

    /// Call a tool by its server-declared name.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError> {
        self.client().await?.call_tool(tool, arguments, timeout).await
    }

    /// Fetch one page of resources from the server.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ResourcePage, McpError> {
        self.client().await?.list_resources(cursor).await
    }

    /// List resource templates.
    pub async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>, McpError> {
        self.client().await?.list_resource_templates().await
    }

    /// Read a resource.
    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError> {
        self.client().await?.read_resource(uri, timeout).await
    }

    /// Subscribe to a resource.
    pub async fn subscribe(&self, uri: &str) -> Result<(), McpError> {
        if !self.snapshot().supports_subscribe() {
            return Err(McpError::capability(self.name(), "resource subscriptions"));
        }
        self.client().await?.subscribe(uri).await
    }

    /// Unsubscribe from a resource.
    pub async fn unsubscribe(&self, uri: &str) -> Result<(), McpError> {
        if !self.snapshot().supports_subscribe() {
            return Err(McpError::capability(self.name(), "resource subscriptions"));
        }
        self.client().await?.unsubscribe(uri).await
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.inner.supervisor).take() {
            handle.abort();
        }
    }
}

impl Inner {
    fn snapshot(&self) -> Arc<ConnectionSnapshot> {
        Arc::clone(
            &self
                .snapshot
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    fn publish(&self, update: impl FnOnce(&mut ConnectionSnapshot)) {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = ConnectionSnapshot::clone(&slot);
        update(&mut next);
        *slot = Arc::new(next);
    }

    fn emit(&self, kind: ConnectionEventKind) {
        let _ = self.events.send(ConnectionEvent {
            server: self.config.name.clone(),
            instance: self.instance,
            kind,
        });
    }

    fn fire(&self, trigger: Trigger) -> Result<ConnectionState, McpError> {
        let (from, to) = {
            let mut state = lock(&self.state);
            let from = *state;
            let to = transition(from, trigger)?;
            *state = to;
            (from, to)
        };

        let was_listable = self.snapshot().is_listable();
        self.publish(|s| {
            s.state = to;
            match trigger {
                Trigger::HealthLost => s.stale = true,
                Trigger::Established => {
                    s.stale = false;
                    s.last_error = None;
                }
                Trigger::Disconnect | Trigger::Stop => s.stale = false,
                _ => {}
            }
        });

        let listable = self.snapshot().is_listable();

        debug!(server = %self.config.name, %from, %to, %trigger, "Connection state changed");
        let touches_connected =
            from == ConnectionState::Connected || to == ConnectionState::Connected;
        if from != to && (touches_connected || was_listable != listable) {
            self.emit(ConnectionEventKind::StateChanged { from, to });
        }
        Ok(to)
    }

    fn record_error(&self, error: &McpError) {
        let message = error.to_string();
        self.publish(|s| s.last_error = Some(message));
    }

    /// One connect attempt: open, initialize, load metadata.
    async fn attempt(&self) -> Result<mpsc::UnboundedReceiver<TransportEvent>, McpError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Arc::new(McpClient::connect(&self.config, self.factory.as_ref(), tx).await?);

        let loaded = async {
            let tools = client.list_tools().await?;
            let resources = load_all_resources(&client).await?;
            Ok::<_, McpError>((tools, resources))
        }
        .await;

        let (tools, resources) = match loaded {
            Ok(found) => found,
            Err(e) => {
                let _ = client.close().await;
                return Err(e);
            }
        };

        let info = client.server_info().clone();
        self.publish(|s| {
            s.server_info = Some(info);
            s.tools = tools;
            s.resources = resources;
        });
        *self.client.write().await = Some(client);
        Ok(rx)
    }

    async fn close_client(&self) {
        let client = self.client.write().await.take();
        if let Some(client) = client {
            match tokio::time::timeout(self.options.close_timeout, client.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(server = %self.config.name, error = %e, "Close failed"),
                Err(_) => warn!(server = %self.config.name, "Transport close timed out"),
            }
        }
    }

    async fn current_client(&self) -> Option<Arc<McpClient>> {
        self.client.read().await.clone()
    }

    async fn refresh_tools(&self) -> Result<(), McpError> {
        let client = self
            .current_client()
            .await
            .ok_or_else(|| McpError::NotReady(self.config.name.clone()))?;
        let tools = client.list_tools().await?;
        self.publish(|s| s.tools = tools);
        Ok(())
    }

    async fn refresh_resources(&self) -> Result<(), McpError> {
        let client = self
            .current_client()
            .await
            .ok_or_else(|| McpError::NotReady(self.config.name.clone()))?;
        let resources = load_all_resources(&client).await?;
        self.publish(|s| s.resources = resources);
        Ok(())
    }

    /// Serve transport events and heartbeats until the server is lost.
    async fn watch(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) -> String {
        let mut heartbeat = tokio::time::interval(self.options.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    None | Some(TransportEvent::Closed) => return "transport closed".to_string(),
                    Some(TransportEvent::ToolListChanged) => {
                        match self.refresh_tools().await {
                            Ok(()) => self.emit(ConnectionEventKind::ToolsChanged),
                            Err(e) => warn!(server = %self.config.name, error = %e, "Tool refresh failed"),
                        }
                    }
                    Some(TransportEvent::ResourceListChanged) => {
                        if let Err(e) = self.refresh_resources().await {
                            warn!(server = %self.config.name, error = %e, "Resource refresh failed");
                        }
                        self.emit(ConnectionEventKind::ResourceListChanged);
                    }
                    Some(TransportEvent::ResourceUpdated { uri }) => {
                        self.emit(ConnectionEventKind::ResourceUpdated { uri });
                    }
                },
                _ = heartbeat.tick() => {
                    let Some(client) = self.current_client().await else {
                        return "client missing".to_string();
                    };
                    if client.is_closed() {
                        return "transport closed".to_string();
                    }
                    if let Err(e) = client.ping(self.options.heartbeat_timeout).await {
                        return format!("heartbeat failed: {}", e);
                    }
                }
            }
        }
    }
}

async fn load_all_resources(client: &McpClient) -> Result<Vec<ResourceEntry>, McpError> {
    if !client.supports_resources() {
        return Ok(Vec::new());
    }
    let mut resources = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..1000 {
        let page = client.list_resources(cursor.as_deref()).await?;
        resources.extend(page.resources);
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => return Ok(resources),
        }
    }
    Err(McpError::InvalidResponse(format!(
        "resources/list from '{}' did not terminate",
        client.name()
    )))
}

/// Keeps a connection alive: watches it while connected and reconnects
/// with backoff when it is lost or a connect failed.
async fn supervise(inner: Arc<Inner>, mut events: Option<mpsc::UnboundedReceiver<TransportEvent>>) {
    let mut attempt: u32 = 0;

    loop {
        match events.take() {
            Some(rx) => {
                attempt = 0;
                let reason = inner.watch(rx).await;
                if inner.fire(Trigger::HealthLost).is_err() {
                    return;
                }
                warn!(server = %inner.config.name, reason = %reason, "Connection lost, reconnecting");
                inner.close_client().await;
            }
            None => {
                if !inner.options.auto_reconnect {
                    return;
                }
                let delay = inner.options.backoff.delay(attempt);
                attempt = attempt.saturating_add(1);
                debug!(
                    server = %inner.config.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling reconnect"
                );
                tokio::time::sleep(delay).await;
                if inner.fire(Trigger::Retry).is_err() {
                    return;
                }
            }
        }

        #[cfg(feature = "telemetry")]
        let start = std::time::Instant::now();

        let outcome = inner.attempt().await;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("mcp.connection.reconnect", start.elapsed());

        match outcome {
            Ok(rx) => {
                if inner.fire(Trigger::Established).is_err() {
                    inner.close_client().await;
                    return;
                }
                info!(server = %inner.config.name, "Reconnected");
                events = Some(rx);
            }
            Err(e) => {
                debug!(server = %inner.config.name, error = %e, "Reconnect failed");
                inner.record_error(&e);
                if inner.fire(Trigger::Fail).is_err() {
                    return;
                }
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::testing::{ScriptedFactory, ScriptedServer};
    use serde_json::json;
    use ConnectionState::*;

    fn fast_options() -> ConnectionOptions {
        ConnectionOptions {
            auto_reconnect: true,
            backoff: BackoffConfig {
                initial_delay_ms: 10,
                max_delay_ms: 50,
                multiplier: 2.0,
            },
            heartbeat_interval: Duration::from_millis(50),
            heartbeat_timeout: Duration::from_millis(50),
            close_timeout: Duration::from_secs(1),
        }
    }

    fn setup(
        server: &ScriptedServer,
        options: ConnectionOptions,
    ) -> (Connection, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let factory = Arc::new(ScriptedFactory::new().with_server(server.clone()));
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ServerConfig::stdio(server.name(), "unused", vec![]);
        (Connection::new(config, factory, options, tx), rx)
    }

    async fn wait_for(conn: &Connection, state: ConnectionState) {
        for _ in 0..200 {
            if conn.state() == state {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection never reached {} (now {})", state, conn.state());
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(transition(Disconnected, Trigger::Connect).unwrap(), Connecting);
        assert_eq!(transition(Error, Trigger::Connect).unwrap(), Connecting);
        assert_eq!(transition(Connecting, Trigger::Established).unwrap(), Connected);
        assert_eq!(transition(Reconnecting, Trigger::Established).unwrap(), Connected);
        assert_eq!(transition(Connecting, Trigger::Fail).unwrap(), Error);
        assert_eq!(transition(Error, Trigger::Retry).unwrap(), Reconnecting);
        assert_eq!(transition(Connected, Trigger::HealthLost).unwrap(), Reconnecting);
        assert_eq!(transition(Reconnecting, Trigger::Disconnect).unwrap(), Disconnected);
        assert_eq!(transition(Connected, Trigger::Stop).unwrap(), Stopped);

        assert!(transition(Connected, Trigger::Connect).is_err());
        assert!(transition(Connecting, Trigger::Connect).is_err());
        assert!(transition(Disconnected, Trigger::HealthLost).is_err());
        for trigger in [Trigger::Connect, Trigger::Disconnect, Trigger::Stop, Trigger::Retry] {
            assert!(transition(Stopped, trigger).is_err(), "{} from stopped", trigger);
        }
    }

    #[test]
    fn test_backoff_caps() {
        let backoff = BackoffConfig::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(500));
        assert_eq!(backoff.delay(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay(3), Duration::from_millis(4000));
        assert_eq!(backoff.delay(10), Duration::from_millis(30_000));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_connect_loads_metadata_and_emits() {
        let server = ScriptedServer::new("calc")
            .with_tool("add", |_| ToolResult::text("3"))
            .with_resource("window://calc/main", "main", "ui");
        let (conn, mut events) = setup(&server, fast_options());

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), Connected);

        let snapshot = conn.snapshot();
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.resources.len(), 1);
        assert!(!snapshot.stale);

        let event = events.recv().await.unwrap();
        assert_eq!(
            event.kind,
            ConnectionEventKind::StateChanged {
                from: Connecting,
                to: Connected
            }
        );

        let result = conn
            .call_tool("add", json!({"a": 1, "b": 2}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.as_text(), "3");
        conn.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_retries_in_background() {
        let server = ScriptedServer::new("flaky").with_tool("t", |_| ToolResult::text("ok"));
        server.set_fail_connect(true);
        let (conn, _events) = setup(&server, fast_options());

        assert!(conn.connect().await.is_err());
        let state = conn.state();
        assert!(matches!(state, Error | Reconnecting), "state {}", state);
        assert!(conn.snapshot().last_error.is_some());

        server.set_fail_connect(false);
        wait_for(&conn, Connected).await;
        conn.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_connect_without_auto_reconnect_stays_error() {
        let server = ScriptedServer::new("down");
        server.set_fail_connect(true);
        let options = ConnectionOptions {
            auto_reconnect: false,
            ..fast_options()
        };
        let (conn, _events) = setup(&server, options);

        assert!(conn.connect().await.is_err());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(conn.state(), Error);
        assert_eq!(server.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_crash_keeps_stale_metadata_then_reconnects() {
        let server = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let (conn, mut events) = setup(&server, fast_options());
        conn.connect().await.unwrap();
        let _ = events.recv().await;

        server.set_fail_connect(true);
        server.crash();
        wait_for(&conn, Error).await;

        let snapshot = conn.snapshot();
        assert!(snapshot.stale);
        assert_eq!(snapshot.tools.len(), 1);

        let lost = events.recv().await.unwrap();
        assert_eq!(
            lost.kind,
            ConnectionEventKind::StateChanged {
                from: Connected,
                to: Reconnecting
            }
        );

        server.set_fail_connect(false);
        wait_for(&conn, Connected).await;
        assert!(!conn.snapshot().stale);
        assert_eq!(server.connect_count(), 2);
        conn.stop().await.unwrap();
    }

    #[test]
    fn test_stale_metadata_listable_through_outage() {
        let mut snapshot = ConnectionSnapshot {
            state: Error,
            ..Default::default()
        };
        assert!(!snapshot.is_listable());

        snapshot.stale = true;
        for state in [Connected, Reconnecting, Error] {
            snapshot.state = state;
            assert!(snapshot.is_listable(), "{}", state);
        }
        for state in [Disconnected, Connecting, Stopped] {
            snapshot.state = state;
            assert!(!snapshot.is_listable(), "{}", state);
        }
    }

    #[tokio::test]
    async fn test_heartbeat_failure_triggers_reconnect() {
        let server = ScriptedServer::new("quiet").with_tool("t", |_| ToolResult::text("ok"));
        let (conn, mut events) = setup(&server, fast_options());
        conn.connect().await.unwrap();
        let _ = events.recv().await;

        server.set_healthy(false);
        let lost = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            lost.kind,
            ConnectionEventKind::StateChanged {
                from: Connected,
                to: Reconnecting
            }
        );
        server.set_healthy(true);
        wait_for(&conn, Connected).await;
        conn.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_resource_events_forwarded() {
        let server = ScriptedServer::new("docs")
            .with_resource("file:///a", "a", "A")
            .with_subscribe();
        let (conn, mut events) = setup(&server, fast_options());
        conn.connect().await.unwrap();
        let _ = events.recv().await;

        server.push_resource(ResourceEntry::new("file:///b", "b"), "B");
        server.emit(TransportEvent::ResourceListChanged);
        let event = events.recv().await.unwrap();
        assert_eq!(event.kind, ConnectionEventKind::ResourceListChanged);
        assert_eq!(conn.snapshot().resources.len(), 2);

        server.emit(TransportEvent::ResourceUpdated {
            uri: "file:///a".to_string(),
        });
        let event = events.recv().await.unwrap();
        assert_eq!(
            event.kind,
            ConnectionEventKind::ResourceUpdated {
                uri: "file:///a".to_string()
            }
        );
        conn.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_terminal() {
        let server = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let (conn, _events) = setup(&server, fast_options());
        conn.connect().await.unwrap();

        conn.stop().await.unwrap();
        assert_eq!(conn.state(), Stopped);
        assert!(matches!(
            conn.connect().await,
            Err(McpError::InvalidTransition { .. })
        ));
        assert!(conn.stop().await.is_err());
        assert!(matches!(
            conn.call_tool("add", json!({}), Duration::from_secs(1)).await,
            Err(McpError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_then_connect_again() {
        let server = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let (conn, _events) = setup(&server, fast_options());
        conn.connect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert_eq!(conn.state(), Disconnected);

        conn.connect().await.unwrap();
        assert_eq!(conn.state(), Connected);
        assert_eq!(server.connect_count(), 2);
        conn.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_requires_capability() {
        let server = ScriptedServer::new("docs").with_resource("file:///a", "a", "A");
        let (conn, _events) = setup(&server, fast_options());
        conn.connect().await.unwrap();
        assert!(matches!(
            conn.subscribe("file:///a").await,
            Err(McpError::Capability { .. })
        ));
        conn.stop().await.unwrap();
    }
}
