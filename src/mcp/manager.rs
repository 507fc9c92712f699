// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Owner of every [`Connection`] a Computer hosts.
//!
//! The manager keys connections by server id and derives the cross-server
//! views (tools after alias substitution, resource ownership, windows) into
//! an immutable [`AggregateView`]. Every change builds a new view and swaps
//! it in, so readers never observe a half-applied update.
//!
//! Mutations of one server id are serialized by a per-id lock; different ids
//! proceed concurrently.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::ServerConfig;
use super::connection::{
    Connection, ConnectionEvent, ConnectionEventKind, ConnectionOptions, ConnectionSnapshot,
};
use super::error::McpError;
use super::transport::TransportFactory;
use super::types::{
    ConnectionState, ResourceContents, ResourceEntry, ResourcePage, ResourceTemplate,
    ToolDescriptor,
};
use super::window::WindowUri;

/// Something the rest of the Computer should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The aggregate tool list may have changed.
    ToolsChanged,
    /// A server's connection entered or left `Connected`, or its tools
    /// started or stopped being served.
    ConnectionChanged {
        server: String,
        state: ConnectionState,
    },
    /// A server's resource list changed.
    ResourceListChanged { server: String },
    /// One resource changed.
    ResourceUpdated { server: String, uri: String },
}

/// How a display name resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRoute {
    /// Exactly one server exposes the name.
    Unique { server: String, tool: String },
    /// Several servers expose the name and none is aliased.
    Conflict { servers: Vec<String> },
}

/// A reported name conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConflict {
    pub name: String,
    /// Servers exposing the name, in registration order. The first keeps its
    /// listing; the others are excluded.
    pub servers: Vec<String>,
}

/// A window resource placed for layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub server: String,
    pub uri: WindowUri,
    pub resource: ResourceEntry,
    /// Whether this window holds the Computer-wide fullscreen slot.
    pub fullscreen: bool,
}

/// Consistent cross-server view, rebuilt on every change.
#[derive(Debug, Clone, Default)]
pub struct AggregateView {
    pub tools: Vec<ToolDescriptor>,
    pub routes: HashMap<String, ToolRoute>,
    pub conflicts: Vec<ToolConflict>,
    pub resource_owners: HashMap<String, String>,
    pub windows: Vec<WindowEntry>,
}

#[derive(Clone)]
struct Entry {
    config: ServerConfig,
    connection: Option<Arc<Connection>>,
    seq: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Cursor {
    server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inner: Option<String>,
}

impl Cursor {
    fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    fn decode(token: &str) -> Result<Self, McpError> {
        let invalid = || McpError::protocol(-32602, format!("Invalid cursor: {}", token));
        let bytes = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// Owns the connection set and the aggregate view.
pub struct Manager {
    factory: Arc<dyn TransportFactory>,
    options: ConnectionOptions,
    entries: RwLock<HashMap<String, Entry>>,
    id_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    next_seq: AtomicU64,
    view: RwLock<Arc<AggregateView>>,
    rebuild_lock: Mutex<()>,
    connection_events: mpsc::UnboundedSender<ConnectionEvent>,
    events: broadcast::Sender<ManagerEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl Manager {
    /// Create a manager and start its event pump.
    pub fn new(factory: Arc<dyn TransportFactory>, options: ConnectionOptions) -> Arc<Self> {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);

        let manager = Arc::new(Self {
            factory,
            options,
            entries: RwLock::new(HashMap::new()),
            id_locks: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            view: RwLock::new(Arc::new(AggregateView::default())),
            rebuild_lock: Mutex::new(()),
            connection_events: conn_tx,
            events,
            pump: Mutex::new(None),
        });

        let handle = tokio::spawn(pump(Arc::downgrade(&manager), conn_rx));
        *lock(&manager.pump) = Some(handle);
        manager
    }

    /// Subscribe to manager events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// Current aggregate view.
    pub fn view(&self) -> Arc<AggregateView> {
        Arc::clone(&self.view.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn id_lock(&self, server: &str) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(
            lock(&self.id_locks)
                .entry(server.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    fn entry(&self, server: &str) -> Option<Entry> {
        self.read_entries().get(server).cloned()
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a server or replace its configuration.
    ///
    /// A replacement connection is connected before it is swapped in; if it
    /// cannot connect, or its tools collide with another server's, the
    /// previous connection stays active and the call fails with a
    /// configuration error. A brand-new server that cannot connect is kept
    /// in `Error` and retried in the background.
    pub async fn add_or_update(&self, config: ServerConfig) -> Result<ConnectionState, McpError> {
        config.validate()?;
        let name = config.name.clone();
        let id_lock = self.id_lock(&name);
        let _guard = id_lock.lock().await;

        let existing = self.entry(&name);
        let seq = existing
            .as_ref()
            .map(|e| e.seq)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::SeqCst));

        if config.disabled {
            self.write_entries().insert(
                name.clone(),
                Entry {
                    config,
                    connection: None,
                    seq,
                },
            );
            self.rebuild();
            if let Some(old) = existing.and_then(|e| e.connection) {
                let _ = old.stop().await;
            }
            info!(server = %name, "Server disabled");
            let _ = self.events.send(ManagerEvent::ToolsChanged);
            return Ok(ConnectionState::Disconnected);
        }

        if let Some(existing) = &existing {
            if existing.config == config {
                if let Some(conn) = &existing.connection {
                    debug!(server = %name, "Configuration unchanged");
                    return Ok(conn.state());
                }
            }
        }

        let previous = existing.and_then(|e| e.connection);
        let candidate = Arc::new(Connection::new(
            config.clone(),
            Arc::clone(&self.factory),
            self.options.clone(),
            self.connection_events.clone(),
        ));

        if let Err(e) = candidate.connect().await {
            if previous.is_some() {
                let _ = candidate.stop().await;
                warn!(server = %name, error = %e, "Update failed, keeping the running connection");
                return Err(McpError::Configuration(format!(
                    "failed to apply configuration for '{}': {}",
                    name, e
                )));
            }
            if !e.is_transport() {
                let _ = candidate.stop().await;
                return Err(e);
            }
            warn!(server = %name, error = %e, "Server unavailable, will keep retrying");
            let state = candidate.state();
            self.write_entries().insert(
                name,
                Entry {
                    config,
                    connection: Some(candidate),
                    seq,
                },
            );
            self.rebuild();
            return Ok(state);
        }

        if let Err(e) = self.check_conflicts(&name, &config, &candidate.snapshot()) {
            let _ = candidate.stop().await;
            warn!(server = %name, error = %e, "Rejected configuration with conflicting tool names");
            return Err(e);
        }

        let state = candidate.state();
        self.write_entries().insert(
            name.clone(),
            Entry {
                config,
                connection: Some(candidate),
                seq,
            },
        );
        self.rebuild();

        if let Some(previous) = previous {
            if let Err(e) = previous.stop().await {
                debug!(server = %name, error = %e, "Previous connection already stopped");
            }
            info!(server = %name, "Server configuration updated");
        } else {
            info!(server = %name, "Server added");
        }
        let _ = self.events.send(ManagerEvent::ToolsChanged);
        Ok(state)
    }

    /// Stop and forget a server. Absent ids succeed.
    pub async fn remove(&self, server: &str) -> Result<(), McpError> {
        let id_lock = self.id_lock(server);
        let result = {
            let _guard = id_lock.lock().await;
            self.remove_locked(server).await
        };
        drop(id_lock);
        self.release_id_lock(server);
        result
    }

    /// Drop the per-id lock of a server that is gone, unless another
    /// mutation still holds it.
    fn release_id_lock(&self, server: &str) {
        let mut locks = lock(&self.id_locks);
        let idle = locks
            .get(server)
            .map(|l| Arc::strong_count(l) == 1)
            .unwrap_or(false);
        if idle && !self.read_entries().contains_key(server) {
            locks.remove(server);
        }
    }

    async fn remove_locked(&self, server: &str) -> Result<(), McpError> {
        let removed = self.write_entries().remove(server);
        let Some(removed) = removed else {
            return Ok(());
        };
        self.rebuild();

        if let Some(conn) = removed.connection {
            if let Err(e) = conn.stop().await {
                debug!(server, error = %e, "Connection already stopped");
            }
        }
        info!(server, "Server removed");
        let _ = self.events.send(ManagerEvent::ToolsChanged);
        Ok(())
    }

    /// Stop every connection.
    pub async fn shutdown(&self) {
        let entries: Vec<Entry> = self.write_entries().drain().map(|(_, e)| e).collect();
        self.rebuild();
        for entry in entries {
            if let Some(conn) = entry.connection {
                let _ = conn.stop().await;
            }
        }
        lock(&self.id_locks).retain(|_, l| Arc::strong_count(l) > 1);
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }

    fn check_conflicts(
        &self,
        server: &str,
        config: &ServerConfig,
        snapshot: &ConnectionSnapshot,
    ) -> Result<(), McpError> {
        let mut taken: HashMap<String, String> = HashMap::new();
        for (name, entry) in self.read_entries().iter() {
            if name == server {
                continue;
            }
            let Some(conn) = &entry.connection else { continue };
            let other = conn.snapshot();
            if !other.is_listable() {
                continue;
            }
            for tool in &other.tools {
                taken
                    .entry(entry.config.display_name(&tool.name))
                    .or_insert_with(|| name.clone());
            }
        }

        for tool in &snapshot.tools {
            let display = config.display_name(&tool.name);
            if let Some(owner) = taken.get(&display) {
                return Err(McpError::ToolConflict {
                    tool: display,
                    servers: vec![owner.clone(), server.to_string()],
                });
            }
        }
        Ok(())
    }

    /// Recompute the aggregate view from the current entries.
    fn rebuild(&self) {
        let _guard = lock(&self.rebuild_lock);
        let mut entries: Vec<(String, Entry)> = self
            .read_entries()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by_key(|(_, e)| e.seq);

        let previous = self.view();
        let view = build_view(&entries);
        for conflict in &view.conflicts {
            if !previous.conflicts.contains(conflict) {
                warn!(
                    tool = %conflict.name,
                    servers = %conflict.servers.join(", "),
                    "Tool name conflict; set tool_meta.alias to resolve it"
                );
            }
        }

        *self
            .view
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(view);
    }

    fn handle_connection_event(&self, event: ConnectionEvent) {
        let current = self
            .entry(&event.server)
            .and_then(|e| e.connection)
            .map(|c| c.instance());
        if current != Some(event.instance) {
            debug!(server = %event.server, "Ignoring event from a replaced connection");
            return;
        }

        match event.kind {
            ConnectionEventKind::StateChanged { to, .. } => {
                self.rebuild();
                let _ = self.events.send(ManagerEvent::ConnectionChanged {
                    server: event.server,
                    state: to,
                });
                let _ = self.events.send(ManagerEvent::ToolsChanged);
            }
            ConnectionEventKind::ToolsChanged => {
                self.rebuild();
                let _ = self.events.send(ManagerEvent::ToolsChanged);
            }
            ConnectionEventKind::ResourceListChanged => {
                self.rebuild();
                let _ = self.events.send(ManagerEvent::ResourceListChanged {
                    server: event.server,
                });
            }
            ConnectionEventKind::ResourceUpdated { uri } => {
                let _ = self.events.send(ManagerEvent::ResourceUpdated {
                    server: event.server,
                    uri,
                });
            }
        }
    }

    /// Tools from connected (and reconnecting) servers after conflict exclusion.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.view().tools.clone()
    }

    /// Conflicts in the current view.
    pub fn conflicts(&self) -> Vec<ToolConflict> {
        self.view().conflicts.clone()
    }

    /// Resolve a display name to its owning connection and descriptor.
    pub fn resolve_tool(&self, display_name: &str) -> Result<(Arc<Connection>, ToolDescriptor), McpError> {
        let view = self.view();
        match view.routes.get(display_name) {
            Some(ToolRoute::Unique { server, .. }) => {
                let descriptor = view
                    .tools
                    .iter()
                    .find(|t| t.display_name == display_name)
                    .cloned()
                    .ok_or_else(|| McpError::ToolNotFound(display_name.to_string()))?;
                let conn = self
                    .connection(server)
                    .ok_or_else(|| McpError::ServerNotFound(server.clone()))?;
                Ok((conn, descriptor))
            }
            Some(ToolRoute::Conflict { servers }) => Err(McpError::ToolConflict {
                tool: display_name.to_string(),
                servers: servers.clone(),
            }),
            None => Err(McpError::ToolNotFound(display_name.to_string())),
        }
    }

    /// Live connection for a server id.
    pub fn connection(&self, server: &str) -> Option<Arc<Connection>> {
        self.entry(server).and_then(|e| e.connection)
    }

    /// Configurations in registration order.
    pub fn configs(&self) -> Vec<ServerConfig> {
        let mut entries: Vec<Entry> = self.read_entries().values().cloned().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.config).collect()
    }

    /// Lifecycle state of every server, keyed by id.
    pub fn server_states(&self) -> BTreeMap<String, ConnectionState> {
        self.read_entries()
            .iter()
            .map(|(name, e)| {
                let state = e
                    .connection
                    .as_ref()
                    .map(|c| c.state())
                    .unwrap_or(ConnectionState::Disconnected);
                (name.clone(), state)
            })
            .collect()
    }

    /// Connected servers with resource support, ordered by id.
    fn resource_servers(&self) -> Vec<(String, Arc<Connection>)> {
        let mut servers: Vec<(String, Arc<Connection>)> = self
            .read_entries()
            .iter()
            .filter_map(|(name, e)| {
                let conn = e.connection.as_ref()?;
                let snapshot = conn.snapshot();
                (snapshot.state == ConnectionState::Connected && snapshot.supports_resources())
                    .then(|| (name.clone(), Arc::clone(conn)))
            })
            .collect();
        servers.sort_by(|a, b| a.0.cmp(&b.0));
        servers
    }

    /// List resources across servers.
    ///
    /// The cursor encodes `(server, server cursor)`. A listing drains one
    /// server page by page, then moves to the next server in id order.
    pub async fn list_resources(&self, cursor: Option<&str>) -> Result<ResourcePage, McpError> {
        let servers = self.resource_servers();
        let mut position = match cursor {
            Some(token) if !token.is_empty() => {
                let cursor = Cursor::decode(token)?;
                let index = servers.partition_point(|(name, _)| name.as_str() < cursor.server.as_str());
                let inner = servers
                    .get(index)
                    .filter(|(name, _)| *name == cursor.server)
                    .and(cursor.inner);
                Some((index, inner))
            }
            _ => Some((0, None)),
        };

        while let Some((index, inner)) = position.take() {
            let Some((server, conn)) = servers.get(index) else {
                break;
            };

            let page = match conn.list_resources(inner.as_deref()).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(server = %server, error = %e, "Skipping server in resource listing");
                    ResourcePage::default()
                }
            };

            let next = match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(inner) => Some(Cursor {
                    server: server.clone(),
                    inner: Some(inner),
                }),
                None => servers.get(index + 1).map(|(next, _)| Cursor {
                    server: next.clone(),
                    inner: None,
                }),
            };

            if !page.resources.is_empty() || next.is_none() {
                return Ok(ResourcePage {
                    resources: page.resources,
                    next_cursor: next.map(|c| c.encode()),
                });
            }

            position = next.map(|c| {
                let index = servers.partition_point(|(name, _)| name.as_str() < c.server.as_str());
                (index, c.inner)
            });
        }

        Ok(ResourcePage::default())
    }

    /// Resource templates across servers, ordered by server id.
    pub async fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        let mut templates = Vec::new();
        for (server, conn) in self.resource_servers() {
            match conn.list_resource_templates().await {
                Ok(found) => templates.extend(found),
                Err(e) => warn!(server = %server, error = %e, "Skipping server in template listing"),
            }
        }
        templates
    }

    fn owner_of(&self, uri: &str) -> Result<(String, Arc<Connection>), McpError> {
        let view = self.view();
        let server = view
            .resource_owners
            .get(uri)
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        let conn = self
            .connection(server)
            .ok_or_else(|| McpError::ResourceNotFound(uri.to_string()))?;
        Ok((server.clone(), conn))
    }

    /// Read a resource through its owning connection.
    pub async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError> {
        let (_, conn) = self.owner_of(uri)?;
        conn.read_resource(uri, timeout).await
    }

    /// Subscribe to a resource on its owning server. Returns the server id.
    pub async fn subscribe(&self, uri: &str) -> Result<String, McpError> {
        let (server, conn) = self.owner_of(uri)?;
        conn.subscribe(uri).await?;
        Ok(server)
    }

    /// Unsubscribe from a resource on its owning server.
    pub async fn unsubscribe(&self, uri: &str) -> Result<String, McpError> {
        let (server, conn) = self.owner_of(uri)?;
        conn.unsubscribe(uri).await?;
        Ok(server)
    }

    /// Window resources, grouped by server in registration order, by
    /// priority within a server.
    pub fn list_windows(&self) -> Vec<WindowEntry> {
        self.view().windows.clone()
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
    }
}

async fn pump(manager: Weak<Manager>, mut events: mpsc::UnboundedReceiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            return;
        };
        manager.handle_connection_event(event);
    }
}

/// Derive the aggregate view from entries sorted by registration order.
fn build_view(entries: &[(String, Entry)]) -> AggregateView {
    let mut view = AggregateView::default();
    let mut owners: HashMap<String, Vec<String>> = HashMap::new();
    let mut fullscreen_taken = false;

    for (server, entry) in entries {
        let Some(conn) = &entry.connection else { continue };
        let snapshot = conn.snapshot();
        if !snapshot.is_listable() {
            continue;
        }
        let config = &entry.config;

        for tool in &snapshot.tools {
            let display_name = config.display_name(&tool.name);
            let servers = owners.entry(display_name.clone()).or_default();
            servers.push(server.clone());
            if servers.len() > 1 {
                continue;
            }

            let meta = config.effective_tool_meta(&tool.name);
            view.routes.insert(
                display_name.clone(),
                ToolRoute::Unique {
                    server: server.clone(),
                    tool: tool.name.clone(),
                },
            );
            view.tools.push(ToolDescriptor {
                name: tool.name.clone(),
                display_name: display_name.clone(),
                owner_server: server.clone(),
                description: tool.description.clone(),
                schema: tool.input_schema.clone(),
                output_schema: tool.output_schema.clone(),
                annotations: tool.annotations.clone(),
                forbidden: config.is_forbidden(&tool.name, &display_name),
                auto_apply: meta.as_ref().and_then(|m| m.auto_apply).unwrap_or(false),
                ret_object_mapper: meta.as_ref().and_then(|m| m.ret_object_mapper.clone()),
                tool_meta: meta.and_then(|m| serde_json::to_value(m).ok()),
            });
        }

        let mut windows = Vec::new();
        for resource in &snapshot.resources {
            view.resource_owners
                .entry(resource.uri.clone())
                .or_insert_with(|| server.clone());

            if !WindowUri::is_window_uri(&resource.uri) {
                continue;
            }
            match WindowUri::parse(&resource.uri) {
                Ok(uri) => windows.push(WindowEntry {
                    server: server.clone(),
                    uri,
                    resource: resource.clone(),
                    fullscreen: false,
                }),
                Err(e) => debug!(server = %server, uri = %resource.uri, error = %e, "Ignoring malformed window uri"),
            }
        }

        for window in windows.iter_mut() {
            if window.uri.is_fullscreen() && !fullscreen_taken {
                window.fullscreen = true;
                fullscreen_taken = true;
            }
        }
        windows.sort_by(|a, b| b.uri.effective_priority().cmp(&a.uri.effective_priority()));
        view.windows.extend(windows);
    }

    for (name, servers) in owners {
        if servers.len() > 1 {
            view.routes.insert(
                name.clone(),
                ToolRoute::Conflict {
                    servers: servers.clone(),
                },
            );
            view.conflicts.push(ToolConflict { name, servers });
        }
    }
    view.conflicts.sort_by(|a, b| a.name.cmp(&b.name));
    view
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::config::ToolMeta;
    use crate::mcp::connection::BackoffConfig;
    use crate::mcp::testing::{ScriptedFactory, ScriptedServer};
    use crate::mcp::transport::TransportEvent;
    use crate::mcp::types::ToolResult;
    use std::collections::HashSet;

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

    fn config(name: &str) -> ServerConfig {
        ServerConfig::stdio(name, "unused", vec![])
    }

    fn manager(servers: &[&ScriptedServer]) -> Arc<Manager> {
        let factory = ScriptedFactory::new();
        for server in servers {
            factory.insert(server.name(), (*server).clone());
        }
        Manager::new(Arc::new(factory), options())
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held");
    }

    #[tokio::test]
    async fn test_add_and_resolve() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);

        let state = mgr.add_or_update(config("calc")).await.unwrap();
        assert_eq!(state, ConnectionState::Connected);

        let tools = mgr.list_tools();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].owner_server, "calc");

        let (conn, descriptor) = mgr.resolve_tool("add").unwrap();
        assert_eq!(conn.name(), "calc");
        assert_eq!(descriptor.name, "add");
        assert!(matches!(mgr.resolve_tool("mul"), Err(McpError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        mgr.add_or_update(config("calc")).await.unwrap();

        mgr.remove("calc").await.unwrap();
        mgr.remove("calc").await.unwrap();
        mgr.remove("never-added").await.unwrap();
        assert!(mgr.list_tools().is_empty());
        assert!(mgr.configs().is_empty());
    }

    #[tokio::test]
    async fn test_remove_releases_id_locks() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        mgr.add_or_update(config("calc")).await.unwrap();
        assert_eq!(lock(&mgr.id_locks).len(), 1);

        for i in 0..50 {
            mgr.remove(&format!("never-added-{}", i)).await.unwrap();
        }
        assert_eq!(lock(&mgr.id_locks).len(), 1);

        mgr.remove("calc").await.unwrap();
        assert!(lock(&mgr.id_locks).is_empty());
    }

    #[tokio::test]
    async fn test_outage_keeps_serving_last_known_tools() {
        let a = ScriptedServer::new("a").with_tool("add", |_| ToolResult::text("3"));
        let b = ScriptedServer::new("b").with_tool("echo", |_| ToolResult::text("b"));
        let mgr = manager(&[&a, &b]);
        mgr.add_or_update(config("a")).await.unwrap();

        a.set_fail_connect(true);
        a.crash();
        eventually(|| mgr.server_states()["a"] == ConnectionState::Error).await;

        mgr.add_or_update(config("b")).await.unwrap();
        let names: Vec<_> = mgr.list_tools().into_iter().map(|t| t.display_name).collect();
        assert_eq!(names, vec!["add", "echo"]);

        let (conn, descriptor) = mgr.resolve_tool("add").unwrap();
        assert_eq!(conn.name(), "a");
        assert_eq!(descriptor.owner_server, "a");
        assert!(conn.snapshot().stale);
        assert!(matches!(
            conn.call_tool("add", serde_json::json!({}), Duration::from_secs(1))
                .await,
            Err(McpError::NotReady(_))
        ));

        mgr.remove("a").await.unwrap();
        assert!(matches!(mgr.resolve_tool("add"), Err(McpError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_failed_update_keeps_previous_connection() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        mgr.add_or_update(config("calc")).await.unwrap();
        let before = mgr.connection("calc").unwrap().instance();

        calc.set_fail_connect(true);
        let mut updated = config("calc");
        updated.tool_timeout_secs = 5;
        let err = mgr.add_or_update(updated).await.unwrap_err();
        assert!(matches!(err, McpError::Configuration(_)));

        let conn = mgr.connection("calc").unwrap();
        assert_eq!(conn.instance(), before);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(mgr.configs()[0].tool_timeout_secs, 60);

        let (conn, _) = mgr.resolve_tool("add").unwrap();
        let result = conn
            .call_tool("add", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result.as_text(), "3");
    }

    #[tokio::test]
    async fn test_successful_update_replaces_connection() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        mgr.add_or_update(config("calc")).await.unwrap();
        let old = mgr.connection("calc").unwrap();

        let updated = config("calc").with_tool_meta(
            "add",
            ToolMeta {
                alias: Some("plus".to_string()),
                ..Default::default()
            },
        );
        mgr.add_or_update(updated).await.unwrap();

        assert_eq!(old.state(), ConnectionState::Stopped);
        assert_ne!(mgr.connection("calc").unwrap().instance(), old.instance());
        assert!(mgr.resolve_tool("plus").is_ok());
        assert!(mgr.resolve_tool("add").is_err());
    }

    #[tokio::test]
    async fn test_unchanged_config_is_noop() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        mgr.add_or_update(config("calc")).await.unwrap();
        mgr.add_or_update(config("calc")).await.unwrap();
        assert_eq!(calc.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_add_rejected() {
        let a = ScriptedServer::new("a").with_tool("search", |_| ToolResult::text("a"));
        let b = ScriptedServer::new("b").with_tool("search", |_| ToolResult::text("b"));
        let mgr = manager(&[&a, &b]);
        mgr.add_or_update(config("a")).await.unwrap();

        let err = mgr.add_or_update(config("b")).await.unwrap_err();
        assert!(matches!(err, McpError::ToolConflict { .. }));
        assert!(mgr.connection("b").is_none());
        assert_eq!(mgr.resolve_tool("search").unwrap().1.owner_server, "a");

        let aliased = config("b").with_tool_meta(
            "search",
            ToolMeta {
                alias: Some("search_v2".to_string()),
                ..Default::default()
            },
        );
        mgr.add_or_update(aliased).await.unwrap();
        assert_eq!(mgr.resolve_tool("search").unwrap().1.owner_server, "a");
        assert_eq!(mgr.resolve_tool("search_v2").unwrap().1.owner_server, "b");
    }

    #[tokio::test]
    async fn test_runtime_conflict_blocks_bare_name() {
        let a = ScriptedServer::new("a").with_tool("search", |_| ToolResult::text("a"));
        let b = ScriptedServer::new("b").with_tool("fetch", |_| ToolResult::text("b"));
        let mgr = manager(&[&a, &b]);
        mgr.add_or_update(config("a")).await.unwrap();
        mgr.add_or_update(config("b")).await.unwrap();

        b.set_tools(&["fetch", "search"]);
        b.emit(TransportEvent::ToolListChanged);
        eventually(|| !mgr.conflicts().is_empty()).await;

        let conflict = &mgr.conflicts()[0];
        assert_eq!(conflict.name, "search");
        assert_eq!(conflict.servers, vec!["a", "b"]);

        let listed: Vec<_> = mgr
            .list_tools()
            .into_iter()
            .filter(|t| t.display_name == "search")
            .collect();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].owner_server, "a");
        assert!(matches!(
            mgr.resolve_tool("search"),
            Err(McpError::ToolConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_server_not_connected() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let mgr = manager(&[&calc]);
        let mut disabled = config("calc");
        disabled.disabled = true;

        let state = mgr.add_or_update(disabled).await.unwrap();
        assert_eq!(state, ConnectionState::Disconnected);
        assert_eq!(calc.connect_count(), 0);
        assert!(mgr.list_tools().is_empty());
        assert_eq!(mgr.configs().len(), 1);
    }

    #[tokio::test]
    async fn test_unavailable_new_server_is_registered() {
        let down = ScriptedServer::new("down");
        down.set_fail_connect(true);
        let mgr = manager(&[&down]);
        let state = mgr.add_or_update(config("down")).await.unwrap();
        assert_eq!(state, ConnectionState::Error);
        assert_eq!(mgr.server_states()["down"], ConnectionState::Error);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mgr = manager(&[]);
        let err = mgr.add_or_update(config("")).await.unwrap_err();
        assert!(matches!(err, McpError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_resource_pagination_across_servers() {
        let a = ScriptedServer::new("a")
            .with_resource("file:///a1", "a1", "")
            .with_resource("file:///a2", "a2", "")
            .with_resource("file:///a3", "a3", "")
            .with_page_size(2);
        let b = ScriptedServer::new("b").with_tool("only-tools", |_| ToolResult::text(""));
        let c = ScriptedServer::new("c")
            .with_resource("file:///c1", "c1", "")
            .with_page_size(1);
        let mgr = manager(&[&a, &b, &c]);
        for name in ["c", "b", "a"] {
            mgr.add_or_update(config(name)).await.unwrap();
        }

        async fn drain(mgr: &Manager) -> (Vec<String>, Vec<Option<String>>) {
            let mut uris = Vec::new();
            let mut cursors = Vec::new();
            let mut cursor: Option<String> = None;
            loop {
                let page = mgr.list_resources(cursor.as_deref()).await.unwrap();
                uris.extend(page.resources.into_iter().map(|r| r.uri));
                cursors.push(page.next_cursor.clone());
                match page.next_cursor {
                    Some(next) => cursor = Some(next),
                    None => return (uris, cursors),
                }
            }
        }

        let (first, cursors) = drain(&mgr).await;
        assert_eq!(
            first,
            vec!["file:///a1", "file:///a2", "file:///a3", "file:///c1"]
        );
        let unique: HashSet<_> = first.iter().collect();
        assert_eq!(unique.len(), first.len());

        let (second, replayed) = drain(&mgr).await;
        assert_eq!(first, second);
        assert_eq!(cursors, replayed);

        assert!(mgr.list_resources(Some("not-a-cursor")).await.is_err());
    }

    #[tokio::test]
    async fn test_read_unknown_uri_is_not_found() {
        let a = ScriptedServer::new("a").with_resource("file:///a", "a", "A");
        let mgr = manager(&[&a]);
        mgr.add_or_update(config("a")).await.unwrap();

        let contents = mgr
            .read_resource("file:///a", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(contents[0].text.as_deref(), Some("A"));

        assert!(matches!(
            mgr.read_resource("file:///missing", Duration::from_secs(1)).await,
            Err(McpError::ResourceNotFound(_))
        ));
        assert!(matches!(
            mgr.subscribe("file:///a").await,
            Err(McpError::Capability { .. })
        ));
    }

    #[tokio::test]
    async fn test_windows_priority_and_fullscreen() {
        let a = ScriptedServer::new("a")
            .with_resource("window://a/low?priority=10", "low", "")
            .with_resource("window://a/high?priority=90&fullscreen=true", "high", "")
            .with_resource("file:///not-a-window", "plain", "");
        let b = ScriptedServer::new("b")
            .with_resource("window://b/full?fullscreen=true&priority=50", "full", "")
            .with_resource("window://b/bad?priority=500", "bad", "");
        let mgr = manager(&[&a, &b]);
        mgr.add_or_update(config("a")).await.unwrap();
        mgr.add_or_update(config("b")).await.unwrap();

        let windows = mgr.list_windows();
        let uris: Vec<_> = windows.iter().map(|w| w.resource.name.as_str()).collect();
        assert_eq!(uris, vec!["high", "low", "full"]);

        let fullscreen: Vec<_> = windows.iter().filter(|w| w.fullscreen).collect();
        assert_eq!(fullscreen.len(), 1);
        assert_eq!(fullscreen[0].server, "a");
    }

    #[tokio::test]
    async fn test_resource_events_reach_subscribers() {
        let a = ScriptedServer::new("a")
            .with_resource("file:///a", "a", "A")
            .with_subscribe();
        let mgr = manager(&[&a]);
        let mut events = mgr.subscribe_events();
        mgr.add_or_update(config("a")).await.unwrap();
        assert_eq!(mgr.subscribe("file:///a").await.unwrap(), "a");

        a.emit(TransportEvent::ResourceUpdated {
            uri: "file:///a".to_string(),
        });
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .unwrap()
                .unwrap();
            if let ManagerEvent::ResourceUpdated { server, uri } = event {
                assert_eq!(server, "a");
                assert_eq!(uri, "file:///a");
                break;
            }
        }
    }
}
