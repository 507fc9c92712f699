// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory MCP servers.
//!
//! [`ScriptedServer`] answers the MCP operations the Computer uses from data
//! registered on it, and [`ScriptedFactory`] hands those servers out through
//! the regular [`TransportFactory`] seam, so a whole Computer can run without
//! spawning processes.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use super::config::ServerConfig;
use super::error::McpError;
use super::transport::{McpTransport, TransportEvent, TransportFactory};
use super::types::{
    ResourceContents, ResourceEntry, ResourcePage, ResourceTemplate, ResourceTemplatePage,
    ServerCapabilities, ServerInfo, ToolInfo, ToolPage, ToolResult,
};

type Handler = Arc<dyn Fn(&Value) -> ToolResult + Send + Sync>;

#[derive(Clone)]
struct ScriptedTool {
    info: ToolInfo,
    handler: Handler,
    delay: Option<Duration>,
}

struct ScriptedResource {
    entry: ResourceEntry,
    text: String,
}

struct State {
    name: String,
    tools: RwLock<Vec<ScriptedTool>>,
    resources: RwLock<Vec<ScriptedResource>>,
    templates: RwLock<Vec<ResourceTemplate>>,
    tools_capability: AtomicBool,
    subscribe: AtomicBool,
    page_size: AtomicUsize,
    fail_connect: AtomicBool,
    startup_delay: Mutex<Option<Duration>>,
    healthy: AtomicBool,
    connects: AtomicUsize,
    generation: AtomicU64,
    cancelled: Mutex<Vec<String>>,
    subscriptions: Mutex<BTreeSet<String>>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An MCP server that lives in memory.
///
/// Cloning shares state, so a test can keep a handle to poke the server
/// after handing it to a factory.
#[derive(Clone)]
pub struct ScriptedServer {
    state: Arc<State>,
}

impl ScriptedServer {
    /// Create a server with no tools or resources.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(State {
                name: name.into(),
                tools: RwLock::new(Vec::new()),
                resources: RwLock::new(Vec::new()),
                templates: RwLock::new(Vec::new()),
                tools_capability: AtomicBool::new(false),
                subscribe: AtomicBool::new(false),
                page_size: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                startup_delay: Mutex::new(None),
                healthy: AtomicBool::new(true),
                connects: AtomicUsize::new(0),
                generation: AtomicU64::new(0),
                cancelled: Mutex::new(Vec::new()),
                subscriptions: Mutex::new(BTreeSet::new()),
                events: Mutex::new(None),
            }),
        }
    }

    /// Server name.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Add a tool answered by `handler`.
    pub fn with_tool<F>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> ToolResult + Send + Sync + 'static,
    {
        self.push_tool(ToolInfo::new(name), Arc::new(handler), None);
        self
    }

    /// Add a tool that takes `delay` to answer.
    pub fn with_slow_tool(self, name: &str, delay: Duration) -> Self {
        self.push_tool(
            ToolInfo::new(name),
            Arc::new(|_| ToolResult::text("done")),
            Some(delay),
        );
        self
    }

    fn push_tool(&self, info: ToolInfo, handler: Handler, delay: Option<Duration>) {
        self.state.tools_capability.store(true, Ordering::SeqCst);
        self.state
            .tools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ScriptedTool {
                info,
                handler,
                delay,
            });
    }

    /// Add a text resource.
    pub fn with_resource(self, uri: &str, name: &str, text: &str) -> Self {
        self.push_resource(ResourceEntry::new(uri, name), text);
        self
    }

    /// Add a resource template.
    pub fn with_template(self, uri_template: &str, name: &str) -> Self {
        self.state
            .templates
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ResourceTemplate {
                uri_template: uri_template.to_string(),
                name: name.to_string(),
                title: None,
                description: None,
                mime_type: None,
            });
        self
    }

    /// Advertise resource subscriptions.
    pub fn with_subscribe(self) -> Self {
        self.state.subscribe.store(true, Ordering::SeqCst);
        self
    }

    /// Paginate listings with `size` items per page.
    pub fn with_page_size(self, size: usize) -> Self {
        self.state.page_size.store(size, Ordering::SeqCst);
        self
    }

    /// Take `delay` to finish the handshake.
    pub fn with_startup_delay(self, delay: Duration) -> Self {
        *lock(&self.state.startup_delay) = Some(delay);
        self
    }

    /// Add or replace a resource at runtime.
    pub fn push_resource(&self, entry: ResourceEntry, text: &str) {
        let mut resources = self
            .state
            .resources
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        resources.retain(|r| r.entry.uri != entry.uri);
        resources.push(ScriptedResource {
            entry,
            text: text.to_string(),
        });
    }

    /// Replace the tool list at runtime. Every tool answers with its own name.
    pub fn set_tools(&self, names: &[&str]) {
        let tools = names
            .iter()
            .map(|name| {
                let reply = name.to_string();
                ScriptedTool {
                    info: ToolInfo::new(*name),
                    handler: Arc::new(move |_| ToolResult::text(reply.clone())),
                    delay: None,
                }
            })
            .collect();
        *self
            .state
            .tools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tools;
        self.state.tools_capability.store(true, Ordering::SeqCst);
    }

    /// Make subsequent connection attempts fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make `ping` fail while `false`.
    pub fn set_healthy(&self, healthy: bool) {
        self.state.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Drop every open transport as if the process died.
    pub fn crash(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        self.emit(TransportEvent::Closed);
    }

    /// Send an event on the most recently opened transport.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = lock(&self.state.events).as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Number of successful opens.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Tool calls abandoned before completion.
    pub fn cancelled_calls(&self) -> Vec<String> {
        lock(&self.state.cancelled).clone()
    }

    /// URIs currently subscribed.
    pub fn subscriptions(&self) -> BTreeSet<String> {
        lock(&self.state.subscriptions).clone()
    }

    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<ScriptedTransport, McpError> {
        let delay = *lock(&self.state.startup_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(McpError::connection_failed(
                &self.state.name,
                "scripted connect failure",
            ));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state.events) = Some(events);
        Ok(ScriptedTransport {
            state: Arc::clone(&self.state),
            generation: self.state.generation.load(Ordering::SeqCst),
            closed: AtomicBool::new(false),
        })
    }
}

/// Factory that serves [`ScriptedServer`]s by server name.
#[derive(Clone, Default)]
pub struct ScriptedFactory {
    servers: Arc<RwLock<HashMap<String, ScriptedServer>>>,
}

impl ScriptedFactory {
    /// Create an empty factory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a server under its own name.
    pub fn with_server(self, server: ScriptedServer) -> Self {
        self.insert(server.name().to_string(), server);
        self
    }

    /// Register a server under an explicit config name.
    pub fn insert(&self, config_name: impl Into<String>, server: ScriptedServer) {
        self.servers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(config_name.into(), server);
    }
}

#[async_trait]
impl TransportFactory for ScriptedFactory {
    async fn open(
        &self,
        config: &ServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn McpTransport>, McpError> {
        let server = self
            .servers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&config.name)
            .cloned()
            .ok_or_else(|| McpError::connection_failed(&config.name, "no scripted server"))?;
        Ok(Arc::new(server.open(events).await?))
    }
}

struct ScriptedTransport {
    state: Arc<State>,
    generation: u64,
    closed: AtomicBool,
}

/// Records a tool call as cancelled when dropped before completion.
struct CallGuard<'a> {
    state: &'a State,
    tool: String,
    done: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            lock(&self.state.cancelled).push(self.tool.clone());
        }
    }
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedTransport {
    fn page<T: Clone>(&self, items: &[T], cursor: Option<String>) -> (Vec<T>, Option<String>) {
        let size = self.state.page_size.load(Ordering::SeqCst);
        let offset = cursor.and_then(|c| c.parse::<usize>().ok()).unwrap_or(0);
        if size == 0 {
            return (items.to_vec(), None);
        }
        let end = (offset + size).min(items.len());
        let page = items.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
        let next = (end < items.len()).then(|| end.to_string());
        (page, next)
    }

    fn check_open(&self) -> Result<(), McpError> {
        if self.is_closed() {
            Err(McpError::Transport(format!(
                "connection to '{}' is closed",
                self.state.name
            )))
        } else {
            Ok(())
        }
    }

    /// Run `work` the way a remote request would: on an open session,
    /// bounded by `timeout`.
    async fn answer<T, F>(&self, method: &str, timeout: Duration, work: F) -> Result<T, McpError>
    where
        F: std::future::Future<Output = Result<T, McpError>>,
    {
        self.check_open()?;
        tokio::time::timeout(timeout, work)
            .await
            .map_err(|_| McpError::RequestTimeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    fn set_subscribed(&self, uri: &str, subscribed: bool) {
        let mut subs = lock(&self.state.subscriptions);
        if subscribed {
            subs.insert(uri.to_string());
        } else {
            subs.remove(uri);
        }
    }
}

#[async_trait]
impl McpTransport for ScriptedTransport {
    fn server_info(&self) -> ServerInfo {
        let state = &self.state;
        let has_resources =
            !read(&state.resources).is_empty() || !read(&state.templates).is_empty();
        let tools = state.tools_capability.load(Ordering::SeqCst);
        ServerInfo {
            name: state.name.clone(),
            version: "1.0.0".to_string(),
            capabilities: ServerCapabilities {
                tools,
                tools_list_changed: tools,
                resources: has_resources,
                resources_subscribe: has_resources && state.subscribe.load(Ordering::SeqCst),
                resources_list_changed: has_resources,
                ..ServerCapabilities::default()
            },
            protocol_version: Some("2025-06-18".to_string()),
        }
    }

    async fn list_tools(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ToolPage, McpError> {
        self.answer("tools/list", timeout, async {
            let tools: Vec<ToolInfo> = read(&self.state.tools)
                .iter()
                .map(|t| t.info.clone())
                .collect();
            let (tools, next_cursor) = self.page(&tools, cursor);
            Ok(ToolPage { tools, next_cursor })
        })
        .await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError> {
        self.answer("tools/call", timeout, async {
            let tool = read(&self.state.tools)
                .iter()
                .find(|t| t.info.name == name)
                .cloned()
                .ok_or_else(|| McpError::protocol(-32602, format!("Unknown tool: {}", name)))?;

            let mut guard = CallGuard {
                state: &self.state,
                tool: name.to_string(),
                done: false,
            };
            if let Some(delay) = tool.delay {
                tokio::time::sleep(delay).await;
            }
            guard.done = true;
            Ok((tool.handler)(&arguments))
        })
        .await
    }

    async fn list_resources(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourcePage, McpError> {
        self.answer("resources/list", timeout, async {
            let entries: Vec<ResourceEntry> = read(&self.state.resources)
                .iter()
                .map(|r| r.entry.clone())
                .collect();
            let (resources, next_cursor) = self.page(&entries, cursor);
            Ok(ResourcePage {
                resources,
                next_cursor,
            })
        })
        .await
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourceTemplatePage, McpError> {
        self.answer("resources/templates/list", timeout, async {
            let templates = read(&self.state.templates).clone();
            let (resource_templates, next_cursor) = self.page(&templates, cursor);
            Ok(ResourceTemplatePage {
                resource_templates,
                next_cursor,
            })
        })
        .await
    }

    async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError> {
        self.answer("resources/read", timeout, async {
            let resources = read(&self.state.resources);
            let resource = resources
                .iter()
                .find(|r| r.entry.uri == uri)
                .ok_or_else(|| McpError::protocol(-32002, format!("Resource not found: {}", uri)))?;
            Ok(vec![ResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text: Some(resource.text.clone()),
                blob: None,
            }])
        })
        .await
    }

    async fn subscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError> {
        self.answer("resources/subscribe", timeout, async {
            self.set_subscribed(uri, true);
            Ok(())
        })
        .await
    }

    async fn unsubscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError> {
        self.answer("resources/unsubscribe", timeout, async {
            self.set_subscribed(uri, false);
            Ok(())
        })
        .await
    }

    async fn ping(&self, timeout: Duration) -> Result<(), McpError> {
        self.answer("ping", timeout, async {
            if !self.state.healthy.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
        .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self.generation != self.state.generation.load(Ordering::SeqCst)
    }
}
