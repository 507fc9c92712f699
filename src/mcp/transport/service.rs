// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! MCP sessions driven by the `rmcp` client service.
//!
//! Stdio servers run as child processes through `TokioChildProcess`. Both
//! HTTP flavours go through the streamable HTTP client; a legacy SSE
//! endpoint is reached the same way.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::model::{
    CallToolRequest, CallToolRequestMethod, CallToolRequestParams, CancelledNotificationParam,
    ClientRequest, Extensions, ListResourceTemplatesRequest, ListResourceTemplatesRequestMethod,
    ListResourcesRequest, ListResourcesRequestMethod, ListToolsRequest, ListToolsRequestMethod,
    PaginatedRequestParams, PingRequest, PingRequestMethod, ReadResourceRequest,
    ReadResourceRequestMethod, ReadResourceRequestParams, RequestId, ServerResult,
    SubscribeRequest, SubscribeRequestMethod, SubscribeRequestParams, UnsubscribeRequest,
    UnsubscribeRequestMethod, UnsubscribeRequestParams,
};
use rmcp::service::{
    Peer, PeerRequestOptions, RunningService, RunningServiceCancellationToken, ServiceError,
};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{StreamableHttpClientTransport, TokioChildProcess};
use rmcp::{RoleClient, ServiceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use super::handler::EventForwarder;
use super::{McpTransport, TransportEvent};
use crate::mcp::config::{ServerConfig, TransportConfig};
use crate::mcp::error::McpError;
use crate::mcp::types::{
    ResourceContents, ResourcePage, ResourceTemplatePage, ServerInfo, ToolPage, ToolResult,
};

type Running = RunningService<RoleClient, EventForwarder>;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An initialized `rmcp` client session.
pub struct RmcpTransport {
    name: String,
    peer: Peer<RoleClient>,
    server_info: ServerInfo,
    closed: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    cancel: Mutex<Option<RunningServiceCancellationToken>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for RmcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpTransport")
            .field("name", &self.name)
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RmcpTransport {
    /// Connect to the server described by `config` and run the handshake.
    #[instrument(skip_all, fields(server = %config.name, transport = config.transport.kind()))]
    pub async fn open(
        config: &ServerConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, McpError> {
        let handler = EventForwarder::new(&config.name, events.clone());
        let running = match &config.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                cwd,
            } => {
                let mut cmd = Command::new(command);
                cmd.args(args).envs(env).kill_on_drop(true);
                if let Some(cwd) = cwd {
                    cmd.current_dir(cwd);
                }
                let transport = TokioChildProcess::new(cmd).map_err(|e| {
                    McpError::connection_failed(&config.name, format!("{}: {}", command, e))
                })?;
                debug!(command = %command, "Spawned stdio MCP server");
                handler.serve(transport).await
            }
            TransportConfig::StreamableHttp {
                url,
                headers,
                timeout_secs,
                sse_read_timeout_secs,
                terminate_on_close,
            } => {
                if !terminate_on_close {
                    debug!("terminate_on_close=false ignored; the session ends with the connection");
                }
                let client =
                    http_client(&config.name, headers, *timeout_secs, *sse_read_timeout_secs)?;
                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );
                handler.serve(transport).await
            }
            TransportConfig::Sse {
                url,
                headers,
                timeout_secs,
                sse_read_timeout_secs,
            } => {
                debug!(url = %url, "Reaching SSE server through the streamable HTTP client");
                let client =
                    http_client(&config.name, headers, *timeout_secs, *sse_read_timeout_secs)?;
                let transport = StreamableHttpClientTransport::with_client(
                    client,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );
                handler.serve(transport).await
            }
        }
        .map_err(|e| McpError::connection_failed(&config.name, e.to_string()))?;

        Ok(Self::watch(&config.name, running, events))
    }

    /// Take ownership of a running service; its end is reported as
    /// [`TransportEvent::Closed`] unless [`McpTransport::close`] caused it.
    fn watch(name: &str, running: Running, events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        let server_info = running
            .peer_info()
            .and_then(|info| serde_json::to_value(info).ok())
            .map(|value| ServerInfo::from_initialize(&value))
            .unwrap_or_default();
        debug!(
            server = name,
            remote = %server_info.name,
            version = %server_info.version,
            "MCP server initialized"
        );

        let peer = running.peer().clone();
        let cancel = running.cancellation_token();
        let closed = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        let watcher = tokio::spawn({
            let name = name.to_string();
            let closed = Arc::clone(&closed);
            let closing = Arc::clone(&closing);
            async move {
                let reason = running.waiting().await;
                closed.store(true, Ordering::SeqCst);
                if !closing.load(Ordering::SeqCst) {
                    debug!(server = %name, ?reason, "MCP session ended");
                    let _ = events.send(TransportEvent::Closed);
                }
            }
        });

        Self {
            name: name.to_string(),
            peer,
            server_info,
            closed,
            closing,
            cancel: Mutex::new(Some(cancel)),
            watcher: Mutex::new(Some(watcher)),
        }
    }

    async fn send(
        &self,
        method: &'static str,
        request: ClientRequest,
        timeout: Duration,
    ) -> Result<ServerResult, McpError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let handle = self
            .peer
            .send_cancellable_request(
                request,
                PeerRequestOptions {
                    timeout: Some(timeout),
                    meta: None,
                },
            )
            .await
            .map_err(|e| service_error(&self.name, method, timeout, e))?;

        let mut guard = CancelOnDrop {
            peer: self.peer.clone(),
            id: Some(handle.id.clone()),
        };
        let result = handle.await_response().await;
        guard.disarm();
        result.map_err(|e| service_error(&self.name, method, timeout, e))
    }

    fn closed_error(&self) -> McpError {
        McpError::Transport(format!("connection to '{}' is closed", self.name))
    }
}

impl Drop for RmcpTransport {
    fn drop(&mut self) {
        if let Some(cancel) = lock(&self.cancel).take() {
            self.closing.store(true, Ordering::SeqCst);
            cancel.cancel();
        }
    }
}

/// Tells the server to abandon a request whose caller went away.
struct CancelOnDrop {
    peer: Peer<RoleClient>,
    id: Option<RequestId>,
}

impl CancelOnDrop {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        let Some(request_id) = self.id.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let peer = self.peer.clone();
        runtime.spawn(async move {
            let params = CancelledNotificationParam {
                request_id,
                reason: Some("caller abandoned the request".to_string()),
            };
            if let Err(e) = peer.notify_cancelled(params).await {
                debug!(error = %e, "Failed to deliver cancellation");
            }
        });
    }
}

/// Map an `rmcp` service error onto the crate's error type.
pub(crate) fn service_error(
    server: &str,
    method: &str,
    timeout: Duration,
    err: ServiceError,
) -> McpError {
    match err {
        ServiceError::Timeout { .. } => McpError::RequestTimeout {
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        },
        ServiceError::McpError(e) => McpError::Protocol {
            code: i64::from(e.code.0),
            message: e.message.to_string(),
        },
        ServiceError::TransportClosed => {
            McpError::Transport(format!("connection to '{}' is closed", server))
        }
        other => McpError::Transport(format!("{} on '{}': {}", method, server, other)),
    }
}

/// Re-shape an `rmcp` model value into one of the crate's wire types.
fn convert<T: Serialize, U: DeserializeOwned>(method: &str, value: T) -> Result<U, McpError> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| McpError::InvalidResponse(format!("{}: {}", method, e)))
}

fn unexpected(method: &str, result: &ServerResult) -> McpError {
    McpError::InvalidResponse(format!("{}: unexpected result {:?}", method, result))
}

fn paginated(cursor: Option<String>) -> Option<PaginatedRequestParams> {
    Some(PaginatedRequestParams { meta: None, cursor })
}

pub(crate) fn header_map(
    server: &str,
    headers: &BTreeMap<String, String>,
) -> Result<HeaderMap, McpError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            McpError::Configuration(format!("server '{}': bad header name '{}': {}", server, name, e))
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            McpError::Configuration(format!("server '{}': bad header value: {}", server, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

fn http_client(
    server: &str,
    headers: &BTreeMap<String, String>,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<reqwest::Client, McpError> {
    reqwest::Client::builder()
        .default_headers(header_map(server, headers)?)
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .read_timeout(Duration::from_secs(read_timeout_secs))
        .build()
        .map_err(|e| McpError::connection_failed(server, e.to_string()))
}

#[async_trait]
impl McpTransport for RmcpTransport {
    fn server_info(&self) -> ServerInfo {
        self.server_info.clone()
    }

    async fn list_tools(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ToolPage, McpError> {
        let request = ClientRequest::ListToolsRequest(ListToolsRequest {
            method: ListToolsRequestMethod,
            params: paginated(cursor),
            extensions: Extensions::default(),
        });
        match self.send("tools/list", request, timeout).await? {
            ServerResult::ListToolsResult(r) => convert("tools/list", r),
            other => Err(unexpected("tools/list", &other)),
        }
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<ToolResult, McpError> {
        let arguments = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            _ => {
                return Err(McpError::protocol(
                    -32602,
                    format!("arguments for '{}' must be an object", name),
                ))
            }
        };
        let request = ClientRequest::CallToolRequest(CallToolRequest {
            method: CallToolRequestMethod,
            params: CallToolRequestParams {
                name: name.to_string().into(),
                arguments,
                meta: None,
                task: None,
            },
            extensions: Extensions::default(),
        });
        match self.send("tools/call", request, timeout).await? {
            ServerResult::CallToolResult(r) => convert("tools/call", r),
            other => Err(unexpected("tools/call", &other)),
        }
    }

    async fn list_resources(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourcePage, McpError> {
        let request = ClientRequest::ListResourcesRequest(ListResourcesRequest {
            method: ListResourcesRequestMethod,
            params: paginated(cursor),
            extensions: Extensions::default(),
        });
        match self.send("resources/list", request, timeout).await? {
            ServerResult::ListResourcesResult(r) => convert("resources/list", r),
            other => Err(unexpected("resources/list", &other)),
        }
    }

    async fn list_resource_templates(
        &self,
        cursor: Option<String>,
        timeout: Duration,
    ) -> Result<ResourceTemplatePage, McpError> {
        let request = ClientRequest::ListResourceTemplatesRequest(ListResourceTemplatesRequest {
            method: ListResourceTemplatesRequestMethod,
            params: paginated(cursor),
            extensions: Extensions::default(),
        });
        match self.send("resources/templates/list", request, timeout).await? {
            ServerResult::ListResourceTemplatesResult(r) => convert("resources/templates/list", r),
            other => Err(unexpected("resources/templates/list", &other)),
        }
    }

    async fn read_resource(
        &self,
        uri: &str,
        timeout: Duration,
    ) -> Result<Vec<ResourceContents>, McpError> {
        let request = ClientRequest::ReadResourceRequest(ReadResourceRequest {
            method: ReadResourceRequestMethod,
            params: ReadResourceRequestParams {
                uri: uri.to_string(),
                meta: None,
            },
            extensions: Extensions::default(),
        });
        match self.send("resources/read", request, timeout).await? {
            ServerResult::ReadResourceResult(r) => convert("resources/read", r.contents),
            other => Err(unexpected("resources/read", &other)),
        }
    }

    async fn subscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError> {
        let request = ClientRequest::SubscribeRequest(SubscribeRequest {
            method: SubscribeRequestMethod,
            params: SubscribeRequestParams {
                uri: uri.to_string(),
                meta: None,
            },
            extensions: Extensions::default(),
        });
        self.send("resources/subscribe", request, timeout)
            .await
            .map(|_| ())
    }

    async fn unsubscribe(&self, uri: &str, timeout: Duration) -> Result<(), McpError> {
        let request = ClientRequest::UnsubscribeRequest(UnsubscribeRequest {
            method: UnsubscribeRequestMethod,
            params: UnsubscribeRequestParams {
                uri: uri.to_string(),
                meta: None,
            },
            extensions: Extensions::default(),
        });
        self.send("resources/unsubscribe", request, timeout)
            .await
            .map(|_| ())
    }

    async fn ping(&self, timeout: Duration) -> Result<(), McpError> {
        let request = ClientRequest::PingRequest(PingRequest {
            method: PingRequestMethod,
            extensions: Extensions::default(),
        });
        self.send("ping", request, timeout).await.map(|_| ())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(cancel) = lock(&self.cancel).take() {
            cancel.cancel();
        }
        let watcher = lock(&self.watcher).take();
        if let Some(watcher) = watcher {
            if let Err(e) = watcher.await {
                debug!(server = %self.name, error = %e, "Session task ended abnormally");
            }
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::{ErrorCode, ErrorData};

    #[test]
    fn test_header_map() {
        let mut headers = BTreeMap::new();
        headers.insert("Authorization".to_string(), "Bearer abc".to_string());
        let map = header_map("s", &headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer abc");

        headers.insert("bad header".to_string(), "x".to_string());
        assert!(matches!(
            header_map("s", &headers),
            Err(McpError::Configuration(_))
        ));
    }

    #[test]
    fn test_service_error_mapping() {
        let timeout = Duration::from_millis(250);

        let err = service_error(
            "calc",
            "tools/call",
            timeout,
            ServiceError::Timeout { timeout },
        );
        assert!(
            matches!(err, McpError::RequestTimeout { ref method, timeout_ms: 250 } if method == "tools/call")
        );

        let err = service_error(
            "calc",
            "tools/call",
            timeout,
            ServiceError::McpError(ErrorData::new(ErrorCode::INVALID_PARAMS, "Unknown tool: x", None)),
        );
        match err {
            McpError::Protocol { code, message } => {
                assert_eq!(code, -32602);
                assert_eq!(message, "Unknown tool: x");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = service_error("calc", "ping", timeout, ServiceError::TransportClosed);
        assert!(err.is_transport());
    }

    #[test]
    fn test_convert_tool_page() {
        let page: ToolPage = convert(
            "tools/list",
            serde_json::json!({
                "tools": [{"name": "add", "inputSchema": {"type": "object"}}],
                "nextCursor": "2"
            }),
        )
        .unwrap();
        assert_eq!(page.tools[0].name, "add");
        assert_eq!(page.next_cursor.as_deref(), Some("2"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_command_is_connection_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ServerConfig::stdio("missing", "/definitely/not/a/command", vec![]);
        let err = RmcpTransport::open(&config, tx).await.unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_server_exiting_during_handshake_fails_connect() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ServerConfig::stdio(
            "quitter",
            "sh",
            vec!["-c".to_string(), "exit 0".to_string()],
        );
        let err = tokio::time::timeout(Duration::from_secs(10), RmcpTransport::open(&config, tx))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, McpError::ConnectionFailed { .. }));
    }
}
