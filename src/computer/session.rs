// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Computer side of the hub channel.
//!
//! Answers the hub's `client:*` and `resources/*` requests from a
//! [`Computer`], honours `notify:tool_call_cancel`, and reports Computer
//! events to the hub as `server:*` notifications.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Computer, ComputerEvent};
use crate::error::SessionError;
use crate::protocol::methods;
use crate::protocol::{
    parse_params, to_result, ComputerNotification, ErrorBody, FrameHandler, GetDesktopReq,
    GetDesktopRet, GetToolsRet, JoinOfficeReq, LeaveOfficeReq, Peer, ResourceListReq,
    ResourceReadRet, ResourceTemplatesRet, ResourceUpdatedNotification, ResourceUriReq, Role,
    ToolCallCancelReq, ToolCallReq, DEFAULT_REQUEST_TIMEOUT,
};

/// How a Computer session talks to the hub.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Office to join on start.
    pub office_id: String,
    /// Bound on requests to the hub.
    pub request_timeout: Duration,
}

impl SessionOptions {
    pub fn new(office_id: impl Into<String>) -> Self {
        Self {
            office_id: office_id.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

struct ComputerHandler {
    computer: Arc<Computer>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl FrameHandler for ComputerHandler {
    async fn on_request(
        &self,
        _peer: Arc<Peer>,
        method: String,
        params: Value,
    ) -> Result<Value, ErrorBody> {
        let computer = &self.computer;
        match method.as_str() {
            methods::TOOL_CALL => {
                let req: ToolCallReq = parse_params(params)?;
                let timeout = req.timeout_ms.map(Duration::from_millis);
                let result = computer
                    .execute_tool(&req.req_id, &req.tool_name, req.params, timeout)
                    .await;
                to_result(&result)
            }
            methods::GET_TOOLS => to_result(&GetToolsRet {
                tools: computer.list_tools(),
            }),
            methods::GET_MCP_CONFIG => to_result(&computer.get_mcp_config()),
            methods::GET_DESKTOP => {
                let req: GetDesktopReq = parse_params(params)?;
                let windows = computer
                    .get_desktop(req.desktop_size, req.window.as_deref())
                    .await?;
                to_result(&GetDesktopRet { windows })
            }
            methods::RESOURCES_LIST => {
                let req: ResourceListReq = parse_params(params)?;
                to_result(&computer.list_resources(req.cursor.as_deref()).await?)
            }
            methods::RESOURCES_TEMPLATES_LIST => to_result(&ResourceTemplatesRet {
                resource_templates: computer.list_resource_templates().await,
            }),
            methods::RESOURCES_READ => {
                let req: ResourceUriReq = parse_params(params)?;
                let contents = computer.read_resource(&req.uri).await?;
                to_result(&ResourceReadRet { contents })
            }
            methods::RESOURCES_SUBSCRIBE => {
                let req: ResourceUriReq = parse_params(params)?;
                let server = computer.subscribe(&req.uri).await?;
                Ok(json!({ "uri": req.uri, "server": server }))
            }
            methods::RESOURCES_UNSUBSCRIBE => {
                let req: ResourceUriReq = parse_params(params)?;
                let server = computer.unsubscribe(&req.uri).await?;
                Ok(json!({ "uri": req.uri, "server": server }))
            }
            other => Err(ErrorBody::method_not_found(other)),
        }
    }

    async fn on_notification(&self, _peer: Arc<Peer>, method: String, params: Value) {
        match method.as_str() {
            methods::NOTIFY_TOOL_CALL_CANCEL => match parse_params::<ToolCallCancelReq>(params) {
                Ok(req) => {
                    self.computer.cancel(&req.req_id);
                }
                Err(e) => warn!(error = %e.message, "Malformed cancel notification"),
            },
            other => debug!(method = other, "Ignoring hub notification"),
        }
    }

    async fn on_close(&self, _peer: Arc<Peer>) {
        info!(computer = %self.computer.name(), "Hub connection closed");
        let _ = self.closed.send(true);
    }
}

/// A Computer connected to a hub.
pub struct ComputerSession {
    computer: Arc<Computer>,
    peer: Arc<Peer>,
    office_id: Mutex<Option<String>>,
    request_timeout: Duration,
    closed: watch::Receiver<bool>,
    reporter: Mutex<Option<JoinHandle<()>>>,
}

impl ComputerSession {
    /// Connect over TCP and join the configured office.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        computer: Arc<Computer>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::start(stream, computer, options).await
    }

    /// Serve `stream` and join the configured office.
    pub async fn start<S>(
        stream: S,
        computer: Arc<Computer>,
        options: SessionOptions,
    ) -> Result<Arc<Self>, SessionError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (closed_tx, closed_rx) = watch::channel(false);
        let handler = Arc::new(ComputerHandler {
            computer: Arc::clone(&computer),
            closed: closed_tx,
        });
        let peer = Peer::spawn(stream, handler);

        let session = Arc::new(Self {
            computer: Arc::clone(&computer),
            peer: Arc::clone(&peer),
            office_id: Mutex::new(None),
            request_timeout: options.request_timeout,
            closed: closed_rx,
            reporter: Mutex::new(None),
        });

        let reporter = tokio::spawn(report_events(
            computer.subscribe_events(),
            peer,
            computer.name().to_string(),
        ));
        *session.reporter() = Some(reporter);

        session.join_office(&options.office_id).await?;
        Ok(session)
    }

    fn reporter(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.reporter
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn office(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.office_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn computer(&self) -> &Arc<Computer> {
        &self.computer
    }

    pub fn office_id(&self) -> Option<String> {
        self.office().clone()
    }

    /// Join `office_id`, leaving the current office if different.
    pub async fn join_office(&self, office_id: &str) -> Result<(), SessionError> {
        let req = JoinOfficeReq {
            role: Role::Computer,
            name: self.computer.name().to_string(),
            office_id: office_id.to_string(),
        };
        self.peer
            .request(methods::JOIN_OFFICE, json!(req), self.request_timeout)
            .await?;
        info!(computer = %self.computer.name(), office = office_id, "Joined office");
        *self.office() = Some(office_id.to_string());
        Ok(())
    }

    pub async fn leave_office(&self) -> Result<(), SessionError> {
        let Some(office_id) = self.office_id() else {
            return Err(SessionError::NotInOffice);
        };
        self.peer
            .request(
                methods::LEAVE_OFFICE,
                json!(LeaveOfficeReq { office_id }),
                self.request_timeout,
            )
            .await?;
        *self.office() = None;
        Ok(())
    }

    /// Wait until the hub connection is gone.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn is_closed(&self) -> bool {
        self.peer.is_closed()
    }

    pub fn close(&self) {
        if let Some(reporter) = self.reporter().take() {
            reporter.abort();
        }
        self.peer.close();
    }
}

impl Drop for ComputerSession {
    fn drop(&mut self) {
        if let Some(reporter) = self.reporter().take() {
            reporter.abort();
        }
    }
}

async fn report_events(
    mut events: broadcast::Receiver<ComputerEvent>,
    peer: Arc<Peer>,
    computer: String,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Computer events lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };
        let (method, params) = match event {
            ComputerEvent::ConfigChanged => (
                methods::UPDATE_MCP_CONFIG,
                json!(ComputerNotification {
                    computer: computer.clone()
                }),
            ),
            ComputerEvent::ToolsChanged => (
                methods::UPDATE_TOOL_LIST,
                json!(ComputerNotification {
                    computer: computer.clone()
                }),
            ),
            ComputerEvent::ResourceListChanged { server } => {
                debug!(server = %server, "Resource list changed");
                (
                    methods::RESOURCES_LIST_CHANGED,
                    json!(ComputerNotification {
                        computer: computer.clone()
                    }),
                )
            }
            ComputerEvent::ResourceUpdated { uri, .. } => (
                methods::RESOURCES_UPDATED,
                json!(ResourceUpdatedNotification {
                    computer: computer.clone(),
                    uri,
                    title: None,
                }),
            ),
        };
        if let Err(e) = peer.notify(method, params) {
            if e.is_disconnect() {
                return;
            }
            warn!(method, error = %e, "Failed to report event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inputs::{InputResolver, StaticProvider};
    use crate::mcp::testing::{ScriptedFactory, ScriptedServer};
    use crate::mcp::{ConnectionOptions, ToolResult};
    use tokio::io::duplex;
    use tokio::sync::mpsc;

    /// Stands in for the hub: accepts joins and records notifications.
    struct FakeHub {
        notes: mpsc::UnboundedSender<(String, Value)>,
    }

    #[async_trait]
    impl FrameHandler for FakeHub {
        async fn on_request(
            &self,
            _peer: Arc<Peer>,
            method: String,
            _params: Value,
        ) -> Result<Value, ErrorBody> {
            match method.as_str() {
                methods::JOIN_OFFICE | methods::LEAVE_OFFICE => Ok(json!({})),
                other => Err(ErrorBody::method_not_found(other)),
            }
        }

        async fn on_notification(&self, _peer: Arc<Peer>, method: String, params: Value) {
            let _ = self.notes.send((method, params));
        }
    }

    async fn setup(
        server: ScriptedServer,
    ) -> (Arc<ComputerSession>, Arc<Peer>, mpsc::UnboundedReceiver<(String, Value)>) {
        let factory = ScriptedFactory::new().with_server(server);
        let resolver = Arc::new(InputResolver::new(vec![], Arc::new(StaticProvider::new())));
        let options = ConnectionOptions {
            auto_reconnect: false,
            ..ConnectionOptions::default()
        };
        let computer = Computer::new("comp-1", Arc::new(factory), resolver, options);

        let (hub_end, computer_end) = duplex(64 * 1024);
        let (notes_tx, notes_rx) = mpsc::unbounded_channel();
        let hub = Peer::spawn(hub_end, Arc::new(FakeHub { notes: notes_tx }));
        let session = ComputerSession::start(computer_end, computer, SessionOptions::new("room-1"))
            .await
            .unwrap();
        (session, hub, notes_rx)
    }

    #[tokio::test]
    async fn test_tool_call_over_channel() {
        let calc = ScriptedServer::new("calc").with_tool("add", |_| ToolResult::text("3"));
        let (session, hub, mut notes) = setup(calc).await;
        assert_eq!(session.office_id().as_deref(), Some("room-1"));

        session
            .computer()
            .update_servers(vec![json!({"name": "calc", "transport": {"type": "stdio", "command": "calc"}})])
            .await;

        let (method, params) = notes.recv().await.unwrap();
        assert!(method == methods::UPDATE_TOOL_LIST || method == methods::UPDATE_MCP_CONFIG);
        assert_eq!(params["computer"], json!("comp-1"));

        let result = hub
            .request(
                methods::TOOL_CALL,
                json!({"computer": "comp-1", "req_id": "r1", "tool_name": "add", "params": {"a": 1, "b": 2}}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        let result: ToolResult = serde_json::from_value(result).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.as_text(), "3");
    }

    #[tokio::test]
    async fn test_cancel_notification() {
        let slow = ScriptedServer::new("slow").with_slow_tool("wait", Duration::from_secs(30));
        let (session, hub, _notes) = setup(slow).await;
        session
            .computer()
            .update_servers(vec![json!({"name": "slow", "transport": {"type": "stdio", "command": "slow"}})])
            .await;

        let caller = Arc::clone(&hub);
        let call = tokio::spawn(async move {
            caller
                .request(
                    methods::TOOL_CALL,
                    json!({"computer": "comp-1", "req_id": "r7", "tool_name": "wait"}),
                    Duration::from_secs(10),
                )
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        hub.notify(methods::NOTIFY_TOOL_CALL_CANCEL, json!({"req_id": "r7"}))
            .unwrap();

        let result: ToolResult = serde_json::from_value(call.await.unwrap().unwrap()).unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_unknown_method_and_resource_errors() {
        let (_session, hub, _notes) = setup(ScriptedServer::new("empty")).await;
        let err = hub
            .request("client:nope", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Remote { code: -32601, .. }));

        let err = hub
            .request(
                methods::RESOURCES_READ,
                json!({"computer": "comp-1", "uri": "file:///missing"}),
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        match err {
            SessionError::Remote { kind, .. } => assert_eq!(kind, "not_found"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_when_hub_goes_away() {
        let (session, hub, _notes) = setup(ScriptedServer::new("empty")).await;
        hub.close();
        tokio::time::timeout(Duration::from_secs(5), session.closed())
            .await
            .unwrap();
        assert!(session.is_closed());
    }
}
