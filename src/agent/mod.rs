// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent client.
//!
//! An [`Agent`] joins one office on a hub and drives the Computers in it:
//! tool calls with timeout and cancellation, tool and config discovery,
//! desktop snapshots and resource access.
//!
//! # Example
//!
//! ```rust,ignore
//! use smcp::agent::{Agent, AgentCallbacks};
//!
//! let agent = Agent::connect("127.0.0.1:7400", "bot", AgentCallbacks::default()).await?;
//! agent.join_office("room-1").await?;
//! let result = agent
//!     .call_tool("comp-1", "add", json!({"a": 1, "b": 2}), None)
//!     .await?;
//! assert_eq!(result.as_text(), "3");
//! ```

mod types;

pub use types::{AgentCallbacks, AgentEvent};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::mcp::{ResourceContents, ResourceEntry, ResourceTemplate, ToolResult};
use crate::protocol::methods;
use crate::protocol::{
    DesktopWindow, ErrorBody, FrameHandler, GetDesktopReq, GetDesktopRet, GetMcpConfigRet,
    GetToolsRet, JoinOfficeReq, LeaveOfficeReq, ListRoomRet, Peer, ResourceListReq,
    ResourceListRet, ResourceReadRet, ResourceTemplatesRet, ResourceUriReq, Role, SmcpTool,
    ToolCallCancelReq, ToolCallReq, DEFAULT_REQUEST_TIMEOUT, TIMEOUT_GRACE,
};
use crate::telemetry::CorrelationId;

struct AgentHandler {
    callbacks: AgentCallbacks,
    events: broadcast::Sender<AgentEvent>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl FrameHandler for AgentHandler {
    async fn on_request(
        &self,
        _peer: Arc<Peer>,
        method: String,
        _params: Value,
    ) -> Result<Value, ErrorBody> {
        Err(ErrorBody::method_not_found(&method))
    }

    async fn on_notification(&self, _peer: Arc<Peer>, method: String, params: Value) {
        let Some(event) = AgentEvent::from_notification(&method, params) else {
            debug!(method = %method, "Ignoring hub notification");
            return;
        };
        self.callbacks.dispatch(&event);
        let _ = self.events.send(event);
    }

    async fn on_close(&self, _peer: Arc<Peer>) {
        info!("Hub connection closed");
        let _ = self.closed.send(true);
    }
}

/// A connected Agent.
pub struct Agent {
    name: String,
    peer: Arc<Peer>,
    office_id: Mutex<Option<String>>,
    events: broadcast::Sender<AgentEvent>,
    closed: watch::Receiver<bool>,
    request_timeout: Duration,
}

impl Agent {
    /// Connect to a hub over TCP.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        name: impl Into<String>,
        callbacks: AgentCallbacks,
    ) -> Result<Arc<Self>, SessionError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::start(stream, name, callbacks))
    }

    /// Serve an already-open stream.
    pub fn start<S>(stream: S, name: impl Into<String>, callbacks: AgentCallbacks) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (events, _) = broadcast::channel(256);
        let (closed_tx, closed_rx) = watch::channel(false);
        let handler = Arc::new(AgentHandler {
            callbacks,
            events: events.clone(),
            closed: closed_tx,
        });
        Arc::new(Self {
            name: name.into(),
            peer: Peer::spawn(stream, handler),
            office_id: Mutex::new(None),
            events,
            closed: closed_rx,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn office(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.office_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn office_id(&self) -> Option<String> {
        self.office().clone()
    }

    /// Hub notifications, as they arrive.
    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<T, SessionError> {
        let value = self.peer.request(method, params, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }

    // ------------------------------------------------------------------
    // Office
    // ------------------------------------------------------------------

    pub async fn join_office(&self, office_id: &str) -> Result<ListRoomRet, SessionError> {
        let req = JoinOfficeReq {
            role: Role::Agent,
            name: self.name.clone(),
            office_id: office_id.to_string(),
        };
        let room: ListRoomRet = self
            .request(methods::JOIN_OFFICE, json!(req), self.request_timeout)
            .await?;
        info!(agent = %self.name, office = office_id, members = room.members.len(), "Joined office");
        *self.office() = Some(office_id.to_string());
        Ok(room)
    }

    pub async fn leave_office(&self) -> Result<(), SessionError> {
        let office_id = self.office_id().ok_or(SessionError::NotInOffice)?;
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

    pub async fn list_room(&self) -> Result<ListRoomRet, SessionError> {
        self.request(methods::LIST_ROOM, json!({}), self.request_timeout)
            .await
    }

    // ------------------------------------------------------------------
    // Tools
    // ------------------------------------------------------------------

    /// Call a tool with a fresh correlation id.
    pub async fn call_tool(
        &self,
        computer: &str,
        tool: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResult, SessionError> {
        let req_id = CorrelationId::new().to_string();
        self.call_tool_with_id(&req_id, computer, tool, params, timeout)
            .await
    }

    /// Call a tool under a caller-chosen correlation id, so it can be
    /// cancelled with [`Agent::cancel`].
    ///
    /// Tool failures, timeouts and cancellation come back as error-flagged
    /// results; only channel failures are errors.
    pub async fn call_tool_with_id(
        &self,
        req_id: &str,
        computer: &str,
        tool: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<ToolResult, SessionError> {
        let timeout = timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let req = ToolCallReq {
            agent: Some(self.name.clone()),
            computer: computer.to_string(),
            req_id: req_id.to_string(),
            tool_name: tool.to_string(),
            params,
            timeout_ms: Some(timeout.as_millis() as u64),
        };

        debug!(req_id, computer, tool, "Calling tool");
        match self
            .request::<ToolResult>(methods::TOOL_CALL, json!(req), timeout + TIMEOUT_GRACE)
            .await
        {
            Err(SessionError::Timeout { .. }) => {
                warn!(req_id, "Hub did not answer in time; cancelling");
                let _ = self.cancel(req_id).await;
                Ok(ToolResult::error_with_kind(
                    format!("Tool call {} timed out after {}ms", req_id, timeout.as_millis()),
                    "timeout",
                ))
            }
            other => other,
        }
    }

    /// Cancel a running call. Returns false if it was not running.
    pub async fn cancel(&self, req_id: &str) -> Result<bool, SessionError> {
        let req = ToolCallCancelReq {
            agent: Some(self.name.clone()),
            computer: None,
            req_id: req_id.to_string(),
        };
        let ack: Value = self
            .request(methods::TOOL_CALL_CANCEL, json!(req), self.request_timeout)
            .await?;
        Ok(ack["cancelled"].as_bool().unwrap_or(false))
    }

    pub async fn get_tools(&self, computer: &str) -> Result<Vec<SmcpTool>, SessionError> {
        let ret: GetToolsRet = self
            .request(
                methods::GET_TOOLS,
                json!({ "computer": computer }),
                self.request_timeout,
            )
            .await?;
        Ok(ret.tools)
    }

    pub async fn get_mcp_config(&self, computer: &str) -> Result<GetMcpConfigRet, SessionError> {
        self.request(
            methods::GET_MCP_CONFIG,
            json!({ "computer": computer }),
            self.request_timeout,
        )
        .await
    }

    pub async fn get_desktop(
        &self,
        computer: &str,
        desktop_size: Option<usize>,
        window: Option<&str>,
    ) -> Result<Vec<DesktopWindow>, SessionError> {
        let req = GetDesktopReq {
            computer: computer.to_string(),
            desktop_size,
            window: window.map(str::to_string),
        };
        let ret: GetDesktopRet = self
            .request(methods::GET_DESKTOP, json!(req), self.request_timeout)
            .await?;
        Ok(ret.windows)
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    pub async fn list_resources(
        &self,
        computer: &str,
        cursor: Option<&str>,
    ) -> Result<ResourceListRet, SessionError> {
        let req = ResourceListReq {
            computer: computer.to_string(),
            cursor: cursor.map(str::to_string),
        };
        self.request(methods::RESOURCES_LIST, json!(req), self.request_timeout)
            .await
    }

    /// Follow cursors until the listing is exhausted.
    pub async fn list_all_resources(
        &self,
        computer: &str,
    ) -> Result<Vec<ResourceEntry>, SessionError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self.list_resources(computer, cursor.as_deref()).await?;
            all.extend(page.resources);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => return Ok(all),
            }
        }
    }

    pub async fn list_resource_templates(
        &self,
        computer: &str,
    ) -> Result<Vec<ResourceTemplate>, SessionError> {
        let ret: ResourceTemplatesRet = self
            .request(
                methods::RESOURCES_TEMPLATES_LIST,
                json!({ "computer": computer }),
                self.request_timeout,
            )
            .await?;
        Ok(ret.resource_templates)
    }

    fn uri_req(computer: &str, uri: &str) -> Value {
        json!(ResourceUriReq {
            computer: computer.to_string(),
            uri: uri.to_string(),
        })
    }

    pub async fn read_resource(
        &self,
        computer: &str,
        uri: &str,
    ) -> Result<Vec<ResourceContents>, SessionError> {
        let ret: ResourceReadRet = self
            .request(
                methods::RESOURCES_READ,
                Self::uri_req(computer, uri),
                self.request_timeout,
            )
            .await?;
        Ok(ret.contents)
    }

    pub async fn subscribe(&self, computer: &str, uri: &str) -> Result<(), SessionError> {
        self.peer
            .request(
                methods::RESOURCES_SUBSCRIBE,
                Self::uri_req(computer, uri),
                self.request_timeout,
            )
            .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, computer: &str, uri: &str) -> Result<(), SessionError> {
        self.peer
            .request(
                methods::RESOURCES_UNSUBSCRIBE,
                Self::uri_req(computer, uri),
                self.request_timeout,
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Channel
    // ------------------------------------------------------------------

    /// Wait until the hub connection is gone.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn close(&self) {
        self.peer.close();
    }
}
