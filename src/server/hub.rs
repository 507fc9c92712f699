// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request routing between Agents and Computers.
//!
//! Agent requests name a Computer in the Agent's office and are forwarded to
//! it. Tool calls get extra care: each is tracked by `(agent socket, req_id)`
//! so it can be cancelled, and a call that outlives its timeout is cancelled
//! on the Computer and answered with an error-flagged result.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::registry::{Departure, SessionRegistry, SubscriptionKey};
use crate::error::SessionError;
use crate::mcp::ToolResult;
use crate::protocol::methods;
use crate::protocol::{
    parse_params, to_result, ComputerNotification, ErrorBody, FrameHandler,
    JoinOfficeReq, LeaveOfficeReq, ListRoomRet, OfficeNotification, Peer,
    ResourceUpdatedNotification, ResourceUriReq, Role, ToolCallCancelReq, ToolCallReq,
    DEFAULT_REQUEST_TIMEOUT,
};
use crate::telemetry::CallOutcome;
#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

type CallKey = (u64, String);

/// The signaling hub.
#[derive(Default)]
pub struct Hub {
    registry: SessionRegistry,
    in_flight: Mutex<HashMap<CallKey, oneshot::Sender<()>>>,
}

impl Hub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve one connection.
    pub fn accept<S>(self: &Arc<Self>, stream: S) -> Arc<Peer>
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
    {
        let handler: Arc<dyn FrameHandler> = Arc::clone(self) as Arc<dyn FrameHandler>;
        let peer = Peer::spawn(stream, handler);
        debug!(peer = peer.id(), "Session connected");
        peer
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<CallKey, oneshot::Sender<()>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn broadcast(&self, office_id: &str, except: Option<u64>, method: &str, params: Value) {
        for peer in self.registry.office_peers(office_id, except) {
            if let Err(e) = peer.notify(method, params.clone()) {
                debug!(peer = peer.id(), method, error = %e, "Broadcast skipped");
            }
        }
    }

    fn office_note(role: Role, name: &str, office_id: &str) -> Value {
        let (computer, agent) = match role {
            Role::Computer => (Some(name.to_string()), None),
            Role::Agent => (None, Some(name.to_string())),
        };
        json!(OfficeNotification {
            office_id: office_id.to_string(),
            computer,
            agent,
        })
    }

    fn announce_departure(&self, departure: &Departure) {
        let session = &departure.session;
        self.broadcast(
            &departure.office_id,
            Some(session.peer.id()),
            methods::NOTIFY_LEAVE_OFFICE,
            Self::office_note(session.role, &session.name, &departure.office_id),
        );
        for key in &departure.orphaned {
            self.release_subscription(key.clone());
        }
    }

    /// Tell a Computer nobody watches a resource any more.
    fn release_subscription(&self, key: SubscriptionKey) {
        let Some(computer) = self.registry.computer_peer(&key.office_id, &key.computer) else {
            return;
        };
        Self::send_unsubscribe(computer, key);
    }

    fn send_unsubscribe(computer: Arc<Peer>, key: SubscriptionKey) {
        tokio::spawn(async move {
            let params = json!(ResourceUriReq {
                computer: key.computer.clone(),
                uri: key.uri.clone(),
            });
            if let Err(e) = computer
                .request(methods::RESOURCES_UNSUBSCRIBE, params, DEFAULT_REQUEST_TIMEOUT)
                .await
            {
                debug!(uri = %key.uri, error = %e, "Release of orphaned subscription failed");
            }
        });
    }

    fn target(&self, office_id: &str, params: &Value) -> Result<(String, Arc<Peer>), ErrorBody> {
        let computer = params
            .get("computer")
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorBody::invalid_params("missing computer"))?;
        let peer = self
            .registry
            .computer_peer(office_id, computer)
            .ok_or_else(|| SessionError::PeerNotFound(computer.to_string()))?;
        Ok((computer.to_string(), peer))
    }

    // ------------------------------------------------------------------
    // Office membership
    // ------------------------------------------------------------------

    fn join_office(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        let req: JoinOfficeReq = parse_params(params)?;
        let outcome = self.registry.join(peer, &req)?;
        if !outcome.already_joined {
            if let Some(previous) = &outcome.previous_office {
                self.broadcast(
                    previous,
                    Some(peer.id()),
                    methods::NOTIFY_LEAVE_OFFICE,
                    Self::office_note(req.role, &req.name, previous),
                );
            }
            info!(role = %req.role, name = %req.name, office = %req.office_id, "Joined office");
            self.broadcast(
                &req.office_id,
                Some(peer.id()),
                methods::NOTIFY_ENTER_OFFICE,
                Self::office_note(req.role, &req.name, &req.office_id),
            );
        }
        to_result(&ListRoomRet {
            members: self.registry.members(&req.office_id),
            office_id: req.office_id,
        })
    }

    fn leave_office(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        let req: LeaveOfficeReq = parse_params(params)?;
        let departure = self.registry.leave(peer.id(), &req.office_id)?;
        info!(name = %departure.session.name, office = %req.office_id, "Left office");
        self.announce_departure(&departure);
        if departure.session.role == Role::Agent {
            self.cancel_all(peer.id());
        }
        Ok(json!({}))
    }

    fn list_room(&self, peer: &Arc<Peer>) -> Result<Value, ErrorBody> {
        let session = self
            .registry
            .session(peer.id())
            .ok_or(SessionError::NotInOffice)?;
        let office_id = session.office_id.ok_or(SessionError::NotInOffice)?;
        to_result(&ListRoomRet {
            members: self.registry.members(&office_id),
            office_id,
        })
    }

    // ------------------------------------------------------------------
    // Tool calls
    // ------------------------------------------------------------------

    async fn tool_call(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        let (agent, office_id) = self.registry.require(peer.id(), Role::Agent)?;
        let mut req: ToolCallReq = parse_params(params)?;
        let (_, computer) = self.target(&office_id, &json!({ "computer": req.computer }))?;
        req.agent = Some(agent.name.clone());

        let timeout = req
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let key = (peer.id(), req.req_id.clone());
        let (cancel_tx, cancel_rx) = oneshot::channel();
        if self.in_flight().insert(key.clone(), cancel_tx).is_some() {
            warn!(req_id = %req.req_id, "Duplicate request id from agent");
        }

        debug!(req_id = %req.req_id, tool = %req.tool_name, computer = %req.computer, "Routing tool call");
        let req_id = req.req_id.clone();
        let outcome = tokio::select! {
            result = computer.request(methods::TOOL_CALL, json!(req), timeout) => Some(result),
            _ = cancel_rx => None,
        };
        self.in_flight().remove(&key);

        let (result, ended) = match outcome {
            Some(Ok(value)) => {
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.record_call_outcome(CallOutcome::Completed);
                return Ok(value);
            }
            Some(Err(SessionError::Timeout { .. })) => {
                warn!(req_id = %req_id, timeout_ms = timeout.as_millis() as u64, "Tool call timed out");
                self.cancel_on_computer(&computer, &agent.name, &req_id);
                let result = ToolResult::error_with_kind(
                    format!("Tool call {} timed out after {}ms", req_id, timeout.as_millis()),
                    "timeout",
                );
                (result, CallOutcome::TimedOut)
            }
            Some(Err(SessionError::Remote { kind, message, .. })) => {
                (ToolResult::error_with_kind(message, &kind), CallOutcome::Failed)
            }
            Some(Err(e)) => (
                ToolResult::error_with_kind(e.to_string(), "transport"),
                CallOutcome::Failed,
            ),
            None => {
                self.cancel_on_computer(&computer, &agent.name, &req_id);
                let result = ToolResult::error_with_kind(
                    format!("Tool call {} cancelled", req_id),
                    "cancelled",
                );
                (result, CallOutcome::Cancelled)
            }
        };
        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_call_outcome(ended);
        #[cfg(not(feature = "telemetry"))]
        let _ = ended;
        to_result(&result)
    }

    fn cancel_on_computer(&self, computer: &Peer, agent: &str, req_id: &str) {
        let note = ToolCallCancelReq {
            agent: Some(agent.to_string()),
            computer: None,
            req_id: req_id.to_string(),
        };
        if let Err(e) = computer.notify(methods::NOTIFY_TOOL_CALL_CANCEL, json!(note)) {
            debug!(req_id, error = %e, "Cancel not delivered");
        }
    }

    /// Cancel one call of `agent_peer`. Returns false if it is not running.
    fn cancel(&self, agent_peer: u64, req_id: &str) -> bool {
        match self.in_flight().remove(&(agent_peer, req_id.to_string())) {
            Some(tx) => tx.send(()).is_ok(),
            None => {
                debug!(req_id, "Cancel for a call that is not running");
                false
            }
        }
    }

    fn cancel_all(&self, agent_peer: u64) {
        let mut in_flight = self.in_flight();
        let keys: Vec<CallKey> = in_flight
            .keys()
            .filter(|(peer, _)| *peer == agent_peer)
            .cloned()
            .collect();
        for key in keys {
            if let Some(tx) = in_flight.remove(&key) {
                let _ = tx.send(());
            }
        }
    }

    fn tool_call_cancel(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        self.registry.require(peer.id(), Role::Agent)?;
        let req: ToolCallCancelReq = parse_params(params)?;
        let cancelled = self.cancel(peer.id(), &req.req_id);
        Ok(json!({ "cancelled": cancelled }))
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    async fn forward(&self, peer: &Arc<Peer>, method: &str, params: Value) -> Result<Value, ErrorBody> {
        let (_, office_id) = self.registry.require(peer.id(), Role::Agent)?;
        let (_, computer) = self.target(&office_id, &params)?;
        Ok(computer
            .request(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await?)
    }

    async fn subscribe(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        let (_, office_id) = self.registry.require(peer.id(), Role::Agent)?;
        let req: ResourceUriReq = parse_params(params)?;
        let (_, computer) = self.target(&office_id, &json!({ "computer": req.computer }))?;

        let result = computer
            .request(methods::RESOURCES_SUBSCRIBE, json!(req), DEFAULT_REQUEST_TIMEOUT)
            .await?;
        let key = SubscriptionKey {
            office_id,
            computer: req.computer,
            uri: req.uri,
        };
        if let Err(e) = self.registry.subscribe(key.clone(), peer.id()) {
            debug!(uri = %key.uri, computer = %key.computer, error = %e, "Subscriber gone, releasing");
            if !self.registry.is_subscribed(&key) {
                Self::send_unsubscribe(computer, key);
            }
            return Err(e.into());
        }
        debug!(uri = %key.uri, computer = %key.computer, "Subscribed");
        Ok(result)
    }

    async fn unsubscribe(&self, peer: &Arc<Peer>, params: Value) -> Result<Value, ErrorBody> {
        let (_, office_id) = self.registry.require(peer.id(), Role::Agent)?;
        let req: ResourceUriReq = parse_params(params)?;
        let key = SubscriptionKey {
            office_id,
            computer: req.computer.clone(),
            uri: req.uri.clone(),
        };
        let (removed, last) = self.registry.unsubscribe(&key, peer.id());
        if !last {
            return Ok(json!({ "uri": req.uri, "removed": removed }));
        }
        let (_, computer) = self.target(&key.office_id, &json!({ "computer": req.computer }))?;
        computer
            .request(methods::RESOURCES_UNSUBSCRIBE, json!(req), DEFAULT_REQUEST_TIMEOUT)
            .await?;
        Ok(json!({ "uri": key.uri, "removed": true }))
    }

    // ------------------------------------------------------------------
    // Computer notifications
    // ------------------------------------------------------------------

    fn computer_notification(&self, peer: &Arc<Peer>, method: &str, params: Value) {
        let (session, office_id) = match self.registry.require(peer.id(), Role::Computer) {
            Ok(found) => found,
            Err(e) => {
                debug!(peer = peer.id(), method, error = %e, "Ignoring notification");
                return;
            }
        };
        let note = json!(ComputerNotification {
            computer: session.name.clone(),
        });
        match method {
            methods::UPDATE_MCP_CONFIG => {
                self.broadcast(&office_id, Some(peer.id()), methods::NOTIFY_UPDATE_MCP_CONFIG, note)
            }
            methods::UPDATE_TOOL_LIST => {
                self.broadcast(&office_id, Some(peer.id()), methods::NOTIFY_UPDATE_TOOL_LIST, note)
            }
            methods::RESOURCES_LIST_CHANGED => self.broadcast(
                &office_id,
                Some(peer.id()),
                methods::NOTIFY_RESOURCES_LIST_CHANGED,
                note,
            ),
            methods::RESOURCES_UPDATED => {
                let mut update: ResourceUpdatedNotification = match parse_params(params) {
                    Ok(update) => update,
                    Err(e) => {
                        warn!(error = %e.message, "Malformed resource update");
                        return;
                    }
                };
                update.computer = session.name.clone();
                let key = SubscriptionKey {
                    office_id,
                    computer: session.name,
                    uri: update.uri.clone(),
                };
                for subscriber in self.registry.subscribers(&key) {
                    if let Err(e) =
                        subscriber.notify(methods::NOTIFY_RESOURCES_UPDATED, json!(update))
                    {
                        debug!(peer = subscriber.id(), error = %e, "Update not delivered");
                    }
                }
            }
            _ => debug!(method, "Ignoring computer notification"),
        }
    }
}

#[async_trait]
impl FrameHandler for Hub {
    async fn on_request(
        &self,
        peer: Arc<Peer>,
        method: String,
        params: Value,
    ) -> Result<Value, ErrorBody> {
        match method.as_str() {
            methods::JOIN_OFFICE => self.join_office(&peer, params),
            methods::LEAVE_OFFICE => self.leave_office(&peer, params),
            methods::LIST_ROOM => self.list_room(&peer),
            methods::TOOL_CALL => self.tool_call(&peer, params).await,
            methods::TOOL_CALL_CANCEL => self.tool_call_cancel(&peer, params),
            methods::RESOURCES_SUBSCRIBE => self.subscribe(&peer, params).await,
            methods::RESOURCES_UNSUBSCRIBE => self.unsubscribe(&peer, params).await,
            m if methods::is_forwarded(m) => self.forward(&peer, m, params).await,
            other => Err(ErrorBody::method_not_found(other)),
        }
    }

    async fn on_notification(&self, peer: Arc<Peer>, method: String, params: Value) {
        match method.as_str() {
            methods::TOOL_CALL_CANCEL => {
                if let Err(e) = self.tool_call_cancel(&peer, params) {
                    debug!(error = %e.message, "Cancel rejected");
                }
            }
            methods::UPDATE_MCP_CONFIG
            | methods::UPDATE_TOOL_LIST
            | methods::RESOURCES_LIST_CHANGED
            | methods::RESOURCES_UPDATED => self.computer_notification(&peer, &method, params),
            other => debug!(method = other, "Ignoring notification"),
        }
    }

    async fn on_close(&self, peer: Arc<Peer>) {
        self.cancel_all(peer.id());
        if let Some(departure) = self.registry.disconnect(peer.id()) {
            info!(name = %departure.session.name, office = %departure.office_id, "Session disconnected");
            self.announce_departure(&departure);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Computer side: answers subscribe slowly and records unsubscribes.
    #[derive(Default)]
    struct SlowComputer {
        unsubscribed: Mutex<Vec<String>>,
    }

    impl SlowComputer {
        fn unsubscribed(&self) -> Vec<String> {
            self.unsubscribed.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FrameHandler for SlowComputer {
        async fn on_request(
            &self,
            _peer: Arc<Peer>,
            method: String,
            params: Value,
        ) -> Result<Value, ErrorBody> {
            match method.as_str() {
                methods::RESOURCES_SUBSCRIBE => {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    Ok(json!({ "uri": params["uri"] }))
                }
                methods::RESOURCES_UNSUBSCRIBE => {
                    let uri = params["uri"].as_str().unwrap_or_default().to_string();
                    self.unsubscribed.lock().unwrap().push(uri);
                    Ok(json!({}))
                }
                methods::GET_TOOLS => Ok(json!({ "tools": [{ "name": "add" }] })),
                other => Err(ErrorBody::method_not_found(other)),
            }
        }

        async fn on_notification(&self, _peer: Arc<Peer>, _method: String, _params: Value) {}
    }

    struct Quiet;

    #[async_trait]
    impl FrameHandler for Quiet {
        async fn on_request(
            &self,
            _peer: Arc<Peer>,
            method: String,
            _params: Value,
        ) -> Result<Value, ErrorBody> {
            Err(ErrorBody::method_not_found(&method))
        }

        async fn on_notification(&self, _peer: Arc<Peer>, _method: String, _params: Value) {}
    }

    fn connect(hub: &Arc<Hub>, handler: Arc<dyn FrameHandler>) -> Arc<Peer> {
        let (hub_end, client_end) = duplex(64 * 1024);
        hub.accept(hub_end);
        Peer::spawn(client_end, handler)
    }

    async fn join(peer: &Peer, role: Role, name: &str) {
        let req = JoinOfficeReq {
            role,
            name: name.to_string(),
            office_id: "room-1".to_string(),
        };
        peer.request(methods::JOIN_OFFICE, json!(req), DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
    }

    async fn office(hub: &Arc<Hub>) -> (Arc<SlowComputer>, Arc<Peer>, Arc<Peer>) {
        let computer = Arc::new(SlowComputer::default());
        let computer_peer = connect(hub, Arc::clone(&computer) as Arc<dyn FrameHandler>);
        join(&computer_peer, Role::Computer, "comp-1").await;
        let agent = connect(hub, Arc::new(Quiet));
        join(&agent, Role::Agent, "agent-1").await;
        (computer, computer_peer, agent)
    }

    #[tokio::test]
    async fn test_listing_requests_are_forwarded() {
        let hub = Hub::new();
        let (_computer, _computer_peer, agent) = office(&hub).await;

        let tools = agent
            .request(
                methods::GET_TOOLS,
                json!({ "computer": "comp-1" }),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(tools["tools"][0]["name"], "add");
    }

    #[tokio::test]
    async fn test_subscription_released_when_agent_leaves_mid_request() {
        let hub = Hub::new();
        let (computer, _computer_peer, agent) = office(&hub).await;

        let pending = {
            let agent = Arc::clone(&agent);
            tokio::spawn(async move {
                agent
                    .request(
                        methods::RESOURCES_SUBSCRIBE,
                        json!({ "computer": "comp-1", "uri": "file:///a" }),
                        DEFAULT_REQUEST_TIMEOUT,
                    )
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        agent.close();
        assert!(pending.await.unwrap().is_err());

        tokio::time::timeout(Duration::from_secs(5), async {
            while computer.unsubscribed().is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("computer was never told to unsubscribe");

        assert_eq!(computer.unsubscribed(), vec!["file:///a"]);
        assert_eq!(hub.registry().subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscription_kept_while_agent_stays() {
        let hub = Hub::new();
        let (computer, _computer_peer, agent) = office(&hub).await;

        agent
            .request(
                methods::RESOURCES_SUBSCRIBE,
                json!({ "computer": "comp-1", "uri": "file:///a" }),
                DEFAULT_REQUEST_TIMEOUT,
            )
            .await
            .unwrap();
        assert_eq!(hub.registry().subscription_count(), 1);
        assert!(computer.unsubscribed().is_empty());
    }
}
