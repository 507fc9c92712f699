// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One end of a session channel.
//!
//! A [`Peer`] owns a byte stream, writes frames through a single writer task
//! and demultiplexes responses by id. Incoming requests are handed to a
//! [`FrameHandler`] on their own task so a slow request never blocks the
//! channel; notifications are handled inline to preserve their order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use super::frame::{decode, encode, ErrorBody, Frame};
use crate::error::SessionError;

static NEXT_PEER: AtomicU64 = AtomicU64::new(1);

type PendingMap = HashMap<String, oneshot::Sender<Result<Value, ErrorBody>>>;

/// Receives what the other end sends.
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn on_request(
        &self,
        peer: Arc<Peer>,
        method: String,
        params: Value,
    ) -> Result<Value, ErrorBody>;

    async fn on_notification(&self, peer: Arc<Peer>, method: String, params: Value);

    /// The channel closed. Called once.
    async fn on_close(&self, _peer: Arc<Peer>) {}
}

/// A live session channel.
pub struct Peer {
    id: u64,
    outbound: mpsc::UnboundedSender<Frame>,
    pending: Mutex<PendingMap>,
    next_id: AtomicU64,
    closed: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl std::fmt::Debug for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Peer {
    /// Start serving `stream`.
    pub fn spawn<S>(stream: S, handler: Arc<dyn FrameHandler>) -> Arc<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let peer = Arc::new(Self {
            id: NEXT_PEER.fetch_add(1, Ordering::Relaxed),
            outbound,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            shutdown: Mutex::new(Some(shutdown_tx)),
        });

        tokio::spawn(write_loop(peer.id, write_half, outbound_rx, shutdown_rx));
        tokio::spawn(read_loop(Arc::clone(&peer), read_half, handler));
        peer
    }

    /// Process-unique id of this channel.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, frame: Frame) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        self.outbound.send(frame).map_err(|_| SessionError::Closed)
    }

    /// Send a request and wait for its response.
    ///
    /// On timeout the pending entry is dropped, so a late response is
    /// discarded when it arrives.
    pub async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id.clone(), tx);

        if let Err(e) = self.send(Frame::request(id.clone(), method, params)) {
            self.pending().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(body))) => Err(body.into()),
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => {
                self.pending().remove(&id);
                Err(SessionError::Timeout {
                    method: method.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Send a notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<(), SessionError> {
        self.send(Frame::notification(method, params))
    }

    /// Close the channel. Pending requests fail with [`SessionError::Closed`].
    pub fn close(&self) {
        let shutdown = self
            .shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }
        self.mark_closed();
    }

    fn mark_closed(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pending: Vec<_> = self.pending().drain().collect();
        for (_, tx) in pending {
            drop(tx);
        }
        true
    }

    fn complete(&self, id: &str, result: Result<Value, ErrorBody>) {
        match self.pending().remove(id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => debug!(peer = self.id, id, "Discarding response for an unknown request"),
        }
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

async fn write_loop<W>(
    peer: u64,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    mut shutdown: oneshot::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let line = match encode(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(peer, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!(peer, error = %e, "Write failed");
                    break;
                }
                if let Err(e) = writer.flush().await {
                    debug!(peer, error = %e, "Flush failed");
                    break;
                }
            }
            _ = &mut shutdown => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop<R>(peer: Arc<Peer>, reader: R, handler: Arc<dyn FrameHandler>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(peer = peer.id, error = %e, "Read failed");
                break;
            }
        }
        if line.trim().is_empty() {
            continue;
        }

        let frame = match decode(&line) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(peer = peer.id, error = %e, "Dropping malformed frame");
                continue;
            }
        };
        trace!(peer = peer.id, ?frame, "Frame received");

        match frame {
            Frame::Request { id, method, params } => {
                let peer = Arc::clone(&peer);
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let response = match handler.on_request(Arc::clone(&peer), method, params).await {
                        Ok(result) => Frame::success(id, result),
                        Err(error) => Frame::failure(id, error),
                    };
                    if peer.send(response).is_err() {
                        debug!(peer = peer.id, "Channel closed before the response was sent");
                    }
                });
            }
            Frame::Response { id, result, error } => {
                let result = match error {
                    Some(error) => Err(error),
                    None => Ok(result.unwrap_or(Value::Null)),
                };
                peer.complete(&id, result);
            }
            Frame::Notification { method, params } => {
                handler
                    .on_notification(Arc::clone(&peer), method, params)
                    .await;
            }
        }
    }

    if peer.mark_closed() {
        debug!(peer = peer.id, "Channel closed");
    }
    let _ = peer
        .shutdown
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .take()
        .map(|tx| tx.send(()));
    handler.on_close(peer).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::duplex;

    struct Echo {
        notes: Mutex<Vec<String>>,
        closed: AtomicBool,
    }

    impl Echo {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                notes: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl FrameHandler for Echo {
        async fn on_request(
            &self,
            _peer: Arc<Peer>,
            method: String,
            params: Value,
        ) -> Result<Value, ErrorBody> {
            match method.as_str() {
                "echo" => Ok(params),
                "sleep" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("late"))
                }
                other => Err(ErrorBody::method_not_found(other)),
            }
        }

        async fn on_notification(&self, _peer: Arc<Peer>, method: String, _params: Value) {
            self.notes.lock().unwrap().push(method);
        }

        async fn on_close(&self, _peer: Arc<Peer>) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn pair() -> (Arc<Peer>, Arc<Peer>, Arc<Echo>, Arc<Echo>) {
        let (a, b) = duplex(64 * 1024);
        let ha = Echo::new();
        let hb = Echo::new();
        let pa = Peer::spawn(a, ha.clone());
        let pb = Peer::spawn(b, hb.clone());
        (pa, pb, ha, hb)
    }

    #[tokio::test]
    async fn test_request_response() {
        let (a, _b, _, _) = pair();
        let result = a
            .request("echo", json!({"x": 1}), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));

        let err = a
            .request("nope", Value::Null, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Remote { ref kind, .. } if kind == "method_not_found"));
    }

    #[tokio::test]
    async fn test_timeout_discards_late_response() {
        let (a, _b, _, _) = pair();
        let started = std::time::Instant::now();
        let err = a
            .request("sleep", Value::Null, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(a.pending_count(), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!a.is_closed());
        let result = a.request("echo", json!(2), Duration::from_secs(1)).await.unwrap();
        assert_eq!(result, json!(2));
    }

    #[tokio::test]
    async fn test_notifications_in_order() {
        let (a, _b, _, hb) = pair();
        for i in 0..5 {
            a.notify(&format!("n{}", i), Value::Null).unwrap();
        }
        a.request("echo", Value::Null, Duration::from_secs(1)).await.unwrap();
        assert_eq!(
            *hb.notes.lock().unwrap(),
            vec!["n0", "n1", "n2", "n3", "n4"]
        );
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_notifies_other_side() {
        let (a, b, _, hb) = pair();
        let waiting = {
            let a = Arc::clone(&a);
            tokio::spawn(async move { a.request("sleep", Value::Null, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        a.close();

        assert!(matches!(waiting.await.unwrap(), Err(SessionError::Closed)));
        assert!(matches!(a.notify("x", Value::Null), Err(SessionError::Closed)));

        for _ in 0..100 {
            if hb.closed.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(hb.closed.load(Ordering::SeqCst));
        assert!(b.is_closed());
    }
}
