// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The signaling hub.
//!
//! Sockets join offices as an Agent or a Computer. The [`Hub`] routes Agent
//! requests to Computers in the same office and fans Computer notifications
//! out to the office or to resource subscribers. State lives in the
//! [`SessionRegistry`].

mod hub;
mod registry;

pub use hub::Hub;
pub use registry::{Departure, JoinOutcome, Session, SessionRegistry, SubscriptionKey};

use std::io;
use std::sync::Arc;

use tokio::net::{TcpListener, ToSocketAddrs};
use tracing::{debug, info, warn};

/// Bind `addr` and serve until the listener fails.
pub async fn listen<A: ToSocketAddrs>(addr: A) -> io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Hub listening");
    serve(listener, Hub::new()).await
}

/// Accept connections from `listener` into `hub`.
pub async fn serve(listener: TcpListener, hub: Arc<Hub>) -> io::Result<()> {
    loop {
        let (stream, remote) = listener.accept().await?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(%remote, error = %e, "Failed to set TCP_NODELAY");
        }
        debug!(%remote, "Accepted connection");
        hub.accept(stream);
    }
}
