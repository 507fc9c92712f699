// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Model Context Protocol (MCP) client side of the Computer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Manager                          │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐      │
//! │  │ Connection  │  │ Connection  │  │ Connection  │      │
//! │  │ (server1)   │  │ (server2)   │  │ (server3)   │      │
//! │  └──────┬──────┘  └──────┬──────┘  └──────┬──────┘      │
//! └─────────┼────────────────┼────────────────┼─────────────┘
//!           │                │                │
//!     ┌─────▼────────────────▼────────────────▼─────┐
//!     │          rmcp client session (McpTransport) │
//!     │   child process  │  streamable HTTP / SSE   │
//!     └─────────────────────────────────────────────┘
//! ```
//!
//! Each [`Connection`] owns one [`McpClient`] at a time and replaces it when
//! the transport drops. The [`Manager`] aggregates every connection into one
//! tool and resource view.

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;
pub mod types;
pub mod window;

pub use client::McpClient;
pub use config::{ServerConfig, ToolMeta, TransportConfig};
pub use connection::{
    BackoffConfig, Connection, ConnectionEvent, ConnectionEventKind, ConnectionOptions,
    ConnectionSnapshot, Trigger,
};
pub use error::{ErrorKind, McpError};
pub use manager::{AggregateView, Manager, ManagerEvent, ToolConflict, ToolRoute, WindowEntry};
pub use transport::{
    DefaultTransportFactory, McpTransport, RmcpTransport, TransportEvent, TransportFactory,
};
pub use types::*;
pub use window::{WindowUri, WindowUriError};
