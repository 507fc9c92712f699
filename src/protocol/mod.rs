// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session protocol between Agents, Computers and the hub.
//!
//! Every participant talks to the hub over one byte stream carrying
//! newline-delimited JSON [`Frame`]s. Requests are correlated by id;
//! notifications are fire-and-forget.

pub mod frame;
pub mod methods;
pub mod peer;
pub mod types;

pub use frame::{decode, decode_frames, encode, error_kind_name, ErrorBody, Frame};
pub use peer::{FrameHandler, Peer};
pub use types::*;

use std::time::Duration;

/// Default bound on requests that do not carry their own timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Extra time a caller allows beyond a tool call's own timeout, so the hub's
/// error-flagged result arrives before the caller gives up.
pub const TIMEOUT_GRACE: Duration = Duration::from_secs(2);
