// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging, metrics, and correlation ids.
//!
//! Initialize once at startup:
//!
//! ```rust,ignore
//! use smcp::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Metrics are recorded into [`GLOBAL_METRICS`] when the `telemetry` feature
//! is enabled.

mod correlation;
mod init;
pub mod metrics;

pub use correlation::CorrelationId;
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    CallOutcome, Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics,
    GLOBAL_METRICS,
};
