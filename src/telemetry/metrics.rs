// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metrics.
//!
//! Tool calls are keyed `mcp.<server>.<tool>`; operations use dotted names
//! such as `mcp.client.connect` or `mcp.connection.reconnect`. The hub counts
//! routed calls and how they ended.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// How a routed tool call ended at the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Completed,
    TimedOut,
    Cancelled,
    Failed,
}

#[derive(Debug, Default)]
struct RoutingCounters {
    completed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    failed: AtomicU64,
}

impl RoutingCounters {
    fn counter(&self, outcome: CallOutcome) -> &AtomicU64 {
        match outcome {
            CallOutcome::Completed => &self.completed,
            CallOutcome::TimedOut => &self.timed_out,
            CallOutcome::Cancelled => &self.cancelled,
            CallOutcome::Failed => &self.failed,
        }
    }

    fn snapshot(&self) -> RoutingSnapshot {
        RoutingSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [&self.completed, &self.timed_out, &self.cancelled, &self.failed] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<BTreeMap<String, ToolMetrics>>,
    operations: RwLock<BTreeMap<String, OperationMetrics>>,
    routing: RoutingCounters,
    start_time: Instant,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(BTreeMap::new()),
            routing: RoutingCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record one tool call.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        write(&self.tools)
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record one timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        write(&self.operations)
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    /// Count a routed call's outcome.
    pub fn record_call_outcome(&self, outcome: CallOutcome) {
        self.routing.counter(outcome).fetch_add(1, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        read(&self.tools).get(name).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: read(&self.tools).clone(),
            operations: read(&self.operations).clone(),
            routing: self.routing.snapshot(),
            uptime: self.uptime(),
        }
    }

    pub fn reset(&self) {
        write(&self.tools).clear();
        write(&self.operations).clear();
        self.routing.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency bounds shared by tools and operations.
#[derive(Debug, Clone, PartialEq)]
pub struct Latency {
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for Latency {
    fn default() -> Self {
        Self {
            count: 0,
            total: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
        }
    }
}

impl Latency {
    fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total += duration;
        self.min = self.min.min(duration);
        self.max = self.max.max(duration);
    }

    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolMetrics {
    pub latency: Latency,
    pub successes: u64,
    pub failures: u64,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.latency.record(duration);
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }

    pub fn invocations(&self) -> u64 {
        self.latency.count
    }

    /// Fraction of successful calls; 1.0 when there were none.
    pub fn success_rate(&self) -> f64 {
        match self.latency.count {
            0 => 1.0,
            n => self.successes as f64 / n as f64,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationMetrics {
    pub latency: Latency,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn record(&mut self, duration: Duration) {
        self.latency.record(duration);
        self.histogram.record(duration);
    }
}

/// Fixed-bucket latency histogram. Bounds are in microseconds; the last
/// bucket is open-ended.
#[derive(Debug, Clone)]
pub struct Histogram {
    bounds: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_buckets(bounds: Vec<u64>) -> Self {
        let counts = vec![0; bounds.len() + 1];
        Self { bounds, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let index = self
            .bounds
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.bounds.len());
        self.counts[index] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`th percentile.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut seen = 0;
        for (i, count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                let bound = self
                    .bounds
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.bounds.last().copied().unwrap_or(0) * 10);
                return Duration::from_micros(bound);
            }
        }
        Duration::ZERO
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s, 60s
        Self::with_buckets(vec![1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    pub completed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub failed: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub tools: BTreeMap<String, ToolMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
    pub routing: RoutingSnapshot,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Human-readable report, sorted by name.
    pub fn format_report(&self) -> String {
        let mut report = format!("Uptime: {:.2?}\n", self.uptime);
        let r = &self.routing;
        report.push_str(&format!(
            "Routed calls: {} completed, {} timed out, {} cancelled, {} failed\n",
            r.completed, r.timed_out, r.cancelled, r.failed
        ));

        if !self.tools.is_empty() {
            report.push_str("\nTools:\n");
            for (name, m) in &self.tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}\n",
                    name,
                    m.invocations(),
                    m.success_rate() * 100.0,
                    m.latency.avg()
                ));
            }
        }

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            for (name, m) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    m.latency.count,
                    m.latency.avg(),
                    m.histogram.p99()
                ));
            }
        }
        report
    }
}
