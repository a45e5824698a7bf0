// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for orchestrator performance monitoring.
//!
//! Lightweight in-process counters and latency histograms. The stress harness
//! and the CLI report read from [`GLOBAL_METRICS`]; nothing is exported.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Dispatched command outcomes, keyed by outcome label.
    commands: RwLock<HashMap<String, CommandMetrics>>,

    /// Timed operations (spawn, close, sample, ...).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Session lifecycle counters.
    sessions: SessionCounters,

    /// Start time for calculating uptime.
    start_time: Instant,
}

// A panic while holding a metrics lock leaves plain counters behind; keep using them.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            sessions: SessionCounters::default(),
            start_time: Instant::now(),
        }
    }

    /// Record a dispatched command.
    pub fn record_command(&self, name: &str, duration: Duration, success: bool) {
        let mut commands = write(&self.commands);
        let metrics = commands.entry(name.to_string()).or_default();
        metrics.record(duration, success);
    }

    /// Record a generic operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = write(&self.operations);
        let metrics = ops.entry(name.to_string()).or_default();
        metrics.record(duration);
    }

    /// Session lifecycle counters.
    pub fn sessions(&self) -> &SessionCounters {
        &self.sessions
    }

    /// Get metrics for a command label.
    pub fn command_metrics(&self, name: &str) -> Option<CommandMetrics> {
        read(&self.commands).get(name).cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands: read(&self.commands).clone(),
            operations: read(&self.operations).clone(),
            sessions_spawned: self.sessions.spawned(),
            failed_spawns: self.sessions.failed_spawns(),
            attention_detections: self.sessions.attention_detections(),
            sessions_closed: self.sessions.closed(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        write(&self.commands).clear();
        write(&self.operations).clear();
        self.sessions.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome metrics for dispatched commands.
#[derive(Debug, Clone)]
pub struct CommandMetrics {
    /// Total number of dispatches.
    pub dispatches: u64,

    /// Number of successful dispatches.
    pub successes: u64,

    /// Number of failed dispatches.
    pub failures: u64,

    /// Latency distribution.
    pub latency: Histogram,

    /// Total latency.
    pub total_duration: Duration,
}

impl CommandMetrics {
    /// Create new empty command metrics.
    pub fn new() -> Self {
        Self {
            dispatches: 0,
            successes: 0,
            failures: 0,
            latency: Histogram::default(),
            total_duration: Duration::ZERO,
        }
    }

    /// Record a dispatch outcome.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.dispatches += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.latency.record(duration);
    }

    /// Calculate average latency.
    pub fn avg_duration(&self) -> Duration {
        if self.dispatches == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.dispatches as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.dispatches == 0 {
            1.0
        } else {
            self.successes as f64 / self.dispatches as f64
        }
    }
}

impl Default for CommandMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Generic operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Create new operation metrics.
    pub fn new() -> Self {
        Self {
            count: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket histogram for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Upper bucket bounds in milliseconds; the last bucket is open-ended.
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket bounds (in milliseconds).
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let ms = duration.as_millis() as u64;
        let idx = self
            .bounds_ms
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Approximate percentile, reported as the upper bound of its bucket.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let ms = match self.bounds_ms.get(i) {
                    Some(&bound) => bound,
                    None => self.bounds_ms.last().copied().unwrap_or(0) * 2,
                };
                return Duration::from_millis(ms);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Terminal work is slow: 10ms .. 60s
        Self::with_bounds(vec![10, 50, 100, 500, 1_000, 5_000, 30_000, 60_000])
    }
}

/// Thread-safe session lifecycle counters.
#[derive(Debug, Default)]
pub struct SessionCounters {
    spawned: AtomicU64,
    failed_spawns: AtomicU64,
    attention_detections: AtomicU64,
    closed: AtomicU64,
}

impl SessionCounters {
    pub fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_spawn(&self) {
        self.failed_spawns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attention(&self) {
        self.attention_detections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close(&self) {
        self.closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::Relaxed)
    }

    pub fn failed_spawns(&self) -> u64 {
        self.failed_spawns.load(Ordering::Relaxed)
    }

    pub fn attention_detections(&self) -> u64 {
        self.attention_detections.load(Ordering::Relaxed)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.spawned.store(0, Ordering::Relaxed);
        self.failed_spawns.store(0, Ordering::Relaxed);
        self.attention_detections.store(0, Ordering::Relaxed);
        self.closed.store(0, Ordering::Relaxed);
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub commands: HashMap<String, CommandMetrics>,
    pub operations: HashMap<String, OperationMetrics>,
    pub sessions_spawned: u64,
    pub failed_spawns: u64,
    pub attention_detections: u64,
    pub sessions_closed: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Sessions: {} spawned, {} failed, {} closed, {} attention events\n\n",
            self.sessions_spawned, self.failed_spawns, self.sessions_closed, self.attention_detections
        ));

        if !self.commands.is_empty() {
            report.push_str("Command Metrics:\n");
            let mut names: Vec<_> = self.commands.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.commands[name];
                report.push_str(&format!(
                    "  {}: {} dispatches, {:.1}% success, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.dispatches,
                    metrics.success_rate() * 100.0,
                    metrics.avg_duration(),
                    metrics.latency.p99()
                ));
            }
            report.push('\n');
        }

        if !self.operations.is_empty() {
            report.push_str("Operation Metrics:\n");
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

/// Convenience function to record a command outcome to global metrics.
pub fn record_command(name: &str, duration: Duration, success: bool) {
    GLOBAL_METRICS.record_command(name, duration, success);
}

/// Convenience function to record an operation to global metrics.
pub fn record_operation(name: &str, duration: Duration) {
    GLOBAL_METRICS.record_operation(name, duration);
}
