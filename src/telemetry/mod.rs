// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry, tracing, and metrics infrastructure.
//!
//! - **Tracing**: Structured logging with spans for session and dispatch tracking
//! - **Metrics**: Session counters and latency histograms read by the harness
//! - **Correlation IDs**: Dispatch tracing across session tasks
//!
//! # Usage
//!
//! ```rust,ignore
//! use cctm::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```
//!
//! Public async operations carry `#[instrument]` (behind the `telemetry`
//! feature) and record ids, counts and durations, never output contents.

mod correlation;
mod init;
pub mod metrics;
pub mod spans;

pub use correlation::{CorrelationId, CorrelationIdExt};
pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{
    CommandMetrics, Histogram, Metrics, MetricsSnapshot, OperationMetrics, SessionCounters,
    GLOBAL_METRICS,
};
pub use spans::{DispatchSpan, TimedOperation};
