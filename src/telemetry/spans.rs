// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Span helpers for consistent instrumentation.

use std::time::{Duration, Instant};

use tracing::{info_span, Span};

use super::correlation::{CorrelationId, CorrelationIdExt};
use super::metrics::GLOBAL_METRICS;

/// RAII guard for timing a dispatched command.
///
/// Records the outcome label, latency, and success to metrics on finish.
pub struct DispatchSpan {
    start: Instant,
    span: Span,
}

impl DispatchSpan {
    /// Start a new dispatch span.
    pub fn start(id: &CorrelationId, session: &str) -> Self {
        let span = info_span!(
            "dispatch",
            correlation_id = tracing::field::Empty,
            session = %session,
            duration_ms = tracing::field::Empty,
            success = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        span.record_correlation_id(id);

        Self {
            start: Instant::now(),
            span,
        }
    }

    /// Get the underlying tracing span.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Time elapsed since the dispatch started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish the span, recording latency and outcome.
    pub fn finish(self, outcome: &str, success: bool) -> Duration {
        let duration = self.start.elapsed();

        self.span.record("duration_ms", duration.as_millis() as u64);
        self.span.record("success", success);
        self.span.record("outcome", outcome);

        GLOBAL_METRICS.record_command(outcome, duration, success);

        tracing::debug!(parent: &self.span, "Dispatch resolved");
        duration
    }
}

/// RAII guard for timing any operation.
///
/// Records the operation name and duration to metrics when finished or dropped.
pub struct TimedOperation {
    name: &'static str,
    start: Instant,
    span: Span,
    recorded: bool,
}

impl TimedOperation {
    /// Start a new timed operation.
    pub fn start(name: &'static str) -> Self {
        let span = info_span!(
            "operation",
            op = %name,
            duration_ms = tracing::field::Empty,
        );

        Self {
            name,
            start: Instant::now(),
            span,
            recorded: false,
        }
    }

    /// Get elapsed time so far.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Finish and record the operation.
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let duration = self.start.elapsed();
        if !self.recorded {
            self.recorded = true;
            self.span.record("duration_ms", duration.as_millis() as u64);
            GLOBAL_METRICS.record_operation(self.name, duration);
        }
        duration
    }
}

impl Drop for TimedOperation {
    fn drop(&mut self) {
        // Early returns through `?` still get timed
        self.record();
    }
}

/// Macro for timing an operation.
///
/// ```rust,ignore
/// let _timer = timed!("session.close");
/// ```
#[macro_export]
macro_rules! timed {
    ($name:expr) => {
        $crate::telemetry::TimedOperation::start($name)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_span_records_metrics() {
        let id = CorrelationId::new();
        let span = DispatchSpan::start(&id, "session-1");
        let duration = span.finish("span_test_outcome", false);

        let metrics = GLOBAL_METRICS.command_metrics("span_test_outcome").unwrap();
        assert!(metrics.failures >= 1);
        assert!(duration < Duration::from_secs(1));
    }

    #[test]
    fn test_timed_operation_records_once() {
        let op = TimedOperation::start("span_test_op");
        std::thread::sleep(Duration::from_millis(1));
        assert!(op.elapsed() > Duration::ZERO);
        op.finish();

        let metrics = GLOBAL_METRICS.operation_metrics("span_test_op").unwrap();
        assert_eq!(metrics.count, 1);
    }

    #[test]
    fn test_timed_operation_records_on_drop() {
        {
            let _timer = timed!("span_test_drop");
        }
        assert!(GLOBAL_METRICS.operation_metrics("span_test_drop").is_some());
    }
}
