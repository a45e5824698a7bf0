// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Stress and validation harness.
//!
//! Drives an [`Orchestrator`] at two intensities:
//!
//! - [`Harness::quick_check`] spawns a handful of sessions, checks they come
//!   up within a deadline and under a memory ceiling, and tears them down.
//! - [`Harness::run_stress`] spawns many sessions at once, holds them for an
//!   observation window while sampling CPU and memory, then tears everything
//!   down and scores the run.
//!
//! Spawn failures are counted, never fatal. Teardown always runs.

mod sampler;
mod score;

pub use sampler::{ResourceSample, ResourceSampler, ResourceSummary};
pub use score::{performance_score, ScoreInputs};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use tracing::{debug, info, warn};

use crate::config::ResolvedHarnessConfig;
use crate::error::OrchestratorError;
use crate::orchestrator::Orchestrator;
use crate::session::{SessionEvent, SessionId};

/// Outcome of one quick validation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickCheckReport {
    pub passed: bool,
    pub sessions_requested: usize,
    pub sessions_ready: usize,
    pub failed_spawns: usize,
    pub memory_mb: f64,
    pub memory_ceiling_mb: f64,
    pub elapsed_ms: u64,
    pub problems: Vec<String>,
}

/// Immutable record of one stress run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StressTestResult {
    pub target_concurrency: usize,
    pub terminals_spawned: usize,
    pub active_terminals: usize,
    pub failed_spawns: usize,
    /// Failed spawns grouped by classification.
    pub failures_by_kind: BTreeMap<String, usize>,
    pub peak_cpu_percent: f64,
    pub avg_cpu_percent: f64,
    pub peak_memory_mb: f64,
    pub avg_memory_mb: f64,
    pub sample_count: usize,
    pub attention_detections: usize,
    pub duration_ms: u64,
    pub live_processes_after_teardown: usize,
    pub performance_score: f64,
    pub started_at: DateTime<Utc>,
}

impl StressTestResult {
    /// Plain-text report for terminals.
    pub fn format_report(&self) -> String {
        let mut out = String::new();
        out.push_str("=== Stress Test ===\n");
        out.push_str(&format!(
            "Sessions: {}/{} spawned, {} active, {} failed\n",
            self.terminals_spawned, self.target_concurrency, self.active_terminals, self.failed_spawns
        ));
        for (kind, count) in &self.failures_by_kind {
            out.push_str(&format!("  {kind}: {count}\n"));
        }
        out.push_str(&format!(
            "CPU: peak {:.1}% avg {:.1}%\n",
            self.peak_cpu_percent, self.avg_cpu_percent
        ));
        out.push_str(&format!(
            "Memory: peak {:.1} MB avg {:.1} MB ({} samples)\n",
            self.peak_memory_mb, self.avg_memory_mb, self.sample_count
        ));
        out.push_str(&format!("Attention detections: {}\n", self.attention_detections));
        out.push_str(&format!(
            "Duration: {} ms, live after teardown: {}\n",
            self.duration_ms, self.live_processes_after_teardown
        ));
        out.push_str(&format!("Score: {:.1}/100\n", self.performance_score));
        out
    }
}

/// Runs validation workloads against a shared orchestrator.
pub struct Harness {
    orchestrator: Arc<Orchestrator>,
    config: ResolvedHarnessConfig,
    sampler: ResourceSampler,
}

impl Harness {
    pub fn new(orchestrator: Arc<Orchestrator>, config: ResolvedHarnessConfig) -> Self {
        Self {
            orchestrator,
            config,
            sampler: ResourceSampler::new(),
        }
    }

    fn working_dir(&self) -> PathBuf {
        self.config
            .working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Pass/fail quick validation.
    pub async fn quick_check(&self) -> bool {
        self.quick_validation().await.passed
    }

    /// Quick validation with details.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(sessions = self.config.quick_sessions)))]
    pub async fn quick_validation(&self) -> QuickCheckReport {
        let started = Instant::now();
        let timeout = Duration::from_millis(self.config.quick_timeout_ms);
        let requested = self.config.quick_sessions;
        let mut problems = Vec::new();

        let (ids, failures) = self.spawn_many(requested, "quick").await;
        for (kind, count) in &failures {
            problems.push(format!("{count} spawn(s) failed: {kind}"));
        }

        let mut ready = 0;
        let mut waits = JoinSet::new();
        for id in ids.iter().cloned() {
            let orchestrator = Arc::clone(&self.orchestrator);
            waits.spawn(async move {
                let result = orchestrator.wait_until_ready(&id, timeout).await;
                (id, result)
            });
        }
        while let Some(joined) = waits.join_next().await {
            match joined {
                Ok((_, Ok(_))) => ready += 1,
                Ok((id, Err(e))) => problems.push(format!("session {} not ready: {e}", id.short())),
                Err(e) => problems.push(format!("readiness check panicked: {e}")),
            }
        }

        let pids = self.orchestrator.live_pids().await;
        let sample = self.sampler.sample(&pids).await;
        if sample.memory_mb > self.config.quick_memory_ceiling_mb {
            problems.push(format!(
                "memory {:.1} MB exceeds ceiling {:.1} MB",
                sample.memory_mb, self.config.quick_memory_ceiling_mb
            ));
        }

        self.teardown(&ids).await;

        let failed_spawns = failures.values().sum();
        let report = QuickCheckReport {
            passed: problems.is_empty() && ready == requested,
            sessions_requested: requested,
            sessions_ready: ready,
            failed_spawns,
            memory_mb: sample.memory_mb,
            memory_ceiling_mb: self.config.quick_memory_ceiling_mb,
            elapsed_ms: started.elapsed().as_millis() as u64,
            problems,
        };
        info!(
            passed = report.passed,
            ready,
            requested,
            elapsed_ms = report.elapsed_ms,
            "Quick check finished"
        );
        report
    }

    /// Full stress run with `target` concurrent sessions.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn run_stress(&self, target: Option<usize>) -> StressTestResult {
        let target = target.unwrap_or(self.config.stress_concurrency);
        let started_at = Utc::now();
        let started = Instant::now();
        info!(target, "Stress test starting");

        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch_attention(self.orchestrator.subscribe(), stop_rx));

        let (ids, failures) = self.spawn_many(target, "stress").await;
        info!(spawned = ids.len(), failed = failures.values().sum::<usize>(), "Spawn phase done");

        let samples = self.observe().await;
        let active = self.count_active(&ids).await;

        let _ = stop_tx.send(());
        let flagged = watcher.await.unwrap_or_else(|e| {
            warn!(error = %e, "Attention watcher failed");
            Vec::new()
        });
        let ours: HashSet<&SessionId> = ids.iter().collect();
        let attention_detections = flagged.iter().filter(|id| ours.contains(id)).count();

        self.teardown(&ids).await;
        let live_after = self.orchestrator.live_process_count().await;
        if live_after > 0 {
            warn!(live_after, "Processes still alive after teardown");
        }

        let summary = ResourceSummary::from_samples(&samples);
        let failed_spawns = failures.values().sum();
        let performance_score = performance_score(&ScoreInputs {
            requested: target,
            spawned: ids.len(),
            peak_memory_mb: summary.peak_memory_mb,
            memory_budget_mb: self.config.memory_budget_mb,
            peak_cpu_percent: summary.peak_cpu_percent,
            cpu_budget_percent: self.config.cpu_budget_percent,
        });

        let result = StressTestResult {
            target_concurrency: target,
            terminals_spawned: ids.len(),
            active_terminals: active,
            failed_spawns,
            failures_by_kind: failures,
            peak_cpu_percent: summary.peak_cpu_percent,
            avg_cpu_percent: summary.avg_cpu_percent,
            peak_memory_mb: summary.peak_memory_mb,
            avg_memory_mb: summary.avg_memory_mb,
            sample_count: summary.sample_count,
            attention_detections,
            duration_ms: started.elapsed().as_millis() as u64,
            live_processes_after_teardown: live_after,
            performance_score,
            started_at,
        };
        info!(
            spawned = result.terminals_spawned,
            failed = result.failed_spawns,
            score = result.performance_score,
            duration_ms = result.duration_ms,
            "Stress test finished"
        );
        result
    }

    /// Spawn `count` sessions concurrently; returns ids and failure counts.
    async fn spawn_many(
        &self,
        count: usize,
        label: &str,
    ) -> (Vec<SessionId>, BTreeMap<String, usize>) {
        let dir = self.working_dir();
        let mut spawns = JoinSet::new();
        for n in 0..count {
            let orchestrator = Arc::clone(&self.orchestrator);
            let dir = dir.clone();
            let title = format!("{label}-{n}");
            spawns.spawn(async move { orchestrator.create_session(&dir, Some(title)).await });
        }

        let mut ids = Vec::with_capacity(count);
        let mut failures = BTreeMap::new();
        while let Some(joined) = spawns.join_next().await {
            match joined {
                Ok(Ok(id)) => ids.push(id),
                Ok(Err(e)) => {
                    debug!(error = %e, "Harness spawn failed");
                    *failures.entry(failure_label(&e)).or_insert(0) += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Spawn task did not complete");
                    *failures.entry("panicked".to_string()).or_insert(0) += 1;
                }
            }
        }
        (ids, failures)
    }

    /// Sample resources for the observation window.
    async fn observe(&self) -> Vec<ResourceSample> {
        let window = Duration::from_millis(self.config.observation_window_ms);
        let interval = Duration::from_millis(self.config.sample_interval_ms.max(1));
        let end = tokio::time::Instant::now() + window;
        let mut ticker = tokio::time::interval(interval);
        let mut samples = Vec::new();
        loop {
            ticker.tick().await;
            let pids = self.orchestrator.live_pids().await;
            samples.push(self.sampler.sample(&pids).await);
            if tokio::time::Instant::now() >= end {
                break;
            }
        }
        samples
    }

    async fn count_active(&self, ids: &[SessionId]) -> usize {
        let mut active = 0;
        for id in ids {
            if let Ok(snapshot) = self.orchestrator.session(id).await {
                if !snapshot.status.is_terminal() {
                    active += 1;
                }
            }
        }
        active
    }

    /// Close every session concurrently.
    async fn teardown(&self, ids: &[SessionId]) {
        let mut closes = JoinSet::new();
        for id in ids.iter().cloned() {
            let orchestrator = Arc::clone(&self.orchestrator);
            closes.spawn(async move {
                if let Err(e) = orchestrator.close_session(&id).await {
                    warn!(session = %id, error = %e, "Teardown close failed");
                }
            });
        }
        while closes.join_next().await.is_some() {}
        debug!(sessions = ids.len(), "Teardown complete");
    }
}

fn failure_label(err: &OrchestratorError) -> String {
    match err.spawn_failure_kind() {
        Some(kind) => kind.as_str().to_string(),
        None => err.kind().to_string(),
    }
}

/// Collect ids of sessions that raised attention until told to stop.
async fn watch_attention(
    mut events: tokio::sync::broadcast::Receiver<SessionEvent>,
    mut stop: oneshot::Receiver<()>,
) -> Vec<SessionId> {
    let mut flagged = Vec::new();
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => match event {
                Ok(SessionEvent::AttentionRequired { id, .. }) => flagged.push(id),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Attention watcher lagged; detections may be undercounted");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    flagged
}
