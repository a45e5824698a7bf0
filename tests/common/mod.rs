// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared setup for integration tests that drive real `sh` sessions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use cctm::config::ResolvedConfig;
use cctm::{Orchestrator, SessionId, SessionStatus};

/// Session program: announce readiness, then echo every input line.
pub const ECHO_SCRIPT: &str = "echo ready; exec cat";

/// Config whose sessions run `sh -c <script>`.
pub fn shell_config(script: &str) -> ResolvedConfig {
    let mut config = ResolvedConfig::default();
    config.host.command = "sh".to_string();
    config.host.args = vec!["-c".to_string(), script.to_string()];
    config.host.drain_timeout_ms = 500;
    config.attention.quiescence_ms = 200;
    config.harness.quick_timeout_ms = 5_000;
    config.harness.observation_window_ms = 600;
    config.harness.sample_interval_ms = 100;
    config
}

pub async fn orchestrator(config: ResolvedConfig) -> Arc<Orchestrator> {
    Arc::new(
        Orchestrator::with_process_host(config)
            .await
            .expect("sh should be available"),
    )
}

/// Poll until the session reaches `status` or `timeout` passes.
pub async fn wait_for_status(
    orchestrator: &Orchestrator,
    id: &SessionId,
    status: SessionStatus,
    timeout: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(snapshot) = orchestrator.session(id).await {
            if snapshot.status == status {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

/// Live OS processes never outnumber sessions that are not finished.
pub async fn assert_no_orphans(orchestrator: &Orchestrator) {
    let live = orchestrator.live_process_count().await;
    let unfinished = orchestrator
        .list_sessions()
        .await
        .iter()
        .filter(|s| !s.status.is_terminal())
        .count();
    assert!(live <= unfinished, "{live} live processes for {unfinished} unfinished sessions");
}
