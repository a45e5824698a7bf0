// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command dispatch outcomes against real `sh` sessions.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use cctm::{DispatchRequest, DispatchTarget, Dispatcher, ErrorKind, SessionStatus};
use common::{orchestrator, shell_config, wait_for_status, ECHO_SCRIPT};

const BOUND: Duration = Duration::from_secs(5);

async fn setup(
    script: &str,
) -> (tempfile::TempDir, Arc<cctm::Orchestrator>, Dispatcher) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = shell_config(script);
    config.dispatch.default_working_dir = Some(dir.path().to_path_buf());
    let orch = orchestrator(config.clone()).await;
    let dispatcher = Dispatcher::new(Arc::clone(&orch), config.dispatch).unwrap();
    (dir, orch, dispatcher)
}

#[tokio::test]
async fn test_completion_marker_succeeds_in_new_session() {
    let (_dir, orch, dispatcher) = setup(ECHO_SCRIPT).await;

    let result = dispatcher
        .dispatch(DispatchRequest::new("[cctm:done] all good").with_timeout_ms(5_000))
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(result.target, DispatchTarget::New);
    assert!(result.session_id.is_some());
    assert_eq!(result.error_classification, None);
    assert!(result.response_preview.unwrap().contains("all good"));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_timeout_is_bounded_and_classified() {
    let (dir, orch, dispatcher) = setup(ECHO_SCRIPT).await;
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let started = Instant::now();
    let result = dispatcher
        .dispatch(
            DispatchRequest::new("still working")
                .to_session(id.clone())
                .with_timeout_ms(2_000),
        )
        .await;
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.error_classification, Some(ErrorKind::Timeout));
    assert!(elapsed >= Duration::from_millis(2_000), "resolved early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(3_000), "resolved late: {elapsed:?}");
    assert!(result.execution_time_ms >= 2_000);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["success"], false);
    assert_eq!(json["errorClassification"], "Timeout");
    orch.shutdown().await;
}

#[tokio::test]
async fn test_error_marker_is_execution_error() {
    let (dir, orch, dispatcher) = setup(ECHO_SCRIPT).await;
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let result = dispatcher
        .dispatch(DispatchRequest::new("error: build failed").to_session(id))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_classification, Some(ErrorKind::ExecutionError));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_process_exit_resolves_dispatch() {
    let (dir, orch, dispatcher) = setup("echo ready; read line; exit 3").await;
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let result = dispatcher
        .dispatch(DispatchRequest::new("go").to_session(id).with_timeout_ms(5_000))
        .await;

    assert_eq!(result.error_classification, Some(ErrorKind::ExecutionError));
    assert_eq!(orch.live_process_count().await, 0);
}

#[tokio::test]
async fn test_close_cancels_pending_dispatch() {
    let (dir, orch, dispatcher) = setup(ECHO_SCRIPT).await;
    let dispatcher = Arc::new(dispatcher);
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let pending = {
        let dispatcher = Arc::clone(&dispatcher);
        let id = id.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(DispatchRequest::new("long job").to_session(id).with_timeout_ms(10_000))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    orch.close_session(&id).await.unwrap();

    let result = tokio::time::timeout(BOUND, pending).await.unwrap().unwrap();
    assert!(!result.success);
    assert_eq!(result.error_classification, Some(ErrorKind::Cancelled));
    assert_eq!(orch.live_process_count().await, 0);
}

#[tokio::test]
async fn test_unknown_session_and_stats() {
    let (_dir, orch, dispatcher) = setup(ECHO_SCRIPT).await;

    let result = dispatcher
        .dispatch(DispatchRequest::new("hi").to_session(cctm::SessionId::from("missing")))
        .await;
    assert_eq!(result.error_classification, Some(ErrorKind::SessionNotFound));

    let result = dispatcher
        .dispatch(DispatchRequest::new("[cctm:done]").with_timeout_ms(5_000))
        .await;
    assert!(result.success);

    let stats = dispatcher.stats().await;
    assert_eq!(stats.total, 2);
    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.other_failures, 1);
    assert_eq!(dispatcher.history().await.len(), 2);
    orch.shutdown().await;
}

#[tokio::test]
async fn test_unterminated_marker_completes_before_deadline() {
    let (dir, orch, dispatcher) = setup("echo ready; read line; printf '[cctm:done]'; exec cat").await;
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let started = Instant::now();
    let result = dispatcher
        .dispatch(DispatchRequest::new("go").to_session(id).with_timeout_ms(10_000))
        .await;

    assert!(result.success, "{result:?}");
    assert!(started.elapsed() < Duration::from_secs(3));
    orch.shutdown().await;
}

#[tokio::test]
async fn test_stalled_write_resolves_as_timeout() {
    let (dir, orch, dispatcher) = setup("echo ready; exec sleep 60").await;
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let started = Instant::now();
    let result = dispatcher
        .dispatch(
            DispatchRequest::new("x".repeat(1 << 20))
                .to_session(id)
                .with_timeout_ms(1_000),
        )
        .await;

    assert_eq!(result.error_classification, Some(ErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_secs(2));
    orch.shutdown().await;
    assert_eq!(orch.live_process_count().await, 0);
}

#[tokio::test]
async fn test_close_during_stalled_write_cancels_dispatch() {
    let (dir, orch, dispatcher) = setup("echo ready; exec sleep 60").await;
    let dispatcher = Arc::new(dispatcher);
    let id = orch.create_session(dir.path(), None).await.unwrap();
    assert!(wait_for_status(&orch, &id, SessionStatus::Running, BOUND).await);

    let pending = {
        let dispatcher = Arc::clone(&dispatcher);
        let id = id.clone();
        tokio::spawn(async move {
            dispatcher
                .dispatch(
                    DispatchRequest::new("x".repeat(1 << 20))
                        .to_session(id)
                        .with_timeout_ms(10_000),
                )
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    tokio::time::timeout(BOUND, orch.close_session(&id))
        .await
        .unwrap()
        .unwrap();

    let result = tokio::time::timeout(BOUND, pending).await.unwrap().unwrap();
    assert_eq!(result.error_classification, Some(ErrorKind::Cancelled));
    assert_eq!(orch.live_process_count().await, 0);
}
