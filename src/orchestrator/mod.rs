// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session orchestration.
//!
//! The [`Orchestrator`] is the only mutator of the session store. It spawns
//! sessions through a [`ProcessHost`](crate::host::ProcessHost), runs one
//! output pump per session, and exposes snapshots and event streams.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► Orchestrator ──► ProcessHost ──► OS process
//!                 │                 │
//!                 │           HostEvent stream
//!                 ▼                 ▼
//!            LayoutManager ◄── OutputPump ──► AttentionClassifier
//!                 ▲                 │
//!                 │                 ▼
//!             snapshots ◄──── SessionStore ──► SessionSignal (dispatch)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use cctm::config::ResolvedConfig;
//! use cctm::orchestrator::Orchestrator;
//!
//! let orchestrator = Orchestrator::with_process_host(ResolvedConfig::default()).await?;
//! let id = orchestrator.create_session("/work/api", None).await?;
//! for session in orchestrator.list_sessions().await {
//!     println!("{} {}", session.title, session.status);
//! }
//! orchestrator.close_session(&id).await?;
//! ```

mod controller;
mod pump;

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::host::CommandLine;
use crate::session::{SessionSignal, SessionStatus};

pub use controller::Orchestrator;

/// Full session creation request.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub working_dir: PathBuf,
    pub title: Option<String>,
    /// Overrides the configured command line for this session only.
    pub command: Option<CommandLine>,
}

impl SessionRequest {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            title: None,
            command: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_command(mut self, command: CommandLine) -> Self {
        self.command = Some(command);
        self
    }
}

/// A live subscription to one session's signals.
#[derive(Debug)]
pub struct SessionSubscription {
    pub signals: broadcast::Receiver<SessionSignal>,
    /// Sequence number of the first line this subscription will observe.
    pub start_seq: u64,
    /// Status at the moment of subscribing.
    pub status: SessionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResolvedConfig;
    use crate::error::ErrorKind;
    use crate::host::{HostError, HostEvent, MockProcessHost, SpawnFailureKind, SpawnedProcess};
    use crate::session::{SessionEvent, SessionId};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn test_config() -> ResolvedConfig {
        let mut config = ResolvedConfig::default();
        config.attention.quiescence_ms = 200;
        config
    }

    /// A mock host whose single session is driven through the returned sender.
    fn scripted_host() -> (MockProcessHost, mpsc::Sender<HostEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let mut rx = Some(rx);
        let mut host = MockProcessHost::new();
        host.expect_probe().returning(|_| Ok(()));
        host.expect_spawn().returning(move |_, _| {
            let events = rx
                .take()
                .ok_or_else(|| HostError::spawn(SpawnFailureKind::Other, "already spawned"))?;
            Ok(SpawnedProcess {
                id: SessionId::from("scripted"),
                pid: Some(4242),
                events,
            })
        });
        host.expect_write().returning(|_, _| Ok(()));
        host.expect_terminate().returning(|_| Ok(()));
        host.expect_live_count().returning(|| 0);
        host.expect_live_pids().returning(Vec::new);
        host.expect_shutdown().returning(|| ());
        (host, tx)
    }

    async fn wait_for_status(orch: &Orchestrator, id: &SessionId, status: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if orch.session(id).await.map(|s| s.status).ok() == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session never reached {status}"));
    }

    #[tokio::test]
    async fn test_probe_failure_is_fatal() {
        let mut host = MockProcessHost::new();
        host.expect_probe()
            .returning(|_| Err(HostError::Unavailable("claude not on PATH".to_string())));

        let err = Orchestrator::new(test_config(), Arc::new(host))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::HostUnavailable);
    }

    #[tokio::test]
    async fn test_invalid_working_directory() {
        let (host, _tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();

        let err = orch
            .create_session(dir.path().join("missing"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidWorkingDirectory);

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        let err = orch.create_session(&file, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidWorkingDirectory);
        assert!(orch.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_classified_not_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut host = MockProcessHost::new();
        host.expect_probe().returning(|_| Ok(()));
        host.expect_spawn().returning(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(HostError::spawn(SpawnFailureKind::PermissionDenied, "denied"))
        });

        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let err = orch.create_session(dir.path(), None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert_eq!(err.spawn_failure_kind(), Some(SpawnFailureKind::PermissionDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_spawn_failure_is_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut host = MockProcessHost::new();
        host.expect_probe().returning(|_| Ok(()));
        host.expect_spawn().returning(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(HostError::spawn(SpawnFailureKind::Transient, "EAGAIN"))
        });

        let config = test_config();
        let limit = config.host.spawn_retry_limit as usize;
        let orch = Orchestrator::new(config, Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let err = orch.create_session(dir.path(), None).await.unwrap_err();

        assert_eq!(err.spawn_failure_kind(), Some(SpawnFailureKind::Transient));
        assert_eq!(calls.load(Ordering::SeqCst), limit + 1);
    }

    #[tokio::test]
    async fn test_input_rejected_until_running() {
        let (host, tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), None).await.unwrap();

        let err = orch.send_input(&id, "hello").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotWaiting);
        let snapshot = orch.session(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert!(!snapshot.needs_attention);

        tx.send(HostEvent::Output("ready\n".into())).await.unwrap();
        wait_for_status(&orch, &id, SessionStatus::Running).await;
        orch.send_input(&id, "hello").await.unwrap();

        let err = orch
            .send_input(&SessionId::from("nope"), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionNotFound);
    }

    #[tokio::test]
    async fn test_attention_cycle() {
        let (host, tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let mut events = orch.subscribe();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), None).await.unwrap();

        tx.send(HostEvent::Output("Apply changes? (y/n) ".into()))
            .await
            .unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(SessionEvent::AttentionRequired { reason, .. }) = events.recv().await {
                    return reason;
                }
            }
        })
        .await
        .unwrap();
        assert!(reason.contains("y/n"));

        let snapshot = orch.session(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::WaitingForInput);
        assert!(snapshot.needs_attention);

        orch.elevate(&id).await.unwrap();
        let snapshot = orch.session(&id).await.unwrap();
        assert!(snapshot.is_elevated);
        assert!(snapshot.attention_acknowledged);

        orch.send_input(&id, "y").await.unwrap();
        let snapshot = orch.session(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Running);
        assert!(!snapshot.needs_attention);
        assert!(!snapshot.attention_acknowledged);
    }

    #[tokio::test]
    async fn test_exit_and_read_failure_transitions() {
        let (host, tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), None).await.unwrap();

        tx.send(HostEvent::Output("working\n".into())).await.unwrap();
        tx.send(HostEvent::ReadFailed("EIO".into())).await.unwrap();
        wait_for_status(&orch, &id, SessionStatus::Errored).await;

        let snapshot = orch.session(&id).await.unwrap();
        assert!(snapshot.pid.is_none());
        assert!(!snapshot.needs_attention);
    }

    #[tokio::test]
    async fn test_successful_exit_completes() {
        let (host, tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), Some("job".into())).await.unwrap();

        tx.send(HostEvent::Output("all done\n".into())).await.unwrap();
        tx.send(HostEvent::Exited { success: true, code: Some(0) })
            .await
            .unwrap();
        wait_for_status(&orch, &id, SessionStatus::Completed).await;

        let snapshot = orch.session(&id).await.unwrap();
        assert_eq!(snapshot.title, "job");
        assert_eq!(snapshot.exit_code, Some(0));
        assert!(snapshot.pid.is_none());
        assert_eq!(orch.output_tail(&id, 5).await.unwrap(), vec!["all done"]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_signals_closed() {
        let (host, _tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), None).await.unwrap();
        let mut sub = orch.subscribe_session(&id).await.unwrap();

        orch.close_session(&id).await.unwrap();
        assert_eq!(sub.signals.recv().await.unwrap(), SessionSignal::Closed);
        let after_first = orch.list_sessions().await.len();

        orch.close_session(&id).await.unwrap();
        assert_eq!(orch.list_sessions().await.len(), after_first);
        assert_eq!(after_first, 0);
        assert_eq!(
            orch.session(&id).await.unwrap_err().kind(),
            ErrorKind::SessionNotFound
        );
    }

    #[tokio::test]
    async fn test_failed_terminate_keeps_session_accounted_for() {
        let (tx, rx) = mpsc::channel(64);
        let mut rx = Some(rx);
        let terminations = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&terminations);
        let mut host = MockProcessHost::new();
        host.expect_probe().returning(|_| Ok(()));
        host.expect_spawn().returning(move |_, _| {
            Ok(SpawnedProcess {
                id: SessionId::from("stuck"),
                pid: Some(4242),
                events: rx.take().unwrap(),
            })
        });
        host.expect_terminate().returning(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Err(HostError::Terminate("EPERM".to_string()))
        });
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();
        let dir = TempDir::new().unwrap();
        let id = orch.create_session(dir.path(), None).await.unwrap();
        tx.send(HostEvent::Output("ready\n".into())).await.unwrap();
        wait_for_status(&orch, &id, SessionStatus::Running).await;

        let err = orch.close_session(&id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HostFailure);
        assert_eq!(terminations.load(Ordering::SeqCst), 2);

        let snapshot = orch.session(&id).await.unwrap();
        assert_eq!(snapshot.status, SessionStatus::Errored);
        assert_eq!(snapshot.pid, Some(4242));

        // A later close tries again
        assert!(orch.close_session(&id).await.is_err());
        assert_eq!(terminations.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_layout_operations_validate_input() {
        let (host, _tx) = scripted_host();
        let orch = Orchestrator::new(test_config(), Arc::new(host)).await.unwrap();

        assert_eq!(
            orch.resize_grid(0, 3).await.unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            orch.set_opacity(2.0).await.unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            orch.elevate(&SessionId::from("ghost")).await.unwrap_err().kind(),
            ErrorKind::SessionNotFound
        );

        orch.resize_grid(4, 2).await.unwrap();
        orch.set_theme("midnight").await;
        let layout = orch.layout().await;
        assert_eq!((layout.columns, layout.rows), (4, 2));
        assert_eq!(layout.theme, "midnight");
    }
}
