// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session lifecycle controller.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use tracing::{debug, info, warn};

use super::pump::OutputPump;
use super::{SessionRequest, SessionSubscription};
use crate::attention::{AttentionClassifier, PatternClassifier};
use crate::config::ResolvedConfig;
use crate::error::OrchestratorError;
use crate::host::{CommandLine, HostError, ProcessHost, SpawnedProcess, TokioProcessHost};
use crate::layout::{Layout, LayoutError, LayoutManager};
use crate::project::{default_title, detect_project_type};
use crate::session::{
    OutputBuffer, OutputPage, SessionEvent, SessionId, SessionRecord, SessionSignal, SessionSnapshot,
    SessionStatus, SessionStore,
};
use crate::telemetry::GLOBAL_METRICS;
use crate::timed;

const EVENT_CAPACITY: usize = 1024;
const SPAWN_RETRY_BACKOFF: Duration = Duration::from_millis(50);
const TERMINATE_RETRY_LIMIT: u32 = 1;

/// Public entry point for managing sessions.
///
/// All operations take `&self`; share it through an `Arc`. Operations on
/// different sessions run in parallel, operations on the same session are
/// serialized by that session's operation lock.
pub struct Orchestrator {
    config: ResolvedConfig,
    command: CommandLine,
    host: Arc<dyn ProcessHost>,
    classifier: Arc<dyn AttentionClassifier>,
    store: SessionStore,
    layout: Arc<Mutex<LayoutManager>>,
    events: broadcast::Sender<SessionEvent>,
    pumps: Mutex<HashMap<SessionId, JoinHandle<()>>>,
}

type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl Orchestrator {
    /// Create an orchestrator on `host` with the default pattern classifier.
    ///
    /// The host is probed with the configured command; failure is fatal.
    pub async fn new(config: ResolvedConfig, host: Arc<dyn ProcessHost>) -> OrchestratorResult<Self> {
        let classifier = PatternClassifier::new(
            &config.attention.extra_patterns,
            Duration::from_millis(config.attention.quiescence_ms),
        )
        .map_err(|e| OrchestratorError::InvalidArgument(format!("attention pattern: {e}")))?;
        Self::with_classifier(config, host, Arc::new(classifier)).await
    }

    /// Create an orchestrator backed by real OS processes.
    pub async fn with_process_host(config: ResolvedConfig) -> OrchestratorResult<Self> {
        let host = Arc::new(TokioProcessHost::new(&config.host));
        Self::new(config, host).await
    }

    pub async fn with_classifier(
        config: ResolvedConfig,
        host: Arc<dyn ProcessHost>,
        classifier: Arc<dyn AttentionClassifier>,
    ) -> OrchestratorResult<Self> {
        let command = CommandLine::from(&config.host);
        host.probe(&command).await.map_err(|e| match e {
            HostError::Unavailable(message) => OrchestratorError::HostUnavailable(message),
            other => OrchestratorError::HostUnavailable(other.to_string()),
        })?;

        let layout = LayoutManager::new(Layout::from(&config.layout))
            .map_err(|e| OrchestratorError::InvalidArgument(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        info!(
            command = %command.program,
            classifier = classifier.name(),
            grid = %format!("{}x{}", config.layout.columns, config.layout.rows),
            "Orchestrator ready"
        );
        Ok(Self {
            config,
            command,
            host,
            classifier,
            store: SessionStore::new(),
            layout: Arc::new(Mutex::new(layout)),
            events,
            pumps: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Spawn a session running the configured command in `working_dir`.
    pub async fn create_session(
        &self,
        working_dir: impl AsRef<Path>,
        title: Option<String>,
    ) -> OrchestratorResult<SessionId> {
        self.create_session_with(SessionRequest {
            working_dir: working_dir.as_ref().to_path_buf(),
            title,
            command: None,
        })
        .await
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self, request), fields(dir = %request.working_dir.display())))]
    pub async fn create_session_with(&self, request: SessionRequest) -> OrchestratorResult<SessionId> {
        let _timer = timed!("session.spawn");
        let working_dir = validate_working_dir(&request.working_dir).await?;
        let project = detect_project_type(&working_dir);
        let title = request
            .title
            .unwrap_or_else(|| default_title(&working_dir, project));
        let command = request.command.unwrap_or_else(|| self.command.clone());

        let spawned = match self.spawn_with_retry(&working_dir, &command).await {
            Ok(spawned) => spawned,
            Err(e) => {
                GLOBAL_METRICS.sessions().record_failed_spawn();
                warn!(dir = %working_dir.display(), error = %e, "Session spawn failed");
                return Err(e.into());
            }
        };
        let SpawnedProcess { id, pid, events } = spawned;

        let mut record = SessionRecord::new(
            id.clone(),
            title,
            working_dir,
            pid,
            project,
            self.config.output.retention_lines,
        );
        record.output = OutputBuffer::new(self.config.output.retention_lines)
            .with_max_line_bytes(self.config.output.max_line_bytes);
        let entry = self.store.insert(record).await;
        self.layout.lock().await.add(id.clone());

        let pump = OutputPump {
            id: id.clone(),
            entry,
            host: Arc::clone(&self.host),
            classifier: Arc::clone(&self.classifier),
            layout: Arc::clone(&self.layout),
            events: self.events.clone(),
            quiescence: Duration::from_millis(self.config.attention.quiescence_ms),
            tail_lines: self.config.output.classifier_tail_lines,
        };
        let handle = tokio::spawn(pump.run(events));
        self.pumps.lock().await.insert(id.clone(), handle);

        GLOBAL_METRICS.sessions().record_spawn();
        let _ = self.events.send(SessionEvent::Created { id: id.clone() });
        info!(session = %id, pid = ?pid, "Session created");
        Ok(id)
    }

    async fn spawn_with_retry(
        &self,
        working_dir: &Path,
        command: &CommandLine,
    ) -> Result<SpawnedProcess, HostError> {
        let mut attempt = 0;
        loop {
            match self.host.spawn(working_dir, command).await {
                Err(HostError::Spawn { kind, message })
                    if kind.is_retryable() && attempt < self.config.host.spawn_retry_limit =>
                {
                    attempt += 1;
                    debug!(attempt, error = %message, "Transient spawn failure; retrying");
                    tokio::time::sleep(SPAWN_RETRY_BACKOFF * attempt).await;
                }
                result => return result,
            }
        }
    }

    /// Terminate a session's process and forget the session.
    ///
    /// Closing an unknown or already-closed id is a no-op. Pending dispatches
    /// on the session observe [`SessionSignal::Closed`]. Input blocked on a
    /// full pipe does not hold up the close: the kill breaks the pipe and the
    /// pending write fails as `Cancelled`.
    ///
    /// If the process cannot be terminated the session is kept as `Errored`
    /// with its pid, so the process stays accounted for and a later close
    /// can try again.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(session = %id)))]
    pub async fn close_session(&self, id: &SessionId) -> OrchestratorResult<()> {
        let Some(entry) = self.store.get(id).await else {
            return Ok(());
        };
        if !entry.begin_close() {
            return Ok(());
        }
        let _timer = timed!("session.close");

        // Waiters resolve as cancelled before they can see the kill's exit
        entry.signal(SessionSignal::Closed);

        let terminated = self.terminate_with_retry(id).await;
        // In-flight input fails once its pipe is gone
        let _op = entry.lock_ops().await;
        if let Err(e) = terminated {
            warn!(session = %id, error = %e, "Terminate failed; keeping session as errored");
            let previous = entry.record().await.transition(SessionStatus::Errored);
            entry.abort_close();
            if let Some(previous) = previous {
                entry.signal(SessionSignal::StatusChanged(SessionStatus::Errored));
                let _ = self.events.send(SessionEvent::StatusChanged {
                    id: id.clone(),
                    from: previous,
                    to: SessionStatus::Errored,
                });
                if previous == SessionStatus::WaitingForInput {
                    self.layout.lock().await.clear_attention(id);
                }
            }
            return Err(e.into());
        }

        entry.record().await.pid = None;
        self.forget(id).await;
        GLOBAL_METRICS.sessions().record_close();
        info!(session = %id, "Session closed");
        Ok(())
    }

    async fn terminate_with_retry(&self, id: &SessionId) -> Result<(), HostError> {
        let mut attempt = 0;
        loop {
            match self.host.terminate(id).await {
                Ok(()) | Err(HostError::NotRunning(_)) => return Ok(()),
                Err(e) if attempt < TERMINATE_RETRY_LIMIT => {
                    attempt += 1;
                    debug!(session = %id, attempt, error = %e, "Terminate failed; retrying");
                    tokio::time::sleep(SPAWN_RETRY_BACKOFF * attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn forget(&self, id: &SessionId) {
        self.store.remove(id).await;
        if let Some(pump) = self.pumps.lock().await.remove(id) {
            pump.abort();
        }
        self.layout.lock().await.remove(id);
        let _ = self.events.send(SessionEvent::Closed { id: id.clone() });
    }

    /// Write `text` to a session, appending a newline when missing.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, text), fields(session = %id, bytes = text.len())))]
    pub async fn send_input(&self, id: &SessionId, text: &str) -> OrchestratorResult<()> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let _op = entry.lock_ops().await;
        if entry.is_closing() {
            return Err(OrchestratorError::SessionNotFound(id.clone()));
        }

        let status = entry.record().await.status();
        if !status.accepts_input() {
            return Err(OrchestratorError::SessionNotWaiting {
                id: id.clone(),
                status,
            });
        }

        let mut data = text.to_string();
        if !data.ends_with('\n') {
            data.push('\n');
        }
        if let Err(e) = self.host.write(id, data.as_bytes()).await {
            if entry.is_closing() {
                debug!(session = %id, error = %e, "Input abandoned by close");
                return Err(OrchestratorError::Cancelled(id.clone()));
            }
            return Err(match e {
                HostError::NotRunning(_) => OrchestratorError::SessionNotWaiting {
                    id: id.clone(),
                    status: entry.record().await.status(),
                },
                other => other.into(),
            });
        }

        let cleared = {
            let mut record = entry.record().await;
            record.mark_input_written();
            match record.transition(SessionStatus::Running) {
                Some(previous) => {
                    entry.signal(SessionSignal::StatusChanged(SessionStatus::Running));
                    let _ = self.events.send(SessionEvent::StatusChanged {
                        id: id.clone(),
                        from: previous,
                        to: SessionStatus::Running,
                    });
                    previous == SessionStatus::WaitingForInput
                }
                None => false,
            }
        };
        if cleared {
            self.layout.lock().await.clear_attention(id);
        }
        debug!(session = %id, "Input written");
        Ok(())
    }

    /// Snapshot of every session, in creation order.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let views = self.layout.lock().await.views();
        let mut snapshots = Vec::new();
        for entry in self.store.entries().await {
            let record = entry.record().await;
            let view = views.get(&record.id).copied().unwrap_or_default();
            snapshots.push(record.snapshot(view));
        }
        snapshots
    }

    /// Snapshot of one session.
    pub async fn session(&self, id: &SessionId) -> OrchestratorResult<SessionSnapshot> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let view = self.layout.lock().await.view(id);
        let snapshot = entry.record().await.snapshot(view);
        Ok(snapshot)
    }

    /// A page of retained output starting at `from_seq`.
    pub async fn output_page(
        &self,
        id: &SessionId,
        from_seq: u64,
        limit: usize,
    ) -> OrchestratorResult<OutputPage> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let page = entry.record().await.output.page(from_seq, limit);
        Ok(page)
    }

    /// The last `lines` lines of output, including the unterminated one.
    pub async fn output_tail(&self, id: &SessionId, lines: usize) -> OrchestratorResult<Vec<String>> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let tail = entry.record().await.output.tail(lines);
        Ok(tail)
    }

    /// Elevate a session to the overlay, acknowledging its attention request.
    pub async fn elevate(&self, id: &SessionId) -> OrchestratorResult<()> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let previous = self
            .layout
            .lock()
            .await
            .elevate(id)
            .map_err(|e| self.layout_error(e))?;
        entry.record().await.acknowledge_attention();

        if let Some(previous) = previous {
            let _ = self.events.send(SessionEvent::DeElevated { id: previous });
        }
        let _ = self.events.send(SessionEvent::Elevated { id: id.clone() });
        Ok(())
    }

    /// Return the elevated session, if any, to the grid.
    pub async fn de_elevate(&self) -> Option<SessionId> {
        let id = self.layout.lock().await.de_elevate()?;
        let _ = self.events.send(SessionEvent::DeElevated { id: id.clone() });
        Some(id)
    }

    pub async fn resize_grid(&self, columns: u16, rows: u16) -> OrchestratorResult<()> {
        self.layout
            .lock()
            .await
            .resize(columns, rows)
            .map_err(|e| self.layout_error(e))?;
        let _ = self.events.send(SessionEvent::LayoutChanged);
        Ok(())
    }

    pub async fn set_opacity(&self, opacity: f32) -> OrchestratorResult<()> {
        self.layout
            .lock()
            .await
            .set_opacity(opacity)
            .map_err(|e| self.layout_error(e))?;
        let _ = self.events.send(SessionEvent::LayoutChanged);
        Ok(())
    }

    pub async fn set_session_opacity(
        &self,
        id: &SessionId,
        opacity: Option<f32>,
    ) -> OrchestratorResult<()> {
        self.layout
            .lock()
            .await
            .set_session_opacity(id, opacity)
            .map_err(|e| self.layout_error(e))?;
        let _ = self.events.send(SessionEvent::LayoutChanged);
        Ok(())
    }

    pub async fn set_theme(&self, theme: impl Into<String>) {
        self.layout.lock().await.set_theme(theme);
        let _ = self.events.send(SessionEvent::LayoutChanged);
    }

    /// Current global layout parameters.
    pub async fn layout(&self) -> Layout {
        self.layout.lock().await.layout().clone()
    }

    /// Plain-text rendering of the grid, labelled with session titles.
    pub async fn render_grid(&self) -> String {
        let mut labels = HashMap::new();
        for entry in self.store.entries().await {
            let record = entry.record().await;
            labels.insert(record.id.clone(), record.title.clone());
        }
        self.layout.lock().await.render(&labels)
    }

    /// Subscribe to orchestrator-wide events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Subscribe to one session's signals.
    ///
    /// The returned `start_seq` is the sequence number of the first line the
    /// subscription will see; nothing is missed between the two.
    pub async fn subscribe_session(&self, id: &SessionId) -> OrchestratorResult<SessionSubscription> {
        let entry = self
            .store
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(id.clone()))?;
        let record = entry.record().await;
        if entry.is_closing() {
            return Err(OrchestratorError::SessionNotFound(id.clone()));
        }
        Ok(SessionSubscription {
            signals: entry.subscribe(),
            start_seq: record.output.next_seq(),
            status: record.status(),
        })
    }

    /// Wait until a session accepts input (`Running` or `WaitingForInput`).
    ///
    /// Fails with `Timeout` past `timeout`, `ExecutionError` if the process
    /// exits first and `Cancelled` if the session is closed.
    pub async fn wait_until_ready(
        &self,
        id: &SessionId,
        timeout: Duration,
    ) -> OrchestratorResult<SessionStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut sub = self.subscribe_session(id).await?;
        if sub.status.accepts_input() {
            return Ok(sub.status);
        }
        loop {
            match tokio::time::timeout_at(deadline, sub.signals.recv()).await {
                Err(_) => return Err(OrchestratorError::Timeout(timeout.as_millis() as u64)),
                Ok(Ok(SessionSignal::StatusChanged(status))) if status.accepts_input() => {
                    return Ok(status)
                }
                Ok(Ok(SessionSignal::Exited { code, .. })) => {
                    return Err(OrchestratorError::ExecutionError(format!(
                        "session exited before it was ready (code {code:?})"
                    )))
                }
                Ok(Ok(SessionSignal::Closed)) | Ok(Err(RecvError::Closed)) => {
                    return Err(OrchestratorError::Cancelled(id.clone()))
                }
                Ok(Err(RecvError::Lagged(_))) => {
                    let status = self.session(id).await?.status;
                    if status.accepts_input() {
                        return Ok(status);
                    }
                }
                Ok(Ok(_)) => {}
            }
        }
    }

    /// Number of session processes currently alive.
    pub async fn live_process_count(&self) -> usize {
        self.host.live_count().await
    }

    /// OS pids of session processes currently alive.
    pub async fn live_pids(&self) -> Vec<u32> {
        self.host.live_pids().await
    }

    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    /// Close every session and stop the host.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn shutdown(&self) {
        for id in self.store.ids().await {
            if let Err(e) = self.close_session(&id).await {
                warn!(session = %id, error = %e, "Close during shutdown failed");
            }
        }
        self.host.shutdown().await;
        info!("Orchestrator shut down");
    }

    fn layout_error(&self, err: LayoutError) -> OrchestratorError {
        match err {
            LayoutError::UnknownSession(id) => OrchestratorError::SessionNotFound(id),
            other => OrchestratorError::InvalidArgument(other.to_string()),
        }
    }
}

/// Check that `path` is an accessible directory and return its canonical form.
async fn validate_working_dir(path: &Path) -> OrchestratorResult<PathBuf> {
    let display = path.display().to_string();
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        OrchestratorError::invalid_dir(&display, match e.kind() {
            std::io::ErrorKind::NotFound => "does not exist".to_string(),
            _ => e.to_string(),
        })
    })?;
    if !metadata.is_dir() {
        return Err(OrchestratorError::invalid_dir(&display, "not a directory"));
    }
    tokio::fs::read_dir(path)
        .await
        .map_err(|e| OrchestratorError::invalid_dir(&display, format!("not readable: {e}")))?;
    tokio::fs::canonicalize(path)
        .await
        .map_err(|e| OrchestratorError::invalid_dir(&display, e.to_string()))
}
