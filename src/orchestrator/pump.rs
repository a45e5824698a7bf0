// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-session output pump.
//!
//! One task per session consumes host events in order, appends output to the
//! record, drives status transitions and runs the attention classifier.
//! The record lock is never held while the layout lock is taken.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::attention::{AttentionClassifier, AttentionInput, AttentionSignal};
use crate::host::{HostError, HostEvent, ProcessHost};
use crate::layout::LayoutManager;
use crate::session::{
    SessionEntry, SessionEvent, SessionId, SessionRecord, SessionSignal, SessionStatus,
};
use crate::telemetry::GLOBAL_METRICS;

/// Layout follow-up computed under the record lock, applied after it.
enum AttentionChange {
    Raised(String),
    Cleared,
}

pub(crate) struct OutputPump {
    pub id: SessionId,
    pub entry: Arc<SessionEntry>,
    pub host: Arc<dyn ProcessHost>,
    pub classifier: Arc<dyn AttentionClassifier>,
    pub layout: Arc<Mutex<LayoutManager>>,
    pub events: broadcast::Sender<SessionEvent>,
    pub quiescence: Duration,
    pub tail_lines: usize,
}

impl OutputPump {
    pub async fn run(self, mut host_events: mpsc::Receiver<HostEvent>) {
        loop {
            match tokio::time::timeout(self.quiescence, host_events.recv()).await {
                Err(_) => self.on_quiet().await,
                Ok(None) => break,
                Ok(Some(HostEvent::Output(chunk))) => self.on_output(&chunk).await,
                Ok(Some(HostEvent::ReadFailed(reason))) => self.on_read_failed(&reason).await,
                Ok(Some(HostEvent::Exited { success, code })) => {
                    self.on_exit(success, code).await;
                    break;
                }
            }
        }
        debug!(session = %self.id, "Output pump finished");
    }

    async fn on_output(&self, chunk: &str) {
        let change = {
            let mut record = self.entry.record().await;
            if self.entry.is_closing() {
                return;
            }
            for line in record.output.push_chunk(chunk) {
                self.entry.signal(SessionSignal::Line {
                    seq: line.seq,
                    text: line.text,
                });
            }
            record.last_output_at = Some(Utc::now());
            record.last_output = Some(Instant::now());

            if record.status() == SessionStatus::Idle {
                self.transition(&mut record, SessionStatus::Running);
            }
            self.classify(&mut record, Duration::ZERO)
        };
        self.apply(change).await;
    }

    async fn on_quiet(&self) {
        let change = {
            let mut record = self.entry.record().await;
            if self.entry.is_closing() || record.status() != SessionStatus::Running {
                return;
            }
            let Some(last) = record.last_output else {
                return;
            };
            self.classify(&mut record, last.elapsed())
        };
        self.apply(change).await;
    }

    async fn on_read_failed(&self, reason: &str) {
        warn!(session = %self.id, reason, "Output read failed; terminating session process");
        match self.host.terminate(&self.id).await {
            Ok(()) | Err(HostError::NotRunning(_)) => {}
            Err(e) => warn!(session = %self.id, error = %e, "Terminate after read failure failed"),
        }

        let cleared = {
            let mut record = self.entry.record().await;
            if self.entry.is_closing() {
                return;
            }
            record.pid = None;
            let was_waiting = record.needs_attention();
            if self.transition(&mut record, SessionStatus::Errored).is_some() {
                self.entry.signal(SessionSignal::Exited {
                    success: false,
                    code: None,
                });
            }
            was_waiting
        };
        if cleared {
            self.apply(Some(AttentionChange::Cleared)).await;
        }
    }

    async fn on_exit(&self, success: bool, code: Option<i32>) {
        let cleared = {
            let mut record = self.entry.record().await;
            if self.entry.is_closing() {
                return;
            }
            record.pid = None;
            if record.status().is_terminal() {
                return;
            }
            record.exit_code = code;
            let was_waiting = record.needs_attention();
            let next = if success {
                SessionStatus::Completed
            } else {
                SessionStatus::Errored
            };
            self.transition(&mut record, next);
            self.entry.signal(SessionSignal::Exited { success, code });
            was_waiting
        };
        info!(session = %self.id, success, code = ?code, "Session process exited");
        if cleared {
            self.apply(Some(AttentionChange::Cleared)).await;
        }
    }

    fn classify(&self, record: &mut SessionRecord, quiet_for: Duration) -> Option<AttentionChange> {
        let tail = record.classifier_tail(self.tail_lines);
        let signal = self.classifier.classify(&AttentionInput {
            tail: &tail,
            quiet_for,
        });
        match signal {
            AttentionSignal::WaitingForInput { reason }
                if record.status() == SessionStatus::Running =>
            {
                self.transition(record, SessionStatus::WaitingForInput)?;
                Some(AttentionChange::Raised(reason))
            }
            AttentionSignal::Busy if record.status() == SessionStatus::WaitingForInput => {
                self.transition(record, SessionStatus::Running)?;
                Some(AttentionChange::Cleared)
            }
            _ => None,
        }
    }

    /// Apply a status change and publish it. Caller holds the record lock.
    fn transition(&self, record: &mut SessionRecord, next: SessionStatus) -> Option<SessionStatus> {
        let previous = record.transition(next)?;
        self.entry.signal(SessionSignal::StatusChanged(next));
        let _ = self.events.send(SessionEvent::StatusChanged {
            id: self.id.clone(),
            from: previous,
            to: next,
        });
        debug!(session = %self.id, from = %previous, to = %next, "Status changed");
        Some(previous)
    }

    async fn apply(&self, change: Option<AttentionChange>) {
        match change {
            Some(AttentionChange::Raised(reason)) => {
                self.layout.lock().await.mark_attention(&self.id);
                GLOBAL_METRICS.sessions().record_attention();
                info!(session = %self.id, reason = %reason, "Session needs attention");
                let _ = self.events.send(SessionEvent::AttentionRequired {
                    id: self.id.clone(),
                    reason,
                });
            }
            Some(AttentionChange::Cleared) => {
                self.layout.lock().await.clear_attention(&self.id);
            }
            None => {}
        }
    }
}
