// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Command dispatch with bounded-time outcomes.
//!
//! A dispatch writes one command to a session and waits for the first of:
//! the completion marker, the error marker, a process exit, session closure,
//! or the deadline. Each outcome keeps its own classification; a timeout is
//! never reported as an execution error or vice versa.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Serialize, Serializer};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Mutex;
#[cfg(feature = "telemetry")]
use tracing::instrument;
use tracing::{debug, info};

use crate::config::ResolvedDispatchConfig;
use crate::error::{ConfigError, ErrorKind, OrchestratorError};
use crate::orchestrator::{Orchestrator, SessionSubscription};
use crate::session::{SessionId, SessionSignal, SessionStatus};
use crate::telemetry::{CorrelationId, DispatchSpan};

/// Maximum characters kept in a response preview.
pub const PREVIEW_CHARS: usize = 200;
const RESCAN_PAGE: usize = 512;
const PARTIAL_POLL: Duration = Duration::from_millis(250);

/// A command to route to a session.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub command_text: String,
    /// Existing session to target; `None` creates a new session.
    pub target_session_id: Option<SessionId>,
    /// Overrides the configured timeout.
    pub timeout_ms: Option<u64>,
}

impl DispatchRequest {
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            target_session_id: None,
            timeout_ms: None,
        }
    }

    pub fn to_session(mut self, id: SessionId) -> Self {
        self.target_session_id = Some(id);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Where a dispatch was aimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchTarget {
    New,
    Existing(SessionId),
}

impl Serialize for DispatchTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::New => serializer.serialize_str("new"),
            Self::Existing(id) => serializer.serialize_str(id.as_str()),
        }
    }
}

/// Final outcome of one dispatch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub dispatch_id: CorrelationId,
    pub command: String,
    pub target: DispatchTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    pub success: bool,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_preview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_classification: Option<ErrorKind>,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate counts over the dispatch history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub total: usize,
    pub succeeded: usize,
    pub timeouts: usize,
    pub execution_errors: usize,
    pub cancelled: usize,
    pub other_failures: usize,
    pub avg_execution_time_ms: u64,
}

#[derive(Debug)]
enum Outcome {
    Success,
    Failed(ErrorKind),
}

/// Routes commands to sessions through an [`Orchestrator`].
pub struct Dispatcher {
    orchestrator: Arc<Orchestrator>,
    config: ResolvedDispatchConfig,
    completion: Regex,
    error: Option<Regex>,
    history: Mutex<VecDeque<DispatchResult>>,
}

impl Dispatcher {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        config: ResolvedDispatchConfig,
    ) -> Result<Self, ConfigError> {
        let completion = Regex::new(&config.completion_marker)
            .map_err(|e| ConfigError::invalid("dispatch.completionMarker", e.to_string()))?;
        let error = config
            .error_marker
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| ConfigError::invalid("dispatch.errorMarker", e.to_string()))?;
        Ok(Self {
            orchestrator,
            config,
            completion,
            error,
            history: Mutex::new(VecDeque::new()),
        })
    }

    /// Dispatch a command and wait for its outcome.
    ///
    /// Never fails: every problem is reported through
    /// [`DispatchResult::error_classification`].
    #[cfg_attr(feature = "telemetry", instrument(skip(self, request), fields(target = ?request.target_session_id)))]
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchResult {
        let dispatch_id = CorrelationId::new();
        let started = Instant::now();
        let timeout = Duration::from_millis(request.timeout_ms.unwrap_or(self.config.timeout_ms));
        let deadline = started + timeout;
        let target = match &request.target_session_id {
            Some(id) => DispatchTarget::Existing(id.clone()),
            None => DispatchTarget::New,
        };
        let span_label = match &target {
            DispatchTarget::New => "new".to_string(),
            DispatchTarget::Existing(id) => id.to_string(),
        };
        let span = DispatchSpan::start(&dispatch_id, &span_label);

        let mut preview = String::new();
        let (session_id, outcome) = match self
            .run(&request, &target, deadline, &mut preview)
            .await
        {
            Ok((id, outcome)) => (Some(id), outcome),
            Err((id, err)) => (id, Outcome::Failed(err.kind())),
        };

        let (success, error_classification) = match outcome {
            Outcome::Success => (true, None),
            Outcome::Failed(kind) => (false, Some(kind)),
        };
        let label = error_classification
            .map(|k| k.to_string())
            .unwrap_or_else(|| "Success".to_string());
        let elapsed = span.finish(&label, success);

        let result = DispatchResult {
            dispatch_id,
            command: request.command_text.clone(),
            target,
            session_id,
            success,
            execution_time_ms: elapsed.as_millis() as u64,
            response_preview: (!preview.is_empty()).then(|| truncate_preview(&preview)),
            error_classification,
            completed_at: Utc::now(),
        };
        info!(
            dispatch = %dispatch_id.short(),
            success,
            outcome = %label,
            elapsed_ms = result.execution_time_ms,
            "Dispatch finished"
        );
        self.remember(result.clone()).await;
        result
    }

    async fn run(
        &self,
        request: &DispatchRequest,
        target: &DispatchTarget,
        deadline: Instant,
        preview: &mut String,
    ) -> Result<(SessionId, Outcome), (Option<SessionId>, OrchestratorError)> {
        let session_id = match target {
            DispatchTarget::Existing(id) => id.clone(),
            DispatchTarget::New => {
                let dir = self.default_working_dir();
                let id = self
                    .orchestrator
                    .create_session(&dir, None)
                    .await
                    .map_err(|e| (None, e))?;
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.orchestrator
                    .wait_until_ready(&id, remaining)
                    .await
                    .map_err(|e| (Some(id.clone()), e))?;
                id
            }
        };
        let fail = |e| (Some(session_id.clone()), e);

        let subscription = self
            .orchestrator
            .subscribe_session(&session_id)
            .await
            .map_err(fail)?;
        let sent = tokio::time::timeout_at(
            deadline.into(),
            self.orchestrator.send_input(&session_id, &request.command_text),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Err(_) => return Ok((session_id, Outcome::Failed(ErrorKind::Timeout))),
            // The session existed at subscribe time, so losing it now means it was closed
            Ok(Err(OrchestratorError::SessionNotFound(_))) => {
                return Err(fail(OrchestratorError::Cancelled(session_id.clone())))
            }
            Ok(Err(e)) => return Err(fail(e)),
        }
        debug!(session = %session_id, "Command written; awaiting outcome");

        let outcome = self
            .await_outcome(&session_id, subscription, deadline, preview)
            .await;
        Ok((session_id, outcome))
    }

    fn default_working_dir(&self) -> PathBuf {
        self.config
            .default_working_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    async fn await_outcome(
        &self,
        id: &SessionId,
        mut sub: SessionSubscription,
        deadline: Instant,
        preview: &mut String,
    ) -> Outcome {
        let mut next_seq = sub.start_seq;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Outcome::Failed(ErrorKind::Timeout);
            }
            let wait = deadline.saturating_duration_since(now).min(PARTIAL_POLL);
            let signal = match tokio::time::timeout(wait, sub.signals.recv()).await {
                Err(_) => {
                    if let Some(outcome) = self.poll_output(id, &mut next_seq, preview).await {
                        return outcome;
                    }
                    continue;
                }
                Ok(signal) => signal,
            };
            match signal {
                Ok(SessionSignal::Line { seq, text }) => {
                    if seq < next_seq {
                        continue;
                    }
                    next_seq = seq + 1;
                    if let Some(outcome) = self.inspect_line(&text, preview) {
                        return outcome;
                    }
                }
                Ok(SessionSignal::StatusChanged(SessionStatus::WaitingForInput))
                    if self.config.complete_on_prompt =>
                {
                    return Outcome::Success;
                }
                Ok(SessionSignal::StatusChanged(_)) => {}
                Ok(SessionSignal::Exited { success: true, .. }) => return Outcome::Success,
                Ok(SessionSignal::Exited { success: false, .. }) => {
                    return Outcome::Failed(ErrorKind::ExecutionError)
                }
                Ok(SessionSignal::Closed) | Err(RecvError::Closed) => {
                    return Outcome::Failed(ErrorKind::Cancelled)
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(session = %id, skipped, "Dispatch lagged; rescanning output");
                    match self.rescan(id, &mut next_seq, preview).await {
                        Ok(Some(outcome)) => return outcome,
                        Ok(None) => {}
                        Err(_) => return Outcome::Failed(ErrorKind::Cancelled),
                    }
                }
            }
        }
    }

    /// Re-read retained output the subscription skipped.
    async fn rescan(
        &self,
        id: &SessionId,
        next_seq: &mut u64,
        preview: &mut String,
    ) -> Result<Option<Outcome>, OrchestratorError> {
        loop {
            let page = self
                .orchestrator
                .output_page(id, *next_seq, RESCAN_PAGE)
                .await?;
            if page.lines.is_empty() {
                return Ok(None);
            }
            for line in page.lines {
                *next_seq = line.seq + 1;
                if let Some(outcome) = self.inspect_line(&line.text, preview) {
                    return Ok(Some(outcome));
                }
            }
        }
    }

    /// Catch up on retained output and look for a marker in the
    /// unterminated last line.
    ///
    /// Markers printed without a trailing newline never arrive as a line
    /// signal, so the tail is polled while the command runs.
    async fn poll_output(
        &self,
        id: &SessionId,
        next_seq: &mut u64,
        preview: &mut String,
    ) -> Option<Outcome> {
        if let Some(outcome) = self.rescan(id, next_seq, preview).await.ok()? {
            return Some(outcome);
        }
        let partial = self
            .orchestrator
            .output_page(id, *next_seq, 0)
            .await
            .ok()?
            .partial?;
        let matched = self.completion.is_match(&partial)
            || self.error.as_ref().is_some_and(|re| re.is_match(&partial));
        if matched {
            self.inspect_line(&partial, preview)
        } else {
            None
        }
    }

    fn inspect_line(&self, text: &str, preview: &mut String) -> Option<Outcome> {
        if preview.chars().count() <= PREVIEW_CHARS {
            if !preview.is_empty() {
                preview.push('\n');
            }
            preview.push_str(text);
        }
        if self.completion.is_match(text) {
            return Some(Outcome::Success);
        }
        if self.error.as_ref().is_some_and(|re| re.is_match(text)) {
            return Some(Outcome::Failed(ErrorKind::ExecutionError));
        }
        None
    }

    async fn remember(&self, result: DispatchResult) {
        let mut history = self.history.lock().await;
        history.push_back(result);
        while history.len() > self.config.history_limit {
            history.pop_front();
        }
    }

    /// Recent results, oldest first.
    pub async fn history(&self) -> Vec<DispatchResult> {
        self.history.lock().await.iter().cloned().collect()
    }

    pub async fn stats(&self) -> DispatchStats {
        let history = self.history.lock().await;
        let mut stats = DispatchStats {
            total: history.len(),
            ..Default::default()
        };
        let mut total_ms = 0u64;
        for result in history.iter() {
            total_ms += result.execution_time_ms;
            match result.error_classification {
                None => stats.succeeded += 1,
                Some(ErrorKind::Timeout) => stats.timeouts += 1,
                Some(ErrorKind::ExecutionError) => stats.execution_errors += 1,
                Some(ErrorKind::Cancelled) => stats.cancelled += 1,
                Some(_) => stats.other_failures += 1,
            }
        }
        if stats.total > 0 {
            stats.avg_execution_time_ms = total_ms / stats.total as u64;
        }
        stats
    }
}

/// Cut a preview to [`PREVIEW_CHARS`] characters on a char boundary.
pub fn truncate_preview(text: &str) -> String {
    if text.chars().count() <= PREVIEW_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}
