// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session types: identifiers, lifecycle status, records and snapshots.

use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::output::OutputBuffer;
use crate::project::ProjectType;

/// Opaque session identifier (a UUID v4 string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for compact display.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Lifecycle status of a session.
///
/// ```text
/// Idle -> Running -> {WaitingForInput, Completed, Errored}
/// WaitingForInput -> Running
/// any -> Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Running,
    WaitingForInput,
    Errored,
    Completed,
}

impl SessionStatus {
    /// Errored and Completed are final; a re-spawn creates a new session.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Errored | Self::Completed)
    }

    /// Whether input may be written to a session in this state.
    pub fn accepts_input(self) -> bool {
        matches!(self, Self::Running | Self::WaitingForInput)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        if self.is_terminal() || self == next {
            return false;
        }
        matches!(
            (self, next),
            (_, Errored | Completed)
                | (Idle, Running)
                | (Running, WaitingForInput)
                | (WaitingForInput, Running)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::WaitingForInput => "waiting_for_input",
            Self::Errored => "errored",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Screen rectangle assigned by the layout manager, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    /// Whether two rectangles share any area.
    pub fn overlaps(&self, other: &Placement) -> bool {
        let self_right = self.x + self.width;
        let self_bottom = self.y + self.height;
        let other_right = other.x + other.width;
        let other_bottom = other.y + other.height;
        self.x < other_right && other.x < self_right && self.y < other_bottom && other.y < self_bottom
    }
}

/// Authoritative mutable state of one session.
///
/// Owned by the session store and mutated only by the orchestrator and the
/// session's output pump. Placement and opacity live in the layout manager.
#[derive(Debug)]
pub struct SessionRecord {
    pub id: SessionId,
    pub title: String,
    status: SessionStatus,
    pub working_directory: PathBuf,
    /// OS pid while the process is alive.
    pub pid: Option<u32>,
    pub project_type: ProjectType,
    pub created_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    needs_attention: bool,
    attention_acknowledged: bool,
    pub last_output_at: Option<DateTime<Utc>>,
    /// Monotonic time of the last output chunk, used for quiescence.
    pub last_output: Option<Instant>,
    pub output: OutputBuffer,
    /// Lines below this sequence number are ignored by the classifier.
    classifier_floor: u64,
}

impl SessionRecord {
    pub fn new(
        id: SessionId,
        title: String,
        working_directory: PathBuf,
        pid: Option<u32>,
        project_type: ProjectType,
        retention_lines: usize,
    ) -> Self {
        Self {
            id,
            title,
            status: SessionStatus::Idle,
            working_directory,
            pid,
            project_type,
            created_at: Utc::now(),
            exit_code: None,
            needs_attention: false,
            attention_acknowledged: false,
            last_output_at: None,
            last_output: None,
            output: OutputBuffer::new(retention_lines),
            classifier_floor: 0,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn needs_attention(&self) -> bool {
        self.needs_attention
    }

    pub fn attention_acknowledged(&self) -> bool {
        self.attention_acknowledged
    }

    /// Move to `next` if the lifecycle allows it, returning the previous status.
    ///
    /// `needs_attention` tracks `WaitingForInput` exactly; an acknowledgement
    /// does not survive leaving that state.
    pub fn transition(&mut self, next: SessionStatus) -> Option<SessionStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let previous = self.status;
        self.status = next;
        self.needs_attention = next == SessionStatus::WaitingForInput;
        if !self.needs_attention {
            self.attention_acknowledged = false;
        }
        Some(previous)
    }

    /// Mark a pending attention request as seen. Returns false if none is pending.
    pub fn acknowledge_attention(&mut self) -> bool {
        if self.needs_attention {
            self.attention_acknowledged = true;
        }
        self.needs_attention
    }

    /// Record that input was written: the current partial line is committed
    /// and everything before it drops out of the classifier's view.
    pub fn mark_input_written(&mut self) {
        self.output.break_line();
        self.classifier_floor = self.output.next_seq();
    }

    /// The output tail the attention classifier should inspect.
    pub fn classifier_tail(&self, lines: usize) -> Vec<String> {
        self.output.tail_since(self.classifier_floor, lines)
    }

    /// Build a read-only snapshot with the layout manager's view merged in.
    pub fn snapshot(&self, view: LayoutView) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            working_directory: self.working_directory.clone(),
            needs_attention: self.needs_attention,
            is_elevated: view.is_elevated,
            placement: view.placement,
            presentation_opacity: view.opacity_override,
            pid: self.pid,
            project_type: self.project_type,
            created_at: self.created_at,
            exit_code: self.exit_code,
            attention_acknowledged: self.attention_acknowledged,
            last_output_at: self.last_output_at,
            output_lines: self.output.next_seq(),
        }
    }
}

/// What the layout manager knows about one session.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LayoutView {
    pub placement: Option<Placement>,
    pub is_elevated: bool,
    pub opacity_override: Option<f32>,
}

/// Read-only view of a session. Output lines are excluded; use the
/// paginated output query instead.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub title: String,
    pub status: SessionStatus,
    pub working_directory: PathBuf,
    pub needs_attention: bool,
    pub is_elevated: bool,
    pub placement: Option<Placement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presentation_opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub project_type: ProjectType,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub attention_acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_output_at: Option<DateTime<Utc>>,
    /// Total lines produced so far, including evicted ones.
    pub output_lines: u64,
}

/// Orchestrator-wide change notifications.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Created {
        id: SessionId,
    },
    StatusChanged {
        id: SessionId,
        from: SessionStatus,
        to: SessionStatus,
    },
    AttentionRequired {
        id: SessionId,
        reason: String,
    },
    Elevated {
        id: SessionId,
    },
    DeElevated {
        id: SessionId,
    },
    LayoutChanged,
    Closed {
        id: SessionId,
    },
}

impl SessionEvent {
    /// The session this event concerns, if any.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Created { id }
            | Self::StatusChanged { id, .. }
            | Self::AttentionRequired { id, .. }
            | Self::Elevated { id }
            | Self::DeElevated { id }
            | Self::Closed { id } => Some(id),
            Self::LayoutChanged => None,
        }
    }
}

/// Per-session signal stream consumed by dispatchers.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// A completed output line.
    Line { seq: u64, text: String },
    StatusChanged(SessionStatus),
    Exited { success: bool, code: Option<i32> },
    /// The session was closed; nothing further will arrive.
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> SessionRecord {
        SessionRecord::new(
            SessionId::from("s1"),
            "demo (rust)".to_string(),
            PathBuf::from("/tmp"),
            Some(42),
            ProjectType::Rust,
            100,
        )
    }

    #[test]
    fn test_session_id_generate_is_uuid() {
        let id = SessionId::generate();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert!(!SessionStatus::Completed.can_transition_to(SessionStatus::Running));
        assert!(!SessionStatus::Errored.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Idle.can_transition_to(SessionStatus::Errored));
        assert!(!SessionStatus::Idle.can_transition_to(SessionStatus::WaitingForInput));
    }

    #[test]
    fn test_needs_attention_tracks_waiting_status() {
        let mut rec = record();
        assert_eq!(rec.transition(SessionStatus::Running), Some(SessionStatus::Idle));
        assert!(!rec.needs_attention());

        rec.transition(SessionStatus::WaitingForInput);
        assert!(rec.needs_attention());
        assert!(rec.acknowledge_attention());
        assert!(rec.attention_acknowledged());

        rec.transition(SessionStatus::Running);
        assert!(!rec.needs_attention());
        assert!(!rec.attention_acknowledged());
    }

    #[test]
    fn test_rejected_transition_leaves_state() {
        let mut rec = record();
        rec.transition(SessionStatus::Completed);
        assert_eq!(rec.transition(SessionStatus::Running), None);
        assert_eq!(rec.status(), SessionStatus::Completed);
    }

    #[test]
    fn test_input_moves_classifier_floor() {
        let mut rec = record();
        rec.output.push_chunk("Continue? (y/n) ");
        assert_eq!(rec.classifier_tail(8), vec!["Continue? (y/n) "]);

        rec.mark_input_written();
        assert!(rec.classifier_tail(8).is_empty());

        rec.output.push_chunk("done\n");
        assert_eq!(rec.classifier_tail(8), vec!["done"]);
    }

    #[test]
    fn test_placement_overlap() {
        let a = Placement { x: 0, y: 0, width: 10, height: 10 };
        let b = Placement { x: 10, y: 0, width: 10, height: 10 };
        let c = Placement { x: 5, y: 5, width: 10, height: 10 };
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::WaitingForInput).unwrap();
        assert_eq!(json, "\"waiting_for_input\"");
    }
}
