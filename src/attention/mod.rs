// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Attention detection: is a session blocked waiting for a human?
//!
//! This is a heuristic. False positives and false negatives are both
//! expected and never fatal; the orchestrator only acts on the signal.

mod classifier;

use std::time::Duration;

pub use classifier::PatternClassifier;

/// What the classifier sees: the ANSI-stripped output tail (ending with the
/// unterminated last line, if any) and how long the session has been quiet.
#[derive(Debug, Clone, Copy)]
pub struct AttentionInput<'a> {
    pub tail: &'a [String],
    pub quiet_for: Duration,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttentionSignal {
    /// The process is blocked on a prompt.
    WaitingForInput { reason: String },
    /// The process is visibly working.
    Busy,
    /// Nothing conclusive.
    Indeterminate,
}

impl AttentionSignal {
    pub fn is_waiting(&self) -> bool {
        matches!(self, Self::WaitingForInput { .. })
    }
}

/// Pluggable attention heuristic.
pub trait AttentionClassifier: Send + Sync {
    fn classify(&self, input: &AttentionInput<'_>) -> AttentionSignal;

    /// Short identifier for logs.
    fn name(&self) -> &str;
}
