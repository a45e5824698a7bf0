// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process host errors.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionId;

/// Why a process could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpawnFailureKind {
    MissingExecutable,
    PermissionDenied,
    ResourceExhausted,
    Transient,
    Other,
}

impl SpawnFailureKind {
    /// Classify an OS error returned by a spawn attempt.
    pub fn from_io(err: &io::Error) -> Self {
        // EMFILE/ENFILE (too many open files) carry no stable ErrorKind
        #[cfg(unix)]
        if matches!(err.raw_os_error(), Some(23) | Some(24)) {
            return Self::ResourceExhausted;
        }
        match err.kind() {
            io::ErrorKind::NotFound => Self::MissingExecutable,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            io::ErrorKind::OutOfMemory => Self::ResourceExhausted,
            io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted | io::ErrorKind::TimedOut => {
                Self::Transient
            }
            _ => Self::Other,
        }
    }

    /// Only transient failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        self == Self::Transient
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingExecutable => "missing_executable",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Transient => "transient",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for SpawnFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type for process host operations.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Spawn failed ({kind}): {message}")]
    Spawn {
        kind: SpawnFailureKind,
        message: String,
    },

    #[error("No running process for session {0}")]
    NotRunning(SessionId),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Terminate failed: {0}")]
    Terminate(String),

    #[error("Host unavailable: {0}")]
    Unavailable(String),
}

impl HostError {
    pub fn spawn(kind: SpawnFailureKind, message: impl Into<String>) -> Self {
        Self::Spawn {
            kind,
            message: message.into(),
        }
    }

    /// Build a spawn error from the OS error of a failed attempt.
    pub fn from_spawn_io(program: &str, err: &io::Error) -> Self {
        Self::spawn(SpawnFailureKind::from_io(err), format!("{program}: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_io_errors() {
        let cases = [
            (io::ErrorKind::NotFound, SpawnFailureKind::MissingExecutable),
            (io::ErrorKind::PermissionDenied, SpawnFailureKind::PermissionDenied),
            (io::ErrorKind::OutOfMemory, SpawnFailureKind::ResourceExhausted),
            (io::ErrorKind::Interrupted, SpawnFailureKind::Transient),
            (io::ErrorKind::InvalidInput, SpawnFailureKind::Other),
        ];
        for (kind, expected) in cases {
            assert_eq!(SpawnFailureKind::from_io(&io::Error::from(kind)), expected);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_too_many_open_files_is_resource_exhaustion() {
        let err = io::Error::from_raw_os_error(24);
        assert_eq!(SpawnFailureKind::from_io(&err), SpawnFailureKind::ResourceExhausted);
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(SpawnFailureKind::Transient.is_retryable());
        assert!(!SpawnFailureKind::MissingExecutable.is_retryable());
        assert!(!SpawnFailureKind::ResourceExhausted.is_retryable());
    }

    #[test]
    fn test_spawn_error_message() {
        let err = HostError::from_spawn_io("claude", &io::Error::from(io::ErrorKind::NotFound));
        let display = err.to_string();
        assert!(display.contains("missing_executable"));
        assert!(display.contains("claude"));
    }
}
