// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the CCTM session orchestrator.
//!
//! This module provides strongly-typed errors for the orchestration core,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error
//! propagation in the binary.
//!
//! Callers never need to string-match: every [`OrchestratorError`] maps to a
//! serializable [`ErrorKind`] via [`OrchestratorError::kind`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::host::{HostError, SpawnFailureKind};
use crate::session::{SessionId, SessionStatus};

/// Stable classification of orchestrator failures.
///
/// Serialized in PascalCase (`"Timeout"`, `"ExecutionError"`, ...) so reports
/// can be consumed without knowing the Rust error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidWorkingDirectory,
    SpawnFailed,
    SessionNotFound,
    SessionNotWaiting,
    Timeout,
    ExecutionError,
    Cancelled,
    HostUnavailable,
    HostFailure,
    InvalidArgument,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InvalidWorkingDirectory => "InvalidWorkingDirectory",
            Self::SpawnFailed => "SpawnFailed",
            Self::SessionNotFound => "SessionNotFound",
            Self::SessionNotWaiting => "SessionNotWaiting",
            Self::Timeout => "Timeout",
            Self::ExecutionError => "ExecutionError",
            Self::Cancelled => "Cancelled",
            Self::HostUnavailable => "HostUnavailable",
            Self::HostFailure => "HostFailure",
            Self::InvalidArgument => "InvalidArgument",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the orchestrator and its clients.
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Invalid working directory {path}: {reason}")]
    InvalidWorkingDirectory { path: String, reason: String },

    #[error("Spawn failed ({kind}): {message}")]
    SpawnFailed {
        kind: SpawnFailureKind,
        message: String,
    },

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session {id} is not accepting input (status: {status})")]
    SessionNotWaiting { id: SessionId, status: SessionStatus },

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Operation cancelled: session {0} was closed")]
    Cancelled(SessionId),

    #[error("Process host unavailable: {0}")]
    HostUnavailable(String),

    #[error("Process host error: {0}")]
    Host(HostError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl OrchestratorError {
    /// Create an invalid working directory error.
    pub fn invalid_dir(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidWorkingDirectory {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidWorkingDirectory { .. } => ErrorKind::InvalidWorkingDirectory,
            Self::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            Self::SessionNotWaiting { .. } => ErrorKind::SessionNotWaiting,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ExecutionError(_) => ErrorKind::ExecutionError,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::HostUnavailable(_) => ErrorKind::HostUnavailable,
            Self::Host(_) => ErrorKind::HostFailure,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
        }
    }

    /// The spawn failure classification, if this is a spawn failure.
    pub fn spawn_failure_kind(&self) -> Option<SpawnFailureKind> {
        match self {
            Self::SpawnFailed { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<HostError> for OrchestratorError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Spawn { kind, message } => Self::SpawnFailed { kind, message },
            HostError::Unavailable(message) => Self::HostUnavailable(message),
            other => Self::Host(other),
        }
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl ConfigError {
    /// Create an invalid value error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_spawn_error_maps_to_spawn_failed() {
        let err: OrchestratorError = HostError::spawn(
            SpawnFailureKind::MissingExecutable,
            "claude: not found",
        )
        .into();
        assert_eq!(err.kind(), ErrorKind::SpawnFailed);
        assert_eq!(
            err.spawn_failure_kind(),
            Some(SpawnFailureKind::MissingExecutable)
        );
    }

    #[test]
    fn test_host_unavailable_maps_to_fatal_kind() {
        let err: OrchestratorError = HostError::Unavailable("no PATH".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::HostUnavailable);
    }

    #[test]
    fn test_write_failure_is_host_failure() {
        let err: OrchestratorError = HostError::Write("broken pipe".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::HostFailure);
        assert!(err.spawn_failure_kind().is_none());
    }

    #[test]
    fn test_error_kind_serializes_pascal_case() {
        let json = serde_json::to_string(&ErrorKind::ExecutionError).unwrap();
        assert_eq!(json, "\"ExecutionError\"");
        assert_eq!(ErrorKind::Timeout.to_string(), "Timeout");
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let json_err = result.unwrap_err();
        let config_err: ConfigError = json_err.into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_error_display() {
        let err = OrchestratorError::SessionNotWaiting {
            id: SessionId::from("abc"),
            status: SessionStatus::Idle,
        };
        let display = format!("{}", err);
        assert!(display.contains("abc"));
        assert!(display.contains("idle"));
    }
}
