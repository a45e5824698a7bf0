// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process host adapter.
//!
//! The [`ProcessHost`] trait is the seam between the orchestrator and the OS.
//! The host exclusively owns every live child process; sessions only refer to
//! it by [`SessionId`]. [`TokioProcessHost`] is the production implementation.

mod error;
mod process;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::ResolvedHostConfig;
use crate::session::SessionId;

pub use error::{HostError, SpawnFailureKind};
pub use process::{resolve_program, TokioProcessHost};

/// Program, arguments and extra environment for a session process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// A `sh -c <script>` command line.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").with_args(["-c".to_string(), script.into()])
    }
}

impl From<&ResolvedHostConfig> for CommandLine {
    fn from(config: &ResolvedHostConfig) -> Self {
        Self {
            program: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
        }
    }
}

/// Events produced by a running process, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Raw decoded output from stdout or stderr.
    Output(String),
    /// Reading failed past the retry limit.
    ReadFailed(String),
    /// The process was reaped. Always the last event.
    Exited { success: bool, code: Option<i32> },
}

/// A freshly started process.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub id: SessionId,
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<HostEvent>,
}

/// Spawns, writes to, and terminates session processes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Check that `command` can be run at all.
    async fn probe(&self, command: &CommandLine) -> Result<(), HostError>;

    /// Start a process in `working_dir`.
    async fn spawn(
        &self,
        working_dir: &Path,
        command: &CommandLine,
    ) -> Result<SpawnedProcess, HostError>;

    /// Write bytes to the process's stdin.
    async fn write(&self, id: &SessionId, data: &[u8]) -> Result<(), HostError>;

    /// Kill the process and wait until it has been reaped.
    ///
    /// Unknown or already-exited ids return [`HostError::NotRunning`].
    async fn terminate(&self, id: &SessionId) -> Result<(), HostError>;

    /// Number of processes currently alive.
    async fn live_count(&self) -> usize;

    /// OS pids of processes currently alive.
    async fn live_pids(&self) -> Vec<u32>;

    /// Terminate every live process.
    async fn shutdown(&self);
}
