// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tokio-backed process host.
//!
//! Each child is moved into a supervisor task right after spawn; nothing else
//! ever holds the `Child`. Termination is a request to that task, which kills
//! and reaps the process, removes it from the live table, drains the readers
//! (bounded), emits `Exited`, and only then acknowledges. Children are created
//! with `kill_on_drop`, so an aborted supervisor or runtime teardown still
//! reaps them.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{CommandLine, HostError, HostEvent, ProcessHost, SpawnedProcess};
use crate::config::ResolvedHostConfig;
use crate::session::SessionId;

const READ_CHUNK: usize = 4096;
const EVENT_BUFFER: usize = 256;

/// Request to a supervisor: kill the child, reply once it is reaped.
type KillRequest = oneshot::Sender<()>;

struct LiveProcess {
    pid: Option<u32>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    kill: Option<oneshot::Sender<KillRequest>>,
}

type LiveTable = Arc<Mutex<HashMap<SessionId, LiveProcess>>>;

/// Production [`ProcessHost`] built on `tokio::process`.
pub struct TokioProcessHost {
    live: LiveTable,
    read_retry_limit: u32,
    drain_timeout: Duration,
    write_timeout: Duration,
}

impl TokioProcessHost {
    pub fn new(config: &ResolvedHostConfig) -> Self {
        Self {
            live: Arc::new(Mutex::new(HashMap::new())),
            read_retry_limit: config.read_retry_limit,
            drain_timeout: Duration::from_millis(config.drain_timeout_ms),
            write_timeout: Duration::from_millis(config.write_timeout_ms),
        }
    }
}

impl Default for TokioProcessHost {
    fn default() -> Self {
        Self::new(&ResolvedHostConfig::default())
    }
}

#[async_trait]
impl ProcessHost for TokioProcessHost {
    async fn probe(&self, command: &CommandLine) -> Result<(), HostError> {
        match resolve_program(&command.program) {
            Some(path) => {
                debug!(program = %command.program, resolved = %path.display(), "Host probe ok");
                Ok(())
            }
            None => Err(HostError::Unavailable(format!(
                "'{}' was not found or is not executable",
                command.program
            ))),
        }
    }

    async fn spawn(
        &self,
        working_dir: &Path,
        command: &CommandLine,
    ) -> Result<SpawnedProcess, HostError> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(&command.env)
            .current_dir(working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| HostError::from_spawn_io(&command.program, &e))?;

        let id = SessionId::generate();
        let pid = child.id();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_output(
                stdout,
                events_tx.clone(),
                self.read_retry_limit,
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_output(
                stderr,
                events_tx.clone(),
                self.read_retry_limit,
            )));
        }

        let stdin = Arc::new(Mutex::new(child.stdin.take()));
        let (kill_tx, kill_rx) = oneshot::channel();

        // Register before the supervisor starts so a fast exit still finds the entry
        self.live.lock().await.insert(
            id.clone(),
            LiveProcess {
                pid,
                stdin,
                kill: Some(kill_tx),
            },
        );

        tokio::spawn(supervise(Supervisor {
            id: id.clone(),
            child,
            kill_rx,
            readers,
            events: events_tx,
            live: Arc::clone(&self.live),
            drain_timeout: self.drain_timeout,
        }));

        debug!(session = %id, pid = ?pid, program = %command.program, "Process spawned");
        Ok(SpawnedProcess {
            id,
            pid,
            events: events_rx,
        })
    }

    async fn write(&self, id: &SessionId, data: &[u8]) -> Result<(), HostError> {
        let stdin = {
            let live = self.live.lock().await;
            let process = live
                .get(id)
                .ok_or_else(|| HostError::NotRunning(id.clone()))?;
            Arc::clone(&process.stdin)
        };

        // A child that stops reading fills the pipe; never wait on it forever
        let write = async {
            let mut guard = stdin.lock().await;
            let pipe = guard
                .as_mut()
                .ok_or_else(|| HostError::Write("stdin is closed".to_string()))?;
            pipe.write_all(data)
                .await
                .map_err(|e| HostError::Write(e.to_string()))?;
            pipe.flush()
                .await
                .map_err(|e| HostError::Write(e.to_string()))
        };
        tokio::time::timeout(self.write_timeout, write)
            .await
            .map_err(|_| {
                HostError::Write(format!(
                    "timed out after {} ms",
                    self.write_timeout.as_millis()
                ))
            })??;
        trace!(session = %id, bytes = data.len(), "Wrote input");
        Ok(())
    }

    async fn terminate(&self, id: &SessionId) -> Result<(), HostError> {
        terminate_in(&self.live, id, self.drain_timeout).await
    }

    async fn live_count(&self) -> usize {
        self.live.lock().await.len()
    }

    async fn live_pids(&self) -> Vec<u32> {
        self.live
            .lock()
            .await
            .values()
            .filter_map(|p| p.pid)
            .collect()
    }

    async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.live.lock().await.keys().cloned().collect();
        let mut tasks = tokio::task::JoinSet::new();
        for id in ids {
            let live = Arc::clone(&self.live);
            let drain_timeout = self.drain_timeout;
            tasks.spawn(async move {
                if let Err(e) = terminate_in(&live, &id, drain_timeout).await {
                    debug!(session = %id, error = %e, "Shutdown terminate skipped");
                }
            });
        }
        while tasks.join_next().await.is_some() {}
    }
}

async fn terminate_in(
    live: &LiveTable,
    id: &SessionId,
    drain_timeout: Duration,
) -> Result<(), HostError> {
    let kill = {
        let mut table = live.lock().await;
        let process = table
            .get_mut(id)
            .ok_or_else(|| HostError::NotRunning(id.clone()))?;
        process.kill.take()
    };

    // Another caller is already terminating it; wait for the entry to go
    let Some(kill) = kill else {
        return wait_until_gone(live, id, drain_timeout).await;
    };

    let (ack_tx, ack_rx) = oneshot::channel();
    if kill.send(ack_tx).is_err() {
        // The supervisor already finished on its own
        return wait_until_gone(live, id, drain_timeout).await;
    }
    ack_rx
        .await
        .map_err(|_| HostError::Terminate(format!("supervisor for {id} went away")))?;
    debug!(session = %id, "Process terminated");
    Ok(())
}

async fn wait_until_gone(
    live: &LiveTable,
    id: &SessionId,
    drain_timeout: Duration,
) -> Result<(), HostError> {
    let poll = async {
        while live.lock().await.contains_key(id) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(drain_timeout + Duration::from_secs(5), poll)
        .await
        .map_err(|_| HostError::Terminate(format!("{id} did not exit in time")))
}

struct Supervisor {
    id: SessionId,
    child: Child,
    kill_rx: oneshot::Receiver<KillRequest>,
    readers: Vec<JoinHandle<()>>,
    events: mpsc::Sender<HostEvent>,
    live: LiveTable,
    drain_timeout: Duration,
}

enum Wake {
    Exited(io::Result<std::process::ExitStatus>),
    Kill(Option<KillRequest>),
}

async fn supervise(mut sup: Supervisor) {
    let wake = tokio::select! {
        status = sup.child.wait() => Wake::Exited(status),
        request = &mut sup.kill_rx => Wake::Kill(request.ok()),
    };
    let (status, ack) = match wake {
        Wake::Exited(status) => (status, None),
        Wake::Kill(ack) => {
            if let Err(e) = sup.child.start_kill() {
                trace!(session = %sup.id, error = %e, "start_kill failed (already exited?)");
            }
            (sup.child.wait().await, ack)
        }
    };

    sup.live.lock().await.remove(&sup.id);

    let readers = std::mem::take(&mut sup.readers);
    let aborts: Vec<_> = readers.iter().map(|r| r.abort_handle()).collect();
    let drain = async {
        for reader in readers {
            let _ = reader.await;
        }
    };
    if tokio::time::timeout(sup.drain_timeout, drain).await.is_err() {
        warn!(session = %sup.id, "Output drain timed out; abandoning readers");
        for abort in aborts {
            abort.abort();
        }
    }

    let (success, code) = match status {
        Ok(status) => (status.success(), status.code()),
        Err(e) => {
            warn!(session = %sup.id, error = %e, "Failed to reap process");
            (false, None)
        }
    };
    let _ = sup.events.send(HostEvent::Exited { success, code }).await;
    debug!(session = %sup.id, success, code = ?code, "Process exited");

    if let Some(ack) = ack {
        let _ = ack.send(());
    }
}

fn is_transient_read_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

async fn read_output<R>(mut reader: R, events: mpsc::Sender<HostEvent>, retry_limit: u32)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut carry: Vec<u8> = Vec::new();
    let mut failures = 0u32;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                failures = 0;
                carry.extend_from_slice(&buf[..n]);
                let text = take_utf8(&mut carry);
                if !text.is_empty() && events.send(HostEvent::Output(text)).await.is_err() {
                    return;
                }
            }
            Err(e) if is_transient_read_error(&e) && failures < retry_limit => {
                failures += 1;
                trace!(error = %e, attempt = failures, "Retrying output read");
                tokio::time::sleep(Duration::from_millis(10 * u64::from(failures))).await;
            }
            Err(e) => {
                let _ = events.send(HostEvent::ReadFailed(e.to_string())).await;
                return;
            }
        }
    }

    if !carry.is_empty() {
        let rest = String::from_utf8_lossy(&carry).into_owned();
        let _ = events.send(HostEvent::Output(rest)).await;
    }
}

/// Decode as much of `carry` as possible, leaving an incomplete trailing
/// UTF-8 sequence in place. Invalid bytes become U+FFFD.
fn take_utf8(carry: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(carry) {
            Ok(text) => {
                out.push_str(text);
                carry.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&carry[..valid]));
                match e.error_len() {
                    None => {
                        carry.drain(..valid);
                        return out;
                    }
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        carry.drain(..valid + len);
                    }
                }
            }
        }
    }
}

/// Resolve `program` to an executable path, searching `PATH` for bare names.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}
