//! OS process lifecycle supervision.
//!
//! The supervisor owns the process map exclusively. Each spawned child is
//! serviced by three detached tasks (stdout reader, stderr reader, exit
//! waiter) that communicate solely through the event channel; map mutation
//! happens only on the orchestrator's thread of control.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::format::StreamChannel;
use crate::process::config::ProcessConfig;
use crate::process::events::ProcessEvent;
use crate::process::handle::{deliver_signal, ManagedProcess, ProcessStatus};

#[cfg(unix)]
use nix::libc::{SIGCONT, SIGSTOP, SIGTERM};

/// Size of the read buffer used by output pump tasks.
const READ_BUFFER_SIZE: usize = 8192;

/// Error type for process supervision operations.
#[derive(thiserror::Error, Debug)]
pub enum ProcessError {
    /// The id is already tracked.
    #[error("process id already tracked: {id}")]
    DuplicateId { id: String },
    /// The live-process cap was reached.
    #[error("process limit reached: {limit}")]
    ResourceExhausted { limit: usize },
    /// No process with the given id is tracked.
    #[error("process not found: {id}")]
    NotFound { id: String },
    /// The process exists but is not running.
    #[error("process not running: {id}")]
    NotRunning { id: String },
    /// The operation is not valid in the process's current state.
    #[error("operation invalid for process {id} in its current state")]
    InvalidState { id: String },
    /// The OS could not launch the process.
    #[error("failed to spawn process: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// Input delivery failed.
    #[error("failed to write to process input: {0}")]
    WriteFailed(#[source] std::io::Error),
    /// Unexpected internal failure.
    #[error("internal process error: {0}")]
    Internal(String),
}

/// Limits and timing for the supervisor.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorLimits {
    /// Maximum live (non-terminated) processes.
    pub max_processes: usize,
    /// Grace period between the termination request and the forced kill.
    pub grace_period: Duration,
    /// How long terminated entries linger so late events can drain.
    pub drain_window: Duration,
}

impl Default for SupervisorLimits {
    fn default() -> Self {
        Self {
            max_processes: 50,
            grace_period: Duration::from_secs(5),
            drain_window: Duration::from_secs(5),
        }
    }
}

/// Aggregate process statistics.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ProcessStats {
    pub tracked: usize,
    pub running: usize,
    pub paused: usize,
    pub terminated: usize,
    pub spawned_total: u64,
}

/// Supervisor for the OS processes backing sessions.
#[derive(Debug)]
pub struct ProcessSupervisor {
    processes: HashMap<String, ManagedProcess>,
    events: mpsc::Sender<ProcessEvent>,
    limits: SupervisorLimits,
    spawned_total: u64,
}

impl ProcessSupervisor {
    /// Create a supervisor that reports through the given event channel.
    #[must_use]
    pub fn new(events: mpsc::Sender<ProcessEvent>, limits: SupervisorLimits) -> Self {
        Self {
            processes: HashMap::new(),
            events,
            limits,
            spawned_total: 0,
        }
    }

    /// Launch a process under the given id.
    ///
    /// The child runs with piped stdio; its output and exit are reported
    /// asynchronously over the event channel.
    ///
    /// # Errors
    ///
    /// `DuplicateId` if the id is tracked, `ResourceExhausted` at the
    /// live-process cap, `SpawnFailed` if the OS rejects the launch.
    pub fn spawn(&mut self, id: &str, config: &ProcessConfig) -> Result<u32, ProcessError> {
        if self.processes.contains_key(id) {
            return Err(ProcessError::DuplicateId { id: id.to_string() });
        }
        let live = self
            .processes
            .values()
            .filter(|p| !p.status.is_terminal())
            .count();
        if live >= self.limits.max_processes {
            return Err(ProcessError::ResourceExhausted {
                limit: self.limits.max_processes,
            });
        }

        let mut child = config
            .build_command()
            .spawn()
            .map_err(ProcessError::SpawnFailed)?;
        let Some(pid) = child.id() else {
            return Err(ProcessError::SpawnFailed(std::io::Error::other(
                "process exited before a pid could be observed",
            )));
        };

        let stdin = child.stdin.take();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_output(
                stdout,
                id.to_string(),
                StreamChannel::Stdout,
                self.events.clone(),
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_output(
                stderr,
                id.to_string(),
                StreamChannel::Stderr,
                self.events.clone(),
            ));
        }

        let entry = ManagedProcess::new(config.command().to_string(), pid, stdin);
        tokio::spawn(wait_for_exit(
            child,
            id.to_string(),
            entry.kill_token.clone(),
            config.get_run_timeout(),
            self.limits.grace_period,
            self.events.clone(),
        ));

        tracing::info!(%id, pid, command = config.command(), "process spawned");
        self.processes.insert(id.to_string(), entry);
        self.spawned_total += 1;
        Ok(pid)
    }

    /// Write text to the process's input channel.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotRunning`, or `WriteFailed`.
    pub async fn send(&mut self, id: &str, text: &str) -> Result<(), ProcessError> {
        self.send_raw(id, text.as_bytes()).await
    }

    /// Write raw bytes to the process's input channel.
    ///
    /// # Errors
    ///
    /// `NotFound`, `NotRunning`, or `WriteFailed`.
    pub async fn send_raw(&mut self, id: &str, bytes: &[u8]) -> Result<(), ProcessError> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| ProcessError::NotFound { id: id.to_string() })?;
        if process.status != ProcessStatus::Running {
            return Err(ProcessError::NotRunning { id: id.to_string() });
        }
        let stdin = process.stdin.as_mut().ok_or_else(|| {
            ProcessError::WriteFailed(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "stdin already closed",
            ))
        })?;
        stdin.write_all(bytes).await.map_err(ProcessError::WriteFailed)?;
        stdin.flush().await.map_err(ProcessError::WriteFailed)?;
        Ok(())
    }

    /// Terminate a process.
    ///
    /// With no explicit signal the graceful path runs: a termination
    /// request, a grace wait, then a forced kill. Explicit signals are
    /// delivered directly without the grace wait. Idempotent no-op for
    /// already-terminated (or already-reaped) processes.
    ///
    /// # Errors
    ///
    /// `Internal` if an explicit signal cannot be delivered.
    pub fn kill(&mut self, id: &str, signal: Option<i32>) -> Result<(), ProcessError> {
        let Some(process) = self.processes.get(id) else {
            tracing::debug!(%id, "kill on unknown or reaped process, ignoring");
            return Ok(());
        };
        if process.status.is_terminal() {
            return Ok(());
        }
        match signal {
            Some(sig) => {
                tracing::info!(%id, signal = sig, "delivering explicit signal");
                deliver_signal(process.pid, sig).map_err(|e| ProcessError::Internal(e.to_string()))
            }
            None => {
                // A stopped process cannot act on the termination request.
                #[cfg(unix)]
                if process.status == ProcessStatus::Paused {
                    let _ = deliver_signal(process.pid, SIGCONT);
                }
                tracing::info!(%id, "requesting graceful termination");
                process.kill_token.cancel();
                Ok(())
            }
        }
    }

    /// Suspend a running process.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless running, `Internal` on signal failure.
    pub fn pause(&mut self, id: &str) -> Result<(), ProcessError> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| ProcessError::NotFound { id: id.to_string() })?;
        if process.status != ProcessStatus::Running {
            return Err(ProcessError::InvalidState { id: id.to_string() });
        }
        #[cfg(unix)]
        {
            deliver_signal(process.pid, SIGSTOP)
                .map_err(|e| ProcessError::Internal(e.to_string()))?;
            process.status = ProcessStatus::Paused;
            tracing::debug!(%id, "process paused");
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(ProcessError::Internal(
                "pause is only supported on unix".to_string(),
            ))
        }
    }

    /// Resume a paused process.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless paused, `Internal` on signal failure.
    pub fn resume(&mut self, id: &str) -> Result<(), ProcessError> {
        let process = self
            .processes
            .get_mut(id)
            .ok_or_else(|| ProcessError::NotFound { id: id.to_string() })?;
        if process.status != ProcessStatus::Paused {
            return Err(ProcessError::InvalidState { id: id.to_string() });
        }
        #[cfg(unix)]
        {
            deliver_signal(process.pid, SIGCONT)
                .map_err(|e| ProcessError::Internal(e.to_string()))?;
            process.status = ProcessStatus::Running;
            tracing::debug!(%id, "process resumed");
            Ok(())
        }
        #[cfg(not(unix))]
        {
            Err(ProcessError::Internal(
                "resume is only supported on unix".to_string(),
            ))
        }
    }

    /// Best-effort graceful kill of every tracked process.
    ///
    /// Individual failures are logged, never propagated.
    pub fn kill_all(&mut self) {
        let ids: Vec<String> = self.processes.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.kill(&id, None) {
                tracing::warn!(%id, error = %e, "failed to kill process during kill_all");
            }
        }
    }

    /// Record an exit notification for a process.
    pub fn record_exit(&mut self, id: &str, code: Option<i32>, signal: Option<i32>) {
        if let Some(process) = self.processes.get_mut(id) {
            if process.status != ProcessStatus::Error {
                process.status = ProcessStatus::Terminated;
            }
            process.exit_code = code;
            process.signal = signal;
            process.stdin = None;
            process.terminated_at = Some(Instant::now());
            let runtime = chrono::Utc::now().signed_duration_since(process.started_at);
            tracing::info!(
                %id,
                command = %process.command,
                ?code,
                ?signal,
                runtime_ms = runtime.num_milliseconds(),
                "process exited"
            );
        }
    }

    /// Record a runtime failure for a process.
    pub fn record_failure(&mut self, id: &str, error: &str) {
        if let Some(process) = self.processes.get_mut(id) {
            process.status = ProcessStatus::Error;
            process.stdin = None;
            process.terminated_at = Some(Instant::now());
            tracing::error!(%id, error, "process failed");
        }
    }

    /// Remove terminated entries whose drain window has elapsed.
    pub fn reap(&mut self, now: Instant) {
        let drain = self.limits.drain_window;
        self.processes.retain(|id, process| {
            let keep = process
                .terminated_at
                .map_or(true, |at| now.duration_since(at) < drain);
            if !keep {
                tracing::debug!(%id, "reaping terminated process entry");
            }
            keep
        });
    }

    /// Current status of a tracked process.
    #[must_use]
    pub fn status(&self, id: &str) -> Option<ProcessStatus> {
        self.processes.get(id).map(|p| p.status)
    }

    /// OS pid of a tracked process.
    #[must_use]
    pub fn pid(&self, id: &str) -> Option<u32> {
        self.processes.get(id).map(|p| p.pid)
    }

    /// Exit code and signal of a tracked process, once terminated.
    #[must_use]
    pub fn exit_info(&self, id: &str) -> Option<(Option<i32>, Option<i32>)> {
        self.processes.get(id).map(|p| (p.exit_code, p.signal))
    }

    /// Aggregate statistics over tracked processes.
    #[must_use]
    pub fn stats(&self) -> ProcessStats {
        let mut stats = ProcessStats {
            tracked: self.processes.len(),
            spawned_total: self.spawned_total,
            ..ProcessStats::default()
        };
        for process in self.processes.values() {
            match process.status {
                ProcessStatus::Running | ProcessStatus::Starting => stats.running += 1,
                ProcessStatus::Paused => stats.paused += 1,
                ProcessStatus::Terminated | ProcessStatus::Error => stats.terminated += 1,
            }
        }
        stats
    }
}

/// Pump one output stream into the event channel, chunk by chunk.
async fn pump_output<R>(
    mut stream: R,
    id: String,
    channel: StreamChannel,
    events: mpsc::Sender<ProcessEvent>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let event = ProcessEvent::Output {
                    id: id.clone(),
                    channel,
                    bytes: buf[..n].to_vec(),
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(%id, %channel, error = %e, "output stream read ended");
                break;
            }
        }
    }
}

/// Wait for a child to exit, honoring the run timeout and the kill token.
async fn wait_for_exit(
    mut child: Child,
    id: String,
    kill_token: CancellationToken,
    run_timeout: Option<Duration>,
    grace: Duration,
    events: mpsc::Sender<ProcessEvent>,
) {
    let pid = child.id();
    let termination_requested = async {
        match run_timeout {
            Some(limit) => {
                tokio::select! {
                    () = kill_token.cancelled() => {}
                    () = tokio::time::sleep(limit) => {
                        tracing::warn!(%id, timeout = ?limit, "run timeout exceeded, terminating");
                    }
                }
            }
            None => kill_token.cancelled().await,
        }
    };

    let first_wait = tokio::select! {
        result = child.wait() => Some(result),
        () = termination_requested => None,
    };

    let result = match first_wait {
        Some(result) => result,
        None => {
            #[cfg(unix)]
            if let Some(pid) = pid {
                let _ = deliver_signal(pid, SIGTERM);
            }
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(%id, "grace period elapsed, force killing");
                    match child.kill().await {
                        Ok(()) => child.wait().await,
                        Err(e) => Err(e),
                    }
                }
            }
        }
    };

    match result {
        Ok(status) => {
            let code = status.code();
            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&status);
            #[cfg(not(unix))]
            let signal = None;
            let _ = events.send(ProcessEvent::Exited { id, code, signal }).await;
        }
        Err(e) => {
            let _ = events
                .send(ProcessEvent::Failed {
                    id,
                    error: e.to_string(),
                })
                .await;
        }
    }
}
