//! Top-level session coordination.
//!
//! The orchestrator owns the session map, the process supervisor, and the
//! stream assembler. It is the single consumer of the supervisor's event
//! channel and the sole writer of session status, so a session's status is
//! always consistent with its underlying process. All map mutation happens
//! on this one logical thread of control.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::CmdlinkConfig;
use crate::format::{OutputFormat, OutputRecord, StreamChannel};
use crate::process::{
    ProcessConfig, ProcessError, ProcessEvent, ProcessStats, ProcessSupervisor, SupervisorLimits,
    DEFAULT_CHANNEL_BUFFER,
};
use crate::session::registry::ToolRegistry;
use crate::session::session::{Session, SessionSnapshot, SessionSpec, SessionStatus};
use crate::session::transport::{RemoteMessage, RemoteTransport};
use crate::stream::StreamAssembler;

/// Signal delivered on forced termination.
const SIGKILL: i32 = 9;

/// Label used when neither the caller nor the registry names the tool.
const FALLBACK_TOOL_LABEL: &str = "command";

/// Error type for session operations.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// No session with the given id exists.
    #[error("session not found: {id}")]
    NotFound { id: String },
    /// The operation is not valid in the session's current state.
    #[error("operation invalid for session {id} in state {status}")]
    InvalidState { id: String, status: SessionStatus },
    /// The session cap was reached.
    #[error("session limit reached: {limit}")]
    ResourceExhausted { limit: usize },
    /// The underlying process operation failed.
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Unexpected failure from a collaborator.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Aggregate counts returned by [`SessionOrchestrator::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct OrchestratorStats {
    pub idle: usize,
    pub running: usize,
    pub paused: usize,
    pub terminated: usize,
    pub error: usize,
    pub total_observers: usize,
    pub processes: ProcessStats,
}

enum Wake {
    Shutdown,
    Event(Option<ProcessEvent>),
    Gc,
    Flush,
}

/// Coordinator for every wrapped command.
pub struct SessionOrchestrator {
    config: CmdlinkConfig,
    sessions: HashMap<String, Session>,
    supervisor: ProcessSupervisor,
    assembler: StreamAssembler,
    events: mpsc::Receiver<ProcessEvent>,
    registry: Box<dyn ToolRegistry>,
    transport: Arc<dyn RemoteTransport>,
}

impl SessionOrchestrator {
    /// Create an orchestrator with the given collaborators.
    #[must_use]
    pub fn new(
        config: CmdlinkConfig,
        registry: Box<dyn ToolRegistry>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
        let limits = SupervisorLimits {
            max_processes: config.limits.max_processes,
            grace_period: config.timing.grace_period(),
            drain_window: config.timing.drain_window(),
        };
        Self {
            supervisor: ProcessSupervisor::new(tx, limits),
            assembler: StreamAssembler::new(config.timing.line_flush()),
            sessions: HashMap::new(),
            events: rx,
            registry,
            transport,
            config,
        }
    }

    /// Create a session and, unless suppressed, start it immediately.
    ///
    /// The tool identity is resolved purely as a label: explicit override,
    /// else registry lookup, else a generic fallback. The effective
    /// environment overlays tool defaults under caller overrides.
    ///
    /// # Errors
    ///
    /// `ResourceExhausted` above the session cap; spawn errors if the
    /// immediate start fails.
    pub fn create_session(&mut self, spec: &SessionSpec) -> Result<String, SessionError> {
        let active = self
            .sessions
            .values()
            .filter(|s| !s.status().is_terminal())
            .count();
        if active >= self.config.limits.max_sessions {
            return Err(SessionError::ResourceExhausted {
                limit: self.config.limits.max_sessions,
            });
        }

        let profile = self.registry.lookup(&spec.command);
        let tool = spec
            .tool
            .clone()
            .or_else(|| profile.as_ref().map(|p| p.label.clone()))
            .unwrap_or_else(|| FALLBACK_TOOL_LABEL.to_string());

        let mut env = profile.map(|p| p.env).unwrap_or_default();
        env.extend(spec.env.clone());

        let id = Uuid::new_v4().to_string();
        let session = Session::new(
            id.clone(),
            tool,
            env,
            spec,
            self.config.limits.history_cap,
            self.config.limits.history_keep,
        );
        tracing::info!(%id, tool = %session.tool, command = %session.command, "session created");
        self.sessions.insert(id.clone(), session);

        if spec.auto_start {
            self.start_session(&id)?;
        }
        Ok(id)
    }

    /// Start an idle session by spawning its process.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless idle; `Process` on spawn failure,
    /// in which case the session moves to `error`.
    pub fn start_session(&mut self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.status() != SessionStatus::Idle {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                status: session.status(),
            });
        }

        let mut config = ProcessConfig::new(&session.command)
            .args(session.args.clone())
            .envs(session.env.clone())
            .use_shell(session.use_shell);
        if let Some(ref dir) = session.working_dir {
            config = config.working_dir(dir.clone());
        }
        if let Some(timeout) = session.run_timeout {
            config = config.run_timeout(timeout);
        }

        match self.supervisor.spawn(id, &config) {
            Ok(pid) => {
                session.transition(SessionStatus::Running);
                tracing::info!(%id, pid, "session started");
                let message = Self::status_message(session);
                Self::fan_out(self.transport.as_ref(), session, &message, None);
                Ok(())
            }
            Err(e) => {
                session.transition(SessionStatus::Error);
                let message = RemoteMessage::Error {
                    session_id: id.to_string(),
                    message: e.to_string(),
                    timestamp: Utc::now(),
                };
                Self::fan_out(self.transport.as_ref(), session, &message, None);
                Err(e.into())
            }
        }
    }

    /// Deliver input to a running session.
    ///
    /// Input is recorded in the session's input history and echoed to every
    /// attached observer except the originating one.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless running, `Process` on write failure.
    pub async fn send_input(
        &mut self,
        id: &str,
        text: &str,
        sender: Option<&str>,
    ) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.status() != SessionStatus::Running {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                status: session.status(),
            });
        }

        self.supervisor.send(id, text).await?;

        // Re-borrow mutably now that the await is behind us.
        if let Some(session) = self.sessions.get_mut(id) {
            session.record_input(text);
            let message = RemoteMessage::InputEcho {
                session_id: id.to_string(),
                text: text.to_string(),
                timestamp: Utc::now(),
            };
            Self::fan_out(self.transport.as_ref(), session, &message, sender);
        }
        Ok(())
    }

    /// Suspend a running session.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless running, `Process` on signal failure.
    pub fn pause_session(&mut self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.status() != SessionStatus::Running {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                status: session.status(),
            });
        }
        self.supervisor.pause(id)?;
        session.transition(SessionStatus::Paused);
        let message = Self::status_message(session);
        Self::fan_out(self.transport.as_ref(), session, &message, None);
        Ok(())
    }

    /// Resume a paused session.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless paused, `Process` on signal failure.
    pub fn resume_session(&mut self, id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.status() != SessionStatus::Paused {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                status: session.status(),
            });
        }
        self.supervisor.resume(id)?;
        session.transition(SessionStatus::Running);
        let message = Self::status_message(session);
        Self::fan_out(self.transport.as_ref(), session, &message, None);
        Ok(())
    }

    /// Terminate a session, gracefully by default.
    ///
    /// For sessions with a live process the `terminated` status is set when
    /// the exit notification arrives; idle sessions are marked immediately.
    /// Removal from the active set is deferred to the garbage collector.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` if already terminal.
    pub fn terminate_session(&mut self, id: &str, force: bool) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.status().is_terminal() {
            return Err(SessionError::InvalidState {
                id: id.to_string(),
                status: session.status(),
            });
        }

        if session.status() == SessionStatus::Idle {
            session.transition(SessionStatus::Terminated);
            let message = Self::status_message(session);
            Self::fan_out(self.transport.as_ref(), session, &message, None);
            return Ok(());
        }

        tracing::info!(%id, force, "terminating session");
        self.supervisor.kill(id, force.then_some(SIGKILL))?;
        Ok(())
    }

    /// Attach a remote observer to a session.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn attach_observer(&mut self, id: &str, observer_id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.attach_observer(observer_id) {
            tracing::debug!(%id, observer = observer_id, "observer attached");
        }
        Ok(())
    }

    /// Detach a remote observer from a session.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn detach_observer(&mut self, id: &str, observer_id: &str) -> Result<(), SessionError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        if session.detach_observer(observer_id) {
            tracing::debug!(%id, observer = observer_id, "observer detached");
        }
        Ok(())
    }

    /// Read-only snapshot of one session.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn snapshot(&self, id: &str) -> Result<SessionSnapshot, SessionError> {
        self.sessions
            .get(id)
            .map(Session::snapshot)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Snapshots of every tracked session.
    #[must_use]
    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions.values().map(Session::snapshot).collect()
    }

    /// Bounded, format-selectable output history of a session.
    ///
    /// # Errors
    ///
    /// `NotFound`.
    pub fn history(
        &self,
        id: &str,
        format: OutputFormat,
        limit: Option<usize>,
    ) -> Result<Vec<String>, SessionError> {
        let session = self
            .sessions
            .get(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;
        Ok(session
            .recent_records(limit)
            .into_iter()
            .map(|record| record.render(format))
            .collect())
    }

    /// Line-oriented view of recently assembled output.
    #[must_use]
    pub fn session_lines(&self, id: &str, channel: StreamChannel) -> Vec<String> {
        self.assembler.recent_lines(id, channel)
    }

    /// Aggregate statistics; read-only.
    #[must_use]
    pub fn stats(&self) -> OrchestratorStats {
        let mut stats = OrchestratorStats {
            processes: self.supervisor.stats(),
            ..OrchestratorStats::default()
        };
        for session in self.sessions.values() {
            match session.status() {
                SessionStatus::Idle => stats.idle += 1,
                SessionStatus::Running => stats.running += 1,
                SessionStatus::Paused => stats.paused += 1,
                SessionStatus::Terminated => stats.terminated += 1,
                SessionStatus::Error => stats.error += 1,
            }
            stats.total_observers += session.observers().len();
        }
        stats
    }

    /// Apply one process notification to the session state.
    pub fn handle_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Output { id, channel, bytes } => {
                self.handle_output(&id, channel, &bytes);
            }
            ProcessEvent::Exited { id, code, signal } => {
                self.handle_exit(&id, code, signal);
            }
            ProcessEvent::Failed { id, error } => {
                self.handle_failure(&id, &error);
            }
        }
    }

    fn handle_output(&mut self, id: &str, channel: StreamChannel, bytes: &[u8]) {
        let Some(session) = self.sessions.get_mut(id) else {
            tracing::trace!(%id, "output for unknown session dropped");
            return;
        };

        let assembled = self.assembler.push_chunk(id, channel, bytes);
        for line in &assembled.lines {
            tracing::debug!(%id, %channel, seq = assembled.sequence, line, "line completed");
        }

        let record = OutputRecord::capture(bytes, channel);
        let message = RemoteMessage::Output {
            session_id: id.to_string(),
            record: record.clone(),
        };
        session.push_record(record);
        Self::fan_out(self.transport.as_ref(), session, &message, None);
    }

    fn handle_exit(&mut self, id: &str, code: Option<i32>, signal: Option<i32>) {
        self.supervisor.record_exit(id, code, signal);
        for flushed in self.assembler.flush_session(id) {
            tracing::debug!(%id, channel = %flushed.channel, line = %flushed.line, "line flushed at exit");
        }

        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        session.exit_code = code;
        session.signal = signal;
        if !session.status().is_terminal() {
            session.transition(SessionStatus::Terminated);
        }
        let message = Self::status_message(session);
        Self::fan_out(self.transport.as_ref(), session, &message, None);
    }

    fn handle_failure(&mut self, id: &str, error: &str) {
        self.supervisor.record_failure(id, error);
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if !session.status().is_terminal() {
            session.transition(SessionStatus::Error);
        }
        let message = RemoteMessage::Error {
            session_id: id.to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        };
        Self::fan_out(self.transport.as_ref(), session, &message, None);
    }

    /// Await and apply the next process notification.
    ///
    /// Returns `false` once the event channel is closed.
    pub async fn pump(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply every already-queued notification without waiting.
    pub fn drain_pending(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
        }
    }

    /// Force-emit partial lines whose flush deadline expired.
    pub fn flush_stale_lines(&mut self) {
        for flushed in self.assembler.flush_expired(Instant::now()) {
            tracing::debug!(
                id = %flushed.session_id,
                channel = %flushed.channel,
                line = %flushed.line,
                "stale line flushed"
            );
        }
    }

    /// One garbage-collection sweep.
    ///
    /// Purges sessions terminated for longer than the grace window,
    /// force-terminates idle sessions inactive beyond the idle timeout,
    /// and reaps drained process entries. Sessions with a live process are
    /// never swept, however quiet. Individual termination failures are
    /// logged, not propagated.
    pub fn collect_garbage(&mut self) {
        let now = Instant::now();
        let grace = self.config.timing.terminated_grace();
        let idle_timeout = self.config.timing.idle_timeout();

        let purge: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.terminated_for(now).is_some_and(|d| d >= grace))
            .map(|s| s.id.clone())
            .collect();
        for id in purge {
            tracing::info!(%id, "purging terminated session");
            self.sessions.remove(&id);
            self.assembler.remove_session(&id);
        }

        let stale: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.status() == SessionStatus::Idle && s.inactive_for(now) >= idle_timeout)
            .map(|s| s.id.clone())
            .collect();
        for id in stale {
            tracing::warn!(%id, "terminating stale session");
            if let Err(e) = self.terminate_session(&id, false) {
                tracing::warn!(%id, error = %e, "failed to terminate stale session");
            }
        }

        self.supervisor.reap(now);
    }

    /// Terminate every session and drain outstanding events.
    pub async fn shutdown(&mut self) {
        tracing::info!("shutting down, terminating all sessions");
        self.supervisor.kill_all();

        let grace = self.config.timing.grace_period() + Duration::from_secs(1);
        while self
            .sessions
            .values()
            .any(|s| !s.status().is_terminal())
        {
            match tokio::time::timeout(grace, self.events.recv()).await {
                Ok(Some(event)) => self.handle_event(event),
                Ok(None) | Err(_) => break,
            }
        }
        for session in self.sessions.values_mut() {
            if !session.status().is_terminal() {
                session.transition(SessionStatus::Terminated);
            }
        }
    }

    /// Drive the orchestrator until the shutdown token fires.
    ///
    /// Reacts to process notifications, garbage-collection ticks, and
    /// pending-line flush deadlines on a single thread of control.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut gc = tokio::time::interval(self.config.timing.gc_interval());
        gc.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let deadline = self.assembler.next_deadline();
            let wake = tokio::select! {
                biased;
                () = shutdown.cancelled() => Wake::Shutdown,
                event = self.events.recv() => Wake::Event(event),
                _ = gc.tick() => Wake::Gc,
                () = flush_wait(deadline) => Wake::Flush,
            };
            match wake {
                Wake::Shutdown => {
                    self.shutdown().await;
                    break;
                }
                Wake::Event(Some(event)) => self.handle_event(event),
                Wake::Event(None) => break,
                Wake::Gc => self.collect_garbage(),
                Wake::Flush => self.flush_stale_lines(),
            }
        }
    }

    fn status_message(session: &Session) -> RemoteMessage {
        RemoteMessage::Status {
            session_id: session.id.clone(),
            status: session.status(),
            exit_code: session.exit_code,
            signal: session.signal,
            timestamp: Utc::now(),
        }
    }

    /// Broadcast to every attached observer except `exclude`.
    ///
    /// Delivery is best-effort; the transport may not block or fail the
    /// caller.
    fn fan_out(
        transport: &dyn RemoteTransport,
        session: &Session,
        message: &RemoteMessage,
        exclude: Option<&str>,
    ) {
        for observer in session.observers() {
            if exclude == Some(observer.as_str()) {
                continue;
            }
            transport.deliver(observer, message);
        }
    }
}

async fn flush_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
        }
        None => std::future::pending().await,
    }
}
