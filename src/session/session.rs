//! Session entity and its status state machine.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::OutputRecord;

/// Lifecycle status of a session.
///
/// Legal transitions: `idle → running → {paused ⇄ running} → terminated`,
/// with `error` reachable from any non-terminal state. `Terminated` and
/// `Error` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
    Terminated,
    Error,
}

impl SessionStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }

    /// Whether a transition to `next` follows a legal edge.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Idle | Self::Paused, Self::Running) | (Self::Running, Self::Paused) => true,
            (current, Self::Terminated | Self::Error) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Terminated => "terminated",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Caller-facing description of a session to create.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub command: String,
    pub args: Vec<String>,
    /// Explicit tool label override; otherwise the registry decides.
    pub tool: Option<String>,
    pub working_dir: Option<PathBuf>,
    /// Caller environment overrides; win over tool defaults.
    pub env: HashMap<String, String>,
    pub run_timeout: Option<Duration>,
    pub use_shell: bool,
    /// Start the session immediately on creation (the default).
    pub auto_start: bool,
}

impl SessionSpec {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            tool: None,
            working_dir: None,
            env: HashMap::new(),
            run_timeout: None,
            use_shell: false,
            auto_start: true,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn use_shell(mut self, use_shell: bool) -> Self {
        self.use_shell = use_shell;
        self
    }

    /// Suppress the immediate start.
    #[must_use]
    pub fn manual_start(mut self) -> Self {
        self.auto_start = false;
        self
    }
}

/// One recorded input delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Read-only projection of a session for callers.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub tool: String,
    pub command: String,
    pub args: Vec<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub working_dir: Option<PathBuf>,
    pub history_len: usize,
    pub input_len: usize,
    pub observer_count: usize,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// One wrapped command under orchestration.
///
/// Owned by the orchestrator for its entire lifetime; `status` is written
/// only through [`Session::transition`] so every change follows the state
/// machine and is traced.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub tool: String,
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Effective environment overlay (tool defaults under caller overrides).
    pub env: HashMap<String, String>,
    pub run_timeout: Option<Duration>,
    pub use_shell: bool,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    status: SessionStatus,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    // Monotonic twins of the wall-clock timestamps, used for GC decisions.
    last_activity_at: Instant,
    terminated_at: Option<Instant>,
    history: VecDeque<OutputRecord>,
    history_cap: usize,
    history_keep: usize,
    input_history: Vec<InputRecord>,
    observers: HashSet<String>,
}

impl Session {
    /// Create an idle session from its spec and resolved tool identity.
    #[must_use]
    pub fn new(
        id: String,
        tool: String,
        env: HashMap<String, String>,
        spec: &SessionSpec,
        history_cap: usize,
        history_keep: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            tool,
            command: spec.command.clone(),
            args: spec.args.clone(),
            working_dir: spec.working_dir.clone(),
            env,
            run_timeout: spec.run_timeout,
            use_shell: spec.use_shell,
            exit_code: None,
            signal: None,
            status: SessionStatus::Idle,
            started_at: now,
            last_activity: now,
            last_activity_at: Instant::now(),
            terminated_at: None,
            history: VecDeque::new(),
            history_cap,
            history_keep,
            input_history: Vec::new(),
            observers: HashSet::new(),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Move to a new status along a legal edge.
    ///
    /// Returns `false` (and leaves the status unchanged) if the edge is not
    /// part of the state machine.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                id = %self.id,
                from = %self.status,
                to = %next,
                "illegal session transition refused"
            );
            return false;
        }
        tracing::debug!(id = %self.id, from = %self.status, to = %next, "session transition");
        self.status = next;
        if next.is_terminal() {
            self.terminated_at = Some(Instant::now());
        }
        self.touch();
        true
    }

    /// Record activity now.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
        self.last_activity_at = Instant::now();
    }

    /// Elapsed time since the last activity.
    #[must_use]
    pub fn inactive_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_activity_at)
    }

    /// Elapsed time in a terminal state, if terminated.
    #[must_use]
    pub fn terminated_for(&self, now: Instant) -> Option<Duration> {
        self.terminated_at.map(|at| now.duration_since(at))
    }

    /// Append an output record, compacting the history on overflow.
    pub fn push_record(&mut self, record: OutputRecord) {
        self.history.push_back(record);
        if self.history.len() > self.history_cap {
            let drop = self.history.len() - self.history_keep;
            self.history.drain(..drop);
            tracing::debug!(
                id = %self.id,
                dropped = drop,
                "session history compacted"
            );
        }
        self.touch();
    }

    /// The most recent `limit` records (all if `None`), oldest first.
    #[must_use]
    pub fn recent_records(&self, limit: Option<usize>) -> Vec<&OutputRecord> {
        let take = limit.unwrap_or(self.history.len());
        let skip = self.history.len().saturating_sub(take);
        self.history.iter().skip(skip).collect()
    }

    /// Number of retained output records.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Record delivered input.
    pub fn record_input(&mut self, text: &str) {
        self.input_history.push(InputRecord {
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.touch();
    }

    /// Delivered input history, oldest first.
    #[must_use]
    pub fn input_history(&self) -> &[InputRecord] {
        &self.input_history
    }

    /// Attach a remote observer. Returns `false` if already attached.
    pub fn attach_observer(&mut self, observer_id: &str) -> bool {
        self.observers.insert(observer_id.to_string())
    }

    /// Detach a remote observer. Returns `false` if it was not attached.
    pub fn detach_observer(&mut self, observer_id: &str) -> bool {
        self.observers.remove(observer_id)
    }

    /// Currently attached observer identities.
    #[must_use]
    pub fn observers(&self) -> &HashSet<String> {
        &self.observers
    }

    /// Read-only snapshot for callers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            tool: self.tool.clone(),
            command: self.command.clone(),
            args: self.args.clone(),
            status: self.status,
            started_at: self.started_at,
            last_activity: self.last_activity,
            working_dir: self.working_dir.clone(),
            history_len: self.history.len(),
            input_len: self.input_history.len(),
            observer_count: self.observers.len(),
            exit_code: self.exit_code,
            signal: self.signal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::StreamChannel;

    fn session() -> Session {
        let spec = SessionSpec::new("echo");
        Session::new(
            "s1".to_string(),
            "tool".to_string(),
            HashMap::new(),
            &spec,
            10,
            5,
        )
    }

    #[test]
    fn legal_edges_are_accepted() {
        let mut s = session();
        assert!(s.transition(SessionStatus::Running));
        assert!(s.transition(SessionStatus::Paused));
        assert!(s.transition(SessionStatus::Running));
        assert!(s.transition(SessionStatus::Terminated));
    }

    #[test]
    fn illegal_edges_are_refused() {
        let mut s = session();
        // No direct idle → paused jump.
        assert!(!s.transition(SessionStatus::Paused));
        assert_eq!(s.status(), SessionStatus::Idle);

        assert!(s.transition(SessionStatus::Terminated));
        // Terminal states are absorbing.
        assert!(!s.transition(SessionStatus::Running));
        assert!(!s.transition(SessionStatus::Error));
        assert_eq!(s.status(), SessionStatus::Terminated);
    }

    #[test]
    fn error_is_reachable_from_any_non_terminal_state() {
        for status in [SessionStatus::Idle, SessionStatus::Running, SessionStatus::Paused] {
            assert!(status.can_transition_to(SessionStatus::Error));
        }
        assert!(!SessionStatus::Error.can_transition_to(SessionStatus::Terminated));
    }

    #[test]
    fn history_compacts_to_most_recent_half() {
        let mut s = session();
        for i in 0..11 {
            s.push_record(OutputRecord::capture(
                format!("line {i}").as_bytes(),
                StreamChannel::Stdout,
            ));
        }
        // Cap is 10, keep is 5: the 11th push compacts down to 5.
        assert_eq!(s.history_len(), 5);
        let records = s.recent_records(None);
        assert_eq!(records[0].text, "line 6");
        assert_eq!(records[4].text, "line 10");
    }

    #[test]
    fn recent_records_respects_limit() {
        let mut s = session();
        for i in 0..4 {
            s.push_record(OutputRecord::capture(
                format!("{i}").as_bytes(),
                StreamChannel::Stdout,
            ));
        }
        let records = s.recent_records(Some(2));
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].text, "2");
        assert_eq!(records[1].text, "3");
    }

    #[test]
    fn observers_are_a_set() {
        let mut s = session();
        assert!(s.attach_observer("alice"));
        assert!(!s.attach_observer("alice"));
        assert!(s.detach_observer("alice"));
        assert!(!s.detach_observer("alice"));
    }

    #[test]
    fn terminal_transition_records_termination_instant() {
        let mut s = session();
        assert!(s.terminated_for(Instant::now()).is_none());
        s.transition(SessionStatus::Running);
        s.transition(SessionStatus::Terminated);
        assert!(s.terminated_for(Instant::now()).is_some());
    }
}
