//! Managed-process bookkeeping and signal delivery.

use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a managed process.
///
/// `Terminated` and `Error` are absorbing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessStatus {
    #[default]
    Starting,
    Running,
    Paused,
    Terminated,
    Error,
}

impl ProcessStatus {
    /// Whether the process has reached an absorbing state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Error)
    }
}

/// Supervisor-side record of one OS process.
///
/// The `Child` itself is owned by the waiter task; control happens through
/// the pid (signals) and the kill token (graceful termination).
#[derive(Debug)]
pub(crate) struct ManagedProcess {
    pub command: String,
    pub pid: u32,
    pub status: ProcessStatus,
    pub stdin: Option<ChildStdin>,
    pub started_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub kill_token: CancellationToken,
    /// Set once the exit notification arrives; the entry is reaped after
    /// the drain window so late events can still be attributed.
    pub terminated_at: Option<Instant>,
}

impl ManagedProcess {
    pub(crate) fn new(command: String, pid: u32, stdin: Option<ChildStdin>) -> Self {
        Self {
            command,
            pid,
            status: ProcessStatus::Running,
            stdin,
            started_at: Utc::now(),
            exit_code: None,
            signal: None,
            kill_token: CancellationToken::new(),
            terminated_at: None,
        }
    }
}

/// Deliver a raw signal to a process by pid.
#[cfg(unix)]
pub(crate) fn deliver_signal(pid: u32, signal: i32) -> std::io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let sig = Signal::try_from(signal)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    let nix_pid = Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX));
    kill(nix_pid, sig).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
pub(crate) fn deliver_signal(_pid: u32, _signal: i32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "signal delivery is only supported on unix",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_absorbing_flags() {
        assert!(ProcessStatus::Terminated.is_terminal());
        assert!(ProcessStatus::Error.is_terminal());
        assert!(!ProcessStatus::Running.is_terminal());
        assert!(!ProcessStatus::Paused.is_terminal());
        assert!(!ProcessStatus::Starting.is_terminal());
    }
}
