//! Asynchronous notifications from the process supervisor.

use crate::format::StreamChannel;

/// Default buffer size for the supervisor event channel.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Notification emitted by a managed process.
///
/// Events are sent over a single mpsc channel consumed by exactly one
/// subscriber (the session orchestrator). Chunks on a given channel are
/// delivered in arrival order; no ordering holds between stdout and stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A chunk of raw output bytes arrived.
    Output {
        id: String,
        channel: StreamChannel,
        bytes: Vec<u8>,
    },
    /// The process exited.
    Exited {
        id: String,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The process failed at runtime (wait error, I/O breakdown).
    Failed { id: String, error: String },
}

impl ProcessEvent {
    /// The session/process id this event belongs to.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Output { id, .. } | Self::Exited { id, .. } | Self::Failed { id, .. } => id,
        }
    }
}
