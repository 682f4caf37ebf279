//! Bounded per-channel buffers.

use std::collections::VecDeque;
use std::time::Instant;

/// Maximum raw bytes retained per channel before the oldest are discarded.
pub const MAX_RAW_BYTES: usize = 1024 * 1024;

/// Maximum pending partial-line length before it is force-completed.
pub const MAX_PENDING_CHARS: usize = 100_000;

/// Completed lines retained per channel for line-oriented consumers.
const MAX_RETAINED_LINES: usize = 1_000;

/// Accumulated state for one (session, channel) stream.
///
/// Holds the raw byte buffer (strict byte-boundary reconstruction), the
/// pending partial line, the per-channel sequence counter, and a bounded
/// window of recently completed lines. The raw buffer and the line-pending
/// buffer are independent, with independent caps.
#[derive(Debug, Default)]
pub struct ChannelBuffer {
    raw: VecDeque<u8>,
    pending: String,
    pending_since: Option<Instant>,
    sequence: u64,
    lines: VecDeque<String>,
}

impl ChannelBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes, discarding the oldest on overflow.
    pub fn push_raw(&mut self, bytes: &[u8]) {
        self.raw.extend(bytes.iter().copied());
        if self.raw.len() > MAX_RAW_BYTES {
            let excess = self.raw.len() - MAX_RAW_BYTES;
            self.raw.drain(..excess);
            tracing::warn!(
                discarded = excess,
                "raw channel buffer overflow, oldest bytes dropped"
            );
        }
    }

    /// Copy of the currently buffered raw bytes.
    #[must_use]
    pub fn raw_bytes(&self) -> Vec<u8> {
        self.raw.iter().copied().collect()
    }

    /// Advance and return the per-channel sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    /// Current sequence number (count of chunks seen).
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The pending partial line.
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Replace the pending content, (re)arming or clearing the flush timer.
    pub fn set_pending(&mut self, pending: String, now: Instant) {
        self.pending_since = if pending.is_empty() { None } else { Some(now) };
        self.pending = pending;
    }

    /// Take the pending content, clearing the flush timer.
    pub fn take_pending(&mut self) -> String {
        self.pending_since = None;
        std::mem::take(&mut self.pending)
    }

    /// Instant at which the current pending content first appeared.
    #[must_use]
    pub fn pending_since(&self) -> Option<Instant> {
        self.pending_since
    }

    /// Record a completed line in the bounded recent-lines window.
    pub fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        if self.lines.len() > MAX_RETAINED_LINES {
            self.lines.pop_front();
        }
    }

    /// Recently completed lines, oldest first.
    #[must_use]
    pub fn recent_lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_buffer_keeps_most_recent_bytes_on_overflow() {
        let mut buffer = ChannelBuffer::new();
        buffer.push_raw(&vec![1u8; MAX_RAW_BYTES]);
        buffer.push_raw(&[2u8; 10]);
        let bytes = buffer.raw_bytes();
        assert_eq!(bytes.len(), MAX_RAW_BYTES);
        assert_eq!(&bytes[bytes.len() - 10..], &[2u8; 10]);
        assert_eq!(bytes[0], 1);
    }

    #[test]
    fn sequence_counter_is_monotonic() {
        let mut buffer = ChannelBuffer::new();
        assert_eq!(buffer.next_sequence(), 1);
        assert_eq!(buffer.next_sequence(), 2);
        assert_eq!(buffer.sequence(), 2);
    }

    #[test]
    fn pending_timer_arms_only_when_nonempty() {
        let mut buffer = ChannelBuffer::new();
        let now = Instant::now();
        buffer.set_pending("partial".to_string(), now);
        assert_eq!(buffer.pending_since(), Some(now));
        buffer.set_pending(String::new(), now);
        assert_eq!(buffer.pending_since(), None);
    }

    #[test]
    fn recent_lines_window_is_bounded() {
        let mut buffer = ChannelBuffer::new();
        for i in 0..1_200 {
            buffer.push_line(format!("line {i}"));
        }
        let lines = buffer.recent_lines();
        assert_eq!(lines.len(), 1_000);
        assert_eq!(lines[0], "line 200");
    }
}
