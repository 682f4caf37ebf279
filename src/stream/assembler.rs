//! Logical-line reconstruction from arbitrarily chunked byte streams.
//!
//! Converts the unbounded chunk stream of each (session, channel) pair into
//! a sequence of completed lines, tolerating partial lines and the
//! carriage-return rewrite pattern used by progress bars and spinners.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::format::StreamChannel;
use crate::stream::buffer::{ChannelBuffer, MAX_PENDING_CHARS};

/// Default time a partial line may sit unfinished before it is force-emitted.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of feeding one chunk to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledChunk {
    /// Lines completed by this chunk, normalized, in order.
    pub lines: Vec<String>,
    /// Per-channel sequence number of the chunk.
    pub sequence: u64,
}

/// A line force-emitted because its flush deadline expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedLine {
    pub session_id: String,
    pub channel: StreamChannel,
    pub line: String,
}

/// Per-session, per-channel stream assembler.
///
/// Owns the stream-buffer map exclusively; all mutation happens through
/// these methods on the orchestrator's thread of control.
#[derive(Debug)]
pub struct StreamAssembler {
    buffers: HashMap<(String, StreamChannel), ChannelBuffer>,
    flush_timeout: Duration,
    whitespace: Regex,
}

impl Default for StreamAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_TIMEOUT)
    }
}

impl StreamAssembler {
    #[must_use]
    pub fn new(flush_timeout: Duration) -> Self {
        Self {
            buffers: HashMap::new(),
            flush_timeout,
            whitespace: Regex::new(r"\s+").expect("whitespace pattern compiles"),
        }
    }

    /// Feed one raw chunk and return the lines it completed.
    pub fn push_chunk(
        &mut self,
        session_id: &str,
        channel: StreamChannel,
        bytes: &[u8],
    ) -> AssembledChunk {
        let now = Instant::now();
        let text = String::from_utf8_lossy(bytes).into_owned();
        let buffer = self
            .buffers
            .entry((session_id.to_string(), channel))
            .or_default();
        buffer.push_raw(bytes);
        let sequence = buffer.next_sequence();

        let mut completed = Vec::new();
        if has_rewrite(&text) {
            // Progress-indicator rewrite: every `\r`-delimited segment is a
            // finished frame; the final segment replaces (never appends to)
            // the pending content.
            let segments: Vec<&str> = text.split('\r').collect();
            let first = format!("{}{}", buffer.pending(), segments[0]);
            completed.push(first);
            for segment in &segments[1..segments.len() - 1] {
                completed.push((*segment).to_string());
            }
            let last = segments.last().copied().unwrap_or("");
            buffer.set_pending(last.to_string(), now);
        } else {
            let combined = format!("{}{}", buffer.pending(), text);
            let mut parts: Vec<&str> = combined.split('\n').collect();
            let last = parts.pop().unwrap_or("");
            for part in parts {
                completed.push(part.to_string());
            }
            buffer.set_pending(last.to_string(), now);
        }

        // A single line may never grow without bound.
        if buffer.pending().chars().count() > MAX_PENDING_CHARS {
            completed.push(buffer.take_pending());
        }

        let lines: Vec<String> = completed
            .into_iter()
            .map(|line| normalize_line(&self.whitespace, &line))
            .collect();
        for line in &lines {
            buffer.push_line(line.clone());
        }
        AssembledChunk { lines, sequence }
    }

    /// Force-emit pending lines whose flush deadline has passed.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<FlushedLine> {
        let mut flushed = Vec::new();
        for ((session_id, channel), buffer) in &mut self.buffers {
            let Some(since) = buffer.pending_since() else {
                continue;
            };
            if now.duration_since(since) < self.flush_timeout {
                continue;
            }
            let line = normalize_line(&self.whitespace, &buffer.take_pending());
            buffer.push_line(line.clone());
            flushed.push(FlushedLine {
                session_id: session_id.clone(),
                channel: *channel,
                line,
            });
        }
        flushed
    }

    /// Force-emit all pending content for one session (used at exit).
    pub fn flush_session(&mut self, session_id: &str) -> Vec<FlushedLine> {
        let mut flushed = Vec::new();
        for ((id, channel), buffer) in &mut self.buffers {
            if id != session_id || buffer.pending().is_empty() {
                continue;
            }
            let line = normalize_line(&self.whitespace, &buffer.take_pending());
            buffer.push_line(line.clone());
            flushed.push(FlushedLine {
                session_id: id.clone(),
                channel: *channel,
                line,
            });
        }
        flushed
    }

    /// Earliest pending-line flush deadline across all buffers.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.buffers
            .values()
            .filter_map(ChannelBuffer::pending_since)
            .min()
            .map(|since| since + self.flush_timeout)
    }

    /// Recently completed lines for one (session, channel), oldest first.
    #[must_use]
    pub fn recent_lines(&self, session_id: &str, channel: StreamChannel) -> Vec<String> {
        self.buffers
            .get(&(session_id.to_string(), channel))
            .map(ChannelBuffer::recent_lines)
            .unwrap_or_default()
    }

    /// Buffered raw bytes for one (session, channel).
    #[must_use]
    pub fn raw_bytes(&self, session_id: &str, channel: StreamChannel) -> Vec<u8> {
        self.buffers
            .get(&(session_id.to_string(), channel))
            .map(ChannelBuffer::raw_bytes)
            .unwrap_or_default()
    }

    /// Chunk sequence number for one (session, channel).
    #[must_use]
    pub fn sequence(&self, session_id: &str, channel: StreamChannel) -> u64 {
        self.buffers
            .get(&(session_id.to_string(), channel))
            .map_or(0, ChannelBuffer::sequence)
    }

    /// The current pending partial line for one (session, channel).
    #[must_use]
    pub fn pending(&self, session_id: &str, channel: StreamChannel) -> String {
        self.buffers
            .get(&(session_id.to_string(), channel))
            .map(|buffer| buffer.pending().to_string())
            .unwrap_or_default()
    }

    /// Drop all buffers belonging to a session.
    pub fn remove_session(&mut self, session_id: &str) {
        self.buffers.retain(|(id, _), _| id != session_id);
    }
}

/// A `\r` not immediately followed by `\n` signals an in-place rewrite.
fn has_rewrite(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .any(|(i, &b)| b == b'\r' && bytes.get(i + 1) != Some(&b'\n'))
}

/// Normalize a completed line: strip BEL and trailing carriage returns,
/// collapse internal whitespace runs, trim the ends.
fn normalize_line(whitespace: &Regex, line: &str) -> String {
    let cleaned: String = line
        .trim_end_matches('\r')
        .chars()
        .filter(|&c| c != '\u{0007}')
        .collect();
    whitespace.replace_all(&cleaned, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assembler() -> StreamAssembler {
        StreamAssembler::new(Duration::from_secs(5))
    }

    #[test]
    fn progress_rewrite_completes_frames_and_replaces_pending() {
        let mut asm = assembler();
        let chunk = asm.push_chunk(
            "s1",
            StreamChannel::Stdout,
            b"Progress: 1%\rProgress: 2%\rProgress: 3%",
        );
        assert_eq!(chunk.lines, vec!["Progress: 1%", "Progress: 2%"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "Progress: 3%");
    }

    #[test]
    fn rewrite_final_segment_replaces_shorter_pending() {
        let mut asm = assembler();
        asm.push_chunk("s1", StreamChannel::Stdout, b"a very long progress line");
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"\rok");
        // The pending line is completed by the rewrite, then replaced.
        assert_eq!(chunk.lines, vec!["a very long progress line"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "ok");
    }

    #[test]
    fn trailing_carriage_return_leaves_pending_empty() {
        let mut asm = assembler();
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"spin\rspin\r");
        assert_eq!(chunk.lines, vec!["spin", "spin"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "");
    }

    #[test]
    fn newline_split_keeps_last_segment_pending() {
        let mut asm = assembler();
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"one\ntwo\nthr");
        assert_eq!(chunk.lines, vec!["one", "two"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "thr");
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"ee\n");
        assert_eq!(chunk.lines, vec!["three"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "");
    }

    #[test]
    fn crlf_pairs_are_ordinary_line_endings() {
        let mut asm = assembler();
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"one\r\ntwo\r\n");
        assert_eq!(chunk.lines, vec!["one", "two"]);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "");
    }

    #[test]
    fn reassembly_round_trips_for_cr_free_input() {
        let text = "alpha\nbravo\ncharlie\ndelta tail";
        let mut asm = assembler();
        let mut lines = Vec::new();
        // Deliver in awkward chunk boundaries.
        for chunk in ["alp", "ha\nbr", "avo\nchar", "lie\ndelta tail"] {
            lines.extend(asm.push_chunk("s1", StreamChannel::Stdout, chunk.as_bytes()).lines);
        }
        lines.push(asm.pending("s1", StreamChannel::Stdout));
        let expected: Vec<String> = text.split('\n').map(str::to_string).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn normalization_trims_and_collapses_whitespace() {
        let mut asm = assembler();
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, b"  a \t b\x07  \n");
        assert_eq!(chunk.lines, vec!["a b"]);
    }

    #[test]
    fn oversized_pending_line_is_force_completed() {
        let mut asm = assembler();
        let big = "x".repeat(MAX_PENDING_CHARS + 10);
        let chunk = asm.push_chunk("s1", StreamChannel::Stdout, big.as_bytes());
        assert_eq!(chunk.lines.len(), 1);
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "");
    }

    #[test]
    fn stale_pending_lines_are_flushed_after_timeout() {
        let mut asm = StreamAssembler::new(Duration::from_millis(10));
        asm.push_chunk("s1", StreamChannel::Stdout, b"halfway");
        assert!(asm
            .flush_expired(Instant::now())
            .is_empty());
        let later = Instant::now() + Duration::from_millis(50);
        let flushed = asm.flush_expired(later);
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].line, "halfway");
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "");
        // Timer is cancelled once flushed.
        assert!(asm.flush_expired(later + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn new_chunk_rearms_the_flush_timer() {
        let mut asm = StreamAssembler::new(Duration::from_secs(5));
        asm.push_chunk("s1", StreamChannel::Stdout, b"part");
        let first = asm.next_deadline().unwrap();
        std::thread::sleep(Duration::from_millis(5));
        asm.push_chunk("s1", StreamChannel::Stdout, b"ial");
        assert!(asm.next_deadline().unwrap() > first);
    }

    #[test]
    fn channels_are_assembled_independently() {
        let mut asm = assembler();
        asm.push_chunk("s1", StreamChannel::Stdout, b"out");
        asm.push_chunk("s1", StreamChannel::Stderr, b"err\n");
        assert_eq!(asm.pending("s1", StreamChannel::Stdout), "out");
        assert_eq!(asm.recent_lines("s1", StreamChannel::Stderr), vec!["err"]);
        assert_eq!(asm.sequence("s1", StreamChannel::Stdout), 1);
        assert_eq!(asm.sequence("s1", StreamChannel::Stderr), 1);
    }

    #[test]
    fn flush_session_emits_all_pending_content() {
        let mut asm = assembler();
        asm.push_chunk("s1", StreamChannel::Stdout, b"tail");
        asm.push_chunk("s2", StreamChannel::Stdout, b"other");
        let flushed = asm.flush_session("s1");
        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].line, "tail");
        assert_eq!(asm.pending("s2", StreamChannel::Stdout), "other");
    }

    #[test]
    fn remove_session_clears_buffers() {
        let mut asm = assembler();
        asm.push_chunk("s1", StreamChannel::Stdout, b"data\n");
        asm.remove_session("s1");
        assert!(asm.recent_lines("s1", StreamChannel::Stdout).is_empty());
        assert!(asm.raw_bytes("s1", StreamChannel::Stdout).is_empty());
    }

    #[test]
    fn raw_bytes_preserve_exact_chunk_boundaries() {
        let mut asm = assembler();
        asm.push_chunk("s1", StreamChannel::Stdout, b"ab\xffc");
        asm.push_chunk("s1", StreamChannel::Stdout, b"\r\n");
        assert_eq!(asm.raw_bytes("s1", StreamChannel::Stdout), b"ab\xffc\r\n");
    }
}
