//! Colored CLI display utilities for wrapped-command output.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while a session runs, plus a [`ConsoleTransport`] that
//! lets the CLI observe a session through the same fan-out path as remote
//! observers.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::format::StreamChannel;
use crate::session::{RemoteMessage, RemoteTransport};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 200;

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let mut end = max_len - 3;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

/// Print session start information.
pub fn print_session_start(tool: &str, session_id: &str, command: &str) {
    println!(
        "{} {} tool={}, command={}, session={}",
        timestamp().dimmed(),
        "[SESSION]".blue().bold(),
        tool.cyan(),
        command.bold(),
        truncate(session_id, 20).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print session end information.
pub fn print_session_end(exit_code: Option<i32>, signal: Option<i32>) {
    let ts = timestamp();
    match (exit_code, signal) {
        (Some(0), _) => {
            println!(
                "{} {} exited with code {}",
                ts.dimmed(),
                "[SESSION]".blue().bold(),
                "0".green()
            );
        }
        (Some(code), _) => {
            println!(
                "{} {} exited with code {}",
                ts.dimmed(),
                "[SESSION]".red().bold(),
                code.to_string().red()
            );
        }
        (None, Some(sig)) => {
            println!(
                "{} {} killed by signal {}",
                ts.dimmed(),
                "[SESSION]".red().bold(),
                sig.to_string().red()
            );
        }
        (None, None) => {
            println!(
                "{} {} exited",
                ts.dimmed(),
                "[SESSION]".blue().bold()
            );
        }
    }
    let _ = io::stdout().flush();
}

/// Print a session status change.
pub fn print_status(status: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[STATUS]".magenta().bold(),
        status
    );
    let _ = io::stdout().flush();
}

/// Print output text for one channel.
///
/// Stdout text passes through verbatim so the wrapped command's own
/// formatting survives; stderr is tinted to stay distinguishable.
pub fn print_output(channel: StreamChannel, text: &str) {
    match channel {
        StreamChannel::Stdout => print!("{text}"),
        StreamChannel::Stderr => eprint!("{}", text.red()),
    }
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ERROR]".red().bold(),
        truncate(message, DEFAULT_MAX_LEN).red()
    );
    let _ = io::stdout().flush();
}

/// Observer id used by the CLI's console observer.
pub const CONSOLE_OBSERVER_ID: &str = "console";

/// Transport that renders remote messages straight to the terminal.
///
/// Attached as an ordinary observer, so the CLI sees exactly what a remote
/// client would see.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleTransport {
    /// Suppress lifecycle banners, printing raw output only.
    pub quiet: bool,
}

impl ConsoleTransport {
    #[must_use]
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl RemoteTransport for ConsoleTransport {
    fn deliver(&self, _observer_id: &str, message: &RemoteMessage) {
        match message {
            RemoteMessage::Output { record, .. } => {
                print_output(record.channel, &record.ansi_text);
            }
            RemoteMessage::Status { status, .. } if !self.quiet => {
                print_status(&status.to_string());
            }
            RemoteMessage::Error { message, .. } => {
                print_error(message);
            }
            RemoteMessage::InputEcho { .. } | RemoteMessage::Status { .. } => {}
        }
    }
}
