//! Captured output records and their serialized representations.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::format::ansi::{parse_escape_codes, strip_ansi, EscapeCode};
use crate::format::html::render_html;

/// Output channel of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamChannel {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// Serialized representation selector for captured output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Base64 of the original bytes; lossless.
    Raw,
    /// ANSI-stripped text.
    #[default]
    Text,
    /// Escape sequences converted to balanced HTML markup.
    Html,
    /// Complete structured projection.
    Json,
}

/// One reconstructed unit of captured output.
///
/// Immutable once produced; appended to a session's bounded history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    /// Original bytes as received from the process.
    pub raw: Vec<u8>,
    /// ANSI-stripped text.
    pub text: String,
    /// ANSI-preserving text (lossy UTF-8 decode of the raw bytes).
    pub ansi_text: String,
    /// Structured escape-sequence descriptors found in the output.
    pub codes: Vec<EscapeCode>,
    /// Channel the output arrived on.
    pub channel: StreamChannel,
    /// Capture timestamp.
    pub timestamp: DateTime<Utc>,
}

impl OutputRecord {
    /// Capture a raw chunk into a fully decoded record.
    #[must_use]
    pub fn capture(raw: &[u8], channel: StreamChannel) -> Self {
        let ansi_text = String::from_utf8_lossy(raw).into_owned();
        Self {
            raw: raw.to_vec(),
            text: strip_ansi(&ansi_text),
            codes: parse_escape_codes(&ansi_text),
            ansi_text,
            channel,
            timestamp: Utc::now(),
        }
    }

    /// Serialize this record in the requested representation.
    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Raw => BASE64.encode(&self.raw),
            OutputFormat::Text => self.text.clone(),
            OutputFormat::Html => render_html(&self.ansi_text),
            OutputFormat::Json => serde_json::json!({
                "text": self.text,
                "ansi": self.ansi_text,
                "codes": self.codes,
                "channel": self.channel,
                "timestamp": self.timestamp.to_rfc3339(),
            })
            .to_string(),
        }
    }
}
