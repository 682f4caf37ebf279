//! ANSI escape-sequence scanning and classification.
//!
//! Only CSI sequences (`ESC [ params finalByte`) are recognized. Anything
//! that does not match the CSI grammar is left in the text untouched.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classification of an escape sequence by its final byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeKind {
    /// SGR color/attribute sequence (`m`).
    Color,
    /// Cursor movement or save/restore (`H f A B C D S T s u`).
    Cursor,
    /// Screen or line erase (`J K`).
    Erase,
    /// Mode set/reset (`h l`).
    Style,
    /// Anything else.
    Unknown,
}

/// Structured descriptor for one escape sequence found in a text fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscapeCode {
    /// Sequence classification.
    pub kind: EscapeKind,
    /// The raw escape sequence, including the leading `ESC [`.
    pub code: String,
    /// Numeric parameters; non-numeric tokens are dropped.
    pub params: Vec<u16>,
    /// Human-readable description of the sequence's effect.
    pub description: String,
    /// Byte offset of the sequence within the source text.
    pub offset: usize,
}

fn csi_regex() -> &'static Regex {
    static CSI: OnceLock<Regex> = OnceLock::new();
    CSI.get_or_init(|| Regex::new(r"\x1b\[([0-9;?]*)([\x40-\x7e])").expect("CSI pattern compiles"))
}

/// Scan a text fragment for CSI sequences and produce descriptors.
#[must_use]
pub fn parse_escape_codes(text: &str) -> Vec<EscapeCode> {
    csi_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let params_str = caps.get(1).map_or("", |m| m.as_str());
            let final_byte = caps.get(2)?.as_str().chars().next()?;

            let params = parse_params(params_str);
            let kind = classify(final_byte);
            let description = describe(kind, final_byte, &params);

            Some(EscapeCode {
                kind,
                code: whole.as_str().to_string(),
                params,
                description,
                offset: whole.start(),
            })
        })
        .collect()
}

/// Remove all CSI sequences from a text fragment.
#[must_use]
pub fn strip_ansi(text: &str) -> String {
    csi_regex().replace_all(text, "").into_owned()
}

/// Parse the semicolon-delimited parameter string, dropping non-numeric tokens.
fn parse_params(params: &str) -> Vec<u16> {
    params
        .split(';')
        .filter_map(|token| token.parse::<u16>().ok())
        .collect()
}

/// Classify a sequence by its final byte.
fn classify(final_byte: char) -> EscapeKind {
    match final_byte {
        'm' => EscapeKind::Color,
        'H' | 'f' | 'A' | 'B' | 'C' | 'D' | 'S' | 'T' | 's' | 'u' => EscapeKind::Cursor,
        'J' | 'K' => EscapeKind::Erase,
        'h' | 'l' => EscapeKind::Style,
        _ => EscapeKind::Unknown,
    }
}

/// Named foreground colors for SGR parameters 30-37 (and their variants).
const COLOR_NAMES: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

fn describe(kind: EscapeKind, final_byte: char, params: &[u16]) -> String {
    match kind {
        EscapeKind::Color => describe_sgr(params),
        EscapeKind::Cursor => describe_cursor(final_byte).to_string(),
        EscapeKind::Erase => describe_erase(final_byte, params).to_string(),
        EscapeKind::Style => match final_byte {
            'h' => "Set mode".to_string(),
            _ => "Reset mode".to_string(),
        },
        EscapeKind::Unknown => "Unknown sequence".to_string(),
    }
}

fn describe_sgr(params: &[u16]) -> String {
    // ESC[m with no parameters is an implicit reset.
    if params.is_empty() {
        return "Reset all formatting".to_string();
    }
    params
        .iter()
        .map(|&p| describe_sgr_param(p))
        .collect::<Vec<_>>()
        .join(", ")
}

fn describe_sgr_param(param: u16) -> String {
    match param {
        0 => "Reset all formatting".to_string(),
        1 => "Bold".to_string(),
        2 => "Dim".to_string(),
        3 => "Italic".to_string(),
        4 => "Underline".to_string(),
        5 => "Blink".to_string(),
        7 => "Reverse video".to_string(),
        9 => "Strikethrough".to_string(),
        22 => "Normal intensity".to_string(),
        30..=37 => format!("Foreground {}", COLOR_NAMES[usize::from(param - 30)]),
        39 => "Default foreground".to_string(),
        40..=47 => format!("Background {}", COLOR_NAMES[usize::from(param - 40)]),
        49 => "Default background".to_string(),
        90..=97 => format!("Bright foreground {}", COLOR_NAMES[usize::from(param - 90)]),
        100..=107 => format!("Bright background {}", COLOR_NAMES[usize::from(param - 100)]),
        other => format!("code-{other}"),
    }
}

fn describe_cursor(final_byte: char) -> &'static str {
    match final_byte {
        'H' | 'f' => "Move cursor to position",
        'A' => "Move cursor up",
        'B' => "Move cursor down",
        'C' => "Move cursor forward",
        'D' => "Move cursor back",
        'S' => "Scroll up",
        'T' => "Scroll down",
        's' => "Save cursor position",
        _ => "Restore cursor position",
    }
}

fn describe_erase(final_byte: char, params: &[u16]) -> &'static str {
    let mode = params.first().copied().unwrap_or(0);
    if final_byte == 'J' {
        match mode {
            1 => "Erase from start of screen to cursor",
            2 => "Erase entire screen",
            3 => "Erase screen and scrollback",
            _ => "Erase from cursor to end of screen",
        }
    } else {
        match mode {
            1 => "Erase from start of line to cursor",
            2 => "Erase entire line",
            _ => "Erase from cursor to end of line",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn red_text_produces_single_color_descriptor() {
        let codes = parse_escape_codes("\x1b[31mRed\x1b[0m");
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].kind, EscapeKind::Color);
        assert_eq!(codes[0].params, vec![31]);
        assert_eq!(codes[0].description, "Foreground red");
        assert_eq!(codes[0].offset, 0);
        assert_eq!(codes[1].params, vec![0]);
        assert_eq!(codes[1].description, "Reset all formatting");
    }

    #[test]
    fn strip_removes_csi_sequences() {
        assert_eq!(strip_ansi("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_ansi("plain text"), "plain text");
        assert_eq!(strip_ansi("\x1b[2J\x1b[1;1Hcleared"), "cleared");
    }

    #[test]
    fn malformed_sequences_are_left_untouched() {
        // A bare escape and an unterminated CSI do not match the grammar.
        assert!(parse_escape_codes("\x1bend").is_empty());
        let unterminated = "tail\x1b[12;";
        assert!(parse_escape_codes(unterminated).is_empty());
        assert_eq!(strip_ansi(unterminated), unterminated);
    }

    #[test]
    fn cursor_and_erase_classification() {
        let codes = parse_escape_codes("\x1b[2J\x1b[3A\x1b[s");
        assert_eq!(codes[0].kind, EscapeKind::Erase);
        assert_eq!(codes[0].description, "Erase entire screen");
        assert_eq!(codes[1].kind, EscapeKind::Cursor);
        assert_eq!(codes[1].description, "Move cursor up");
        assert_eq!(codes[2].description, "Save cursor position");
    }

    #[test]
    fn mode_sequences_classified_as_style() {
        let codes = parse_escape_codes("\x1b[?25l\x1b[?25h");
        assert_eq!(codes[0].kind, EscapeKind::Style);
        assert_eq!(codes[0].description, "Reset mode");
        assert_eq!(codes[1].description, "Set mode");
    }

    #[test]
    fn out_of_range_sgr_params_become_generic_codes() {
        let codes = parse_escape_codes("\x1b[38;5;196m");
        assert_eq!(codes[0].kind, EscapeKind::Color);
        assert_eq!(codes[0].params, vec![38, 5, 196]);
        assert!(codes[0].description.contains("code-38"));
        assert!(codes[0].description.contains("code-196"));
    }

    #[test]
    fn non_numeric_params_are_dropped() {
        // DEC-private parameters like "?25" are not plain numeric tokens.
        let codes = parse_escape_codes("\x1b[?25h");
        assert!(codes[0].params.is_empty());
        let codes = parse_escape_codes("\x1b[1;?2;3m");
        assert_eq!(codes[0].params, vec![1, 3]);
    }
}
