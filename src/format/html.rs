//! HTML rendering of ANSI-styled text.
//!
//! SGR sequences are converted into nested, properly balanced markup. A
//! reset parameter closes every currently open style scope. Non-SGR
//! sequences are dropped from the rendered output.

use crate::format::ansi::{parse_escape_codes, EscapeKind};

/// Standard terminal palette for SGR 30-37 / 40-47.
const PALETTE: [&str; 8] = [
    "#000000", "#cd0000", "#00cd00", "#cdcd00", "#0000ee", "#cd00cd", "#00cdcd", "#e5e5e5",
];

/// Brighter palette for SGR 90-97 / 100-107.
const BRIGHT_PALETTE: [&str; 8] = [
    "#7f7f7f", "#ff0000", "#00ff00", "#ffff00", "#5c5cff", "#ff00ff", "#00ffff", "#ffffff",
];

/// One open style scope and the tag needed to close it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenTag {
    Bold,
    Italic,
    Underline,
    Span,
}

impl OpenTag {
    fn closing(self) -> &'static str {
        match self {
            Self::Bold => "</b>",
            Self::Italic => "</i>",
            Self::Underline => "</u>",
            Self::Span => "</span>",
        }
    }
}

/// Render ANSI-styled text as HTML with balanced tags.
///
/// HTML-significant characters are escaped and newlines become `<br>`.
/// Any scopes still open at the end of the input are closed.
#[must_use]
pub fn render_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut stack: Vec<OpenTag> = Vec::new();
    let mut cursor = 0;

    for code in parse_escape_codes(text) {
        push_escaped(&mut out, &text[cursor..code.offset]);
        cursor = code.offset + code.code.len();
        if code.kind == EscapeKind::Color {
            apply_sgr(&mut out, &mut stack, &code.params);
        }
    }
    push_escaped(&mut out, &text[cursor..]);

    while let Some(tag) = stack.pop() {
        out.push_str(tag.closing());
    }
    out
}

fn apply_sgr(out: &mut String, stack: &mut Vec<OpenTag>, params: &[u16]) {
    // ESC[m is an implicit reset.
    if params.is_empty() {
        close_all(out, stack);
        return;
    }
    for &param in params {
        match param {
            0 => close_all(out, stack),
            1 => open(out, stack, OpenTag::Bold, "<b>"),
            3 => open(out, stack, OpenTag::Italic, "<i>"),
            4 => open(out, stack, OpenTag::Underline, "<u>"),
            30..=37 => open_color(out, stack, "color", PALETTE[usize::from(param - 30)]),
            90..=97 => open_color(out, stack, "color", BRIGHT_PALETTE[usize::from(param - 90)]),
            40..=47 => {
                open_color(out, stack, "background-color", PALETTE[usize::from(param - 40)]);
            }
            100..=107 => {
                open_color(
                    out,
                    stack,
                    "background-color",
                    BRIGHT_PALETTE[usize::from(param - 100)],
                );
            }
            _ => {}
        }
    }
}

fn open(out: &mut String, stack: &mut Vec<OpenTag>, tag: OpenTag, markup: &str) {
    out.push_str(markup);
    stack.push(tag);
}

fn open_color(out: &mut String, stack: &mut Vec<OpenTag>, property: &str, value: &str) {
    out.push_str(&format!("<span style=\"{property}:{value}\">"));
    stack.push(OpenTag::Span);
}

fn close_all(out: &mut String, stack: &mut Vec<OpenTag>) {
    while let Some(tag) = stack.pop() {
        out.push_str(tag.closing());
    }
}

fn push_escaped(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\n' => out.push_str("<br>"),
            other => out.push(other),
        }
    }
}
