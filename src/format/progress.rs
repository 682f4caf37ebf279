//! Progress-indicator heuristics.
//!
//! Progress bars and spinners are recognized by a fixed set of block and
//! spinner glyphs, a percent sign, or a carriage return. Stripping removes
//! only fragments matching known visual patterns and leaves ordinary text
//! untouched.

use std::sync::OnceLock;

use regex::Regex;

/// Block glyphs commonly used to draw progress bars.
const BLOCK_GLYPHS: &str = "█▉▊▋▌▍▎▏▓▒░";

/// Braille spinner frames used by common CLI spinners.
const SPINNER_GLYPHS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏⣾⣽⣻⢿⡿⣟⣯⣷";

fn bar_regex() -> &'static Regex {
    static BAR: OnceLock<Regex> = OnceLock::new();
    BAR.get_or_init(|| {
        Regex::new(r"[█▉▊▋▌▍▎▏▓▒░]+|\[[=\-#>. ]{3,}\]|\s*\d{1,3}(\.\d+)?%")
            .expect("progress pattern compiles")
    })
}

fn spinner_regex() -> &'static Regex {
    static SPINNER: OnceLock<Regex> = OnceLock::new();
    SPINNER.get_or_init(|| {
        Regex::new(r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏⣾⣽⣻⢿⡿⣟⣯⣷]").expect("spinner pattern compiles")
    })
}

/// Whether a text fragment looks like it contains a progress indicator.
#[must_use]
pub fn has_progress_indicator(text: &str) -> bool {
    text.contains('\r')
        || text.contains('%')
        || text
            .chars()
            .any(|c| BLOCK_GLYPHS.contains(c) || SPINNER_GLYPHS.contains(c))
}

/// Remove progress-bar and spinner fragments, leaving ordinary text as is.
#[must_use]
pub fn strip_progress_indicators(text: &str) -> String {
    let stripped = bar_regex().replace_all(text, "");
    spinner_regex().replace_all(&stripped, "").into_owned()
}
