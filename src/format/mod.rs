//! Format engine for captured terminal output.
//!
//! Translates raw output bytes into ANSI-stripped text, structured
//! escape-sequence descriptors, and the serialized representations
//! (text/HTML/JSON/raw) exposed to remote observers.

mod ansi;
mod html;
mod progress;
mod record;

pub use ansi::*;
pub use html::*;
pub use progress::*;
pub use record::*;
