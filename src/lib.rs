//! cmdlink - wrap command-line programs with streaming capture and control.
//!
//! Spawns arbitrary commands with piped stdio, captures their output
//! byte-for-byte, reconstructs logical lines and terminal formatting in real
//! time, and fans the result out to attached observers. Many concurrent
//! sessions, each independently controllable.

pub mod config;
pub mod display;
pub mod format;
pub mod process;
pub mod session;
pub mod stream;
