//! Per-session, per-channel stream buffering and line reconstruction.

mod assembler;
mod buffer;

pub use assembler::*;
pub use buffer::*;
