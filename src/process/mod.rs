//! Process supervision: spawning, signaling, and raw byte capture.

mod config;
mod events;
mod handle;
mod supervisor;

pub use config::*;
pub use events::*;
pub use handle::*;
pub use supervisor::*;
