//! Session orchestration: lifecycle, history, and remote fan-out.

mod orchestrator;
mod registry;
mod session;
mod transport;

pub use orchestrator::*;
pub use registry::*;
pub use session::*;
pub use transport::*;
