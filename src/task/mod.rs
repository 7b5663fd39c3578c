//! Guided assembly task: states, per-state handlers and the engine that runs
//! them frame by frame.

mod clock;
mod engine;
pub mod gear;
mod handlers;
mod instruction;
mod session;
mod state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::GuidanceEngine;
pub use instruction::{Guidance, Instruction, Overlay, OverlayColor, Status};
pub use session::{Session, SessionHeader};
pub use state::{TaskState, Transition};
