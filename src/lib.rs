//! Assembly Guide
//!
//! Frame-driven guidance for assembling a toy car kit. Each camera frame is
//! sent through the object detection backends that know the parts in view,
//! the detections are smoothed over time, and a state machine turns them into
//! spoken instructions, reference media and overlay boxes.
//!
//! # Module Structure
//!
//! - `frame`: Decoded camera frames and grayscale crops
//! - `detect`: Backend registry, classifier selector and HTTP/scripted backends
//! - `stability`: Per-slot temporal stability filters
//! - `progress`: Washer hole progress model
//! - `task`: Task states, per-state handlers and the `GuidanceEngine`
//! - `config`: File + environment configuration

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod progress;
pub mod stability;
pub mod task;

pub use config::GuideConfig;
pub use detect::{
    BackendRegistry, ClassifierSelector, DetectError, DetectedObject, DetectorBackend,
    RawDetection,
};
pub use frame::{Frame, FrameId};
pub use task::{Guidance, GuidanceEngine, Instruction, SessionHeader, TaskState};
