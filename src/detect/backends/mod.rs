pub mod http;
pub mod scripted;

pub use http::{HttpBackend, HttpSettings};
pub use scripted::{Scene, ScriptedBackend};
