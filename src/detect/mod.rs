mod backend;
pub mod backends;
mod error;
mod registry;
mod resolver;
mod result;
mod selector;

pub use backend::DetectorBackend;
pub use backends::{HttpBackend, HttpSettings, Scene, ScriptedBackend};
pub use error::DetectError;
pub use registry::BackendRegistry;
pub use resolver::{resolve, DetectionCache};
pub use result::{ClassGroups, DetectedObject, RawDetection};
pub use selector::{ClassifierSelector, SelectorSettings};
