use crate::frame::Frame;

use super::error::DetectError;
use super::result::RawDetection;

/// Detector backend trait.
///
/// A backend is one logical classifier. Each recognizes a fixed label set and
/// answers requests only while started. The classifier selector guarantees that
/// at most one backend is started at a time and that `start`, `stop` and
/// `detect` are never called concurrently.
pub trait DetectorBackend: Send {
    /// Backend identifier, as used in the label registry.
    fn name(&self) -> &str;

    /// Bring the backend up. Called when it becomes the active backend.
    fn start(&mut self) -> Result<(), DetectError> {
        Ok(())
    }

    /// Shut the backend down. Called when another backend replaces it.
    fn stop(&mut self) -> Result<(), DetectError> {
        Ok(())
    }

    /// Run detection on a frame.
    ///
    /// Returns every detection at or above `confidence`, unfiltered and unresolved.
    fn detect(&mut self, frame: &Frame, confidence: f32) -> Result<Vec<RawDetection>, DetectError>;
}
