use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::detect::backend::DetectorBackend;
use crate::detect::error::DetectError;
use crate::detect::result::RawDetection;
use crate::frame::Frame;

enum Failure {
    Unreachable(String),
    Malformed(String),
}

#[derive(Default)]
struct SceneState {
    detections: Vec<RawDetection>,
    failures: VecDeque<Failure>,
}

/// Shared, mutable set of detections that scripted backends report.
///
/// Cloning a `Scene` yields another handle to the same detections, so a test
/// or replay driver can change what every backend "sees" between frames.
#[derive(Clone, Default)]
pub struct Scene {
    inner: Arc<Mutex<SceneState>>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the detections reported from now on.
    pub fn set(&self, detections: Vec<RawDetection>) {
        if let Ok(mut state) = self.inner.lock() {
            state.detections = detections;
        }
    }

    pub fn clear(&self) {
        self.set(Vec::new());
    }

    /// Make the next request fail as if the backend were unreachable.
    pub fn fail_next(&self, reason: &str) {
        if let Ok(mut state) = self.inner.lock() {
            state
                .failures
                .push_back(Failure::Unreachable(reason.to_string()));
        }
    }

    /// Make the next request fail with an unparseable response.
    pub fn malformed_next(&self, reason: &str) {
        if let Ok(mut state) = self.inner.lock() {
            state
                .failures
                .push_back(Failure::Malformed(reason.to_string()));
        }
    }

    fn next_response(&self, backend: &str, confidence: f32) -> Result<Vec<RawDetection>, DetectError> {
        let mut state = self.inner.lock().map_err(|_| DetectError::Lifecycle {
            backend: backend.to_string(),
            reason: "scene lock poisoned".to_string(),
        })?;
        match state.failures.pop_front() {
            Some(Failure::Unreachable(reason)) => Err(DetectError::BackendUnreachable {
                backend: backend.to_string(),
                reason,
            }),
            Some(Failure::Malformed(reason)) => Err(DetectError::MalformedResponse {
                backend: backend.to_string(),
                reason,
            }),
            None => Ok(state
                .detections
                .iter()
                .filter(|det| det.2 >= confidence)
                .cloned()
                .collect()),
        }
    }
}

#[derive(Default)]
struct Counters {
    starts: AtomicUsize,
    stops: AtomicUsize,
    requests: AtomicUsize,
}

/// Backend that reports whatever its `Scene` currently holds.
///
/// Used by tests and by the replay tool. Clones share the scene and the
/// lifecycle counters, so a clone kept outside the registry can observe how
/// the selector drives the backend.
#[derive(Clone)]
pub struct ScriptedBackend {
    name: String,
    scene: Scene,
    counters: Arc<Counters>,
}

impl ScriptedBackend {
    pub fn new(name: &str) -> Self {
        Self::with_scene(name, Scene::new())
    }

    pub fn with_scene(name: &str, scene: Scene) -> Self {
        Self {
            name: name.to_string(),
            scene,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn starts(&self) -> usize {
        self.counters.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.counters.stops.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn start(&mut self) -> Result<(), DetectError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DetectError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detect(&mut self, _frame: &Frame, confidence: f32) -> Result<Vec<RawDetection>, DetectError> {
        self.counters.requests.fetch_add(1, Ordering::SeqCst);
        self.scene.next_response(&self.name, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_backend_reports_scene_above_confidence() {
        let mut backend = ScriptedBackend::new("holes");
        backend.scene().set(vec![
            RawDetection::new("hole_empty", [0.0, 0.0, 10.0, 10.0], 0.9),
            RawDetection::new("hole_green", [20.0, 0.0, 30.0, 10.0], 0.3),
        ]);
        let frame = Frame::filled(8, 8, [0, 0, 0]).unwrap();

        let found = backend.detect(&frame, 0.5).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "hole_empty");

        backend.scene().malformed_next("truncated");
        assert!(matches!(
            backend.detect(&frame, 0.5),
            Err(DetectError::MalformedResponse { .. })
        ));
        assert_eq!(backend.detect(&frame, 0.5).unwrap().len(), 1);
        assert_eq!(backend.requests(), 3);
    }
}
