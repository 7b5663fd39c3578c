use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::frame::{Frame, FrameId};

use super::error::DetectError;
use super::registry::BackendRegistry;
use super::resolver::{resolve, DetectionCache};
use super::result::{ClassGroups, DetectedObject};

/// Selector tuning.
#[derive(Clone, Debug)]
pub struct SelectorSettings {
    /// Minimum confidence requested from backends.
    pub confidence: f32,
    /// Pause after a backend swap before the first request.
    pub settle_delay: Duration,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            settle_delay: Duration::from_secs(4),
        }
    }
}

struct SelectorState {
    active: Option<String>,
    cache: DetectionCache,
}

/// Routes label requests to the responsible backend.
///
/// Only one backend runs at a time. Swapping the active backend, the settle
/// delay and the detection request all happen under one lock, so sessions
/// sharing a selector cannot invalidate each other's in-flight requests.
pub struct ClassifierSelector {
    registry: BackendRegistry,
    groups: ClassGroups,
    settings: SelectorSettings,
    state: Mutex<SelectorState>,
}

impl ClassifierSelector {
    pub fn new(registry: BackendRegistry, groups: ClassGroups, settings: SelectorSettings) -> Self {
        Self {
            registry,
            groups,
            settings,
            state: Mutex::new(SelectorState {
                active: None,
                cache: DetectionCache::new(),
            }),
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Name of the currently started backend.
    pub fn active_backend(&self) -> Option<String> {
        self.state.lock().ok().and_then(|state| state.active.clone())
    }

    /// Detect `labels` in `frame` using the backend they are routed to.
    pub fn detect(&self, frame: &Frame, labels: &[&str]) -> Result<Vec<DetectedObject>, DetectError> {
        let backend = self.registry.backend_for_labels(labels)?;
        self.detect_on(&backend, frame, labels)
    }

    /// Detect `labels` in `frame` on an explicitly chosen backend.
    pub fn detect_on(
        &self,
        backend: &str,
        frame: &Frame,
        labels: &[&str],
    ) -> Result<Vec<DetectedObject>, DetectError> {
        if !self.registry.contains(backend) {
            return Err(DetectError::UnknownBackend(backend.to_string()));
        }
        let mut state = self.lock_state(backend)?;

        if let Some(cached) = state.cache.get(frame.id(), backend) {
            return Ok(filter_labels(cached, labels));
        }

        self.ensure_active(&mut state, backend)?;
        let raw = {
            let handle = self
                .registry
                .get(backend)
                .ok_or_else(|| DetectError::UnknownBackend(backend.to_string()))?;
            let mut guard = handle.lock().map_err(|_| DetectError::Lifecycle {
                backend: backend.to_string(),
                reason: "backend lock poisoned".to_string(),
            })?;
            guard.detect(frame, self.settings.confidence)?
        };

        let objects = raw
            .into_iter()
            .map(|raw| DetectedObject::from_raw(raw, frame.width, frame.height))
            .collect();
        let resolved = resolve(objects, &self.groups);
        log::debug!(
            "frame {} backend {}: {} detections after resolution",
            frame.id(),
            backend,
            resolved.len()
        );
        let out = filter_labels(&resolved, labels);
        state.cache.insert(frame.id(), backend, resolved);
        Ok(out)
    }

    /// Every resolved detection cached for `frame`, regardless of label.
    pub fn frame_detections(&self, frame: FrameId) -> Vec<DetectedObject> {
        match self.state.lock() {
            Ok(state) => state.cache.frame_detections(frame),
            Err(_) => Vec::new(),
        }
    }

    /// Stop the active backend, if any, and forget cached results.
    pub fn release(&self) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow!("selector lock poisoned"))?;
        state.cache.clear();
        if let Some(active) = state.active.take() {
            self.stop_backend(&active)?;
        }
        Ok(())
    }

    fn lock_state(&self, backend: &str) -> Result<MutexGuard<'_, SelectorState>, DetectError> {
        self.state.lock().map_err(|_| DetectError::Lifecycle {
            backend: backend.to_string(),
            reason: "selector lock poisoned".to_string(),
        })
    }

    fn ensure_active(&self, state: &mut SelectorState, backend: &str) -> Result<(), DetectError> {
        if state.active.as_deref() == Some(backend) {
            return Ok(());
        }

        if let Some(previous) = state.active.take() {
            if let Err(err) = self.stop_backend(&previous) {
                log::warn!("failed to stop backend {}: {}", previous, err);
            }
        }

        let handle = self
            .registry
            .get(backend)
            .ok_or_else(|| DetectError::UnknownBackend(backend.to_string()))?;
        handle
            .lock()
            .map_err(|_| DetectError::Lifecycle {
                backend: backend.to_string(),
                reason: "backend lock poisoned".to_string(),
            })?
            .start()?;
        state.active = Some(backend.to_string());
        log::info!("classifier backend swapped to {}", backend);

        if !self.settings.settle_delay.is_zero() {
            std::thread::sleep(self.settings.settle_delay);
        }
        Ok(())
    }

    fn stop_backend(&self, name: &str) -> Result<()> {
        let handle = self
            .registry
            .get(name)
            .ok_or_else(|| anyhow!("backend '{}' not registered", name))?;
        let mut guard = handle
            .lock()
            .map_err(|_| anyhow!("backend lock poisoned"))?;
        guard.stop()?;
        Ok(())
    }
}

fn filter_labels(detections: &[DetectedObject], labels: &[&str]) -> Vec<DetectedObject> {
    detections
        .iter()
        .filter(|d| labels.contains(&d.class_name.as_str()))
        .cloned()
        .collect()
}
