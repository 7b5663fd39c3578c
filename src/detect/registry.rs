use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use super::backend::DetectorBackend;
use super::error::DetectError;

/// Registry of detector backends and the labels each one is responsible for.
///
/// Every label routes to exactly one backend. Backends may recognize more
/// labels than they are routed; those are reachable through an explicit
/// backend override. Backends are wrapped in `Mutex` because
/// `DetectorBackend::detect` takes `&mut self`.
pub struct BackendRegistry {
    backends: HashMap<String, Arc<Mutex<dyn DetectorBackend>>>,
    label_to_backend: HashMap<String, String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            label_to_backend: HashMap::new(),
        }
    }

    /// Register a backend and route `labels` to it.
    ///
    /// Fails when the backend name is taken or a label is already routed elsewhere.
    pub fn register<B, S>(&mut self, backend: B, labels: &[S]) -> Result<()>
    where
        B: DetectorBackend + 'static,
        S: AsRef<str>,
    {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(anyhow!("backend '{}' already registered", name));
        }
        for label in labels {
            let label = label.as_ref();
            if let Some(owner) = self.label_to_backend.get(label) {
                return Err(anyhow!(
                    "label '{}' already routed to backend '{}'",
                    label,
                    owner
                ));
            }
        }
        for label in labels {
            self.label_to_backend
                .insert(label.as_ref().to_string(), name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
        Ok(())
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn DetectorBackend>>> {
        self.backends.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Backend routed for a single label.
    pub fn backend_for_label(&self, label: &str) -> Result<&str, DetectError> {
        self.label_to_backend
            .get(label)
            .map(String::as_str)
            .ok_or_else(|| DetectError::UnknownLabel(label.to_string()))
    }

    /// Backend responsible for a whole label set.
    ///
    /// Every label must be routed, and all of them to the same backend.
    pub fn backend_for_labels(&self, labels: &[&str]) -> Result<String, DetectError> {
        if labels.is_empty() {
            return Err(DetectError::EmptyLabelSet);
        }
        let mut owners = BTreeSet::new();
        for label in labels {
            owners.insert(self.backend_for_label(label)?.to_string());
        }
        let mut owners = owners.into_iter();
        match (owners.next(), owners.next()) {
            (Some(owner), None) => Ok(owner),
            (None, _) => Err(DetectError::EmptyLabelSet),
            (Some(first), Some(second)) => {
                let mut backends = vec![first, second];
                backends.extend(owners);
                Err(DetectError::MixedBackends {
                    labels: labels.iter().map(|l| l.to_string()).collect(),
                    backends,
                })
            }
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::ScriptedBackend;

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry
            .register(ScriptedBackend::new("holes"), &["hole_empty", "hole_green"])
            .unwrap();
        registry
            .register(ScriptedBackend::new("gears"), &["brown_good"])
            .unwrap();
        registry
    }

    #[test]
    fn routes_labels_to_one_backend() {
        let registry = registry();
        assert_eq!(
            registry
                .backend_for_labels(&["hole_empty", "hole_green"])
                .unwrap(),
            "holes"
        );
        assert_eq!(registry.list(), vec!["gears", "holes"]);
    }

    #[test]
    fn unknown_label_is_rejected() {
        let registry = registry();
        let err = registry
            .backend_for_labels(&["hole_empty", "wheel_axle"])
            .unwrap_err();
        assert!(matches!(err, DetectError::UnknownLabel(label) if label == "wheel_axle"));
    }

    #[test]
    fn empty_label_set_is_rejected() {
        let registry = registry();
        let err = registry.backend_for_labels(&[]).unwrap_err();
        assert!(matches!(err, DetectError::EmptyLabelSet));
        assert_eq!(err.to_string(), "detection request names no labels");
    }

    #[test]
    fn labels_spanning_backends_are_rejected() {
        let registry = registry();
        let err = registry
            .backend_for_labels(&["hole_empty", "brown_good"])
            .unwrap_err();
        assert!(matches!(err, DetectError::MixedBackends { .. }));
    }

    #[test]
    fn duplicate_routing_is_rejected() {
        let mut registry = registry();
        assert!(registry
            .register(ScriptedBackend::new("other"), &["hole_green"])
            .is_err());
        assert!(registry
            .register(ScriptedBackend::new("holes"), &["frame_horn"])
            .is_err());
        assert!(!registry.contains("other"));
    }
}
