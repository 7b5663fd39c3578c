use thiserror::Error;

/// Errors raised by the detection layer.
///
/// Configuration errors (`UnknownLabel`, `EmptyLabelSet`, `UnknownBackend`,
/// `MixedBackends`) mean the registry and the task disagree and are never
/// retried. Backend and frame encoding errors are recoverable: the frame is
/// skipped and the session continues.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("unknown label '{0}'; register it with a backend")]
    UnknownLabel(String),

    #[error("detection request names no labels")]
    EmptyLabelSet,

    #[error("backend '{0}' not registered")]
    UnknownBackend(String),

    #[error("labels {labels:?} span several backends: {backends:?}")]
    MixedBackends {
        labels: Vec<String>,
        backends: Vec<String>,
    },

    #[error("backend '{backend}' unreachable: {reason}")]
    BackendUnreachable { backend: String, reason: String },

    #[error("backend '{backend}' returned a malformed response: {reason}")]
    MalformedResponse { backend: String, reason: String },

    #[error("backend '{backend}' could not encode the frame: {reason}")]
    FrameEncoding { backend: String, reason: String },

    #[error("backend '{backend}' lifecycle failure: {reason}")]
    Lifecycle { backend: String, reason: String },
}

impl DetectError {
    /// True when the error concerns a single frame and the session can continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DetectError::BackendUnreachable { .. }
                | DetectError::MalformedResponse { .. }
                | DetectError::FrameEncoding { .. }
                | DetectError::Lifecycle { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_fatal() {
        assert!(!DetectError::UnknownLabel("x".into()).is_recoverable());
        assert!(!DetectError::UnknownBackend("x".into()).is_recoverable());
        assert!(!DetectError::EmptyLabelSet.is_recoverable());
        assert!(DetectError::FrameEncoding {
            backend: "tires".into(),
            reason: "zero-sized frame".into(),
        }
        .is_recoverable());
        assert!(DetectError::BackendUnreachable {
            backend: "tires".into(),
            reason: "timeout".into(),
        }
        .is_recoverable());
    }
}
