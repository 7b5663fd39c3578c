//! Per-frame output of the guidance engine.

use serde::Serialize;

use crate::detect::DetectedObject;
use crate::geometry::BBox;

use super::state::TaskState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Instruction for the user.
///
/// Every field except `status` is optional and left out of the serialized
/// form when unset. Media fields hold asset references (image names, video
/// URLs); resolving them is up to the presentation layer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Instruction {
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub legend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub good_frame: Option<bool>,
}

impl Instruction {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            speech: None,
            image: None,
            video: None,
            legend: None,
            good_frame: None,
        }
    }

    /// Generic error reply used when a frame could not be analysed.
    pub fn try_again() -> Self {
        Self {
            status: Status::Error,
            speech: Some("I had trouble seeing that. Please try again.".to_string()),
            ..Self::success()
        }
    }

    pub fn with_speech(mut self, speech: impl Into<String>) -> Self {
        self.speech = Some(speech.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_video(mut self, video: impl Into<String>) -> Self {
        self.video = Some(video.into());
        self
    }

    pub fn with_legend(mut self, legend: impl Into<String>) -> Self {
        self.legend = Some(legend.into());
        self
    }

    pub fn has_speech(&self) -> bool {
        self.speech.is_some()
    }
}

/// Colour assigned to an overlay box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayColor {
    /// Seen in a frame the current step could use (blue).
    Good,
    /// Seen, but nothing could be concluded from it (red).
    Unused,
    /// First part pair while combining tires and rims (yellow).
    PairA,
    /// Second part pair while combining tires and rims (orange).
    PairB,
}

/// One detection to draw over the frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Overlay {
    pub class_name: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub color: OverlayColor,
}

impl Overlay {
    pub fn new(obj: &DetectedObject, color: OverlayColor) -> Self {
        Self {
            class_name: obj.class_name.clone(),
            bbox: obj.bbox,
            confidence: obj.confidence,
            color,
        }
    }
}

/// Result of processing one frame.
#[derive(Clone, Debug, Serialize)]
pub struct Guidance {
    /// State after the frame was processed.
    pub state: TaskState,
    pub instruction: Instruction,
    pub overlays: Vec<Overlay>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_fields_are_not_serialized() {
        let json = serde_json::to_value(Instruction::success().with_speech("Hi")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "success", "speech": "Hi"}));

        let mut instruction = Instruction::success();
        instruction.good_frame = Some(false);
        let json = serde_json::to_value(&instruction).unwrap();
        assert_eq!(json, serde_json::json!({"status": "success", "good_frame": false}));
        assert!(json.get("next").is_none());
    }

    #[test]
    fn try_again_is_an_error() {
        let json = serde_json::to_value(Instruction::try_again()).unwrap();
        assert_eq!(json["status"], "error");
        assert!(json["speech"].is_string());
    }
}
