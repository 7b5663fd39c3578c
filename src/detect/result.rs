use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::BBox;

/// Detection tuple as returned by a backend: `(class_name, [x1, y1, x2, y2], confidence)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection(pub String, pub BBox, pub f32);

impl RawDetection {
    pub fn new(class_name: &str, bbox: BBox, confidence: f32) -> Self {
        Self(class_name.to_string(), bbox, confidence)
    }
}

/// One object detected in a frame.
///
/// Produced fresh for each frame; never mutated after the resolver returns it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectedObject {
    pub class_name: String,
    /// Pixel box `[x1, y1, x2, y2]`.
    pub bbox: BBox,
    /// Box scaled by frame width/height into `0..1`.
    pub normalized_bbox: BBox,
    pub confidence: f32,
}

impl DetectedObject {
    pub fn from_raw(raw: RawDetection, width: u32, height: u32) -> Self {
        let RawDetection(class_name, bbox, confidence) = raw;
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        Self {
            class_name,
            bbox,
            normalized_bbox: [bbox[0] / w, bbox[1] / h, bbox[2] / w, bbox[3] / h],
            confidence,
        }
    }
}

/// Coarse grouping of visually similar classes.
///
/// Only consulted by the conflict resolver: two detections compete when their
/// classes share a group. Classes without an entry form their own group.
#[derive(Clone, Debug)]
pub struct ClassGroups {
    groups: HashMap<String, String>,
}

const DEFAULT_CLASS_GROUPS: &[(&str, &str)] = &[
    ("thin_wheel_top", "wheel"),
    ("thick_wheel_top", "wheel"),
    ("thin_wheel_side", "tire"),
    ("thick_wheel_side", "tire"),
    ("thin_rim_side", "rim"),
    ("thick_rim_side", "rim"),
    ("hole_green", "hole_filled"),
    ("hole_gold", "hole_filled"),
    ("front_gear_bad", "front_gear"),
    ("front_gear_good", "front_gear"),
    ("brown_bad", "brown_gear"),
    ("brown_good", "brown_gear"),
];

impl ClassGroups {
    /// Empty table: every class is its own group.
    pub fn empty() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// Assign `class_name` to `group`, replacing any previous assignment.
    pub fn insert(&mut self, class_name: &str, group: &str) {
        self.groups
            .insert(class_name.to_string(), group.to_string());
    }

    pub fn group_of<'a>(&'a self, class_name: &'a str) -> &'a str {
        self.groups
            .get(class_name)
            .map(String::as_str)
            .unwrap_or(class_name)
    }
}

impl Default for ClassGroups {
    fn default() -> Self {
        let mut groups = Self::empty();
        for (class_name, group) in DEFAULT_CLASS_GROUPS {
            groups.insert(class_name, group);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_by_frame_size() {
        let obj = DetectedObject::from_raw(
            RawDetection::new("hole_gold", [64.0, 48.0, 320.0, 240.0], 0.9),
            640,
            480,
        );
        assert_eq!(obj.normalized_bbox, [0.1, 0.1, 0.5, 0.5]);
        assert_eq!(obj.bbox, [64.0, 48.0, 320.0, 240.0]);
    }

    #[test]
    fn ungrouped_class_is_its_own_group() {
        let groups = ClassGroups::default();
        assert_eq!(groups.group_of("hole_green"), "hole_filled");
        assert_eq!(groups.group_of("hole_gold"), "hole_filled");
        assert_eq!(groups.group_of("hole_empty"), "hole_empty");
    }
}
