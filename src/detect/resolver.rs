//! Conflict resolution and the per-frame detection cache.
//!
//! Classifiers often report the same physical part twice, either as the same
//! class with two overlapping boxes or as two visually similar classes (a thin
//! and a thick tire). Within a class group, of any overlapping detections only
//! the most confident one is kept.

use std::collections::{HashMap, VecDeque};

use crate::frame::FrameId;
use crate::geometry::intersects;

use super::result::{ClassGroups, DetectedObject};

/// Deduplicate detections that overlap within the same class group.
///
/// Per group: repeatedly take the most confident remaining detection (earliest
/// wins ties), then drop every remaining detection whose box intersects it.
/// Survivors keep their input order, so resolving a resolved set is a no-op.
pub fn resolve(detections: Vec<DetectedObject>, groups: &ClassGroups) -> Vec<DetectedObject> {
    let mut by_group: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, det) in detections.iter().enumerate() {
        by_group
            .entry(groups.group_of(&det.class_name))
            .or_default()
            .push(idx);
    }

    let mut keep = vec![false; detections.len()];
    for pool in by_group.values() {
        let mut pool = pool.clone();
        while !pool.is_empty() {
            let best_pos = most_confident(&pool, &detections);
            let best = pool.remove(best_pos);
            keep[best] = true;
            pool.retain(|&other| !intersects(&detections[best].bbox, &detections[other].bbox));
        }
    }

    detections
        .into_iter()
        .zip(keep)
        .filter_map(|(det, kept)| kept.then_some(det))
        .collect()
}

fn most_confident(pool: &[usize], detections: &[DetectedObject]) -> usize {
    let mut best_pos = 0;
    for (pos, &idx) in pool.iter().enumerate().skip(1) {
        if detections[idx].confidence > detections[pool[best_pos]].confidence {
            best_pos = pos;
        }
    }
    best_pos
}

// ----------------------------------------------------------------------------
// DetectionCache
// ----------------------------------------------------------------------------

/// Frames kept by default. Several sessions may share one selector, each with
/// its own frame in flight.
pub const DEFAULT_CACHED_FRAMES: usize = 8;

type FrameEntries = HashMap<String, Vec<DetectedObject>>;

/// Resolved detections per frame and backend.
///
/// Holds the most recently stored frames; storing a frame beyond the capacity
/// evicts the oldest one.
#[derive(Debug)]
pub struct DetectionCache {
    capacity: usize,
    frames: VecDeque<(FrameId, FrameEntries)>,
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHED_FRAMES)
    }
}

impl DetectionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity),
        }
    }

    fn entries(&self, frame: FrameId) -> Option<&FrameEntries> {
        self.frames
            .iter()
            .find(|(id, _)| *id == frame)
            .map(|(_, entries)| entries)
    }

    /// Cached detections of `backend` for `frame`, if any.
    pub fn get(&self, frame: FrameId, backend: &str) -> Option<&[DetectedObject]> {
        self.entries(frame)?.get(backend).map(Vec::as_slice)
    }

    pub fn insert(&mut self, frame: FrameId, backend: &str, detections: Vec<DetectedObject>) {
        if let Some((_, entries)) = self.frames.iter_mut().find(|(id, _)| *id == frame) {
            entries.insert(backend.to_string(), detections);
            return;
        }
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        let mut entries = FrameEntries::new();
        entries.insert(backend.to_string(), detections);
        self.frames.push_back((frame, entries));
    }

    /// Every cached detection of `frame`, across backends.
    ///
    /// Empty once the frame has been evicted.
    pub fn frame_detections(&self, frame: FrameId) -> Vec<DetectedObject> {
        let Some(entries) = self.entries(frame) else {
            return Vec::new();
        };
        let mut backends: Vec<&String> = entries.keys().collect();
        backends.sort();
        backends
            .into_iter()
            .flat_map(|backend| entries[backend].iter().cloned())
            .collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
