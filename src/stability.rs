//! Temporal stability filter.
//!
//! A `StabilityFilter` tracks one slot (a named target such as "left hole")
//! across frames. It is stable once its window is full and no two consecutive
//! observations moved further than the threshold. Missing observations are
//! debounced: `staged_clear` only wipes the window after more consecutive misses
//! than the debounce budget allows.

use std::collections::{HashMap, VecDeque};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::DetectedObject;
use crate::geometry::{center_distance, BBox};

/// How many consecutive misses a slot tolerates before it is wiped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebouncePolicy {
    /// Budget equals the window size.
    #[default]
    Full,
    /// Budget is half the window size.
    Half,
}

#[derive(Clone, Debug)]
pub struct StabilitySettings {
    pub window: usize,
    /// Maximum center displacement in pixels between consecutive observations.
    pub threshold_px: f32,
    pub debounce: DebouncePolicy,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            window: 15,
            threshold_px: 50.0,
            debounce: DebouncePolicy::Full,
        }
    }
}

impl StabilitySettings {
    /// A filter needs at least one observation per window and a finite,
    /// non-negative displacement threshold.
    pub fn validate(&self) -> Result<()> {
        if self.window == 0 {
            return Err(anyhow!("stability window must hold at least one observation"));
        }
        if !(self.threshold_px >= 0.0 && self.threshold_px.is_finite()) {
            return Err(anyhow!(
                "stability threshold must be a finite, non-negative pixel distance"
            ));
        }
        Ok(())
    }

    pub fn debounce_budget(&self) -> usize {
        match self.debounce {
            DebouncePolicy::Full => self.window,
            DebouncePolicy::Half => self.window / 2,
        }
    }
}

/// Sliding window of observations for one slot.
#[derive(Clone, Debug)]
pub struct StabilityFilter {
    settings: StabilitySettings,
    window: VecDeque<DetectedObject>,
    miss_count: usize,
}

impl StabilityFilter {
    pub fn new(settings: StabilitySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::empty(settings))
    }

    fn empty(settings: StabilitySettings) -> Self {
        Self {
            window: VecDeque::with_capacity(settings.window),
            settings,
            miss_count: 0,
        }
    }

    /// Record an observation, evicting the oldest when the window is full.
    pub fn add(&mut self, obj: DetectedObject) {
        self.window.push_back(obj);
        while self.window.len() > self.settings.window {
            self.window.pop_front();
        }
        self.miss_count = 0;
    }

    pub fn is_stable(&self) -> bool {
        if self.window.len() != self.settings.window {
            return false;
        }
        self.window
            .iter()
            .zip(self.window.iter().skip(1))
            .all(|(prev, next)| center_distance(&prev.bbox, &next.bbox) <= self.settings.threshold_px)
    }

    pub fn add_and_check_stable(&mut self, obj: DetectedObject) -> bool {
        self.add(obj);
        self.is_stable()
    }

    /// Count a miss; wipe the window once misses exceed the debounce budget.
    pub fn staged_clear(&mut self) {
        self.miss_count += 1;
        if self.miss_count > self.settings.debounce_budget() {
            self.window.clear();
        }
    }

    pub fn clear(&mut self) {
        self.window.clear();
        self.miss_count = 0;
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Mean box over the window.
    pub fn averaged_bbox(&self) -> Option<BBox> {
        if self.window.is_empty() {
            return None;
        }
        let mut sum = [0.0f32; 4];
        for obj in &self.window {
            for (acc, v) in sum.iter_mut().zip(obj.bbox) {
                *acc += v;
            }
        }
        let n = self.window.len() as f32;
        Some(sum.map(|v| v / n))
    }

    /// Most frequent class in the window; ties go to the class seen first.
    pub fn averaged_class(&self) -> Option<&str> {
        let mut counts: Vec<(&str, usize)> = Vec::new();
        for obj in &self.window {
            match counts.iter_mut().find(|(name, _)| *name == obj.class_name) {
                Some((_, count)) => *count += 1,
                None => counts.push((obj.class_name.as_str(), 1)),
            }
        }
        let mut best: Option<(&str, usize)> = None;
        for (name, count) in counts {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((name, count));
            }
        }
        best.map(|(name, _)| name)
    }
}

// ----------------------------------------------------------------------------
// SlotBank
// ----------------------------------------------------------------------------

/// Stability filters keyed by slot name, created on first use.
#[derive(Clone, Debug)]
pub struct SlotBank {
    settings: StabilitySettings,
    slots: HashMap<String, StabilityFilter>,
}

impl SlotBank {
    pub fn new(settings: StabilitySettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            slots: HashMap::new(),
        })
    }

    pub fn settings(&self) -> &StabilitySettings {
        &self.settings
    }

    pub fn slot(&mut self, name: &str) -> &mut StabilityFilter {
        let settings = &self.settings;
        self.slots
            .entry(name.to_string())
            .or_insert_with(|| StabilityFilter::empty(settings.clone()))
    }

    pub fn get(&self, name: &str) -> Option<&StabilityFilter> {
        self.slots.get(name)
    }

    pub fn clear_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.clear();
        }
    }

    pub fn staged_clear_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.staged_clear();
        }
    }

    /// Drop every slot.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RawDetection;

    fn obj(class_name: &str, x: f32) -> DetectedObject {
        DetectedObject::from_raw(RawDetection::new(class_name, [x, 0.0, x + 20.0, 20.0], 0.9), 640, 480)
    }

    fn settings(window: usize, debounce: DebouncePolicy) -> StabilitySettings {
        StabilitySettings {
            window,
            threshold_px: 50.0,
            debounce,
        }
    }

    #[test]
    fn stable_exactly_when_window_fills() {
        let mut filter = StabilityFilter::new(settings(3, DebouncePolicy::Full)).unwrap();
        assert!(!filter.add_and_check_stable(obj("hole_green", 0.0)));
        assert!(!filter.add_and_check_stable(obj("hole_green", 50.0)));
        assert!(filter.add_and_check_stable(obj("hole_green", 100.0)));
        assert!(filter.add_and_check_stable(obj("hole_green", 120.0)));
        assert_eq!(filter.len(), 3);
    }

    #[test]
    fn large_jump_breaks_stability_until_it_leaves_the_window() {
        let mut filter = StabilityFilter::new(settings(3, DebouncePolicy::Full)).unwrap();
        filter.add(obj("hole_green", 0.0));
        filter.add(obj("hole_green", 200.0));
        assert!(!filter.add_and_check_stable(obj("hole_green", 210.0)));
        assert!(filter.add_and_check_stable(obj("hole_green", 220.0)));
    }

    #[test]
    fn staged_clear_is_debounced() {
        let mut filter = StabilityFilter::new(settings(4, DebouncePolicy::Full)).unwrap();
        for x in [0.0, 1.0, 2.0, 3.0] {
            filter.add(obj("hole_gold", x));
        }
        for _ in 0..4 {
            filter.staged_clear();
        }
        assert_eq!(filter.len(), 4);
        filter.add(obj("hole_gold", 4.0));
        assert!(filter.is_stable());

        for _ in 0..5 {
            filter.staged_clear();
        }
        assert!(filter.is_empty());
    }

    #[test]
    fn half_policy_wipes_sooner() {
        let mut filter = StabilityFilter::new(settings(4, DebouncePolicy::Half)).unwrap();
        filter.add(obj("hole_gold", 0.0));
        filter.staged_clear();
        filter.staged_clear();
        assert_eq!(filter.len(), 1);
        filter.staged_clear();
        assert!(filter.is_empty());
    }

    #[test]
    fn averages_over_window() {
        let mut filter = StabilityFilter::new(settings(4, DebouncePolicy::Full)).unwrap();
        assert!(filter.averaged_bbox().is_none());
        assert!(filter.averaged_class().is_none());

        filter.add(obj("thin_wheel_side", 0.0));
        filter.add(obj("thick_wheel_side", 10.0));
        filter.add(obj("thick_wheel_side", 20.0));
        filter.add(obj("thin_wheel_side", 30.0));
        assert_eq!(filter.averaged_bbox(), Some([15.0, 0.0, 35.0, 20.0]));
        // 2:2 tie, first seen wins.
        assert_eq!(filter.averaged_class(), Some("thin_wheel_side"));

        filter.add(obj("thick_wheel_side", 40.0));
        assert_eq!(filter.averaged_class(), Some("thick_wheel_side"));
    }

    #[test]
    fn slot_bank_creates_and_clears_slots() {
        let mut bank = SlotBank::new(settings(2, DebouncePolicy::Full)).unwrap();
        bank.slot("left").add(obj("hole_green", 0.0));
        bank.slot("right").add(obj("hole_empty", 300.0));
        assert_eq!(bank.get("left").map(StabilityFilter::len), Some(1));

        bank.staged_clear_all();
        assert_eq!(bank.get("right").map(StabilityFilter::len), Some(1));
        bank.clear_all();
        assert!(bank.get("left").is_some_and(StabilityFilter::is_empty));
        assert!(bank.get("missing").is_none());
    }

    #[test]
    fn empty_window_is_rejected() {
        assert!(StabilityFilter::new(settings(0, DebouncePolicy::Full)).is_err());
        assert!(SlotBank::new(settings(0, DebouncePolicy::Half)).is_err());

        let mut bad_threshold = settings(3, DebouncePolicy::Full);
        bad_threshold.threshold_px = f32::NAN;
        assert!(StabilityFilter::new(bad_threshold).is_err());

        let mut single = StabilityFilter::new(settings(1, DebouncePolicy::Full)).unwrap();
        assert!(!single.is_stable());
        assert!(single.add_and_check_stable(obj("hole_empty", 0.0)));
    }
}
