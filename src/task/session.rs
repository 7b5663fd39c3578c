use std::collections::HashSet;
use std::time::Instant;

use anyhow::Result;
use serde::Deserialize;

use crate::progress::ComponentModel;
use crate::stability::{SlotBank, StabilitySettings};

use super::state::TaskState;

/// Per-frame header supplied by the client.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SessionHeader {
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Everything the engine remembers about one user's run.
#[derive(Debug)]
pub struct Session {
    pub task_id: Option<String>,
    pub state: TaskState,
    /// One-time instructions already given in this run.
    milestones: HashSet<String>,
    pub slots: SlotBank,
    pub holes: ComponentModel,
    pub clutter: u32,
    /// Frames before this instant are acknowledged without evaluation.
    pub cooldown_until: Option<Instant>,
    /// When all tire and rim parts were first seen in the current combine step.
    pub combine_started: Option<Instant>,
}

impl Session {
    pub fn new(initial: TaskState, stability: StabilitySettings) -> Result<Self> {
        Ok(Self {
            task_id: None,
            state: initial,
            milestones: HashSet::new(),
            slots: SlotBank::new(stability)?,
            holes: ComponentModel::washer_holes(),
            clutter: 0,
            cooldown_until: None,
            combine_started: None,
        })
    }

    /// Record a milestone. True the first time it is seen in this run.
    pub fn first_time(&mut self, milestone: &str) -> bool {
        self.milestones.insert(milestone.to_string())
    }

    pub fn reached(&self, milestone: &str) -> bool {
        self.milestones.contains(milestone)
    }

    pub fn mark(&mut self, milestone: &str) {
        self.milestones.insert(milestone.to_string());
    }

    pub fn cooling_down(&self, now: Instant) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    /// Forget progress of the current run, keeping the session identity.
    pub fn restart_run(&mut self) {
        self.milestones.clear();
        self.slots.reset();
        self.holes.reset();
        self.clutter = 0;
        self.cooldown_until = None;
        self.combine_started = None;
    }

    /// Count one cluttered frame. True when the warning is due; the counter
    /// then starts over.
    pub fn clutter_seen(&mut self, threshold: u32) -> bool {
        self.clutter += 1;
        if self.clutter >= threshold {
            self.clutter = 0;
            return true;
        }
        false
    }
}
