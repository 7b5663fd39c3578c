//! Step-progress model.
//!
//! Tracks several components that each move through the same ordered list of
//! states, e.g. the four frame holes going `hole_empty -> hole_green ->
//! hole_gold`. Observations are classified against each component's last
//! confirmed state so the caller can tell progress from regressions.

use anyhow::{anyhow, Result};
use serde::Serialize;

pub const HOLE_COMPONENTS: [&str; 4] = [
    "hole_left_front",
    "hole_left_back",
    "hole_right_front",
    "hole_right_back",
];

pub const HOLE_STATES: [&str; 3] = ["hole_empty", "hole_green", "hole_gold"];

/// Classification of one observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    NoChange,
    NextStep,
    BackStep,
}

/// Ordered states of one component and the index of the last confirmed one.
#[derive(Clone, Debug)]
pub struct StepProgress {
    states: Vec<String>,
    current: usize,
}

impl StepProgress {
    pub fn new(states: &[&str]) -> Result<Self> {
        if states.is_empty() {
            return Err(anyhow!("step progress needs at least one state"));
        }
        Ok(Self::from_states(states))
    }

    fn from_states(states: &[&str]) -> Self {
        Self {
            states: states.iter().map(|s| s.to_string()).collect(),
            current: 0,
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current]
    }

    pub fn next_state(&self) -> Option<&str> {
        self.states.get(self.current + 1).map(String::as_str)
    }

    pub fn finished(&self) -> bool {
        self.current + 1 == self.states.len()
    }

    /// Apply an observed state and return how it relates to the previous one,
    /// together with the state held before the update.
    pub fn update(&mut self, observed: &str) -> Result<(UpdateKind, String)> {
        let position = self
            .states
            .iter()
            .position(|s| s == observed)
            .ok_or_else(|| anyhow!("unknown component state '{}'", observed))?;
        let before = self.states[self.current].clone();
        let kind = if position == self.current {
            UpdateKind::NoChange
        } else if position == self.current + 1 {
            UpdateKind::NextStep
        } else {
            UpdateKind::BackStep
        };
        self.current = position;
        Ok((kind, before))
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }
}

/// Details of a `check_update` call.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UpdateInfo {
    /// Active component and the state it was expected to reach next.
    pub intended: Option<(String, String)>,
    pub actual_component: String,
    pub actual_state: String,
    /// Component and state regressed from; set only for back-steps.
    pub before: Option<(String, String)>,
}

/// Components progressing through a shared list of states.
#[derive(Clone, Debug)]
pub struct ComponentModel {
    components: Vec<(String, StepProgress)>,
}

impl ComponentModel {
    pub fn new(components: &[&str], states: &[&str]) -> Result<Self> {
        if components.is_empty() {
            return Err(anyhow!("component model needs at least one component"));
        }
        if states.len() < 2 {
            return Err(anyhow!("component model needs at least two states"));
        }
        Ok(Self {
            components: components
                .iter()
                .map(|name| (name.to_string(), StepProgress::from_states(states)))
                .collect(),
        })
    }

    /// The four frame holes, each going empty -> green washer -> gold washer.
    pub fn washer_holes() -> Self {
        Self {
            components: HOLE_COMPONENTS
                .iter()
                .map(|name| (name.to_string(), StepProgress::from_states(&HOLE_STATES)))
                .collect(),
        }
    }

    pub fn component(&self, name: &str) -> Option<&StepProgress> {
        self.components
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, progress)| progress)
    }

    fn active(&self) -> Option<&(String, StepProgress)> {
        self.components.iter().find(|(_, progress)| !progress.finished())
    }

    /// Active component and the state it should reach next.
    pub fn next_instruction(&self) -> Option<(&str, &str)> {
        let (name, progress) = self.active()?;
        Some((name.as_str(), progress.next_state()?))
    }

    /// Active component and its last confirmed state.
    pub fn current_instruction(&self) -> Option<(&str, &str)> {
        self.active()
            .map(|(name, progress)| (name.as_str(), progress.current_state()))
    }

    pub fn check_update(&mut self, component: &str, state: &str) -> Result<(UpdateKind, UpdateInfo)> {
        let intended = self
            .next_instruction()
            .map(|(c, s)| (c.to_string(), s.to_string()));
        let progress = self
            .components
            .iter_mut()
            .find(|(n, _)| n == component)
            .map(|(_, progress)| progress)
            .ok_or_else(|| anyhow!("unknown component '{}'", component))?;
        let (kind, before) = progress.update(state)?;
        let info = UpdateInfo {
            intended,
            actual_component: component.to_string(),
            actual_state: state.to_string(),
            before: (kind == UpdateKind::BackStep).then(|| (component.to_string(), before)),
        };
        Ok((kind, info))
    }

    pub fn all_finished(&self) -> bool {
        self.active().is_none()
    }

    pub fn reset(&mut self) {
        for (_, progress) in &mut self.components {
            progress.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_progress_classifies_transitions() {
        let mut progress = StepProgress::new(&HOLE_STATES).unwrap();
        assert_eq!(progress.update("hole_empty").unwrap().0, UpdateKind::NoChange);
        assert_eq!(progress.update("hole_green").unwrap().0, UpdateKind::NextStep);
        assert_eq!(progress.update("hole_gold").unwrap().0, UpdateKind::NextStep);
        assert!(progress.finished());

        let (kind, before) = progress.update("hole_empty").unwrap();
        assert_eq!(kind, UpdateKind::BackStep);
        assert_eq!(before, "hole_gold");
        assert_eq!(progress.current_index(), 0);
    }

    #[test]
    fn skipping_ahead_counts_as_back_step() {
        let mut progress = StepProgress::new(&HOLE_STATES).unwrap();
        let (kind, before) = progress.update("hole_gold").unwrap();
        assert_eq!(kind, UpdateKind::BackStep);
        assert_eq!(before, "hole_empty");
        assert_eq!(progress.current_state(), "hole_gold");
    }

    #[test]
    fn empty_state_lists_are_rejected() {
        assert!(StepProgress::new(&[]).is_err());
        assert!(ComponentModel::new(&[], &HOLE_STATES).is_err());
        assert!(ComponentModel::new(&HOLE_COMPONENTS, &["hole_empty"]).is_err());

        let single = StepProgress::new(&["hole_empty"]).unwrap();
        assert_eq!(single.current_state(), "hole_empty");
        assert!(single.finished());
    }

    #[test]
    fn unknown_names_are_rejected() {
        let mut model = ComponentModel::washer_holes();
        assert!(model.check_update("hole_middle", "hole_green").is_err());
        assert!(model.check_update("hole_left_front", "hole_blue").is_err());
        assert_eq!(
            model.current_instruction(),
            Some(("hole_left_front", "hole_empty"))
        );
    }

    #[test]
    fn active_component_advances_when_finished() {
        let mut model = ComponentModel::washer_holes();
        assert_eq!(
            model.next_instruction(),
            Some(("hole_left_front", "hole_green"))
        );

        let (kind, info) = model.check_update("hole_left_front", "hole_green").unwrap();
        assert_eq!(kind, UpdateKind::NextStep);
        assert_eq!(
            info.intended,
            Some(("hole_left_front".to_string(), "hole_green".to_string()))
        );
        assert!(info.before.is_none());

        model.check_update("hole_left_front", "hole_gold").unwrap();
        assert_eq!(
            model.next_instruction(),
            Some(("hole_left_back", "hole_green"))
        );

        let (kind, info) = model.check_update("hole_left_front", "hole_green").unwrap();
        assert_eq!(kind, UpdateKind::BackStep);
        assert_eq!(
            info.before,
            Some(("hole_left_front".to_string(), "hole_gold".to_string()))
        );
        assert_eq!(
            model.next_instruction(),
            Some(("hole_left_front", "hole_gold"))
        );
    }

    #[test]
    fn last_component_is_reachable_and_finishes_model() {
        let mut model = ComponentModel::washer_holes();
        for hole in HOLE_COMPONENTS {
            assert_eq!(model.next_instruction().map(|(c, _)| c), Some(hole));
            model.check_update(hole, "hole_green").unwrap();
            model.check_update(hole, "hole_gold").unwrap();
        }
        assert!(model.all_finished());
        assert!(model.next_instruction().is_none());

        model.reset();
        assert_eq!(
            model.current_instruction(),
            Some(("hole_left_front", "hole_empty"))
        );
    }
}
