use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Serialize, Serializer};

/// Named step of the assembly task.
///
/// Numbered variants carry the pass they belong to: `1..=2` for the wheel
/// and axle passes, `1..=4` for the washers. Only the combinations listed in
/// `TaskState::CHAIN` exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[default]
    Start,
    Intro,
    LayoutWheelRim(u8),
    CombineWheelRim(u8),
    ConfirmCombineWheelRim(u8),
    AcquireAxle(u8),
    AxleIntoWheel(u8),
    AcquireFrame(u8),
    InsertGreenWasher(u8),
    InsertGoldWasher(u8),
    InsertPinkGearFront,
    InsertAxle(u8),
    PressWheel(u8),
    InsertPinkGearBack,
    InsertBrownGear,
    AddGearAxle,
    FinalCheck,
    Complete,
    Nothing,
}

use TaskState::*;

impl TaskState {
    /// Every state in run order. `Nothing` loops back to `Start`.
    pub const CHAIN: [TaskState; 33] = [
        Start,
        Intro,
        LayoutWheelRim(1),
        CombineWheelRim(1),
        ConfirmCombineWheelRim(1),
        LayoutWheelRim(2),
        CombineWheelRim(2),
        ConfirmCombineWheelRim(2),
        AcquireAxle(1),
        AxleIntoWheel(1),
        AcquireFrame(1),
        InsertGreenWasher(1),
        InsertGoldWasher(1),
        InsertPinkGearFront,
        InsertAxle(1),
        InsertGreenWasher(2),
        InsertGoldWasher(2),
        PressWheel(1),
        AcquireAxle(2),
        AxleIntoWheel(2),
        AcquireFrame(2),
        InsertGreenWasher(3),
        InsertGoldWasher(3),
        InsertPinkGearBack,
        InsertBrownGear,
        InsertAxle(2),
        InsertGreenWasher(4),
        InsertGoldWasher(4),
        PressWheel(2),
        AddGearAxle,
        FinalCheck,
        Complete,
        Nothing,
    ];

    /// The state that follows this one on success.
    pub fn successor(self) -> TaskState {
        match Self::CHAIN.iter().position(|s| *s == self) {
            Some(idx) if idx + 1 < Self::CHAIN.len() => Self::CHAIN[idx + 1],
            _ => Start,
        }
    }

    pub fn name(self) -> String {
        let base = match self {
            Start => "start",
            Intro => "intro",
            LayoutWheelRim(_) => "layout_wheel_rim",
            CombineWheelRim(_) => "combine_wheel_rim",
            ConfirmCombineWheelRim(_) => "confirm_combine_wheel_rim",
            AcquireAxle(_) => "acquire_axle",
            AxleIntoWheel(_) => "axle_into_wheel",
            AcquireFrame(_) => "acquire_frame",
            InsertGreenWasher(_) => "insert_green_washer",
            InsertGoldWasher(_) => "insert_gold_washer",
            InsertPinkGearFront => "insert_pink_gear_front",
            InsertAxle(_) => "insert_axle",
            PressWheel(_) => "press_wheel",
            InsertPinkGearBack => "insert_pink_gear_back",
            InsertBrownGear => "insert_brown_gear",
            AddGearAxle => "add_gear_axle",
            FinalCheck => "final_check",
            Complete => "complete",
            Nothing => "nothing",
        };
        match self.pass() {
            Some(pass) => format!("{}_{}", base, pass),
            None => base.to_string(),
        }
    }

    /// Pass number of numbered states.
    pub fn pass(self) -> Option<u8> {
        match self {
            LayoutWheelRim(n)
            | CombineWheelRim(n)
            | ConfirmCombineWheelRim(n)
            | AcquireAxle(n)
            | AxleIntoWheel(n)
            | AcquireFrame(n)
            | InsertGreenWasher(n)
            | InsertGoldWasher(n)
            | InsertAxle(n)
            | PressWheel(n) => Some(n),
            _ => None,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for TaskState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::CHAIN
            .iter()
            .copied()
            .find(|state| state.name() == wanted)
            .ok_or_else(|| anyhow!("unknown task state '{}'", s))
    }
}

impl Serialize for TaskState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Where the state machine goes after a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Stay,
    To(TaskState),
}
