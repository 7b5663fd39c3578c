//! One handler per task state.
//!
//! Every handler follows the same shape: on first entry it clears the slots
//! and returns the entry instruction without looking at the frame; afterwards
//! it runs a single detection request, feeds the slots and either advances,
//! corrects the user, or stays. Detection happens before any session state is
//! touched, so a failed request leaves the session as it was.

use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::{Side, TaskSettings};
use crate::detect::{ClassifierSelector, DetectError, DetectedObject};
use crate::frame::Frame;
use crate::geometry::{intersects, separate_four_rect, separate_two, Axis};
use crate::progress::UpdateKind;

use super::gear::{teeth_direction, GearThresholds, TeethDirection};
use super::instruction::{Instruction, OverlayColor};
use super::session::Session;
use super::state::{TaskState, Transition};

const CLUTTER_SPEECH: &str =
    "Your workspace is cluttered. Please remove any stray parts from my view.";

const INTRO_LINES: [(&str, Option<&str>); 9] = [
    ("Hi, thanks for using our Auto Assembly Assistant.", None),
    (
        "My name is Gabriel and I will be your assistant in building this car model.",
        None,
    ),
    ("Let me guide you through this interface.", None),
    (
        "During use, you'll see red or blue boxes around parts of the camera stream.",
        None,
    ),
    ("These boxes are certain parts or states I'm recognizing.", None),
    ("Red boxes are bad. Blue boxes are good.", None),
    (
        "Red boxes indicate detected objects, but that I can't determine anything off of them.",
        Some("red_box_ex.jpg"),
    ),
    (
        "Blue boxes mean I can determine things, and just need you to hold still.",
        Some("blue_box_ex.jpg"),
    ),
    ("That's it. Looking forward to working with you!", None),
];

const TIRE_RIM_LABELS: [&str; 4] = [
    "thin_rim_side",
    "thick_rim_side",
    "thin_wheel_side",
    "thick_wheel_side",
];
const WHEEL_LABELS: [&str; 2] = ["thin_wheel_side", "thick_wheel_side"];
const GEAR_LABELS: [&str; 6] = [
    "front_gear_good",
    "front_gear_bad",
    "back_pink",
    "brown_bad",
    "brown_good",
    "pink_back",
];
const WHEEL_CORNERS: [&str; 4] = ["top_left", "top_right", "bottom_left", "bottom_right"];

/// What a handler decided for one frame.
#[derive(Debug)]
pub(super) struct Step {
    pub instruction: Instruction,
    pub transition: Transition,
    pub cooldown: Option<Duration>,
    /// Overlay colours for classes this state wants highlighted.
    pub highlights: Vec<(&'static str, OverlayColor)>,
}

impl Step {
    fn stay(instruction: Instruction) -> Self {
        Self {
            instruction,
            transition: Transition::Stay,
            cooldown: None,
            highlights: Vec::new(),
        }
    }

    fn to(instruction: Instruction, next: TaskState) -> Self {
        Self {
            transition: Transition::To(next),
            ..Self::stay(instruction)
        }
    }

    fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = Some(cooldown);
        self
    }
}

pub(super) struct StepContext<'a> {
    pub state: TaskState,
    pub frame: &'a Frame,
    pub selector: &'a ClassifierSelector,
    pub settings: &'a TaskSettings,
    pub session: &'a mut Session,
    pub now: Instant,
}

impl StepContext<'_> {
    fn detect(&self, labels: &[&str]) -> Result<Vec<DetectedObject>, DetectError> {
        self.selector.detect(self.frame, labels)
    }

    fn detect_on(&self, backend: &str, labels: &[&str]) -> Result<Vec<DetectedObject>, DetectError> {
        self.selector.detect_on(backend, self.frame, labels)
    }

    /// First call for the current state: record it and start with empty slots.
    fn enter(&mut self) -> bool {
        if self.session.first_time(&self.state.name()) {
            self.session.slots.clear_all();
            return true;
        }
        false
    }

    fn advance(&self, instruction: Instruction) -> Step {
        Step::to(instruction, self.state.successor())
    }

    /// Corrective feedback: the user has to show the parts again.
    fn correct(&mut self, instruction: Instruction, speech: impl Into<String>) -> Step {
        self.session.slots.clear_all();
        Step::stay(instruction.with_speech(speech)).with_cooldown(self.settings.feedback_cooldown)
    }

    fn stable(&mut self, slot: &str, obj: &DetectedObject) -> bool {
        self.session.slots.slot(slot).add_and_check_stable(obj.clone())
    }

    fn miss(&mut self, slot: &str) {
        self.session.slots.slot(slot).staged_clear();
    }

    fn class_of(&self, slot: &str) -> Option<&str> {
        self.session.slots.get(slot).and_then(|f| f.averaged_class())
    }

    /// Count a cluttered frame and add the warning when it is due.
    fn cluttered(&mut self, step: Step) -> Step {
        if self.session.clutter_seen(self.settings.clutter_threshold) {
            log::info!("workspace cluttered in state {}", self.state);
            return Step::stay(step.instruction.with_speech(CLUTTER_SPEECH))
                .with_cooldown(self.settings.feedback_cooldown);
        }
        step
    }
}

fn of_class<'d>(found: &'d [DetectedObject], class_name: &str) -> Vec<&'d DetectedObject> {
    found.iter().filter(|d| d.class_name == class_name).collect()
}

fn only<'d>(found: &'d [DetectedObject], class_name: &str) -> Option<&'d DetectedObject> {
    match of_class(found, class_name).as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

fn observed(good_frame: bool) -> Instruction {
    Instruction {
        good_frame: Some(good_frame),
        ..Instruction::success()
    }
}

pub(super) fn run(ctx: &mut StepContext<'_>) -> Result<Step> {
    use TaskState::*;

    match ctx.state {
        Start => Ok(ctx.advance(Instruction::success())),
        Intro => Ok(intro(ctx)),
        LayoutWheelRim(pass) => layout_wheel_rim(ctx, pass),
        CombineWheelRim(_) => combine_wheel_rim(ctx),
        ConfirmCombineWheelRim(_) => confirm_combine_wheel_rim(ctx),
        AcquireAxle(pass) => Ok(acquire_axle(ctx, pass)),
        AxleIntoWheel(pass) => axle_into_wheel(ctx, pass),
        AcquireFrame(pass) => acquire_frame(ctx, pass),
        InsertGreenWasher(pass) => insert_green_washer(ctx, pass),
        InsertGoldWasher(pass) => insert_gold_washer(ctx, pass),
        InsertPinkGearFront => insert_pink_gear_front(ctx),
        InsertAxle(pass) => insert_axle(ctx, pass),
        PressWheel(pass) => press_wheel(ctx, pass),
        InsertPinkGearBack => insert_pink_gear_back(ctx),
        InsertBrownGear => insert_brown_gear(ctx),
        AddGearAxle => add_gear_axle(ctx),
        FinalCheck => final_check(ctx),
        Complete => Ok(complete(ctx)),
        Nothing => Ok(nothing(ctx)),
    }
}

// ----------------------------------------------------------------------------
// Scripted steps
// ----------------------------------------------------------------------------

fn intro(ctx: &mut StepContext<'_>) -> Step {
    for (idx, (speech, image)) in INTRO_LINES.iter().enumerate() {
        if !ctx.session.first_time(&format!("intro_{}", idx + 1)) {
            continue;
        }
        let mut instruction = Instruction::success().with_speech(*speech);
        if let Some(image) = image {
            instruction = instruction.with_image(*image);
        }
        let step = if idx + 1 == INTRO_LINES.len() {
            ctx.advance(instruction)
        } else {
            Step::stay(instruction)
        };
        return step.with_cooldown(ctx.settings.feedback_cooldown);
    }
    ctx.advance(Instruction::success())
}

fn acquire_axle(ctx: &mut StepContext<'_>, pass: u8) -> Step {
    if ctx.enter() {
        let speech = if pass == 1 {
            "Moving on. Grab the wheel axle. Note that it has no yellow gears at the end."
        } else {
            "Moving on. Grab the other wheel axle."
        };
        let instruction = Instruction::success()
            .with_speech(speech)
            .with_image("wheel_axle.jpg");
        return Step::stay(instruction).with_cooldown(ctx.settings.feedback_cooldown);
    }
    ctx.advance(Instruction::success())
}

fn complete(ctx: &mut StepContext<'_>) -> Step {
    let mut instruction = Instruction::success();
    if ctx.enter() {
        instruction = instruction.with_speech(
            "Everything looks good. Great job! We've finished assembling the wheels and gear train!",
        );
    }
    ctx.advance(instruction)
}

fn nothing(ctx: &mut StepContext<'_>) -> Step {
    if ctx.enter() {
        return Step::stay(Instruction::success()).with_cooldown(ctx.settings.idle);
    }
    log::info!("run finished; starting over");
    ctx.session.restart_run();
    ctx.advance(Instruction::success())
}

// ----------------------------------------------------------------------------
// Wheels
// ----------------------------------------------------------------------------

fn layout_wheel_rim(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    if ctx.enter() {
        let speech = if pass == 1 {
            "Please find two different sized green rims and two different sized black tires."
        } else {
            "Find the other two sets of rims and tires."
        };
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(speech)
                .with_legend("tire-rim-legend.jpg"),
        ));
    }

    let found = ctx.detect(&TIRE_RIM_LABELS)?;
    let parts: Vec<(&str, &DetectedObject)> = TIRE_RIM_LABELS
        .iter()
        .filter_map(|label| only(&found, label).map(|obj| (*label, obj)))
        .collect();
    if parts.len() != TIRE_RIM_LABELS.len() {
        ctx.session.slots.staged_clear_all();
        return Ok(Step::stay(observed(false)));
    }

    let mut all_stable = true;
    for (label, obj) in parts {
        all_stable &= ctx.stable(label, obj);
    }
    if all_stable {
        return Ok(ctx.advance(observed(true)));
    }
    Ok(Step::stay(observed(true)))
}

fn combine_wheel_rim(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        ctx.session.combine_started = None;
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Well done. Now put the tires and rims together by color.")
                .with_video(ctx.settings.video("tire_rim_combine.mp4")),
        ));
    }

    let found = ctx.detect(&TIRE_RIM_LABELS)?;
    let highlights: Vec<(&'static str, OverlayColor)> = [
        ("thin_rim_side", OverlayColor::PairA),
        ("thin_wheel_side", OverlayColor::PairA),
        ("thick_rim_side", OverlayColor::PairB),
        ("thick_wheel_side", OverlayColor::PairB),
    ]
    .into_iter()
    .filter(|(label, _)| only(&found, label).is_some())
    .collect();

    let all_visible = highlights.len() == TIRE_RIM_LABELS.len();
    if all_visible && ctx.session.combine_started.is_none() {
        ctx.session.combine_started = Some(ctx.now);
    }
    let window_over = ctx
        .session
        .combine_started
        .is_some_and(|started| ctx.now >= started + ctx.settings.combine_window);

    let mut step = if window_over {
        ctx.advance(observed(all_visible))
    } else {
        Step::stay(observed(all_visible))
    };
    step.highlights = highlights;
    Ok(step)
}

fn confirm_combine_wheel_rim(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Then, show me the wheels like this.")
                .with_image("wheels_assembled.jpg"),
        ));
    }

    let wheels = ctx.detect_on(
        &ctx.settings.wheel_pair_backend,
        &["wrong_wheel", "thick_wheel_side", "thin_wheel_side"],
    )?;
    let [first, second] = wheels.as_slice() else {
        ctx.session.slots.staged_clear_all();
        return Ok(Step::stay(observed(false)));
    };

    let (left, right) = separate_two(first, second, Axis::Horizontal, |obj| obj.bbox);
    let left_stable = ctx.stable("left", left);
    let right_stable = ctx.stable("right", right);
    if !(left_stable && right_stable) {
        return Ok(Step::stay(observed(true)));
    }
    let mixed_up = ["left", "right"]
        .iter()
        .any(|slot| ctx.class_of(slot) == Some("wrong_wheel"));
    if mixed_up {
        return Ok(ctx.correct(
            observed(true),
            "You combined the wrong tire rim pairs. Please swap the parts of each pair.",
        ));
    }
    Ok(ctx.advance(observed(true)))
}

fn axle_into_wheel(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    let (want, other) = if pass == 1 { ("thin", "thick") } else { ("thick", "thin") };
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(format!(
                    "Now, insert the axle into one of the {} wheels. Then hold it up like this.",
                    want
                ))
                .with_image(format!("wheel_in_axle_{}.jpg", want)),
        ));
    }

    let want_label = format!("wheel_in_axle_{}", want);
    let other_label = format!("wheel_in_axle_{}", other);
    let found = ctx.detect(&[want_label.as_str(), other_label.as_str()])?;
    let right_wheel = only(&found, &want_label);
    let wrong_wheel = only(&found, &other_label);
    if right_wheel.is_none() && wrong_wheel.is_none() {
        ctx.session.slots.staged_clear_all();
        return Ok(Step::stay(observed(false)));
    }

    match wrong_wheel {
        Some(obj) => {
            if ctx.stable("wrong", obj) {
                let size = if want == "thin" { "smaller" } else { "bigger" };
                return Ok(ctx.correct(
                    observed(true),
                    format!("You have the {} wheel. Please use the {} wheel instead.", other, size),
                ));
            }
        }
        None => ctx.miss("wrong"),
    }
    match right_wheel {
        Some(obj) => {
            if ctx.stable("target", obj) {
                return Ok(ctx.advance(observed(true)));
            }
        }
        None => ctx.miss("target"),
    }
    Ok(Step::stay(observed(true)))
}

fn press_wheel(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    let (want, other) = if pass == 1 { ("thin", "thick") } else { ("thick", "thin") };
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(format!(
                    "Press the other {} wheel into the axle. Then, show me the bird's eye view.",
                    want
                ))
                .with_video(ctx.settings.video(&format!("press_wheel_{}.mp4", pass))),
        ));
    }

    let wheels = ctx.detect(&WHEEL_LABELS)?;
    let pair = match wheels.as_slice() {
        [a, b] => Some((a, b)),
        [a, b, c, d] => {
            let [top_left, top_right, bottom_left, bottom_right] =
                separate_four_rect([a, b, c, d], |obj| obj.bbox);
            // The first pass presses into the left column, the second into the right.
            if pass == 1 {
                Some((top_left, bottom_left))
            } else {
                Some((top_right, bottom_right))
            }
        }
        _ => None,
    };

    let Some((first, second)) = pair else {
        let step = Step::stay(observed(false));
        if (wheels.len() > 2 && pass == 1) || wheels.len() > 4 {
            return Ok(ctx.cluttered(step));
        }
        ctx.miss("first");
        ctx.miss("second");
        return Ok(step);
    };

    let first_stable = ctx.stable("first", first);
    let second_stable = ctx.stable("second", second);
    if !(first_stable && second_stable) {
        return Ok(Step::stay(observed(true)));
    }
    if ctx.class_of("first") != ctx.class_of("second") {
        return Ok(ctx.correct(
            observed(true),
            format!("You put in the {} wheel. Please use the {} wheel instead.", other, want),
        ));
    }
    Ok(ctx.advance(observed(true)))
}

// ----------------------------------------------------------------------------
// Frame and washers
// ----------------------------------------------------------------------------

fn acquire_frame(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Moving on. Grab the black frame. Show me a side view of the axle holes like this.",
                )
                .with_video(ctx.settings.video(&format!("acquire_frame_{}.mp4", pass))),
        ));
    }

    let markers = ctx.detect(&["frame_marker_right", "frame_marker_left"])?;
    let [marker] = markers.as_slice() else {
        ctx.miss("marker");
        return Ok(Step::stay(observed(false)));
    };
    if ctx.stable("marker", marker) {
        return Ok(ctx.advance(observed(true)));
    }
    Ok(Step::stay(observed(true)))
}

fn washer_side(ctx: &StepContext<'_>, pass: u8) -> Side {
    let idx = (pass.max(1) as usize - 1).min(ctx.settings.washer_sides.len() - 1);
    ctx.settings.washer_sides[idx]
}

/// Target hole on `side` and the other visible hole, if any.
fn pick_hole(holes: &[DetectedObject], side: Side) -> Option<(&DetectedObject, Option<&DetectedObject>)> {
    match holes {
        [single] => Some((single, None)),
        [a, b] => {
            let (left, right) = separate_two(a, b, Axis::Horizontal, |obj| obj.bbox);
            match side {
                Side::Left => Some((left, Some(right))),
                Side::Right => Some((right, Some(left))),
            }
        }
        _ => None,
    }
}

fn component_speech(component: &str) -> &'static str {
    match component {
        "hole_left_front" => "front left hole",
        "hole_left_back" => "back left hole",
        "hole_right_front" => "front right hole",
        "hole_right_back" => "back right hole",
        _ => "hole",
    }
}

fn washer_speech(state: &str) -> &'static str {
    match state {
        "hole_green" => "green washer",
        "hole_gold" => "gold washer",
        _ => "washer",
    }
}

/// Commit the stable target hole to the component model and react to it.
fn settle_hole(ctx: &mut StepContext<'_>, goal: &str) -> Result<Step> {
    let Some(seen) = ctx.class_of("target").map(str::to_string) else {
        return Ok(Step::stay(observed(true)));
    };
    let Some(component) = ctx
        .session
        .holes
        .next_instruction()
        .map(|(component, _)| component.to_string())
    else {
        return Ok(ctx.advance(observed(true)));
    };

    let (kind, info) = ctx.session.holes.check_update(&component, &seen)?;
    log::debug!("{} seen as {}: {:?}", component, seen, kind);
    if seen == goal {
        return Ok(ctx.advance(observed(true)));
    }
    match kind {
        UpdateKind::BackStep => {
            let (component, before) = info.before.unwrap_or((component, seen));
            let speech = format!(
                "You removed the {} from the {}. Please put it back.",
                washer_speech(&before),
                component_speech(&component)
            );
            Ok(ctx.correct(observed(true), speech))
        }
        UpdateKind::NextStep => {
            ctx.session.slots.slot("target").clear();
            Ok(Step::stay(observed(true).with_speech(format!(
                "Thanks for putting the {} back.",
                washer_speech(&seen)
            ))))
        }
        UpdateKind::NoChange => Ok(Step::stay(observed(true))),
    }
}

fn insert_green_washer(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    let side = washer_side(ctx, pass).as_str();
    if pass == 1 && ctx.session.first_time("find_green_washer") {
        ctx.session.slots.clear_all();
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Great, now find a green washer.")
                .with_image("green_washer.png"),
        )
        .with_cooldown(ctx.settings.washer_settle));
    }
    if ctx.enter() {
        let speech = if pass == 1 {
            format!(
                "Insert the green washer into the {} hole. Then, show me a side view of the holes like in the video.",
                side
            )
        } else {
            format!(
                "Now, insert a green washer into the {} hole. Then, show me a side view of the holes.",
                side
            )
        };
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(speech)
                .with_video(ctx.settings.video(&format!("green_washer_{}.mp4", pass))),
        )
        .with_cooldown(ctx.settings.washer_settle));
    }

    let holes = ctx.detect(&["hole_empty", "hole_green"])?;
    let Some((target, other)) = pick_hole(&holes, washer_side(ctx, pass)) else {
        ctx.session.slots.staged_clear_all();
        let step = Step::stay(observed(false));
        if holes.len() > 2 {
            return Ok(ctx.cluttered(step));
        }
        return Ok(step);
    };

    match other {
        Some(hole) if hole.class_name == "hole_green" => {
            if ctx.stable("other", hole) {
                return Ok(ctx.correct(
                    observed(true),
                    format!(
                        "You put the green washer in the wrong hole. Please put it in the {} hole.",
                        side
                    ),
                ));
            }
        }
        _ => ctx.miss("other"),
    }
    if ctx.stable("target", target) {
        return settle_hole(ctx, "hole_green");
    }
    Ok(Step::stay(observed(true)))
}

fn insert_gold_washer(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    if pass == 1 && ctx.session.first_time("find_gold_washer") {
        ctx.session.slots.clear_all();
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Great, now find a gold washer.")
                .with_image("gold_washer.png"),
        )
        .with_cooldown(ctx.settings.washer_settle));
    }
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Insert the gold washer into the green washer.")
                .with_video(ctx.settings.video(&format!("gold_washer_{}.mp4", pass))),
        )
        .with_cooldown(ctx.settings.washer_settle));
    }

    let holes = ctx.detect(&["hole_empty", "hole_green", "hole_gold"])?;
    let Some((target, _)) = pick_hole(&holes, washer_side(ctx, pass)) else {
        ctx.miss("target");
        let step = Step::stay(observed(false));
        if holes.len() > 2 {
            return Ok(ctx.cluttered(step));
        }
        return Ok(step);
    };
    if ctx.stable("target", target) {
        return settle_hole(ctx, "hole_gold");
    }
    Ok(Step::stay(observed(true)))
}

// ----------------------------------------------------------------------------
// Gears and axles
// ----------------------------------------------------------------------------

fn insert_pink_gear_front(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Great job! Now, lay the black frame down and give me a birds-eye view. Then, insert the pink gear, making sure its teeth are facing towards you.",
                )
                .with_image("pink_gear_1.jpg"),
        ));
    }

    let found = ctx.detect(&["front_gear_bad", "front_gear_good"])?;
    let bad = of_class(&found, "front_gear_bad");
    let good = only(&found, "front_gear_good");
    let usable = !bad.is_empty() || good.is_some();

    match bad.first() {
        Some(gear) => {
            if ctx.stable("bad", gear) {
                return Ok(ctx.correct(
                    observed(true),
                    "Please make sure the teeth are facing towards you.",
                ));
            }
        }
        None => ctx.miss("bad"),
    }
    match good {
        Some(gear) => {
            if ctx.stable("gear", gear) {
                return Ok(ctx.advance(observed(true)));
            }
        }
        None => ctx.miss("gear"),
    }
    Ok(Step::stay(observed(usable)))
}

fn insert_axle(ctx: &mut StepContext<'_>, pass: u8) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Great, now insert the axle through the washers and the pink gear. Then give me a birds eye view.",
                )
                .with_video(ctx.settings.video(&format!("axle_into_frame_{}.mp4", pass))),
        ));
    }

    let axles = ctx.detect(&["axle_in_frame_good"])?;
    // The second axle goes in next to the first one, on its right.
    let axle = match (pass, axles.as_slice()) {
        (1, [axle]) => Some(axle),
        (p, [a, b]) if p > 1 => Some(separate_two(a, b, Axis::Horizontal, |obj| obj.bbox).1),
        _ => None,
    };
    let Some(axle) = axle else {
        ctx.session.slots.staged_clear_all();
        return Ok(Step::stay(observed(false)));
    };
    if ctx.stable("axle", axle) {
        return Ok(ctx.advance(observed(true)));
    }
    Ok(Step::stay(observed(true)))
}

fn insert_pink_gear_back(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Now, place the other pink gear into the frame. Make sure the teeth point away from you.",
                )
                .with_image("pink_gear_2.jpg"),
        ));
    }

    let gears = ctx.detect(&["back_pink", "pink_back"])?;
    let [gear] = gears.as_slice() else {
        ctx.miss("gear");
        return Ok(Step::stay(observed(false)));
    };
    if !ctx.stable("gear", gear) {
        return Ok(Step::stay(observed(true)));
    }

    let thresholds = GearThresholds {
        dark_pixel: ctx.settings.dark_pixel_threshold,
        light_row: ctx.settings.gear_side_threshold,
    };
    let direction = ctx
        .session
        .slots
        .get("gear")
        .and_then(|slot| slot.averaged_bbox())
        .and_then(|bbox| ctx.frame.gray_crop(bbox))
        .and_then(|crop| teeth_direction(&crop, thresholds));
    match direction {
        Some(TeethDirection::Away) => {
            ctx.session.slots.clear_all();
            Ok(ctx.advance(observed(true).with_speech("Great! The pink gear is facing the right way.")))
        }
        Some(TeethDirection::Toward) => Ok(ctx.correct(
            observed(true),
            "Please turn the pink gear around so that the teeth are pointed away from you.",
        )),
        None => {
            ctx.session.slots.clear_all();
            Ok(Step::stay(observed(false)))
        }
    }
}

fn insert_brown_gear(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Find the brown gear and place it next to the pink gear. Make sure the nudge on the brown gear points towards the pink gear.",
                )
                .with_image("brown_gear.jpg"),
        ));
    }

    let gears = ctx.detect(&["brown_good", "brown_bad"])?;
    let [gear] = gears.as_slice() else {
        ctx.miss("gear");
        return Ok(Step::stay(observed(false)));
    };
    if !ctx.stable("gear", gear) {
        return Ok(Step::stay(observed(true)));
    }
    if ctx.class_of("gear") != Some("brown_good") {
        return Ok(ctx.correct(
            observed(true),
            "Please make sure the nudge on the brown gear points towards the pink gear.",
        ));
    }
    Ok(ctx.advance(observed(true)))
}

fn add_gear_axle(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech("Finally, find the gear axle. Use it to connect the two gear systems together.")
                .with_video(ctx.settings.video("gear_axle.mp4")),
        ));
    }

    let found = ctx.detect(&["gear_on_axle", "front_gear_good"])?;
    let on_axle = of_class(&found, "gear_on_axle");
    let pink = only(&found, "front_gear_good");
    let front = match on_axle.as_slice() {
        [single] => *single,
        [a, b] => separate_two(*a, *b, Axis::Horizontal, |obj| obj.bbox).0,
        _ => {
            ctx.session.slots.staged_clear_all();
            return Ok(Step::stay(observed(false)));
        }
    };

    let axle_stable = ctx.stable("axle_gear", front);
    let Some(pink) = pink else {
        ctx.miss("pink");
        return Ok(Step::stay(observed(true)));
    };
    let pink_stable = ctx.stable("pink", pink);
    if !(axle_stable && pink_stable) {
        return Ok(Step::stay(observed(true)));
    }

    let slots = &ctx.session.slots;
    let meshed = match (
        slots.get("axle_gear").and_then(|s| s.averaged_bbox()),
        slots.get("pink").and_then(|s| s.averaged_bbox()),
    ) {
        (Some(axle_gear), Some(pink)) => intersects(&axle_gear, &pink),
        _ => false,
    };
    if meshed {
        return Ok(ctx.advance(observed(true)));
    }
    Ok(ctx.correct(
        observed(true),
        "The gear axle doesn't seem to be placed correctly. Make sure its teeth touch the teeth of the pink gears.",
    ))
}

// ----------------------------------------------------------------------------
// Final check
// ----------------------------------------------------------------------------

fn final_check(ctx: &mut StepContext<'_>) -> Result<Step> {
    if ctx.enter() {
        return Ok(Step::stay(
            Instruction::success()
                .with_speech(
                    "Great job! Now, let me do a final check on everything. Please show me a birds-eye view.",
                )
                .with_image("final_check.jpg"),
        ));
    }
    if ctx.session.reached("final_check_wheels") {
        final_check_gears(ctx)
    } else {
        final_check_wheels(ctx)
    }
}

fn final_check_wheels(ctx: &mut StepContext<'_>) -> Result<Step> {
    let wheels = ctx.detect(&WHEEL_LABELS)?;
    let [a, b, c, d] = wheels.as_slice() else {
        ctx.session.slots.staged_clear_all();
        return Ok(Step::stay(observed(false)));
    };

    let arranged = separate_four_rect([a, b, c, d], |obj| obj.bbox);
    let mut all_stable = true;
    for (corner, wheel) in WHEEL_CORNERS.iter().zip(arranged) {
        all_stable &= ctx.stable(corner, wheel);
    }
    if !all_stable {
        return Ok(Step::stay(observed(true)));
    }

    let thin = |corner: &str| ctx.class_of(corner) == Some("thin_wheel_side");
    let left_thin = thin("top_left") && thin("bottom_left");
    let right_thin = thin("top_right") && thin("bottom_right");
    let left_thick = !thin("top_left") && !thin("bottom_left");
    let right_thick = !thin("top_right") && !thin("bottom_right");
    let (placed, thin_side, thick_side) = if ctx.settings.thin_wheels_left {
        (left_thin && right_thick, "left", "right")
    } else {
        (right_thin && left_thick, "right", "left")
    };

    if !placed {
        return Ok(ctx.correct(
            observed(true),
            format!(
                "Some wheels are in the wrong place. The thin wheels go on the {} and the thick wheels on the {}.",
                thin_side, thick_side
            ),
        ));
    }
    ctx.session.mark("final_check_wheels");
    ctx.session.slots.clear_all();
    Ok(Step::stay(observed(true).with_speech(
        "The wheels look good! Please stay still for a little longer. Now I'm checking the gears.",
    )))
}

fn final_check_gears(ctx: &mut StepContext<'_>) -> Result<Step> {
    let gears = ctx.detect(&GEAR_LABELS)?;
    if gears.len() != 3 {
        ctx.miss("left_gear");
        ctx.miss("right_gear");
        return Ok(Step::stay(observed(false)));
    }

    let mut by_x: Vec<&DetectedObject> = gears.iter().collect();
    by_x.sort_by(|a, b| a.bbox[0].total_cmp(&b.bbox[0]));
    let left_stable = ctx.stable("left_gear", by_x[0]);
    let right_stable = ctx.stable("right_gear", by_x[2]);
    if !(left_stable && right_stable) {
        return Ok(Step::stay(observed(true)));
    }

    if ctx.class_of("right_gear") == Some("brown_bad") {
        return Ok(ctx.correct(
            observed(true),
            "The brown gear is facing the wrong way. Please flip it.",
        ));
    }
    if ctx.class_of("left_gear") == Some("front_gear_bad") {
        return Ok(ctx.correct(
            observed(true),
            "The left pink gear is facing the wrong way. Please flip it.",
        ));
    }
    Ok(ctx.advance(observed(true)))
}
