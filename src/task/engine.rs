use std::sync::Arc;

use anyhow::Result;

use crate::config::TaskSettings;
use crate::detect::{ClassifierSelector, DetectError};
use crate::frame::Frame;
use crate::stability::StabilitySettings;

use super::clock::{Clock, SystemClock};
use super::handlers::{self, Step, StepContext};
use super::instruction::{Guidance, Instruction, Overlay, OverlayColor};
use super::session::{Session, SessionHeader};
use super::state::{TaskState, Transition};

/// Classes used for orientation only; never drawn.
const HIDDEN_CLASSES: [&str; 3] = ["frame_marker_left", "frame_marker_right", "frame_horn"];

/// Drives one user's session through the assembly task, one frame at a time.
pub struct GuidanceEngine {
    selector: Arc<ClassifierSelector>,
    settings: TaskSettings,
    stability: StabilitySettings,
    clock: Arc<dyn Clock>,
    session: Session,
}

impl GuidanceEngine {
    pub fn new(
        selector: Arc<ClassifierSelector>,
        settings: TaskSettings,
        stability: StabilitySettings,
    ) -> Result<Self> {
        Self::with_clock(selector, settings, stability, Arc::new(SystemClock))
    }

    pub fn with_clock(
        selector: Arc<ClassifierSelector>,
        settings: TaskSettings,
        stability: StabilitySettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let session = Session::new(settings.initial_state, stability.clone())?;
        Ok(Self {
            selector,
            settings,
            stability,
            clock,
            session,
        })
    }

    pub fn state(&self) -> TaskState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Drop all progress and start a new session.
    pub fn reset(&mut self) -> Result<()> {
        self.session = Session::new(self.settings.initial_state, self.stability.clone())?;
        Ok(())
    }

    /// Process one camera frame and return the instruction for the user.
    ///
    /// Backend failures that may go away on their own produce an error
    /// instruction and leave the session untouched. Anything else is returned
    /// as an error.
    pub fn process_frame(&mut self, frame: &Frame, header: Option<&SessionHeader>) -> Result<Guidance> {
        if let Some(task_id) = header.and_then(|h| h.task_id.as_deref()) {
            self.observe_task_id(task_id)?;
        }

        let now = self.clock.now();
        let state = self.session.state;
        if self.session.cooling_down(now) {
            log::debug!("frame {} skipped in {}: cooling down", frame.id(), state);
            return Ok(Guidance {
                state,
                instruction: Instruction::success(),
                overlays: Vec::new(),
            });
        }

        let mut ctx = StepContext {
            state,
            frame,
            selector: &self.selector,
            settings: &self.settings,
            session: &mut self.session,
            now,
        };
        let step = match handlers::run(&mut ctx) {
            Ok(step) => step,
            Err(err) => {
                if err
                    .downcast_ref::<DetectError>()
                    .is_some_and(DetectError::is_recoverable)
                {
                    log::warn!("frame {} in {}: {:#}", frame.id(), state, err);
                    return Ok(Guidance {
                        state,
                        instruction: Instruction::try_again(),
                        overlays: Vec::new(),
                    });
                }
                return Err(err.context(format!("processing frame {} in {}", frame.id(), state)));
            }
        };

        let overlays = self.overlays(frame, &step);
        if let Some(cooldown) = step.cooldown {
            self.session.cooldown_until = Some(now + cooldown);
        }
        if let Transition::To(next) = step.transition {
            log::info!("{} -> {}", state, next);
            self.session.state = next;
            self.session.clutter = 0;
        }

        Ok(Guidance {
            state: self.session.state,
            instruction: step.instruction,
            overlays,
        })
    }

    fn observe_task_id(&mut self, task_id: &str) -> Result<()> {
        if self.session.task_id.as_deref() == Some(task_id) {
            return Ok(());
        }
        if let Some(previous) = self.session.task_id.as_deref() {
            log::info!("task id changed from {} to {}; starting a new session", previous, task_id);
            self.reset()?;
        }
        self.session.task_id = Some(task_id.to_string());
        Ok(())
    }

    fn overlays(&self, frame: &Frame, step: &Step) -> Vec<Overlay> {
        let fallback = if step.instruction.good_frame == Some(true) {
            OverlayColor::Good
        } else {
            OverlayColor::Unused
        };
        self.selector
            .frame_detections(frame.id())
            .iter()
            .filter(|obj| !HIDDEN_CLASSES.contains(&obj.class_name.as_str()))
            .map(|obj| {
                let color = step
                    .highlights
                    .iter()
                    .find(|(class_name, _)| *class_name == obj.class_name)
                    .map(|(_, color)| *color)
                    .unwrap_or(fallback);
                Overlay::new(obj, color)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BackendRegistry, ClassGroups, RawDetection, Scene, ScriptedBackend, SelectorSettings};
    use crate::task::ManualClock;
    use std::time::Duration;

    fn engine(scene: &Scene, clock: Arc<ManualClock>) -> GuidanceEngine {
        let mut registry = BackendRegistry::new();
        registry
            .register(
                ScriptedBackend::with_scene("axle_wheels", scene.clone()),
                &["wheel_in_axle_thick", "wheel_in_axle_thin"],
            )
            .unwrap();
        let selector = ClassifierSelector::new(
            registry,
            ClassGroups::default(),
            SelectorSettings {
                confidence: 0.5,
                settle_delay: Duration::ZERO,
            },
        );
        let settings = TaskSettings {
            initial_state: TaskState::AxleIntoWheel(1),
            ..TaskSettings::without_waits()
        };
        let stability = StabilitySettings {
            window: 2,
            ..StabilitySettings::default()
        };
        GuidanceEngine::with_clock(Arc::new(selector), settings, stability, clock).unwrap()
    }

    fn frame() -> Frame {
        Frame::filled(64, 48, [128, 128, 128]).unwrap()
    }

    #[test]
    fn unreachable_backend_asks_to_try_again() {
        let scene = Scene::new();
        let mut engine = engine(&scene, Arc::new(ManualClock::new()));
        engine.process_frame(&frame(), None).unwrap();

        scene.fail_next("connection refused");
        let guidance = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(guidance.instruction, Instruction::try_again());
        assert_eq!(guidance.state, TaskState::AxleIntoWheel(1));
    }

    #[test]
    fn malformed_response_asks_to_try_again() {
        let scene = Scene::new();
        let mut engine = engine(&scene, Arc::new(ManualClock::new()));
        engine.process_frame(&frame(), None).unwrap();

        scene.set(vec![RawDetection::new("wheel_in_axle_thin", [5.0, 5.0, 20.0, 20.0], 0.9)]);
        engine.process_frame(&frame(), None).unwrap();
        assert_eq!(engine.session().slots.get("target").map(|s| s.len()), Some(1));

        scene.malformed_next("<html>502 Bad Gateway</html>");
        let guidance = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(guidance.instruction, Instruction::try_again());
        assert_eq!(guidance.state, TaskState::AxleIntoWheel(1));
        assert!(guidance.overlays.is_empty());
        assert_eq!(engine.session().slots.get("target").map(|s| s.len()), Some(1));

        let guidance = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(guidance.state, TaskState::AcquireFrame(1));
    }

    #[test]
    fn overlays_follow_good_frame() {
        let scene = Scene::new();
        let mut engine = engine(&scene, Arc::new(ManualClock::new()));
        engine.process_frame(&frame(), None).unwrap();

        scene.set(vec![RawDetection::new("wheel_in_axle_thin", [5.0, 5.0, 20.0, 20.0], 0.9)]);
        let guidance = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(guidance.overlays.len(), 1);
        assert_eq!(guidance.overlays[0].color, OverlayColor::Good);
    }

    #[test]
    fn new_task_id_starts_a_new_session() {
        let scene = Scene::new();
        let mut engine = engine(&scene, Arc::new(ManualClock::new()));
        let first = SessionHeader {
            task_id: Some("a".into()),
        };
        engine.process_frame(&frame(), Some(&first)).unwrap();
        assert!(engine.session().reached("axle_into_wheel_1"));

        engine.process_frame(&frame(), Some(&first)).unwrap();
        assert!(engine.session().reached("axle_into_wheel_1"));

        let second = SessionHeader {
            task_id: Some("b".into()),
        };
        let guidance = engine.process_frame(&frame(), Some(&second)).unwrap();
        assert_eq!(engine.session().task_id.as_deref(), Some("b"));
        // Fresh session: the entry instruction is given again.
        assert!(guidance.instruction.has_speech());
    }

    #[test]
    fn cooldown_skips_frames_until_it_expires() {
        let scene = Scene::new();
        let clock = Arc::new(ManualClock::new());
        let mut engine = engine(&scene, clock.clone());
        engine.settings.feedback_cooldown = Duration::from_secs(2);
        engine.process_frame(&frame(), None).unwrap();

        let wrong = vec![RawDetection::new("wheel_in_axle_thick", [5.0, 5.0, 20.0, 20.0], 0.9)];
        scene.set(wrong);
        engine.process_frame(&frame(), None).unwrap();
        let corrected = engine.process_frame(&frame(), None).unwrap();
        assert!(corrected.instruction.has_speech());

        let skipped = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(skipped.instruction, Instruction::success());
        assert!(skipped.overlays.is_empty());

        clock.advance(Duration::from_secs(2));
        let evaluated = engine.process_frame(&frame(), None).unwrap();
        assert_eq!(evaluated.instruction.good_frame, Some(true));
    }
}
