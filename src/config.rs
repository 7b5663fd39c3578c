use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::detect::{
    BackendRegistry, ClassGroups, ClassifierSelector, HttpBackend, HttpSettings, SelectorSettings,
};
use crate::stability::{DebouncePolicy, StabilitySettings};
use crate::task::TaskState;

const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_VIDEO_BASE_URL: &str = "http://127.0.0.1:9095/";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_SETTLE_MS: u64 = 4000;
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
const DEFAULT_WINDOW: usize = 15;
const DEFAULT_THRESHOLD_PX: f32 = 50.0;
const DEFAULT_CLUTTER_THRESHOLD: u32 = 5;
const DEFAULT_FEEDBACK_COOLDOWN_MS: u64 = 4000;
const DEFAULT_WASHER_SETTLE_MS: u64 = 4000;
const DEFAULT_COMBINE_MS: u64 = 10_000;
const DEFAULT_IDLE_MS: u64 = 10_000;
const DEFAULT_DARK_PIXEL_THRESHOLD: f32 = 0.3;
const DEFAULT_GEAR_SIDE_THRESHOLD: f32 = 0.5;
const DEFAULT_WHEEL_PAIR_BACKEND: &str = "wheel_pairs";

/// Default classifier registry: backend id and the labels routed to it.
const DEFAULT_BACKENDS: &[(&str, &[&str])] = &[
    (
        "axle_wheels",
        &["wheel_in_axle_thick", "wheel_in_axle_thin", "wheel_axle"],
    ),
    (
        "frame_holes",
        &[
            "hole_empty",
            "hole_green",
            "hole_gold",
            "frame_marker_left",
            "frame_marker_right",
            "frame_horn",
        ],
    ),
    (
        "tires_rims",
        &[
            "thick_rim_side",
            "thick_wheel_side",
            "thin_rim_side",
            "thin_wheel_side",
        ],
    ),
    (
        "gears",
        &[
            "back_pink",
            "brown_bad",
            "brown_good",
            "front_gear_bad",
            "front_gear_good",
            "gear_on_axle",
            "pink_back",
        ],
    ),
    ("axle_frame", &["axle_in_frame_good"]),
    (
        "wheel_pairs",
        &["wrong_wheel", "thick_wheel_top", "thin_wheel_top"],
    ),
];

#[derive(Debug, Deserialize, Default)]
struct GuideConfigFile {
    backend: Option<BackendConfigFile>,
    backends: Option<Vec<BackendEntryFile>>,
    class_groups: Option<BTreeMap<String, String>>,
    stability: Option<StabilityConfigFile>,
    task: Option<TaskConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct BackendConfigFile {
    confidence: Option<f32>,
    settle_delay_ms: Option<u64>,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BackendEntryFile {
    id: String,
    url: Option<String>,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilityConfigFile {
    window: Option<usize>,
    threshold_px: Option<f32>,
    debounce: Option<DebouncePolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct TaskConfigFile {
    clutter_threshold: Option<u32>,
    feedback_cooldown_ms: Option<u64>,
    washer_settle_ms: Option<u64>,
    combine_ms: Option<u64>,
    idle_ms: Option<u64>,
    video_base_url: Option<String>,
    washer_sides: Option<Vec<Side>>,
    thin_wheels_left: Option<bool>,
    dark_pixel_threshold: Option<f32>,
    gear_side_threshold: Option<f32>,
    wheel_pair_backend: Option<String>,
    initial_state: Option<String>,
}

/// Side of the camera image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuideConfig {
    pub backend: BackendSettings,
    pub backends: Vec<BackendEntry>,
    pub class_groups: ClassGroups,
    pub stability: StabilitySettings,
    pub task: TaskSettings,
}

#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub confidence: f32,
    pub settle_delay: Duration,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct BackendEntry {
    pub id: String,
    pub url: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub clutter_threshold: u32,
    pub feedback_cooldown: Duration,
    pub washer_settle: Duration,
    pub combine_window: Duration,
    pub idle: Duration,
    /// Prefix for video references; always ends with '/'.
    pub video_base_url: String,
    /// Image side holding the target hole for washer passes 1 to 4.
    pub washer_sides: [Side; 4],
    pub thin_wheels_left: bool,
    pub dark_pixel_threshold: f32,
    pub gear_side_threshold: f32,
    pub wheel_pair_backend: String,
    pub initial_state: TaskState,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            clutter_threshold: DEFAULT_CLUTTER_THRESHOLD,
            feedback_cooldown: Duration::from_millis(DEFAULT_FEEDBACK_COOLDOWN_MS),
            washer_settle: Duration::from_millis(DEFAULT_WASHER_SETTLE_MS),
            combine_window: Duration::from_millis(DEFAULT_COMBINE_MS),
            idle: Duration::from_millis(DEFAULT_IDLE_MS),
            video_base_url: DEFAULT_VIDEO_BASE_URL.to_string(),
            washer_sides: [Side::Left, Side::Left, Side::Right, Side::Right],
            thin_wheels_left: true,
            dark_pixel_threshold: DEFAULT_DARK_PIXEL_THRESHOLD,
            gear_side_threshold: DEFAULT_GEAR_SIDE_THRESHOLD,
            wheel_pair_backend: DEFAULT_WHEEL_PAIR_BACKEND.to_string(),
            initial_state: TaskState::Start,
        }
    }
}

impl TaskSettings {
    /// Settings with every wait set to zero, for tests and offline replays.
    pub fn without_waits() -> Self {
        Self {
            feedback_cooldown: Duration::ZERO,
            washer_settle: Duration::ZERO,
            combine_window: Duration::ZERO,
            idle: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn video(&self, name: &str) -> String {
        format!("{}{}", self.video_base_url, name)
    }
}

impl GuideConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("GUIDE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: GuideConfigFile) -> Result<Self> {
        let backend_file = file.backend.unwrap_or_default();
        let backend = BackendSettings {
            confidence: backend_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            settle_delay: Duration::from_millis(
                backend_file.settle_delay_ms.unwrap_or(DEFAULT_SETTLE_MS),
            ),
            http: HttpSettings {
                timeout: Duration::from_millis(backend_file.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS)),
                retries: backend_file.retries.unwrap_or(DEFAULT_RETRIES),
                retry_backoff: Duration::from_millis(
                    backend_file
                        .retry_backoff_ms
                        .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
                ),
            },
        };

        let backends = match file.backends {
            Some(entries) => entries
                .into_iter()
                .map(|entry| BackendEntry {
                    id: entry.id,
                    url: entry.url.unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string()),
                    labels: entry.labels,
                })
                .collect(),
            None => default_backends(),
        };

        let mut class_groups = ClassGroups::default();
        for (class_name, group) in file.class_groups.unwrap_or_default() {
            class_groups.insert(&class_name, &group);
        }

        let stability_file = file.stability.unwrap_or_default();
        let stability = StabilitySettings {
            window: stability_file.window.unwrap_or(DEFAULT_WINDOW),
            threshold_px: stability_file.threshold_px.unwrap_or(DEFAULT_THRESHOLD_PX),
            debounce: stability_file.debounce.unwrap_or_default(),
        };

        let task_file = file.task.unwrap_or_default();
        let defaults = TaskSettings::default();
        let washer_sides = match task_file.washer_sides {
            Some(sides) => <[Side; 4]>::try_from(sides.as_slice())
                .map_err(|_| anyhow!("task.washer_sides must list exactly four sides"))?,
            None => defaults.washer_sides,
        };
        let initial_state = match task_file.initial_state.as_deref() {
            Some(name) => name.parse()?,
            None => defaults.initial_state,
        };
        let ms = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };
        let task = TaskSettings {
            clutter_threshold: task_file
                .clutter_threshold
                .unwrap_or(defaults.clutter_threshold),
            feedback_cooldown: ms(task_file.feedback_cooldown_ms, defaults.feedback_cooldown),
            washer_settle: ms(task_file.washer_settle_ms, defaults.washer_settle),
            combine_window: ms(task_file.combine_ms, defaults.combine_window),
            idle: ms(task_file.idle_ms, defaults.idle),
            video_base_url: task_file
                .video_base_url
                .unwrap_or_else(|| defaults.video_base_url.clone()),
            washer_sides,
            thin_wheels_left: task_file
                .thin_wheels_left
                .unwrap_or(defaults.thin_wheels_left),
            dark_pixel_threshold: task_file
                .dark_pixel_threshold
                .unwrap_or(defaults.dark_pixel_threshold),
            gear_side_threshold: task_file
                .gear_side_threshold
                .unwrap_or(defaults.gear_side_threshold),
            wheel_pair_backend: task_file
                .wheel_pair_backend
                .unwrap_or_else(|| defaults.wheel_pair_backend.clone()),
            initial_state,
        };

        Ok(Self {
            backend,
            backends,
            class_groups,
            stability,
            task,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("GUIDE_BACKEND_URL") {
            if !url.trim().is_empty() {
                for entry in &mut self.backends {
                    entry.url = url.trim().to_string();
                }
            }
        }
        if let Ok(url) = std::env::var("GUIDE_VIDEO_URL") {
            if !url.trim().is_empty() {
                self.task.video_base_url = url.trim().to_string();
            }
        }
        if let Ok(threshold) = std::env::var("GUIDE_STABLE_THRESHOLD") {
            self.stability.threshold_px = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("GUIDE_STABLE_THRESHOLD must be a number of pixels"))?;
        }
        if let Ok(settle) = std::env::var("GUIDE_SETTLE_MS") {
            let millis: u64 = settle.trim().parse().map_err(|_| {
                anyhow!("GUIDE_SETTLE_MS must be an integer number of milliseconds")
            })?;
            self.backend.settle_delay = Duration::from_millis(millis);
        }
        if let Ok(state) = std::env::var("GUIDE_INITIAL_STATE") {
            if !state.trim().is_empty() {
                self.task.initial_state = state
                    .parse()
                    .context("GUIDE_INITIAL_STATE must name a task state")?;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.stability.window < 2 {
            return Err(anyhow!("stability.window must be at least 2"));
        }
        if !(self.stability.threshold_px > 0.0) {
            return Err(anyhow!("stability.threshold_px must be greater than zero"));
        }
        if !(self.backend.confidence > 0.0 && self.backend.confidence <= 1.0) {
            return Err(anyhow!("backend.confidence must be in (0, 1]"));
        }
        if self.backends.is_empty() {
            return Err(anyhow!("at least one backend must be configured"));
        }

        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for entry in &self.backends {
            if !ids.insert(entry.id.as_str()) {
                return Err(anyhow!("backend id '{}' listed twice", entry.id));
            }
            for label in &entry.labels {
                if !labels.insert(label.as_str()) {
                    return Err(anyhow!("label '{}' routed to more than one backend", label));
                }
            }
            let parsed = Url::parse(&entry.url)
                .map_err(|e| anyhow!("backend '{}' has invalid url {}: {}", entry.id, entry.url, e))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(anyhow!("backend '{}' url must be http or https", entry.id));
            }
        }
        if !ids.contains(self.task.wheel_pair_backend.as_str()) {
            return Err(anyhow!(
                "task.wheel_pair_backend '{}' is not a configured backend",
                self.task.wheel_pair_backend
            ));
        }

        Url::parse(&self.task.video_base_url)
            .map_err(|e| anyhow!("invalid task.video_base_url {}: {}", self.task.video_base_url, e))?;
        if !self.task.video_base_url.ends_with('/') {
            self.task.video_base_url.push('/');
        }
        for (name, value) in [
            ("task.dark_pixel_threshold", self.task.dark_pixel_threshold),
            ("task.gear_side_threshold", self.task.gear_side_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be between 0 and 1", name));
            }
        }
        if self.task.clutter_threshold == 0 {
            return Err(anyhow!("task.clutter_threshold must be greater than zero"));
        }
        Ok(())
    }

    pub fn selector_settings(&self) -> SelectorSettings {
        SelectorSettings {
            confidence: self.backend.confidence,
            settle_delay: self.backend.settle_delay,
        }
    }

    /// Registry of HTTP backends as configured.
    pub fn build_registry(&self) -> Result<BackendRegistry> {
        let mut registry = BackendRegistry::new();
        for entry in &self.backends {
            let backend = HttpBackend::new(&entry.id, &entry.url, self.backend.http.clone())?;
            registry.register(backend, entry.labels.as_slice())?;
        }
        Ok(registry)
    }

    pub fn build_selector(&self) -> Result<ClassifierSelector> {
        Ok(ClassifierSelector::new(
            self.build_registry()?,
            self.class_groups.clone(),
            self.selector_settings(),
        ))
    }
}

fn default_backends() -> Vec<BackendEntry> {
    DEFAULT_BACKENDS
        .iter()
        .map(|(id, labels)| BackendEntry {
            id: id.to_string(),
            url: DEFAULT_BACKEND_URL.to_string(),
            labels: labels.iter().map(|label| label.to_string()).collect(),
        })
        .collect()
}

fn read_config_file(path: &Path) -> Result<GuideConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = GuideConfig::from_file(GuideConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.backends.len(), 6);
        assert_eq!(cfg.stability.window, 15);
        assert_eq!(cfg.task.initial_state, TaskState::Start);
        assert_eq!(cfg.task.video("gear_axle.mp4"), "http://127.0.0.1:9095/gear_axle.mp4");
        let registry = cfg.build_registry().unwrap();
        assert_eq!(registry.backend_for_label("hole_gold").unwrap(), "frame_holes");
    }

    #[test]
    fn rejects_duplicate_routing() {
        let file: GuideConfigFile = serde_json::from_str(
            r#"{"backends": [
                {"id": "a", "labels": ["hole_empty"]},
                {"id": "wheel_pairs", "labels": ["hole_empty"]}
            ]}"#,
        )
        .unwrap();
        let mut cfg = GuideConfig::from_file(file).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_wrong_washer_side_count() {
        let file: GuideConfigFile =
            serde_json::from_str(r#"{"task": {"washer_sides": ["left", "right"]}}"#).unwrap();
        assert!(GuideConfig::from_file(file).is_err());
    }

    #[test]
    fn video_base_gets_trailing_slash() {
        let file: GuideConfigFile =
            serde_json::from_str(r#"{"task": {"video_base_url": "http://assets.local/videos"}}"#)
                .unwrap();
        let mut cfg = GuideConfig::from_file(file).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.task.video("a.mp4"), "http://assets.local/videos/a.mp4");
    }
}
