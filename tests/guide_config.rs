use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use assembly_guide::config::{GuideConfig, Side};
use assembly_guide::stability::DebouncePolicy;
use assembly_guide::TaskState;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "GUIDE_CONFIG",
        "GUIDE_BACKEND_URL",
        "GUIDE_VIDEO_URL",
        "GUIDE_STABLE_THRESHOLD",
        "GUIDE_SETTLE_MS",
        "GUIDE_INITIAL_STATE",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = GuideConfig::load().expect("load defaults");

    assert_eq!(cfg.backends.len(), 6);
    assert!(cfg
        .backends
        .iter()
        .all(|entry| entry.url == "http://127.0.0.1:8000"));
    assert_eq!(cfg.backend.confidence, 0.5);
    assert_eq!(cfg.backend.settle_delay, Duration::from_secs(4));
    assert_eq!(cfg.stability.window, 15);
    assert_eq!(cfg.stability.threshold_px, 50.0);
    assert_eq!(cfg.task.initial_state, TaskState::Start);
    assert_eq!(cfg.task.washer_sides, [Side::Left, Side::Left, Side::Right, Side::Right]);
    assert!(cfg.task.video_base_url.ends_with('/'));

    let registry = cfg.build_registry().expect("registry");
    assert_eq!(registry.backend_for_label("hole_gold").unwrap(), "frame_holes");
    assert_eq!(registry.backend_for_label("axle_in_frame_good").unwrap(), "axle_frame");
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "backend": {
                "confidence": 0.6,
                "settle_delay_ms": 1500,
                "retries": 5
            },
            "backends": [
                {"id": "holes", "url": "http://10.0.0.5:8000", "labels": ["hole_empty", "hole_green", "hole_gold"]},
                {"id": "pairs", "labels": ["wrong_wheel"]}
            ],
            "stability": {"window": 10, "threshold_px": 30, "debounce": "half"},
            "task": {
                "washer_sides": ["right", "right", "left", "left"],
                "thin_wheels_left": false,
                "wheel_pair_backend": "pairs",
                "video_base_url": "http://media.local/videos",
                "combine_ms": 2500
            }
        }"#,
    );

    std::env::set_var("GUIDE_CONFIG", file.path());
    std::env::set_var("GUIDE_STABLE_THRESHOLD", "42");
    std::env::set_var("GUIDE_INITIAL_STATE", "insert_green_washer_2");

    let cfg = GuideConfig::load().expect("load config");

    assert_eq!(cfg.backend.confidence, 0.6);
    assert_eq!(cfg.backend.settle_delay, Duration::from_millis(1500));
    assert_eq!(cfg.backend.http.retries, 5);
    assert_eq!(cfg.backends.len(), 2);
    assert_eq!(cfg.backends[0].url, "http://10.0.0.5:8000");
    assert_eq!(cfg.backends[1].url, "http://127.0.0.1:8000");
    assert_eq!(cfg.stability.window, 10);
    assert_eq!(cfg.stability.threshold_px, 42.0);
    assert_eq!(cfg.stability.debounce, DebouncePolicy::Half);
    assert_eq!(cfg.task.washer_sides, [Side::Right, Side::Right, Side::Left, Side::Left]);
    assert!(!cfg.task.thin_wheels_left);
    assert_eq!(cfg.task.video_base_url, "http://media.local/videos/");
    assert_eq!(cfg.task.video("gear_axle.mp4"), "http://media.local/videos/gear_axle.mp4");
    assert_eq!(cfg.task.combine_window, Duration::from_millis(2500));
    assert_eq!(cfg.task.initial_state, TaskState::InsertGreenWasher(2));

    clear_env();
}

#[test]
fn loads_toml_and_backend_url_override() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
[backend]
timeout_ms = 750

[stability]
window = 4

[task]
clutter_threshold = 3
initial_state = "final_check"
"#,
    );

    std::env::set_var("GUIDE_CONFIG", file.path());
    std::env::set_var("GUIDE_BACKEND_URL", "http://detector.local:9000");
    std::env::set_var("GUIDE_SETTLE_MS", "0");

    let cfg = GuideConfig::load().expect("load toml config");

    assert_eq!(cfg.backend.http.timeout, Duration::from_millis(750));
    assert_eq!(cfg.backend.settle_delay, Duration::ZERO);
    assert_eq!(cfg.stability.window, 4);
    assert_eq!(cfg.task.clutter_threshold, 3);
    assert_eq!(cfg.task.initial_state, TaskState::FinalCheck);
    assert!(cfg
        .backends
        .iter()
        .all(|entry| entry.url == "http://detector.local:9000"));

    clear_env();
}

#[test]
fn rejects_invalid_settings() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cases = [
        r#"{"stability": {"window": 1}}"#,
        r#"{"backend": {"confidence": 0}}"#,
        r#"{"backends": []}"#,
        r#"{"backends": [{"id": "a", "labels": ["x"]}, {"id": "b", "labels": ["x"]}]}"#,
        r#"{"backends": [{"id": "wheel_pairs", "url": "ftp://host", "labels": ["x"]}]}"#,
        r#"{"task": {"wheel_pair_backend": "missing"}}"#,
        r#"{"task": {"washer_sides": ["left", "right"]}}"#,
        r#"{"task": {"initial_state": "warp_speed"}}"#,
    ];
    for contents in cases {
        let file = config_file(".json", contents);
        std::env::set_var("GUIDE_CONFIG", file.path());
        assert!(GuideConfig::load().is_err(), "accepted {}", contents);
    }

    std::env::remove_var("GUIDE_CONFIG");
    std::env::set_var("GUIDE_INITIAL_STATE", "not_a_state");
    assert!(GuideConfig::load().is_err());

    clear_env();
}
