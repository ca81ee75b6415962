//! Configuration layering: defaults, then file, then environment.
//!
//! Lives in its own test binary since it sets process environment variables.

use flowsim_engine::EngineConfig;
use std::fs;

#[test]
fn environment_overrides_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowsim.toml");
    fs::write(
        &path,
        r#"
seed = 11
max_events = 50
instant_tolerance = 0.1

[logging]
level = "warn"
json = true
"#,
    )
    .unwrap();

    std::env::set_var("FLOWSIM__LOGGING__LEVEL", "debug");
    std::env::set_var("FLOWSIM__INSTANT_TOLERANCE", "0.25");
    let loaded = EngineConfig::load(path.to_str());
    std::env::remove_var("FLOWSIM__LOGGING__LEVEL");
    std::env::remove_var("FLOWSIM__INSTANT_TOLERANCE");
    let config = loaded.unwrap();

    // environment
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.instant_tolerance, 0.25);
    // file
    assert_eq!(config.seed, 11);
    assert_eq!(config.max_events, Some(50));
    assert!(config.logging.json);
    // defaults
    assert!(config.record_events);
}
