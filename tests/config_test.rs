//! Integration tests for configuration loading

use liveness_capture::domain::FaceCriteria;
use liveness_capture::infra::Config;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[capture]
target_duration_ms = 8000
no_face_timeout_ms = 60000
progress_tick_ms = 50
auto_accept_fallback = true

[health]
poll_interval_ms = 250
max_checks = 20
working_threshold = 5

[stall]
watchdog_interval_ms = 500
threshold_ms = 2000

[face]
min_eye_open = 0.6
max_yaw_deg = 20.0
max_pitch_deg = 10.0

[upload]
url = "https://verify.example.com/liveness"
timeout_ms = 15000
auth_token = "secret"

[staging]
dir = "/var/lib/liveness/staging"

[metrics]
interval_secs = 30
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.target_duration_ms(), 8000);
    assert_eq!(config.no_face_timeout(), Duration::from_secs(60));
    assert_eq!(config.progress_tick_ms(), 50);
    assert!(config.auto_accept_fallback());
    assert_eq!(config.health_poll_interval(), Duration::from_millis(250));
    assert_eq!(config.health_max_checks(), 20);
    assert_eq!(config.health_working_threshold(), 5);
    assert_eq!(config.stall_watchdog_interval(), Duration::from_millis(500));
    assert_eq!(config.stall_threshold(), Duration::from_secs(2));
    assert_eq!(
        config.face_criteria(),
        &FaceCriteria { min_eye_open: 0.6, max_yaw_deg: 20.0, max_pitch_deg: 10.0 }
    );
    assert_eq!(config.upload_url(), "https://verify.example.com/liveness");
    assert_eq!(config.upload_timeout(), Duration::from_secs(15));
    assert_eq!(config.upload_auth_token(), Some("secret"));
    assert_eq!(config.staging_dir(), PathBuf::from("/var/lib/liveness/staging"));
    assert_eq!(config.metrics_interval_secs(), 30);
}

#[test]
fn test_partial_config_keeps_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[stall]\nthreshold_ms = 5000\n").unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();
    assert_eq!(config.stall_threshold(), Duration::from_secs(5));
    assert_eq!(config.target_duration_ms(), 10_000);
    assert_eq!(config.health_max_checks(), 10);
    assert!(config.upload_auth_token().is_none());
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[capture\ntarget_duration_ms = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.config_file(), "default");
    assert_eq!(config.target_duration_ms(), 10_000);
    assert_eq!(config.no_face_timeout(), Duration::from_secs(120));
}

#[test]
fn test_bundled_dev_config_loads() {
    let config = Config::from_file("config/dev.toml").unwrap();
    assert_eq!(config.target_duration_ms(), 10_000);
    assert_eq!(config.stall_threshold(), Duration::from_secs(3));
    assert!(!config.auto_accept_fallback());
}
