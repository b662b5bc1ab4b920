//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Every section and key is optional; missing values take the defaults
//! observed on the production flow.

use crate::domain::types::FaceCriteria;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Unpaused recording time required before stopping
    #[serde(default = "default_target_duration_ms")]
    pub target_duration_ms: u64,
    /// Give up if no valid face is seen while preparing
    #[serde(default = "default_no_face_timeout_ms")]
    pub no_face_timeout_ms: u64,
    /// Progress tick resolution
    #[serde(default = "default_progress_tick_ms")]
    pub progress_tick_ms: u64,
    /// Start blind capture without asking when the detector is broken
    #[serde(default)]
    pub auto_accept_fallback: bool,
}

fn default_target_duration_ms() -> u64 {
    10_000
}

fn default_no_face_timeout_ms() -> u64 {
    120_000
}

fn default_progress_tick_ms() -> u64 {
    100
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_duration_ms: default_target_duration_ms(),
            no_face_timeout_ms: default_no_face_timeout_ms(),
            progress_tick_ms: default_progress_tick_ms(),
            auto_accept_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_health_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_health_max_checks")]
    pub max_checks: u32,
    /// Cumulative callbacks needed to call the detector working
    #[serde(default = "default_health_working_threshold")]
    pub working_threshold: u64,
}

fn default_health_poll_interval_ms() -> u64 {
    500
}

fn default_health_max_checks() -> u32 {
    10
}

fn default_health_working_threshold() -> u64 {
    3
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_health_poll_interval_ms(),
            max_checks: default_health_max_checks(),
            working_threshold: default_health_working_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StallConfig {
    #[serde(default = "default_stall_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,
    #[serde(default = "default_stall_threshold_ms")]
    pub threshold_ms: u64,
}

fn default_stall_watchdog_interval_ms() -> u64 {
    1000
}

fn default_stall_threshold_ms() -> u64 {
    3000
}

impl Default for StallConfig {
    fn default() -> Self {
        Self {
            watchdog_interval_ms: default_stall_watchdog_interval_ms(),
            threshold_ms: default_stall_threshold_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaceConfig {
    #[serde(default = "default_min_eye_open")]
    pub min_eye_open: f32,
    #[serde(default = "default_max_angle_deg")]
    pub max_yaw_deg: f32,
    #[serde(default = "default_max_angle_deg")]
    pub max_pitch_deg: f32,
}

fn default_min_eye_open() -> f32 {
    0.7
}

fn default_max_angle_deg() -> f32 {
    15.0
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            min_eye_open: default_min_eye_open(),
            max_yaw_deg: default_max_angle_deg(),
            max_pitch_deg: default_max_angle_deg(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_upload_url")]
    pub url: String,
    #[serde(default = "default_upload_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_upload_url() -> String {
    "http://localhost:8080/ekyc/liveness".to_string()
}

fn default_upload_timeout_ms() -> u64 {
    30_000
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self { url: default_upload_url(), timeout_ms: default_upload_timeout_ms(), auth_token: None }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// App-private directory, distinct from the recorder's cache
    #[serde(default = "default_staging_dir")]
    pub dir: String,
}

fn default_staging_dir() -> String {
    "staging".to_string()
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self { dir: default_staging_dir() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub stall: StallConfig,
    #[serde(default)]
    pub face: FaceConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub staging: StagingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the engine
#[derive(Debug, Clone)]
pub struct Config {
    target_duration_ms: u64,
    no_face_timeout_ms: u64,
    progress_tick_ms: u64,
    auto_accept_fallback: bool,
    health_poll_interval_ms: u64,
    health_max_checks: u32,
    health_working_threshold: u64,
    stall_watchdog_interval_ms: u64,
    stall_threshold_ms: u64,
    face_criteria: FaceCriteria,
    upload_url: String,
    upload_timeout_ms: u64,
    upload_auth_token: Option<String>,
    staging_dir: String,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            target_duration_ms: toml_config.capture.target_duration_ms,
            no_face_timeout_ms: toml_config.capture.no_face_timeout_ms,
            // A zero tick would spin the progress loop
            progress_tick_ms: toml_config.capture.progress_tick_ms.max(1),
            auto_accept_fallback: toml_config.capture.auto_accept_fallback,
            health_poll_interval_ms: toml_config.health.poll_interval_ms.max(1),
            health_max_checks: toml_config.health.max_checks,
            health_working_threshold: toml_config.health.working_threshold,
            stall_watchdog_interval_ms: toml_config.stall.watchdog_interval_ms.max(1),
            stall_threshold_ms: toml_config.stall.threshold_ms,
            face_criteria: FaceCriteria {
                min_eye_open: toml_config.face.min_eye_open,
                max_yaw_deg: toml_config.face.max_yaw_deg,
                max_pitch_deg: toml_config.face.max_pitch_deg,
            },
            upload_url: toml_config.upload.url,
            upload_timeout_ms: toml_config.upload.timeout_ms,
            upload_auth_token: toml_config.upload.auth_token,
            staging_dir: toml_config.staging.dir,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load(args: &[String]) -> Self {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    /// Load from an explicit path, falling back to defaults on any error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn target_duration_ms(&self) -> u64 {
        self.target_duration_ms
    }

    pub fn no_face_timeout(&self) -> Duration {
        Duration::from_millis(self.no_face_timeout_ms)
    }

    pub fn progress_tick_ms(&self) -> u64 {
        self.progress_tick_ms
    }

    pub fn auto_accept_fallback(&self) -> bool {
        self.auto_accept_fallback
    }

    pub fn health_poll_interval(&self) -> Duration {
        Duration::from_millis(self.health_poll_interval_ms)
    }

    pub fn health_max_checks(&self) -> u32 {
        self.health_max_checks
    }

    pub fn health_working_threshold(&self) -> u64 {
        self.health_working_threshold
    }

    pub fn stall_watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.stall_watchdog_interval_ms)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_millis(self.stall_threshold_ms)
    }

    pub fn face_criteria(&self) -> &FaceCriteria {
        &self.face_criteria
    }

    pub fn upload_url(&self) -> &str {
        &self.upload_url
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }

    pub fn upload_auth_token(&self) -> Option<&str> {
        self.upload_auth_token.as_deref()
    }

    pub fn staging_dir(&self) -> PathBuf {
        PathBuf::from(&self.staging_dir)
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder for callers that pick the staging directory at runtime
    pub fn with_staging_dir(mut self, dir: impl Into<String>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    /// Builder for callers that override the upload endpoint
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }

    /// Builder method for tests to toggle blind-capture auto acceptance
    #[cfg(test)]
    pub fn with_auto_accept_fallback(mut self, enabled: bool) -> Self {
        self.auto_accept_fallback = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.target_duration_ms(), 10_000);
        assert_eq!(config.no_face_timeout(), Duration::from_secs(120));
        assert_eq!(config.progress_tick_ms(), 100);
        assert_eq!(config.health_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.health_max_checks(), 10);
        assert_eq!(config.health_working_threshold(), 3);
        assert_eq!(config.stall_watchdog_interval(), Duration::from_secs(1));
        assert_eq!(config.stall_threshold(), Duration::from_secs(3));
        assert_eq!(config.face_criteria(), &FaceCriteria::default());
        assert!(!config.auto_accept_fallback());
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[capture]
target_duration_ms = 5000

[stall]
threshold_ms = 4500
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.target_duration_ms(), 5000);
        assert_eq!(config.no_face_timeout(), Duration::from_secs(120));
        assert_eq!(config.stall_threshold(), Duration::from_millis(4500));
        assert_eq!(config.stall_watchdog_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_zero_intervals_are_clamped() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[capture]
progress_tick_ms = 0

[health]
poll_interval_ms = 0
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());
        assert_eq!(config.progress_tick_ms(), 1);
        assert_eq!(config.health_poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "liveness-sim".to_string(),
            "--config".to_string(),
            "config/device.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/device.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["liveness-sim".to_string(), "--config=config/slow.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/slow.toml");
    }

    #[test]
    fn test_builders() {
        let config = Config::default()
            .with_staging_dir("/tmp/stage")
            .with_upload_url("http://verify.local/upload");
        assert_eq!(config.staging_dir(), PathBuf::from("/tmp/stage"));
        assert_eq!(config.upload_url(), "http://verify.local/upload");
    }
}
