//! Liveness capture simulator
//!
//! Drives one capture session end to end against in-process devices: a
//! simulated recorder, a scripted face detector feed and either a simulated
//! or a real HTTP verification backend.
//!
//! Module structure:
//! - `domain/` - Session aggregate, capture types, events, errors
//! - `io/` - Recorder, uploader and staging seams (plus simulated devices)
//! - `services/` - Controller, health monitor, recording supervisor, submission
//! - `infra/` - Config and metrics
//!
//! Usage:
//!   cargo run -- --config config/dev.toml --scenario stall

use anyhow::Context;
use clap::{Parser, ValueEnum};
use liveness_capture::domain::{
    DetectedFace, FaceObservation, Prompt, ReferenceImage, SessionSnapshot, SessionState,
    SubmissionInputs, UserChoice,
};
use liveness_capture::infra::{Config, Metrics};
use liveness_capture::io::{HttpUploader, SimRecorder, SimUploader, Uploader};
use liveness_capture::services::{create_session, SessionHandle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use time::macros::format_description;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Detector frame cadence (~15 fps)
const FRAME_INTERVAL: Duration = Duration::from_millis(66);

/// Recorded time after which the stall and device-error scenarios disrupt the capture
const DISRUPT_AFTER_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Scenario {
    /// Working detector, face always in frame
    Happy,
    /// Detector never calls back; the blind fallback is accepted
    BrokenDetector,
    /// Face leaves the frame mid-recording; the stall prompt is resumed
    Stall,
    /// No reference image from the earlier step
    MissingReference,
    /// Encoder crashes mid-recording
    DeviceError,
    /// Camera cannot be opened when the recording starts
    CameraBusy,
    /// Camera permission is refused
    PermissionDenied,
}

/// Liveness capture simulator
#[derive(Parser, Debug)]
#[command(name = "liveness-sim", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Scenario to run
    #[arg(short, long, value_enum, default_value_t = Scenario::Happy)]
    scenario: Scenario,

    /// Post the recording to this endpoint instead of the simulated backend
    #[arg(long)]
    upload_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug for per-callback visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Millisecond stamps; detector frames arrive every 66 ms
    let timer = UtcTime::new(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z"
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(timer)
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "liveness-sim starting");

    let args = Args::parse();
    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => Config::resolve_config_path(&std::env::args().collect::<Vec<_>>()),
    };
    let mut config = Config::load_from_path(&config_path);
    if let Some(url) = &args.upload_url {
        config = config.with_upload_url(url.clone());
    }

    info!(
        config_file = %config.config_file(),
        scenario = ?args.scenario,
        target_duration_ms = %config.target_duration_ms(),
        no_face_timeout_ms = %config.no_face_timeout().as_millis(),
        auto_accept_fallback = %config.auto_accept_fallback(),
        staging_dir = %config.staging_dir().display(),
        "config_loaded"
    );

    let work_dir = std::env::temp_dir().join(format!("liveness-sim-{}", uuid::Uuid::now_v7().simple()));
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;

    let outcome = run_scenario(&args, config, &work_dir).await;

    if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
        warn!(path = %work_dir.display(), error = %e, "work_dir_cleanup_failed");
    }

    let snapshot = outcome?;
    info!(
        state = %snapshot.state.as_str(),
        prompt = %snapshot.prompt.as_ref().map(Prompt::as_str).unwrap_or("none"),
        snapshot = %serde_json::to_string(&snapshot)?,
        "liveness-sim finished"
    );
    Ok(())
}

async fn run_scenario(
    args: &Args,
    config: Config,
    work_dir: &Path,
) -> anyhow::Result<SessionSnapshot> {
    let metrics = Arc::new(Metrics::new());
    let recorder = Arc::new(
        SimRecorder::new(work_dir.join("cache"))
            .with_permission(args.scenario != Scenario::PermissionDenied)
            .with_start_failure(args.scenario == Scenario::CameraBusy),
    );

    let uploader: Arc<dyn Uploader> = match &args.upload_url {
        Some(_) => Arc::new(
            HttpUploader::new(
                config.upload_url(),
                config.upload_timeout(),
                config.upload_auth_token().map(str::to_string),
            )
            .context("Failed to build HTTP uploader")?,
        ),
        None => Arc::new(SimUploader::verifying(Duration::from_millis(800))),
    };

    let inputs = scenario_inputs(args.scenario, work_dir).await?;

    // Metrics reporter
    let metrics_interval = config.metrics_interval_secs().max(1);
    let reporter_metrics = metrics.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            reporter_metrics.report().log();
        }
    });

    // Generous upper bound: no-face timeout plus one full capture and upload
    let deadline = config.no_face_timeout()
        + Duration::from_millis(config.target_duration_ms())
        + config.upload_timeout();

    let (handle, controller) =
        create_session(config, recorder.clone(), uploader, metrics.clone(), inputs);
    let controller_task = tokio::spawn(controller.run());

    let face_present = Arc::new(AtomicBool::new(args.scenario != Scenario::BrokenDetector));
    let feeder = (args.scenario != Scenario::BrokenDetector)
        .then(|| tokio::spawn(feed_detector(handle.clone(), face_present.clone())));

    handle.start();
    let result =
        tokio::time::timeout(deadline, drive(&handle, args.scenario, &face_present, &recorder)).await;

    if let Some(feeder) = feeder {
        feeder.abort();
    }
    reporter.abort();
    handle.shutdown();
    controller_task.await.context("Session controller task failed")?;

    let leaked = recorder.active_recordings();
    if leaked > 0 {
        warn!(recordings = %leaked, "sim_recordings_left_running");
    }

    metrics.report().log();

    match result {
        Ok(snapshot) => Ok(snapshot),
        Err(_) => anyhow::bail!("scenario did not finish within {} s", deadline.as_secs()),
    }
}

async fn scenario_inputs(scenario: Scenario, work_dir: &Path) -> anyhow::Result<SubmissionInputs> {
    let reference = if scenario == Scenario::MissingReference {
        None
    } else {
        let path: PathBuf = work_dir.join("reference.jpg");
        tokio::fs::write(&path, b"simulated reference still")
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Some(ReferenceImage::new(path))
    };
    Ok(SubmissionInputs { identifier: Some("sim-farmer-001".to_string()), reference })
}

/// Camera layer stand-in: one callback per frame
async fn feed_detector(handle: SessionHandle, face_present: Arc<AtomicBool>) {
    let face = DetectedFace { left_eye_open: 0.92, right_eye_open: 0.9, yaw_deg: 3.5, pitch_deg: -2.0 };
    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    loop {
        frames.tick().await;
        let observation = if face_present.load(Ordering::Relaxed) {
            FaceObservation::single(face)
        } else {
            FaceObservation::empty()
        };
        handle.face_detected(observation);
    }
}

/// Follow snapshots, answer prompts the way the scenario's user would, and
/// return the terminal snapshot
async fn drive(
    handle: &SessionHandle,
    scenario: Scenario,
    face_present: &AtomicBool,
    recorder: &SimRecorder,
) -> SessionSnapshot {
    let mut snapshots = handle.subscribe();
    let mut last: Option<(SessionState, Option<Prompt>)> = None;
    let mut disrupted = false;

    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        let key = (snapshot.state, snapshot.prompt.clone());
        if last.as_ref() != Some(&key) {
            info!(
                state = %snapshot.state.as_str(),
                prompt = %snapshot.prompt.as_ref().map(Prompt::as_str).unwrap_or("none"),
                detection = %snapshot.detection.as_str(),
                elapsed_ms = %snapshot.elapsed_recorded_ms,
                paused_ms = %snapshot.paused_ms,
                "session_snapshot"
            );
            last = Some(key);
        }

        if snapshot.state == SessionState::Success {
            return snapshot;
        }

        match &snapshot.prompt {
            Some(Prompt::FallbackOffered) => handle.choose(UserChoice::AcceptFallback),
            Some(Prompt::Stalled) => {
                face_present.store(true, Ordering::Relaxed);
                handle.choose(UserChoice::Resume);
            }
            Some(
                Prompt::StartOver { .. }
                | Prompt::RecordingFailed { .. }
                | Prompt::NoFaceTimeout
                | Prompt::SubmissionFailed { .. },
            ) => return snapshot,
            None => {}
        }

        if !disrupted
            && snapshot.state == SessionState::Recording
            && snapshot.elapsed_recorded_ms >= DISRUPT_AFTER_MS
        {
            match scenario {
                Scenario::Stall => {
                    info!("sim_face_leaves_frame");
                    face_present.store(false, Ordering::Relaxed);
                    disrupted = true;
                }
                Scenario::DeviceError => {
                    let failed = recorder.fail_active("simulated encoder crash");
                    info!(recordings = %failed, "sim_encoder_crashed");
                    disrupted = true;
                }
                _ => {}
            }
        }

        if snapshots.changed().await.is_err() {
            return snapshots.borrow().clone();
        }
    }
}
