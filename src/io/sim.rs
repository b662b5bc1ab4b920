//! In-process simulated devices for the simulator binary
//!
//! `SimRecorder` writes a placeholder file into a cache directory when a
//! recording is stopped. `SimUploader` answers after a fixed latency with a
//! scripted verdict.

use crate::domain::error::{DeviceError, UploadError};
use crate::domain::types::{CompletedRecording, RecordingHandle};
use crate::io::recorder::{Recorder, RecordingSink};
use crate::io::uploader::{MultipartPayload, Uploader};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

struct ActiveRecording {
    sink: RecordingSink,
    started_at: Instant,
}

pub struct SimRecorder {
    cache_dir: PathBuf,
    next_handle: Mutex<u64>,
    active: Mutex<HashMap<RecordingHandle, ActiveRecording>>,
    permission_granted: bool,
    fail_start: bool,
}

impl SimRecorder {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            next_handle: Mutex::new(0),
            active: Mutex::new(HashMap::new()),
            permission_granted: true,
            fail_start: false,
        }
    }

    pub fn with_permission(mut self, granted: bool) -> Self {
        self.permission_granted = granted;
        self
    }

    pub fn with_start_failure(mut self, fail: bool) -> Self {
        self.fail_start = fail;
        self
    }

    pub fn active_recordings(&self) -> usize {
        self.active.lock().len()
    }

    /// Simulate a hardware/codec failure on every running recording.
    /// Returns how many recordings were failed.
    pub fn fail_active(&self, reason: &str) -> usize {
        let failed: Vec<_> = self.active.lock().drain().collect();
        let count = failed.len();
        for (handle, active) in failed {
            info!(handle = %handle, reason = %reason, "sim_recording_failed");
            active.sink.finish(Err(DeviceError::Recording(reason.to_string())));
        }
        count
    }
}

#[async_trait]
impl Recorder for SimRecorder {
    async fn ensure_permission(&self) -> Result<(), DeviceError> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(DeviceError::PermissionDenied)
        }
    }

    async fn start(&self, sink: RecordingSink) -> Result<RecordingHandle, DeviceError> {
        if self.fail_start {
            return Err(DeviceError::Start("simulated camera busy".to_string()));
        }
        let handle = {
            let mut next = self.next_handle.lock();
            *next += 1;
            RecordingHandle(*next)
        };
        debug!(handle = %handle, attempt = %sink.attempt(), "sim_recording_started");
        self.active.lock().insert(handle, ActiveRecording { sink, started_at: Instant::now() });
        Ok(handle)
    }

    async fn stop(&self, handle: RecordingHandle) {
        let Some(active) = self.active.lock().remove(&handle) else {
            debug!(handle = %handle, "sim_stop_unknown_handle");
            return;
        };
        let duration_ms = active.started_at.elapsed().as_millis() as u64;
        let path = self.cache_dir.join(format!("sim-recording-{handle}.mp4"));

        let result = std::fs::create_dir_all(&self.cache_dir)
            .and_then(|_| std::fs::write(&path, b"simulated mp4 payload"))
            .map(|_| CompletedRecording::new(&path, Some(duration_ms)))
            .map_err(|e| DeviceError::Recording(e.to_string()));

        info!(handle = %handle, duration_ms = %duration_ms, "sim_recording_stopped");
        active.sink.finish(result);
    }
}

/// Scripted verification backend
pub struct SimUploader {
    latency: Duration,
    verdict: Result<(), String>,
    uploads: Mutex<Vec<MultipartPayload>>,
}

impl SimUploader {
    pub fn verifying(latency: Duration) -> Self {
        Self { latency, verdict: Ok(()), uploads: Mutex::new(Vec::new()) }
    }

    pub fn rejecting(latency: Duration, reason: &str) -> Self {
        Self { latency, verdict: Err(reason.to_string()), uploads: Mutex::new(Vec::new()) }
    }

    pub fn uploads(&self) -> Vec<MultipartPayload> {
        self.uploads.lock().clone()
    }
}

#[async_trait]
impl Uploader for SimUploader {
    async fn upload(&self, payload: MultipartPayload) -> Result<(), UploadError> {
        self.uploads.lock().push(payload);
        tokio::time::sleep(self.latency).await;
        self.verdict.clone().map_err(UploadError::Rejected)
    }
}
