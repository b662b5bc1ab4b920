//! Camera recorder seam
//!
//! The device layer owns the actual capture. The controller only asks it to
//! start and stop; the finished recording (or an error) comes back through a
//! [`RecordingSink`] handed over at start.

use crate::domain::error::DeviceError;
use crate::domain::event::ControlEvent;
use crate::domain::types::{AttemptId, CompletedRecording, RecordingHandle};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

/// Completion channel for one device recording
///
/// `finish` consumes the sink, so a recording can report at most once.
#[derive(Debug)]
pub struct RecordingSink {
    attempt: AttemptId,
    tx: mpsc::UnboundedSender<ControlEvent>,
}

impl RecordingSink {
    pub fn new(attempt: AttemptId, tx: mpsc::UnboundedSender<ControlEvent>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Deliver the recording result to the controller
    pub fn finish(self, result: Result<CompletedRecording, DeviceError>) {
        let attempt = self.attempt;
        if self.tx.send(ControlEvent::RecordingFinished { attempt, result }).is_err() {
            debug!(attempt = %attempt, "recording_finished_after_controller_exit");
        }
    }
}

/// Camera/recorder device
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Camera permission check, run when a capture starts
    async fn ensure_permission(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Start a continuous recording. The sink must eventually receive exactly
    /// one result: the completed file after `stop`, or an error.
    async fn start(&self, sink: RecordingSink) -> Result<RecordingHandle, DeviceError>;

    /// Request the device to stop. Must return promptly; the result is
    /// delivered through the sink, not here. Unknown handles are a no-op.
    async fn stop(&self, handle: RecordingHandle);
}
