//! Inputs consumed by the session controller
//!
//! Two queues feed the controller task. Control events (user commands and
//! completions of long-latency operations) are rare and must never be lost,
//! so they travel on an unbounded channel. Face events arrive at camera frame
//! rate and travel on a bounded channel where overflow is dropped.

use crate::domain::error::DeviceError;
use crate::domain::types::{
    AttemptId, CompletedRecording, FaceObservation, SubmissionInputs, SubmissionResult, UserChoice,
};
use tokio::time::Instant;

#[derive(Debug)]
pub enum ControlEvent {
    /// User starts the capture from the instruction screen
    Start,
    /// User cancels from any state
    Cancel,
    /// Answer to the current prompt
    Choose(UserChoice),
    /// Replace identifier/reference image
    SetInputs(SubmissionInputs),
    /// Device delivered the result of a recording
    RecordingFinished { attempt: AttemptId, result: Result<CompletedRecording, DeviceError> },
    /// Submission task finished
    SubmissionFinished { attempt: AttemptId, result: SubmissionResult, latency_ms: u64 },
    /// Embedding view is going away
    Shutdown,
}

impl ControlEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlEvent::Start => "start",
            ControlEvent::Cancel => "cancel",
            ControlEvent::Choose(_) => "choose",
            ControlEvent::SetInputs(_) => "set_inputs",
            ControlEvent::RecordingFinished { .. } => "recording_finished",
            ControlEvent::SubmissionFinished { .. } => "submission_finished",
            ControlEvent::Shutdown => "shutdown",
        }
    }
}

/// One detector callback
#[derive(Debug, Clone)]
pub struct FaceEvent {
    pub observation: FaceObservation,
    pub received_at: Instant,
}
