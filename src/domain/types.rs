//! Shared types for the liveness capture engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::path::PathBuf;

/// Newtype wrapper for recording attempt IDs
///
/// Incremented every time the controller starts a device recording or a
/// submission. Completions carrying an older ID are stale.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[repr(transparent)]
pub struct AttemptId(pub u64);

impl std::fmt::Display for AttemptId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to an in-progress device recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct RecordingHandle(pub u64);

impl std::fmt::Display for RecordingHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thresholds that decide whether a detected face is usable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCriteria {
    pub min_eye_open: f32,
    pub max_yaw_deg: f32,
    pub max_pitch_deg: f32,
}

impl Default for FaceCriteria {
    fn default() -> Self {
        Self { min_eye_open: 0.7, max_yaw_deg: 15.0, max_pitch_deg: 15.0 }
    }
}

/// A single detected face, as reported by the detector for one frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    /// Left eye openness probability (0-1)
    pub left_eye_open: f32,
    /// Right eye openness probability (0-1)
    pub right_eye_open: f32,
    /// Head yaw in degrees
    pub yaw_deg: f32,
    /// Head pitch in degrees
    pub pitch_deg: f32,
}

/// Per-callback detector output: zero or one faces for the current frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaceObservation {
    pub faces: SmallVec<[DetectedFace; 1]>,
}

impl FaceObservation {
    /// Observation with no face in frame
    pub fn empty() -> Self {
        Self { faces: SmallVec::new() }
    }

    /// Observation with exactly one face
    pub fn single(face: DetectedFace) -> Self {
        let mut faces = SmallVec::new();
        faces.push(face);
        Self { faces }
    }

    /// Exactly one face, both eyes open, head roughly frontal
    pub fn is_valid_face(&self, criteria: &FaceCriteria) -> bool {
        if self.faces.len() != 1 {
            return false;
        }
        let face = &self.faces[0];
        face.left_eye_open > criteria.min_eye_open
            && face.right_eye_open > criteria.min_eye_open
            && face.yaw_deg.abs() < criteria.max_yaw_deg
            && face.pitch_deg.abs() < criteria.max_pitch_deg
    }
}

/// Whether the face detector is delivering callbacks on this device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionHealth {
    #[default]
    Unknown,
    Working,
    Broken,
}

impl DetectionHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionHealth::Unknown => "unknown",
            DetectionHealth::Working => "working",
            DetectionHealth::Broken => "broken",
        }
    }
}

/// Top-level session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Idle, showing guidance
    #[default]
    Instruction,
    /// Camera live, waiting for the first valid face or the blind fallback
    Preparing,
    /// Timed capture in progress
    Recording,
    /// Stall prompt shown, device recording already released
    Stalled,
    /// Submission in flight
    Processing,
    /// Terminal success
    Success,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Instruction => "instruction",
            SessionState::Preparing => "preparing",
            SessionState::Recording => "recording",
            SessionState::Stalled => "stalled",
            SessionState::Processing => "processing",
            SessionState::Success => "success",
        }
    }
}

/// Choice the user is currently being asked to make
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    /// Detector never came up; offer blind fixed-duration capture
    FallbackOffered,
    /// Face absent too long while paused
    Stalled,
    /// Device recording failed
    RecordingFailed { reason: String },
    /// No valid face within the global timeout
    NoFaceTimeout,
    /// Upload failed or was rejected
    SubmissionFailed { reason: String },
    /// Required inputs missing, the whole eKYC flow must restart
    StartOver { reason: String },
}

impl Prompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            Prompt::FallbackOffered => "fallback_offered",
            Prompt::Stalled => "stalled",
            Prompt::RecordingFailed { .. } => "recording_failed",
            Prompt::NoFaceTimeout => "no_face_timeout",
            Prompt::SubmissionFailed { .. } => "submission_failed",
            Prompt::StartOver { .. } => "start_over",
        }
    }
}

/// Answer to a [`Prompt`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserChoice {
    /// Proceed with blind capture
    AcceptFallback,
    /// Continue the stalled attempt with a fresh recording
    Resume,
    /// Discard the stalled attempt
    Restart,
    /// Start the capture over from Preparing
    Retry,
}

/// Recording produced by the device after a stop
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedRecording {
    pub path: PathBuf,
    pub duration_hint_ms: Option<u64>,
    pub finished_at: DateTime<Utc>,
}

impl CompletedRecording {
    pub fn new(path: impl Into<PathBuf>, duration_hint_ms: Option<u64>) -> Self {
        Self { path: path.into(), duration_hint_ms, finished_at: Utc::now() }
    }
}

/// Still image captured by the earlier document step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub path: PathBuf,
}

impl ReferenceImage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Inputs the submission pipeline needs besides the recording
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionInputs {
    pub identifier: Option<String>,
    pub reference: Option<ReferenceImage>,
}

/// Outcome of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Verified,
    Failed { reason: String },
}

impl SubmissionResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionResult::Verified => "verified",
            SubmissionResult::Failed { .. } => "failed",
        }
    }
}
