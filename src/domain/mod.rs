//! Domain models - session aggregate and capture types
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Session` - the single mutable unit of work and its licensing rules
//! - `FaceObservation` - per-callback detector output
//! - `SessionState` / `Prompt` / `UserChoice` - the state machine vocabulary
//! - `ControlEvent` / `FaceEvent` - the controller's inbound queues
//! - error types for device, staging, upload and precondition failures

pub mod error;
pub mod event;
pub mod session;
pub mod types;

// Re-export commonly used types at module level
pub use event::{ControlEvent, FaceEvent};
pub use session::{Session, SessionSnapshot};
pub use types::{
    AttemptId, CompletedRecording, DetectedFace, DetectionHealth, FaceCriteria, FaceObservation,
    Prompt, RecordingHandle, ReferenceImage, SessionState, SubmissionInputs, SubmissionResult,
    UserChoice,
};
