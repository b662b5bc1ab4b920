//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `controller` - Session state machine actor and its handle
//! - `health_monitor` - Detects whether the face detector is delivering callbacks
//! - `recording_supervisor` - Progress accounting, pause/resume and stall checks
//! - `submission` - Staging, multipart upload and cleanup

pub mod controller;
pub mod health_monitor;
pub mod recording_supervisor;
pub mod submission;

// Re-export commonly used types
pub use controller::{create_session, SessionController, SessionHandle};
pub use health_monitor::{DetectionHealthMonitor, HealthVerdict};
pub use recording_supervisor::RecordingSupervisor;
pub use submission::{check_preconditions, SubmissionPipeline};
