//! Error taxonomy for the capture engine
//!
//! None of these escape the controller. Each one is mapped to a
//! [`Prompt`](crate::domain::types::Prompt) or absorbed by a fallback path.

use thiserror::Error;

/// Camera/recorder failures (retryable)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("camera permission denied")]
    PermissionDenied,

    #[error("failed to start recording: {0}")]
    Start(String),

    #[error("recording failed: {0}")]
    Recording(String),

    #[error("recording ended before target duration ({elapsed_ms} ms recorded)")]
    EndedEarly { elapsed_ms: u64 },
}

/// Copying the recording into the staging directory failed (absorbed)
#[derive(Error, Debug)]
pub enum StageError {
    #[error("staging io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source recording missing: {0}")]
    MissingSource(String),
}

/// Upload transport or server-side failures
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid file reference: {0}")]
    InvalidFileRef(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("verification rejected: {0}")]
    Rejected(String),
}

/// Inputs required for submission are missing (not retryable mid-flow)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("reference image missing")]
    MissingReference,

    #[error("user identifier missing")]
    MissingIdentifier,
}
