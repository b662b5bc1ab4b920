//! Liveness capture engine
//!
//! Orchestrates a face-verification recording: detector health checks,
//! paused-time-aware timed capture, stall handling and submission.
//! Exposes modules for integration testing and binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
