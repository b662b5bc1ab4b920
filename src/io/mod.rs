//! IO modules - external collaborator interfaces
//!
//! This module contains the seams to everything outside the engine:
//! - `recorder` - Camera recorder trait and completion sink
//! - `uploader` - Multipart upload payload and HTTP verification client
//! - `staging` - Copying recordings to stable storage and temp-file cleanup
//! - `sim` - Simulated recorder and uploader for the simulator binary

pub mod recorder;
pub mod sim;
pub mod staging;
pub mod uploader;

// Re-export commonly used types
pub use recorder::{Recorder, RecordingSink};
pub use sim::{SimRecorder, SimUploader};
pub use staging::{delete_file, normalize_file_uri, FileStager};
pub use uploader::{FileRef, HttpUploader, MultipartPayload, Uploader};
