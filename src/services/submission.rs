//! Submission pipeline
//!
//! Stages the completed recording, builds the three-part multipart payload,
//! invokes the upload service and removes the staged copy whatever the
//! outcome. Only the upload itself can fail the submission; staging problems
//! fall back to the original recording path.

use crate::domain::error::PreconditionError;
use crate::domain::types::{
    AttemptId, CompletedRecording, ReferenceImage, SubmissionInputs, SubmissionResult,
};
use crate::infra::metrics::Metrics;
use crate::io::staging::{delete_file, normalize_file_uri, FileStager};
use crate::io::uploader::{FileRef, MultipartPayload, Uploader, IMAGE_MIME, VIDEO_MIME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Inputs that survived the precondition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInputs {
    pub identifier: String,
    pub reference: ReferenceImage,
}

/// Everything besides the recording must be present before any I/O
pub fn check_preconditions(inputs: &SubmissionInputs) -> Result<ReadyInputs, PreconditionError> {
    let reference = inputs.reference.clone().ok_or(PreconditionError::MissingReference)?;
    let identifier = inputs
        .identifier
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(PreconditionError::MissingIdentifier)?
        .to_string();
    Ok(ReadyInputs { identifier, reference })
}

#[derive(Clone)]
pub struct SubmissionPipeline {
    stager: FileStager,
    uploader: Arc<dyn Uploader>,
    metrics: Arc<Metrics>,
}

impl SubmissionPipeline {
    pub fn new(stager: FileStager, uploader: Arc<dyn Uploader>, metrics: Arc<Metrics>) -> Self {
        Self { stager, uploader, metrics }
    }

    pub fn staged_path(&self, session_tag: &str, attempt: AttemptId) -> PathBuf {
        self.stager.staged_path(session_tag, attempt)
    }

    /// Remove a staged copy left behind by an aborted submission
    pub async fn discard_staged(&self, staged_path: &Path) {
        delete_file(staged_path).await;
    }

    /// Run one submission. Never panics or returns an error: every failure is
    /// folded into the [`SubmissionResult`].
    pub async fn submit(
        &self,
        recording: CompletedRecording,
        inputs: ReadyInputs,
        staged_path: PathBuf,
    ) -> SubmissionResult {
        let (upload_path, staged) = self.stager.stage_or_original(&recording.path, &staged_path).await;
        if !staged {
            self.metrics.record_staging_fallback();
        }

        let result = self.upload(&inputs, &upload_path, &inputs.reference.path).await;

        // Staged copy is removed on success and failure alike
        if staged {
            delete_file(&upload_path).await;
        }
        result
    }

    async fn upload(
        &self,
        inputs: &ReadyInputs,
        recording_path: &Path,
        reference_path: &Path,
    ) -> SubmissionResult {
        let recording = match normalize_file_uri(recording_path) {
            Ok(uri) => FileRef::new(uri, VIDEO_MIME),
            Err(e) => return SubmissionResult::Failed { reason: e.to_string() },
        };
        let reference = match normalize_file_uri(reference_path) {
            Ok(uri) => FileRef::new(uri, IMAGE_MIME),
            Err(e) => return SubmissionResult::Failed { reason: e.to_string() },
        };

        let payload = MultipartPayload::new(inputs.identifier.clone(), recording, reference);
        match self.uploader.upload(payload).await {
            Ok(()) => {
                info!(identifier = %inputs.identifier, "submission_verified");
                SubmissionResult::Verified
            }
            Err(e) => {
                warn!(identifier = %inputs.identifier, error = %e, "submission_failed");
                SubmissionResult::Failed { reason: e.to_string() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::UploadError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    /// Captures payloads and checks the staged file exists at upload time
    struct RecordingUploader {
        fail: bool,
        seen: Mutex<Vec<(MultipartPayload, bool)>>,
    }

    impl RecordingUploader {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self { fail, seen: Mutex::new(Vec::new()) })
        }
    }

    #[async_trait]
    impl Uploader for RecordingUploader {
        async fn upload(&self, payload: MultipartPayload) -> Result<(), UploadError> {
            let exists = payload.recording.to_path().map(|p| p.exists()).unwrap_or(false);
            self.seen.lock().push((payload, exists));
            if self.fail {
                Err(UploadError::Status { status: 500, body: "boom".to_string() })
            } else {
                Ok(())
            }
        }
    }

    fn inputs(reference: &str) -> ReadyInputs {
        ReadyInputs { identifier: "user-7".to_string(), reference: ReferenceImage::new(reference) }
    }

    #[test]
    fn test_preconditions() {
        let missing_ref = SubmissionInputs { identifier: Some("u".into()), reference: None };
        assert_eq!(check_preconditions(&missing_ref), Err(PreconditionError::MissingReference));

        let blank_id = SubmissionInputs {
            identifier: Some("  ".into()),
            reference: Some(ReferenceImage::new("/ref.jpg")),
        };
        assert_eq!(check_preconditions(&blank_id), Err(PreconditionError::MissingIdentifier));

        let ok = SubmissionInputs {
            identifier: Some(" user-1 ".into()),
            reference: Some(ReferenceImage::new("/ref.jpg")),
        };
        let ready = check_preconditions(&ok).unwrap();
        assert_eq!(ready.identifier, "user-1");
    }

    #[tokio::test]
    async fn test_submit_stages_and_cleans_up() {
        let cache = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let source = cache.path().join("rec.mp4");
        std::fs::write(&source, b"video").unwrap();

        let uploader = RecordingUploader::new(false);
        let metrics = Arc::new(Metrics::new());
        let pipeline =
            SubmissionPipeline::new(FileStager::new(staging.path()), uploader.clone(), metrics.clone());
        let staged_path = pipeline.staged_path("t", AttemptId(1));

        let result = pipeline
            .submit(CompletedRecording::new(&source, None), inputs("/files/ref.jpg"), staged_path.clone())
            .await;

        assert_eq!(result, SubmissionResult::Verified);
        let seen = uploader.seen.lock();
        assert_eq!(seen.len(), 1);
        let (payload, existed) = &seen[0];
        assert!(*existed);
        assert_eq!(payload.recording.to_path().unwrap(), staged_path);
        assert_eq!(payload.reference.uri.as_str(), "file:///files/ref.jpg");
        assert!(!staged_path.exists());
        assert_eq!(metrics.staging_fallbacks(), 0);
    }

    #[tokio::test]
    async fn test_submit_failure_still_cleans_up() {
        let cache = tempdir().unwrap();
        let staging = tempdir().unwrap();
        let source = cache.path().join("rec.mp4");
        std::fs::write(&source, b"video").unwrap();

        let pipeline = SubmissionPipeline::new(
            FileStager::new(staging.path()),
            RecordingUploader::new(true),
            Arc::new(Metrics::new()),
        );
        let staged_path = pipeline.staged_path("t", AttemptId(2));

        let result = pipeline
            .submit(CompletedRecording::new(&source, None), inputs("/ref.jpg"), staged_path.clone())
            .await;

        match result {
            SubmissionResult::Failed { reason } => assert!(reason.contains("500")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(!staged_path.exists());
    }

    #[tokio::test]
    async fn test_staging_failure_uses_original_path() {
        let staging = tempdir().unwrap();
        let uploader = RecordingUploader::new(false);
        let metrics = Arc::new(Metrics::new());
        let pipeline =
            SubmissionPipeline::new(FileStager::new(staging.path()), uploader.clone(), metrics.clone());
        let original = PathBuf::from("/volatile/cache/rec.mp4");

        let result = pipeline
            .submit(
                CompletedRecording::new(&original, None),
                inputs("/ref.jpg"),
                pipeline.staged_path("t", AttemptId(3)),
            )
            .await;

        assert_eq!(result, SubmissionResult::Verified);
        assert_eq!(uploader.seen.lock()[0].0.recording.to_path().unwrap(), original);
        assert_eq!(metrics.staging_fallbacks(), 1);
    }
}
