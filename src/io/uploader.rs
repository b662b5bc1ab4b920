//! Liveness upload over multipart HTTP
//!
//! The payload always has exactly three parts: the user identifier, the
//! recording (`video/mp4`) and the reference still (`image/jpeg`).

use crate::domain::error::UploadError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use url::Url;

pub const IDENTIFIER_PART: &str = "identifier";
pub const VIDEO_PART: &str = "video";
pub const REFERENCE_PART: &str = "reference_image";

pub const VIDEO_MIME: &str = "video/mp4";
pub const IMAGE_MIME: &str = "image/jpeg";

/// A local file to attach, addressed by `file://` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub uri: Url,
    pub mime: &'static str,
}

impl FileRef {
    pub fn new(uri: Url, mime: &'static str) -> Self {
        Self { uri, mime }
    }

    pub fn to_path(&self) -> Result<PathBuf, UploadError> {
        self.uri.to_file_path().map_err(|_| UploadError::InvalidFileRef(self.uri.to_string()))
    }

    /// Last path segment, used as the multipart filename
    pub fn file_name(&self) -> String {
        self.uri
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "upload".to_string())
    }

    async fn to_part(&self) -> Result<Part, UploadError> {
        let path = self.to_path()?;
        let bytes = tokio::fs::read(&path).await.map_err(|source| UploadError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Part::bytes(bytes).file_name(self.file_name()).mime_str(self.mime)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPayload {
    pub identifier: String,
    pub recording: FileRef,
    pub reference: FileRef,
}

impl MultipartPayload {
    pub fn new(identifier: String, recording: FileRef, reference: FileRef) -> Self {
        Self { identifier, recording, reference }
    }

    /// (part name, content type) in wire order
    pub fn parts(&self) -> [(&'static str, &'static str); 3] {
        [
            (IDENTIFIER_PART, "text/plain"),
            (VIDEO_PART, self.recording.mime),
            (REFERENCE_PART, self.reference.mime),
        ]
    }

    pub async fn into_form(self) -> Result<Form, UploadError> {
        let video = self.recording.to_part().await?;
        let image = self.reference.to_part().await?;
        Ok(Form::new()
            .text(IDENTIFIER_PART, self.identifier)
            .part(VIDEO_PART, video)
            .part(REFERENCE_PART, image))
    }
}

/// Verification backend
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Ok means the server verified the liveness recording
    async fn upload(&self, payload: MultipartPayload) -> Result<(), UploadError>;
}

/// Server verdict body
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub verified: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadResponse {
    pub fn into_result(self) -> Result<(), UploadError> {
        if self.verified {
            Ok(())
        } else {
            Err(UploadError::Rejected(
                self.message.unwrap_or_else(|| "liveness not verified".to_string()),
            ))
        }
    }
}

pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpUploader {
    pub fn new(url: &str, timeout: Duration, auth_token: Option<String>) -> Result<Self, UploadError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url: url.to_string(), auth_token })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, payload: MultipartPayload) -> Result<(), UploadError> {
        let start = Instant::now();
        let identifier = payload.identifier.clone();
        let form = payload.into_form().await?;

        let mut request = self.client.post(&self.url).multipart(form);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                error!(
                    identifier = %identifier,
                    latency_ms = %start.elapsed().as_millis(),
                    error = %e,
                    "upload_request_error"
                );
                return Err(e.into());
            }
        };

        let status = response.status();
        info!(
            identifier = %identifier,
            status = %status.as_u16(),
            latency_ms = %start.elapsed().as_millis(),
            "upload_response"
        );

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Status { status: status.as_u16(), body });
        }

        response.json::<UploadResponse>().await?.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn file_ref(path: &str, mime: &'static str) -> FileRef {
        FileRef::new(Url::parse(path).unwrap(), mime)
    }

    #[test]
    fn test_payload_has_three_parts() {
        let payload = MultipartPayload::new(
            "user-42".to_string(),
            file_ref("file:///staging/liveness-a-1.mp4", VIDEO_MIME),
            file_ref("file:///files/ref.jpg", IMAGE_MIME),
        );
        assert_eq!(
            payload.parts(),
            [
                ("identifier", "text/plain"),
                ("video", "video/mp4"),
                ("reference_image", "image/jpeg"),
            ]
        );
    }

    #[test]
    fn test_file_name_from_uri() {
        assert_eq!(file_ref("file:///staging/rec.mp4", VIDEO_MIME).file_name(), "rec.mp4");
        assert_eq!(file_ref("file:///", VIDEO_MIME).file_name(), "upload");
    }

    #[test]
    fn test_upload_response_verdict() {
        let ok: UploadResponse = serde_json::from_str(r#"{"verified": true}"#).unwrap();
        assert!(ok.into_result().is_ok());

        let rejected: UploadResponse =
            serde_json::from_str(r#"{"verified": false, "message": "face mismatch"}"#).unwrap();
        match rejected.into_result() {
            Err(UploadError::Rejected(reason)) => assert_eq!(reason, "face mismatch"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_into_form_reads_files() {
        let dir = tempdir().unwrap();
        let video = dir.path().join("rec.mp4");
        let image = dir.path().join("ref.jpg");
        std::fs::write(&video, b"video").unwrap();
        std::fs::write(&image, b"image").unwrap();

        let payload = MultipartPayload::new(
            "user-1".to_string(),
            FileRef::new(Url::from_file_path(&video).unwrap(), VIDEO_MIME),
            FileRef::new(Url::from_file_path(&image).unwrap(), IMAGE_MIME),
        );
        let form = payload.into_form().await.unwrap();
        assert!(!form.boundary().is_empty());
    }

    #[tokio::test]
    async fn test_into_form_missing_file() {
        let payload = MultipartPayload::new(
            "user-1".to_string(),
            file_ref("file:///nope/rec.mp4", VIDEO_MIME),
            file_ref("file:///nope/ref.jpg", IMAGE_MIME),
        );
        assert!(matches!(payload.into_form().await, Err(UploadError::ReadFile { .. })));
    }
}
