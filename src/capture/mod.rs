//! Capture source — produces one still image on demand.

pub mod file;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CaptureError;

pub use file::FileCaptureSource;

/// Camera permission as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionStatus {
    Granted,
    NotDetermined,
    Denied,
}

/// A captured still image.
#[derive(Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub id: Uuid,
    pub bytes: Vec<u8>,
    /// MIME type, e.g. `image/jpeg`.
    pub mime_type: String,
    /// Where the source keeps the image, if it keeps it anywhere.
    pub reference: Option<String>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bytes,
            mime_type: mime_type.into(),
            reference: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

// Image bytes stay out of logs.
impl std::fmt::Debug for CapturedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturedImage")
            .field("id", &self.id)
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .field("reference", &self.reference)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}

/// Result of presenting the capture surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    Captured(CapturedImage),
    /// The user dismissed the camera.
    Cancelled,
}

/// Platform camera abstraction.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    /// Current permission status, without prompting.
    async fn check_permission(&self) -> PermissionStatus;

    /// Prompt the user. Resolves once they answer.
    async fn request_permission(&self) -> PermissionStatus;

    /// Present the capture surface and wait for one image or a dismissal.
    async fn capture(&self) -> Result<CaptureOutcome, CaptureError>;
}
