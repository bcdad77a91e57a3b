//! File-backed capture source.
//!
//! Picks up the still image a camera helper (or a test) has written to a
//! fixed path. A missing file is treated as the user dismissing the camera.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::{CaptureOutcome, CaptureSource, CapturedImage, PermissionStatus};
use crate::error::CaptureError;

pub struct FileCaptureSource {
    path: PathBuf,
    permission: RwLock<PermissionStatus>,
    grant_on_request: bool,
}

impl FileCaptureSource {
    /// Permission starts undetermined and is granted when requested.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            permission: RwLock::new(PermissionStatus::NotDetermined),
            grant_on_request: true,
        }
    }

    /// Start from an explicit permission status.
    pub fn with_permission(mut self, status: PermissionStatus) -> Self {
        self.permission = RwLock::new(status);
        self
    }

    /// Make permission prompts answer "deny".
    pub fn deny_requests(mut self) -> Self {
        self.grant_on_request = false;
        self
    }

    /// Change the permission out-of-band, as the system settings app would.
    pub async fn set_permission(&self, status: PermissionStatus) {
        *self.permission.write().await = status;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaptureSource for FileCaptureSource {
    async fn check_permission(&self) -> PermissionStatus {
        *self.permission.read().await
    }

    async fn request_permission(&self) -> PermissionStatus {
        let mut permission = self.permission.write().await;
        if *permission == PermissionStatus::NotDetermined {
            *permission = if self.grant_on_request {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            };
            info!(status = ?*permission, "Capture permission answered");
        }
        *permission
    }

    async fn capture(&self) -> Result<CaptureOutcome, CaptureError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No image at capture path, treating as dismissed");
                return Ok(CaptureOutcome::Cancelled);
            }
            Err(e) => return Err(CaptureError::Io(e)),
        };

        if bytes.is_empty() {
            return Err(CaptureError::DeviceUnavailable(format!(
                "{} is empty",
                self.path.display()
            )));
        }

        let image = CapturedImage::new(bytes, mime_for(&self.path))
            .with_reference(self.path.display().to_string());
        debug!(image_id = %image.id, len = image.bytes.len(), "Image captured from file");
        Ok(CaptureOutcome::Captured(image))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("heic") => "image/heic",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}
