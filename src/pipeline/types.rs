//! Pipeline state and the views of it handed to the UI.

use serde::Serialize;
use uuid::Uuid;

use crate::analysis::DiagnosisResult;
use crate::capture::CapturedImage;
use crate::error::{ErrorAffordance, PipelineError};
use crate::profile::TongueAnalysisRecord;

/// Where the capture → analyze → persist flow currently is.
///
/// Failed stages fall back to the last good state: a failed analysis to
/// `Captured`, a failed save to `Analyzed`, so a retry never redoes work
/// that already succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum PipelineState {
    #[default]
    Idle,
    PermissionPending,
    PermissionDenied,
    Capturing,
    Captured {
        image: CapturedImage,
    },
    Analyzing {
        image: CapturedImage,
    },
    /// Analysis succeeded; the record id is already minted.
    Analyzed {
        image: CapturedImage,
        record: TongueAnalysisRecord,
    },
    Persisting {
        image: CapturedImage,
        record: TongueAnalysisRecord,
    },
}

impl PipelineState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PermissionPending => "permission_pending",
            Self::PermissionDenied => "permission_denied",
            Self::Capturing => "capturing",
            Self::Captured { .. } => "captured",
            Self::Analyzing { .. } => "analyzing",
            Self::Analyzed { .. } => "analyzed",
            Self::Persisting { .. } => "persisting",
        }
    }

    /// An operation is running; the UI shows a spinner.
    pub fn is_loading(&self) -> bool {
        matches!(
            self,
            Self::PermissionPending | Self::Capturing | Self::Analyzing { .. } | Self::Persisting { .. }
        )
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        match self {
            Self::Captured { image }
            | Self::Analyzing { image }
            | Self::Analyzed { image, .. }
            | Self::Persisting { image, .. } => Some(image),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A pipeline error as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: &'static str,
    pub message: String,
    pub affordance: ErrorAffordance,
}

impl From<&PipelineError> for ErrorReport {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            affordance: err.affordance(),
        }
    }
}

/// Snapshot returned by `ScanPipeline::status()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStatus {
    pub state: &'static str,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<Uuid>,
    /// Analysis result waiting to be saved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_result: Option<DiagnosisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_record: Option<TongueAnalysisRecord>,
}

/// Broadcast to UI subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StateChanged {
        state: &'static str,
        loading: bool,
    },
    Failed {
        error: ErrorReport,
    },
    Persisted {
        record: TongueAnalysisRecord,
    },
}

/// How a completed `start_scan` ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    /// The user dismissed the camera. Not an error.
    Cancelled,
    Persisted(TongueAnalysisRecord),
}
