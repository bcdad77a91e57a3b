//! Error types for tongue-check.

use std::time::Duration;

use serde::Serialize;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Analysis service error: {0}")]
    Analysis(#[from] AnalysisServiceError),

    #[error("Wizard error: {0}")]
    Wizard(#[from] WizardError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Profile store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Profile not found for user {user_id}")]
    ProfileNotFound { user_id: String },

    #[error("Profile already exists for user {user_id}")]
    ProfileExists { user_id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Auth session provider errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Session validation failed: {0}")]
    Validation(String),

    #[error("Auth provider unreachable: {0}")]
    Unreachable(String),
}

/// Capture source errors. A user dismissing the camera is not one of these.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("Capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Failed to read captured image: {0}")]
    Io(#[from] std::io::Error),
}

/// Analysis service errors.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisServiceError {
    #[error("Request to analysis service failed: {0}")]
    RequestFailed(String),

    #[error("Analysis service returned {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid response from analysis service: {0}")]
    InvalidResponse(String),
}

/// Wizard navigation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error("Step {id} is not in the onboarding catalog")]
    InvalidStep { id: u8 },

    #[error("Already at the final step")]
    AtTerminalStep,

    #[error("Step {step} is not complete yet")]
    GateClosed { step: String },

    #[error("Form for {form} does not belong to current step {step}")]
    FormMismatch { form: String, step: String },
}

/// What the UI should offer next to a pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAffordance {
    /// Show a retry button.
    Retry,
    /// Deep-link to the system settings screen.
    OpenSettings,
    /// Ask the user to sign in again.
    SignIn,
    /// Nothing to offer.
    None,
}

/// Capture-analyze-persist pipeline errors.
///
/// Every collaborator failure is converted into one of these at its stage
/// boundary; raw store or transport errors never leave the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    #[error("Camera access is turned off")]
    PermissionDenied,

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Saving your results failed: {0}")]
    PersistenceFailed(String),

    #[error("You need to be signed in to save results")]
    NotAuthenticated,

    #[error("Another scan step is still running")]
    Busy,

    #[error("Cannot {action} while the scan is {state}")]
    InvalidState { action: String, state: String },
}

impl PipelineError {
    /// The follow-up action the UI should offer for this error.
    pub fn affordance(&self) -> ErrorAffordance {
        match self {
            Self::PermissionDenied => ErrorAffordance::OpenSettings,
            Self::CaptureFailed(_) | Self::AnalysisFailed(_) | Self::PersistenceFailed(_) => {
                ErrorAffordance::Retry
            }
            Self::NotAuthenticated => ErrorAffordance::SignIn,
            Self::Busy | Self::InvalidState { .. } => ErrorAffordance::None,
        }
    }

    /// Short machine-readable label, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::CaptureFailed(_) => "capture_failed",
            Self::AnalysisFailed(_) => "analysis_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::NotAuthenticated => "not_authenticated",
            Self::Busy => "busy",
            Self::InvalidState { .. } => "invalid_state",
        }
    }

    pub(crate) fn analysis_timeout(timeout: Duration) -> Self {
        Self::AnalysisFailed(format!("no response after {}s", timeout.as_secs()))
    }

    pub(crate) fn persistence_timeout(timeout: Duration) -> Self {
        Self::PersistenceFailed(format!("no response after {}s", timeout.as_secs()))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
