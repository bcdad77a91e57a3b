//! Analysis service — turns a tongue image into a structured diagnosis.
//!
//! The algorithm itself is external; this module only defines the contract
//! and the HTTP client for the remote service.

pub mod http;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::CapturedImage;
use crate::error::AnalysisServiceError;

pub use http::HttpAnalysisService;

/// Structured output of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisResult {
    /// Tongue zone → finding, e.g. `"tip" → "slightly red"`.
    pub zones: BTreeMap<String, String>,
    pub diagnosis: String,
    /// Ordered, most important first.
    pub recommendations: Vec<String>,
    /// 0.0–1.0.
    pub confidence: f32,
    pub image_quality: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Remote or local image analysis. Latency is unbounded from the caller's
/// point of view; callers apply their own outer timeout.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Service name for logs.
    fn name(&self) -> &str;

    async fn analyze(&self, image: &CapturedImage) -> Result<DiagnosisResult, AnalysisServiceError>;
}
