//! HTTP client for the remote tongue analysis service.
//!
//! `POST {base_url}/analyze` with a multipart `image` part; the service
//! answers with a JSON diagnosis (optionally wrapped in prose or a markdown
//! code fence) or `{"error": "..."}`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{AnalysisService, DiagnosisResult};
use crate::capture::CapturedImage;
use crate::error::AnalysisServiceError;

/// Longest error body echoed back to the user.
const MAX_ERROR_MESSAGE_CHARS: usize = 300;

pub struct HttpAnalysisService {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
}

impl HttpAnalysisService {
    pub fn new(base_url: impl Into<String>, api_key: Option<SecretString>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/analyze", self.base_url)
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    fn name(&self) -> &str {
        "http"
    }

    async fn analyze(&self, image: &CapturedImage) -> Result<DiagnosisResult, AnalysisServiceError> {
        let part = Part::bytes(image.bytes.clone())
            .file_name(format!("{}.{}", image.id, extension_for(&image.mime_type)))
            .mime_str(&image.mime_type)
            .map_err(|e| AnalysisServiceError::RequestFailed(format!("invalid mime type: {e}")))?;
        let form = Form::new()
            .text("image_id", image.id.to_string())
            .part("image", part);

        let mut request = self.client.post(self.endpoint()).multipart(form);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        debug!(image_id = %image.id, url = %self.endpoint(), "Submitting image for analysis");
        let resp = request
            .send()
            .await
            .map_err(|e| AnalysisServiceError::RequestFailed(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| AnalysisServiceError::RequestFailed(format!("reading body: {e}")))?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Analysis service rejected request");
            return Err(AnalysisServiceError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let result = parse_diagnosis_response(&body).map_err(|e| match e {
            ParseFailure::ServiceError(message) => AnalysisServiceError::Rejected {
                status: status.as_u16(),
                message,
            },
            ParseFailure::Invalid(reason) => AnalysisServiceError::InvalidResponse(reason),
        })?;

        info!(
            image_id = %image.id,
            confidence = result.confidence,
            quality = %result.image_quality,
            "Analysis completed"
        );
        Ok(result)
    }
}

// ── Response parsing ────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ParseFailure {
    /// The service reported an error in a successful response.
    ServiceError(String),
    Invalid(String),
}

#[derive(Debug, Deserialize)]
struct RawDiagnosis {
    #[serde(default)]
    zones: BTreeMap<String, String>,
    #[serde(default, alias = "overall_diagnosis", alias = "overallDiagnosis")]
    diagnosis: String,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default, alias = "imageQuality")]
    image_quality: String,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Parse the service's response body into a `DiagnosisResult`.
pub(crate) fn parse_diagnosis_response(raw: &str) -> Result<DiagnosisResult, ParseFailure> {
    let json = extract_json_object(raw);
    let parsed: RawDiagnosis = serde_json::from_str(&json)
        .map_err(|e| ParseFailure::Invalid(format!("JSON parse error: {e}")))?;

    if let Some(error) = parsed.error.filter(|e| !e.trim().is_empty()) {
        return Err(ParseFailure::ServiceError(truncate(&error)));
    }

    let diagnosis = parsed.diagnosis.trim().to_string();
    if diagnosis.is_empty() {
        return Err(ParseFailure::Invalid("missing diagnosis".to_string()));
    }

    let confidence = if parsed.confidence.is_finite() {
        parsed.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Ok(DiagnosisResult {
        zones: parsed.zones,
        diagnosis,
        recommendations: parsed
            .recommendations
            .into_iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect(),
        confidence,
        image_quality: if parsed.image_quality.trim().is_empty() {
            "unknown".to_string()
        } else {
            parsed.image_quality.trim().to_string()
        },
        notes: parsed.notes.filter(|n| !n.trim().is_empty()),
    })
}

/// Pull a JSON object out of a body that may be wrapped in a code fence or prose.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}

/// Best human-readable message from an error body.
fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = value
            .get("error")
            .or_else(|| value.get("message"))
            .and_then(|v| v.as_str())
    {
        return truncate(msg);
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response".to_string()
    } else {
        truncate(trimmed)
    }
}

fn truncate(s: &str) -> String {
    s.chars().take(MAX_ERROR_MESSAGE_CHARS).collect()
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/heic" => "heic",
        "image/webp" => "webp",
        _ => "jpg",
    }
}
