//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Timeouts wrapped around the pipeline's external calls.
///
/// The analysis service and profile store own their own timeouts; these are
/// outer bounds so the UI state can never hang on a silent collaborator.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on a single analysis request.
    pub analysis_timeout: Duration,
    /// Upper bound on a single persistence write.
    pub persistence_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            analysis_timeout: Duration::from_secs(60),
            persistence_timeout: Duration::from_secs(20),
        }
    }
}

/// Service configuration, read from `TONGUE_*` environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Port for the REST/WS server.
    pub listen_port: u16,
    /// libSQL database path; `:memory:` selects the in-memory profile store.
    pub db_path: String,
    /// Base URL of the analysis service.
    pub analysis_url: Option<String>,
    /// Bearer key for the analysis service.
    pub analysis_api_key: Option<SecretString>,
    /// Where the capture source picks up still images.
    pub capture_path: PathBuf,
    /// Pre-authenticated user (single-user deployments).
    pub user_id: Option<String>,
    /// How long cold-start routing waits for the auth provider.
    pub auth_timeout: Duration,
    pub pipeline: PipelineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_port: 8080,
            db_path: "./data/tongue-check.db".to_string(),
            analysis_url: None,
            analysis_api_key: None,
            capture_path: PathBuf::from("./capture/latest.jpg"),
            user_id: None,
            auth_timeout: Duration::from_secs(5),
            pipeline: PipelineConfig::default(),
        }
    }
}

impl AppConfig {
    /// Build a config from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let listen_port = match non_empty("TONGUE_LISTEN_PORT") {
            Some(raw) => parse_number("TONGUE_LISTEN_PORT", &raw)?,
            None => defaults.listen_port,
        };

        let secs = |key: &str, default: Duration| -> Result<Duration, ConfigError> {
            match non_empty(key) {
                Some(raw) => {
                    let value: u64 = parse_number(key, &raw)?;
                    if value == 0 {
                        return Err(ConfigError::InvalidValue {
                            key: key.to_string(),
                            message: "must be greater than zero".to_string(),
                        });
                    }
                    Ok(Duration::from_secs(value))
                }
                None => Ok(default),
            }
        };

        Ok(Self {
            listen_port,
            db_path: non_empty("TONGUE_DB_PATH").unwrap_or(defaults.db_path),
            analysis_url: non_empty("TONGUE_ANALYSIS_URL"),
            analysis_api_key: non_empty("TONGUE_ANALYSIS_API_KEY").map(SecretString::from),
            capture_path: non_empty("TONGUE_CAPTURE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.capture_path),
            user_id: non_empty("TONGUE_USER_ID"),
            auth_timeout: secs("TONGUE_AUTH_TIMEOUT_SECS", defaults.auth_timeout)?,
            pipeline: PipelineConfig {
                analysis_timeout: secs(
                    "TONGUE_ANALYSIS_TIMEOUT_SECS",
                    defaults.pipeline.analysis_timeout,
                )?,
                persistence_timeout: secs(
                    "TONGUE_PERSIST_TIMEOUT_SECS",
                    defaults.pipeline.persistence_timeout,
                )?,
            },
        })
    }

    /// The analysis URL, or an error naming the variable to set.
    pub fn require_analysis_url(&self) -> Result<&str, ConfigError> {
        self.analysis_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("TONGUE_ANALYSIS_URL".to_string()))
    }
}

fn parse_number<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}
