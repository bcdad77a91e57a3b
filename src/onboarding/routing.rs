//! Cold-start routing: which step does the app open on?

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::step::Step;
use crate::auth::AuthSession;

/// Result of asking the auth provider at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    SignedIn,
    SignedOut,
    /// Provider errored or did not answer in time.
    Unavailable,
}

/// Locally cached details from a previous session. Advisory only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedHints {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

impl CachedHints {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.phone.is_none()
    }
}

/// Entry step for an auth state. Hints never change the outcome.
pub fn decide_entry_step(auth: AuthState, hints: &CachedHints) -> Step {
    if !hints.is_empty() {
        debug!(
            has_name = hints.name.is_some(),
            has_phone = hints.phone.is_some(),
            auth = ?auth,
            "Cached hints present; routing on auth state only"
        );
    }
    match auth {
        AuthState::SignedIn => Step::MainApp,
        AuthState::SignedOut | AuthState::Unavailable => Step::SignInChoice,
    }
}

/// Ask the provider (bounded by `timeout`) and pick the entry step.
pub async fn resolve_entry_step(
    auth: &dyn AuthSession,
    hints: &CachedHints,
    timeout: Duration,
) -> Step {
    let state = match tokio::time::timeout(timeout, auth.is_signed_in()).await {
        Ok(Ok(true)) => AuthState::SignedIn,
        Ok(Ok(false)) => AuthState::SignedOut,
        Ok(Err(e)) => {
            warn!(error = %e, "Auth check failed, treating user as new");
            AuthState::Unavailable
        }
        Err(_) => {
            warn!(timeout_secs = timeout.as_secs(), "Auth check timed out, treating user as new");
            AuthState::Unavailable
        }
    };

    let step = decide_entry_step(state, hints);
    info!(auth = ?state, step = %step, "Entry step resolved");
    step
}
