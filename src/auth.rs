//! Auth session provider — who, if anyone, is signed in.

use std::sync::RwLock;

use async_trait::async_trait;
use tracing::info;

use crate::error::AuthError;

/// Session provider. `is_signed_in` may need the network to validate a
/// token, so it can fail; `current_user_id` only reads local state.
#[async_trait]
pub trait AuthSession: Send + Sync {
    async fn is_signed_in(&self) -> Result<bool, AuthError>;

    fn current_user_id(&self) -> Option<String>;
}

/// In-process session: signed in when a user id is set.
#[derive(Debug, Default)]
pub struct LocalAuthSession {
    user_id: RwLock<Option<String>>,
}

impl LocalAuthSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self {
            user_id: RwLock::new(Some(user_id.into())),
        }
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        info!(user_id = %user_id, "Signed in");
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = Some(user_id);
    }

    pub fn sign_out(&self) {
        info!("Signed out");
        *self.user_id.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

#[async_trait]
impl AuthSession for LocalAuthSession {
    async fn is_signed_in(&self) -> Result<bool, AuthError> {
        Ok(self.current_user_id().is_some())
    }

    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_and_out() {
        let session = LocalAuthSession::new();
        assert!(!session.is_signed_in().await.unwrap());
        assert!(session.current_user_id().is_none());

        session.sign_in("user-42");
        assert!(session.is_signed_in().await.unwrap());
        assert_eq!(session.current_user_id().as_deref(), Some("user-42"));

        session.sign_out();
        assert!(!session.is_signed_in().await.unwrap());
    }

    #[tokio::test]
    async fn signed_in_constructor() {
        let session = LocalAuthSession::signed_in("u1");
        assert_eq!(session.current_user_id().as_deref(), Some("u1"));
    }
}
