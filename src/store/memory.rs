//! In-memory `ProfileStore`, used when no database is configured and in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use super::traits::ProfileStore;
use crate::error::StoreError;
use crate::profile::{ProfileFields, TongueAnalysisRecord, UserProfile};

#[derive(Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored profiles.
    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }
}

#[async_trait]
impl ProfileStore for InMemoryProfileStore {
    async fn create_profile(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        if profiles.contains_key(user_id) {
            return Err(StoreError::ProfileExists {
                user_id: user_id.to_string(),
            });
        }
        let mut profile = UserProfile::new(user_id, Utc::now());
        fields.apply_to(&mut profile);
        profiles.insert(user_id.to_string(), profile);
        debug!(user_id, "Profile created");
        Ok(())
    }

    async fn update_fields(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::ProfileNotFound {
                user_id: user_id.to_string(),
            })?;
        fields.apply_to(profile);
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn append_diagnosis_record(
        &self,
        user_id: &str,
        record: &TongueAnalysisRecord,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write().await;
        let profile = profiles
            .get_mut(user_id)
            .ok_or_else(|| StoreError::ProfileNotFound {
                user_id: user_id.to_string(),
            })?;
        if profile.analysis_history.iter().any(|r| r.id == record.id) {
            debug!(user_id, record_id = %record.id, "Record already stored, skipping append");
            return Ok(());
        }
        profile.analysis_history.push(record.clone());
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn read_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        self.profiles
            .read()
            .await
            .get(user_id)
            .cloned()
            .ok_or_else(|| StoreError::ProfileNotFound {
                user_id: user_id.to_string(),
            })
    }
}
