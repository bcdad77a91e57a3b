//! `ProfileStore` trait — async document store keyed by user id.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::profile::{ProfileFields, TongueAnalysisRecord, UserProfile};

/// Backend-agnostic profile persistence.
///
/// Analysis records are append-only and live apart from the field set, so a
/// field update can never clobber a concurrently appended record.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Create a profile. Fails with `ProfileExists` if one is already there.
    async fn create_profile(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError>;

    /// Overwrite the set fields of an existing profile.
    async fn update_fields(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError>;

    /// Append a record. Appending a record id that is already stored is a
    /// successful no-op.
    async fn append_diagnosis_record(
        &self,
        user_id: &str,
        record: &TongueAnalysisRecord,
    ) -> Result<(), StoreError>;

    /// Read the full profile including history (oldest record first).
    async fn read_profile(&self, user_id: &str) -> Result<UserProfile, StoreError>;
}
