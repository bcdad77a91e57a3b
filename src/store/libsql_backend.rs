//! libSQL backend for `ProfileStore`. Supports local file and in-memory databases.
//!
//! The profile's field set is one JSON document per user; analysis records
//! live in their own table so appends never rewrite the profile row.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::analysis::DiagnosisResult;
use crate::error::StoreError;
use crate::profile::{ProfileFields, TongueAnalysisRecord, UserProfile};
use crate::store::migrations;
use crate::store::traits::ProfileStore;

/// libSQL profile store.
///
/// One connection is reused for all operations. Field updates are
/// read-modify-write, so they are serialized through `write_lock`.
pub struct LibSqlProfileStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_lock: Mutex<()>,
}

impl LibSqlProfileStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db).await?;
        info!(path = %path.display(), "Profile database opened");
        Ok(store)
    }

    /// Create an in-memory database.
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, StoreError> {
        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;
        migrations::run_migrations(&conn).await?;
        Ok(Self {
            db: Arc::new(db),
            conn,
            write_lock: Mutex::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Stored field document and timestamps, if the profile exists.
    async fn load_row(
        &self,
        user_id: &str,
    ) -> Result<Option<(ProfileFields, DateTime<Utc>, DateTime<Utc>)>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT fields, created_at, updated_at FROM profiles WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_profile: {e}")))?;

        let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_profile: {e}")))?
        else {
            return Ok(None);
        };

        let fields_json: String = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("load_profile fields: {e}")))?;
        let created: String = row
            .get(1)
            .map_err(|e| StoreError::Query(format!("load_profile created_at: {e}")))?;
        let updated: String = row
            .get(2)
            .map_err(|e| StoreError::Query(format!("load_profile updated_at: {e}")))?;

        let fields: ProfileFields = serde_json::from_str(&fields_json)
            .map_err(|e| StoreError::Serialization(format!("profile fields: {e}")))?;
        Ok(Some((fields, parse_datetime(&created), parse_datetime(&updated))))
    }

    async fn load_history(&self, user_id: &str) -> Result<Vec<TongueAnalysisRecord>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, created_at, result, image_ref FROM analysis_records
                 WHERE user_id = ?1 ORDER BY rowid ASC",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("load_history: {e}")))?;

        let mut history = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("load_history: {e}")))?
        {
            history.push(row_to_record(&row)?);
        }
        Ok(history)
    }

    async fn profile_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT 1 FROM profiles WHERE user_id = ?1", params![user_id])
            .await
            .map_err(|e| StoreError::Query(format!("profile_exists: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| StoreError::Query(format!("profile_exists: {e}")))?;
        Ok(row.is_some())
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(format!("{what}: {e}")))
}

fn row_to_record(row: &libsql::Row) -> Result<TongueAnalysisRecord, StoreError> {
    let id: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("record id: {e}")))?;
    let created: String = row
        .get(1)
        .map_err(|e| StoreError::Query(format!("record created_at: {e}")))?;
    let result_json: String = row
        .get(2)
        .map_err(|e| StoreError::Query(format!("record result: {e}")))?;
    let image_ref: Option<String> = row
        .get(3)
        .map_err(|e| StoreError::Query(format!("record image_ref: {e}")))?;

    let id = Uuid::parse_str(&id)
        .map_err(|e| StoreError::Serialization(format!("record id '{id}': {e}")))?;
    let result: DiagnosisResult = serde_json::from_str(&result_json)
        .map_err(|e| StoreError::Serialization(format!("record result: {e}")))?;

    Ok(TongueAnalysisRecord {
        id,
        created_at: parse_datetime(&created),
        result,
        image_ref,
    })
}

#[async_trait]
impl ProfileStore for LibSqlProfileStore {
    async fn create_profile(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let now = format_datetime(&Utc::now());
        let changed = self
            .conn()
            .execute(
                "INSERT INTO profiles (user_id, fields, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(user_id) DO NOTHING",
                params![user_id, to_json(fields, "profile fields")?, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("create_profile: {e}")))?;

        if changed == 0 {
            return Err(StoreError::ProfileExists {
                user_id: user_id.to_string(),
            });
        }
        debug!(user_id, "Profile created");
        Ok(())
    }

    async fn update_fields(&self, user_id: &str, fields: &ProfileFields) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let (mut stored, _, _) =
            self.load_row(user_id)
                .await?
                .ok_or_else(|| StoreError::ProfileNotFound {
                    user_id: user_id.to_string(),
                })?;
        stored.merge(fields);

        self.conn()
            .execute(
                "UPDATE profiles SET fields = ?2, updated_at = ?3 WHERE user_id = ?1",
                params![
                    user_id,
                    to_json(&stored, "profile fields")?,
                    format_datetime(&Utc::now())
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_fields: {e}")))?;
        Ok(())
    }

    async fn append_diagnosis_record(
        &self,
        user_id: &str,
        record: &TongueAnalysisRecord,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if !self.profile_exists(user_id).await? {
            return Err(StoreError::ProfileNotFound {
                user_id: user_id.to_string(),
            });
        }

        let inserted = self
            .conn()
            .execute(
                "INSERT INTO analysis_records (id, user_id, created_at, result, image_ref)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    record.id.to_string(),
                    user_id,
                    format_datetime(&record.created_at),
                    to_json(&record.result, "record result")?,
                    record.image_ref.clone()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append_diagnosis_record: {e}")))?;

        if inserted == 0 {
            debug!(user_id, record_id = %record.id, "Record already stored, skipping append");
            return Ok(());
        }

        self.conn()
            .execute(
                "UPDATE profiles SET updated_at = ?2 WHERE user_id = ?1",
                params![user_id, format_datetime(&Utc::now())],
            )
            .await
            .map_err(|e| StoreError::Query(format!("append_diagnosis_record touch: {e}")))?;
        Ok(())
    }

    async fn read_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        let (fields, created_at, updated_at) =
            self.load_row(user_id)
                .await?
                .ok_or_else(|| StoreError::ProfileNotFound {
                    user_id: user_id.to_string(),
                })?;

        let mut profile = UserProfile::new(user_id, created_at);
        fields.apply_to(&mut profile);
        profile.updated_at = updated_at;
        profile.analysis_history = self.load_history(user_id).await?;
        Ok(profile)
    }
}
