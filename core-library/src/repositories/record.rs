//! Synced record repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{RecordStatus, SyncedRecord, SyncedRecordRow};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Record repository interface for data access operations
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Find a record by its identity
    ///
    /// # Returns
    /// - `Ok(Some(record))` if found
    /// - `Ok(None)` if not found
    /// - `Err` if database error occurs
    async fn get(&self, identity: &str) -> Result<Option<SyncedRecord>>;

    /// Insert a record or replace the stored one with the same identity
    ///
    /// # Errors
    /// Returns error if:
    /// - Record validation fails
    /// - Database error occurs
    async fn upsert(&self, record: &SyncedRecord) -> Result<()>;

    /// Every stored record, ordered by identity
    async fn list_all(&self) -> Result<Vec<SyncedRecord>>;

    /// URL identities of all records currently carrying `status`
    async fn url_identities_with_status(&self, status: RecordStatus) -> Result<HashSet<String>>;

    /// Record identity stored for an index page URL identity
    async fn identity_for_url(&self, url_identity: &str) -> Result<Option<String>>;

    /// Replace the list memberships of one record
    ///
    /// # Returns
    /// - `Ok(true)` if the record exists and was updated
    /// - `Ok(false)` if no record has this identity
    async fn set_list_memberships(
        &self,
        identity: &str,
        memberships: &BTreeSet<String>,
        updated_at: i64,
    ) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of RecordRepository
pub struct SqliteRecordRepository {
    pool: SqlitePool,
}

impl SqliteRecordRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_json<T: serde::Serialize>(column: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| LibraryError::CorruptColumn {
        column: column.to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl RecordRepository for SqliteRecordRepository {
    async fn get(&self, identity: &str) -> Result<Option<SyncedRecord>> {
        let row = query_as::<_, SyncedRecordRow>("SELECT * FROM synced_records WHERE identity = ?")
            .bind(identity)
            .fetch_optional(&self.pool)
            .await?;

        row.map(SyncedRecord::try_from).transpose()
    }

    async fn upsert(&self, record: &SyncedRecord) -> Result<()> {
        record.validate().map_err(|e| LibraryError::InvalidInput {
            field: "SyncedRecord".to_string(),
            message: e,
        })?;

        let tags = to_json("synced_records.tags", &record.tags)?;
        let memberships = to_json("synced_records.list_memberships", &record.list_memberships)?;

        query(
            r#"
            INSERT INTO synced_records (
                identity, url_identity, title, status, tags, release_date,
                source_url, image_url, list_memberships, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity) DO UPDATE SET
                url_identity = excluded.url_identity,
                title = excluded.title,
                status = excluded.status,
                tags = excluded.tags,
                release_date = excluded.release_date,
                source_url = excluded.source_url,
                image_url = excluded.image_url,
                list_memberships = excluded.list_memberships,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.identity)
        .bind(&record.url_identity)
        .bind(&record.title)
        .bind(record.status.as_str())
        .bind(tags)
        .bind(&record.release_date)
        .bind(&record.source_url)
        .bind(&record.image_url)
        .bind(memberships)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(identity = %record.identity, status = %record.status, "Upserted record");
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<SyncedRecord>> {
        let rows = query_as::<_, SyncedRecordRow>("SELECT * FROM synced_records ORDER BY identity")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(SyncedRecord::try_from).collect()
    }

    async fn url_identities_with_status(&self, status: RecordStatus) -> Result<HashSet<String>> {
        let rows: Vec<(String,)> =
            query_as("SELECT url_identity FROM synced_records WHERE status = ?")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(url_identity,)| url_identity).collect())
    }

    async fn identity_for_url(&self, url_identity: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = query_as(
            "SELECT identity FROM synced_records WHERE url_identity = ? ORDER BY identity LIMIT 1",
        )
        .bind(url_identity)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(identity,)| identity))
    }

    async fn set_list_memberships(
        &self,
        identity: &str,
        memberships: &BTreeSet<String>,
        updated_at: i64,
    ) -> Result<bool> {
        let encoded = to_json("synced_records.list_memberships", memberships)?;

        let result = query(
            "UPDATE synced_records SET list_memberships = ?, updated_at = ? WHERE identity = ?",
        )
        .bind(encoded)
        .bind(updated_at)
        .bind(identity)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let count: (i64,) = query_as("SELECT COUNT(*) FROM synced_records")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.0)
    }
}
