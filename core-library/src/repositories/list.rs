//! List snapshot repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{ListEntity, ListEntityRow};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use tracing::debug;

/// List repository interface
///
/// The list table is a snapshot: each reconciliation replaces it wholesale,
/// preserving the remote index order.
#[async_trait]
pub trait ListRepository: Send + Sync {
    /// Replace every stored list with `lists`, in the given order
    ///
    /// # Errors
    /// Returns error if:
    /// - Any list fails validation (nothing is written)
    /// - Database error occurs (the previous snapshot is kept)
    async fn replace_all(&self, lists: &[ListEntity]) -> Result<()>;

    /// All stored lists in index order
    async fn get_all(&self) -> Result<Vec<ListEntity>>;
}

/// SQLite implementation of ListRepository
pub struct SqliteListRepository {
    pool: SqlitePool,
}

impl SqliteListRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListRepository for SqliteListRepository {
    async fn replace_all(&self, lists: &[ListEntity]) -> Result<()> {
        for list in lists {
            list.validate().map_err(|e| LibraryError::InvalidInput {
                field: "ListEntity".to_string(),
                message: e,
            })?;
        }

        let mut tx = self.pool.begin().await?;

        query("DELETE FROM lists").execute(&mut *tx).await?;

        for (position, list) in lists.iter().enumerate() {
            query(
                r#"
                INSERT INTO lists (
                    id, name, kind, source_url, item_count, engagement_count,
                    position, created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&list.id)
            .bind(&list.name)
            .bind(list.kind.as_str())
            .bind(&list.source_url)
            .bind(list.item_count.map(i64::from))
            .bind(list.engagement_count.map(i64::from))
            .bind(position as i64)
            .bind(list.created_at)
            .bind(list.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(count = lists.len(), "Replaced list snapshot");
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<ListEntity>> {
        let rows = query_as::<_, ListEntityRow>(
            r#"
            SELECT id, name, kind, source_url, item_count, engagement_count, created_at, updated_at
            FROM lists
            ORDER BY position
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ListEntity::try_from).collect()
    }
}
