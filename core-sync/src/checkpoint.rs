//! # Resume Checkpoints
//!
//! A single persisted resume point shared by every collection type. Saving
//! overwrites whatever was stored; loading validates age and identity so a
//! stale or foreign checkpoint is never resumed.

use crate::job::{CollectionType, SyncCounters, SyncMode};
use crate::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::{Clock, SettingsStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Settings key holding the serialized checkpoint
pub const CHECKPOINT_SETTING_KEY: &str = "sync.checkpoint";

/// Default maximum age before a checkpoint is discarded
pub const DEFAULT_CHECKPOINT_TTL_HOURS: i64 = 24;

/// Position of an interrupted run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub collection_type: CollectionType,
    pub user_identity: String,
    pub mode: SyncMode,
    /// Paginated sub-collection being walked when the run stopped
    pub phase: Option<CollectionType>,
    /// 1-based page to restart on
    pub current_page: u32,
    /// 0-based index of the first unprocessed item on that page
    pub current_item_index: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub counters: SyncCounters,
    pub timestamp: DateTime<Utc>,
    pub current_list_id: Option<String>,
    pub current_list_index: Option<u32>,
    pub total_lists: Option<u32>,
    /// Memberships collected so far, identity to list ids
    #[serde(default)]
    pub memberships: BTreeMap<String, BTreeSet<String>>,
}

impl Checkpoint {
    /// Age relative to `now`, saturating at zero for clocks that moved backwards
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        let age = now - self.timestamp;
        if age < Duration::zero() {
            Duration::zero()
        } else {
            age
        }
    }

    pub fn summary(&self, now: DateTime<Utc>) -> CheckpointSummary {
        CheckpointSummary {
            collection_type: self.collection_type,
            mode: self.mode,
            phase: self.phase,
            current_page: self.current_page,
            total_pages: self.total_pages,
            current_item_index: self.current_item_index,
            current_list_index: self.current_list_index,
            total_lists: self.total_lists,
            counters: self.counters,
            age_secs: self.age(now).num_seconds().max(0) as u64,
        }
    }
}

/// What the host shows when asking whether to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub collection_type: CollectionType,
    pub mode: SyncMode,
    pub phase: Option<CollectionType>,
    pub current_page: u32,
    pub total_pages: u32,
    pub current_item_index: u32,
    pub current_list_index: Option<u32>,
    pub total_lists: Option<u32>,
    pub counters: SyncCounters,
    pub age_secs: u64,
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `checkpoint`, replacing any stored one
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Load the checkpoint for this collection and user.
    ///
    /// Returns `Ok(None)` and clears the slot when the stored checkpoint is
    /// expired, belongs to another collection or user, or cannot be decoded.
    async fn load(
        &self,
        collection_type: CollectionType,
        user_identity: &str,
    ) -> Result<Option<Checkpoint>>;

    /// Stored checkpoint as is, without validation or side effects
    async fn peek(&self) -> Result<Option<Checkpoint>>;

    async fn clear(&self) -> Result<()>;

    /// Clear the slot only if it holds a checkpoint of this collection and
    /// user. Returns whether anything was cleared.
    async fn clear_if_owned(
        &self,
        collection_type: CollectionType,
        user_identity: &str,
    ) -> Result<bool> {
        match self.peek().await? {
            Some(cp)
                if cp.collection_type == collection_type && cp.user_identity == user_identity =>
            {
                self.clear().await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Checkpoint store backed by the host settings store
pub struct SettingsCheckpointStore {
    settings: Arc<dyn SettingsStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SettingsCheckpointStore {
    pub fn new(settings: Arc<dyn SettingsStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            settings,
            clock,
            ttl: Duration::hours(DEFAULT_CHECKPOINT_TTL_HOURS),
        }
    }

    pub fn with_ttl(mut self, ttl: std::time::Duration) -> Self {
        self.ttl = Duration::from_std(ttl)
            .unwrap_or_else(|_| Duration::hours(DEFAULT_CHECKPOINT_TTL_HOURS));
        self
    }
}

#[async_trait]
impl CheckpointStore for SettingsCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let encoded = serde_json::to_string(checkpoint)
            .map_err(|e| SyncError::Checkpoint(format!("Failed to encode checkpoint: {}", e)))?;

        self.settings
            .set_string(CHECKPOINT_SETTING_KEY, &encoded)
            .await?;

        debug!(
            collection_type = %checkpoint.collection_type,
            page = checkpoint.current_page,
            item_index = checkpoint.current_item_index,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load(
        &self,
        collection_type: CollectionType,
        user_identity: &str,
    ) -> Result<Option<Checkpoint>> {
        let Some(raw) = self.settings.get_string(CHECKPOINT_SETTING_KEY).await? else {
            return Ok(None);
        };

        let checkpoint: Checkpoint = match serde_json::from_str(&raw) {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                warn!(error = %e, "Discarding unreadable checkpoint");
                self.clear().await?;
                return Ok(None);
            }
        };

        if checkpoint.collection_type != collection_type
            || checkpoint.user_identity != user_identity
        {
            info!(
                stored = %checkpoint.collection_type,
                requested = %collection_type,
                "Discarding checkpoint for a different collection or user"
            );
            self.clear().await?;
            return Ok(None);
        }

        if checkpoint.age(self.clock.now()) > self.ttl {
            info!(
                collection_type = %collection_type,
                saved_at = %checkpoint.timestamp,
                "Discarding expired checkpoint"
            );
            self.clear().await?;
            return Ok(None);
        }

        Ok(Some(checkpoint))
    }

    async fn peek(&self) -> Result<Option<Checkpoint>> {
        let raw = self.settings.get_string(CHECKPOINT_SETTING_KEY).await?;
        Ok(raw.and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    async fn clear(&self) -> Result<()> {
        self.settings.delete(CHECKPOINT_SETTING_KEY).await?;
        Ok(())
    }
}
