//! # Sync Job State Machine
//!
//! Lifecycle of a single synchronization run with validated transitions.
//!
//! ## State Machine
//!
//! ```text
//! Idle → Preparing → Running → Completed
//!            ↓          ↓
//!            └──────→ Failed
//!            └──────→ Cancelled
//! ```
//!
//! `Preparing` covers loading the checkpoint and settings. Only a `Running`
//! job can be cancelled through the orchestrator.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{CollectionType, SyncJob, SyncMode};
//!
//! let job = SyncJob::new(CollectionType::WatchedVideos, SyncMode::Full);
//! let job = job.prepare()?.start()?;
//! let job = job.complete()?;
//! ```

use crate::{Result, SyncError};
use core_library::RecordStatus;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

/// Unique identifier for a sync job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncJobId(Uuid);

impl SyncJobId {
    /// Create a new random sync job ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a sync job ID from a string
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a valid UUID
    pub fn from_string(s: &str) -> Result<Self> {
        Ok(Self(
            Uuid::parse_str(s).map_err(|e| SyncError::InvalidJobId(e.to_string()))?,
        ))
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for SyncJobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SyncJobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SyncJobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// ============================================================================
// Collection Types
// ============================================================================

/// Remote collection a job mirrors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionType {
    WatchedVideos,
    WantVideos,
    /// Watched then want, as two phases of one job
    AllVideos,
    ActorFavorites,
    Lists,
}

impl CollectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollectionType::WatchedVideos => "watched_videos",
            CollectionType::WantVideos => "want_videos",
            CollectionType::AllVideos => "all_videos",
            CollectionType::ActorFavorites => "actor_favorites",
            CollectionType::Lists => "lists",
        }
    }

    /// Status written onto records synced through this collection.
    ///
    /// `None` for composite and list collections.
    pub fn record_status(&self) -> Option<RecordStatus> {
        match self {
            CollectionType::WatchedVideos => Some(RecordStatus::Watched),
            CollectionType::WantVideos => Some(RecordStatus::Want),
            CollectionType::ActorFavorites => Some(RecordStatus::FavoriteActor),
            CollectionType::AllVideos | CollectionType::Lists => None,
        }
    }

    /// Paginated collections run by this job, in order
    pub fn phases(&self) -> Vec<CollectionType> {
        match self {
            CollectionType::AllVideos => {
                vec![CollectionType::WatchedVideos, CollectionType::WantVideos]
            }
            other => vec![*other],
        }
    }
}

impl FromStr for CollectionType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "watched_videos" => Ok(CollectionType::WatchedVideos),
            "want_videos" => Ok(CollectionType::WantVideos),
            "all_videos" => Ok(CollectionType::AllVideos),
            "actor_favorites" => Ok(CollectionType::ActorFavorites),
            "lists" => Ok(CollectionType::Lists),
            _ => Err(SyncError::InvalidCollectionType(s.to_string())),
        }
    }
}

impl std::fmt::Display for CollectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Full walks every page; incremental stops once it runs into known items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        }
    }
}

impl FromStr for SyncMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            _ => Err(SyncError::InvalidMode(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Preparing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SyncStatus {
    /// Check if this status represents a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncStatus::Completed | SyncStatus::Failed | SyncStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SyncStatus::Preparing | SyncStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Preparing => "preparing",
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Ok(SyncStatus::Idle),
            "preparing" => Ok(SyncStatus::Preparing),
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            "cancelled" => Ok(SyncStatus::Cancelled),
            _ => Err(SyncError::InvalidStatus(s.to_string())),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Counters
// ============================================================================

/// Running tallies for one job. Restored from the checkpoint on resume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounters {
    /// Items whose detail page was fetched and stored
    pub synced: u64,
    /// Items skipped as already known (incremental mode)
    pub skipped: u64,
    /// Pages or items that failed without stopping the run
    pub errored: u64,
    /// Synced items that were new locally
    pub created: u64,
    /// Synced items that already existed locally
    pub updated: u64,
}

impl SyncCounters {
    pub fn processed(&self) -> u64 {
        self.synced + self.skipped + self.errored
    }
}

// ============================================================================
// Sync Job Entity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJob {
    pub id: SyncJobId,
    pub collection_type: CollectionType,
    pub mode: SyncMode,
    pub status: SyncStatus,
    /// Whether the run continued from a checkpoint
    pub resumed: bool,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl SyncJob {
    /// Create a new sync job in idle state
    pub fn new(collection_type: CollectionType, mode: SyncMode) -> Self {
        Self {
            id: SyncJobId::new(),
            collection_type,
            mode,
            status: SyncStatus::Idle,
            resumed: false,
            error_message: None,
            created_at: current_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `Preparing` while the checkpoint decision is made
    pub fn prepare(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Preparing)?;
        self.status = SyncStatus::Preparing;
        Ok(self)
    }

    /// Start the sync job
    ///
    /// # Errors
    ///
    /// Returns an error if the job is not in `Preparing` state
    pub fn start(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Running)?;
        self.status = SyncStatus::Running;
        self.started_at = Some(current_timestamp());
        Ok(self)
    }

    pub fn complete(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Completed)?;
        self.status = SyncStatus::Completed;
        self.completed_at = Some(current_timestamp());
        Ok(self)
    }

    pub fn fail(mut self, error_message: String) -> Result<Self> {
        self.validate_transition(SyncStatus::Failed)?;
        self.status = SyncStatus::Failed;
        self.completed_at = Some(current_timestamp());
        self.error_message = Some(error_message);
        Ok(self)
    }

    pub fn cancel(mut self) -> Result<Self> {
        self.validate_transition(SyncStatus::Cancelled)?;
        self.status = SyncStatus::Cancelled;
        self.completed_at = Some(current_timestamp());
        Ok(self)
    }

    /// Get the duration of the job in seconds
    ///
    /// Returns None if the job hasn't started or completed yet
    pub fn duration_secs(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).max(0) as u64),
            _ => None,
        }
    }

    fn validate_transition(&self, to: SyncStatus) -> Result<()> {
        let valid = match (self.status, to) {
            (SyncStatus::Idle, SyncStatus::Preparing) => true,

            (SyncStatus::Preparing, SyncStatus::Running) => true,
            (SyncStatus::Preparing, SyncStatus::Failed) => true,
            (SyncStatus::Preparing, SyncStatus::Cancelled) => true,

            (SyncStatus::Running, SyncStatus::Completed) => true,
            (SyncStatus::Running, SyncStatus::Failed) => true,
            (SyncStatus::Running, SyncStatus::Cancelled) => true,

            _ => false,
        };

        if !valid {
            return Err(SyncError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition from {} to {}",
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

// ============================================================================
// Tests
// ============================================================================
