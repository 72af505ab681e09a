use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync already running for {collection_type} of user {user}")]
    AlreadyRunning {
        collection_type: String,
        user: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Verification challenge unresolved at {url}: {reason}")]
    ChallengeUnresolved { url: String, reason: String },

    #[error("Not signed in or the site structure changed: {0}")]
    NotAuthenticatedOrStructureChanged(String),

    #[error("Failed to extract content from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("List changes were not confirmed")]
    ConfirmationDeclined,

    #[error("Invalid job ID: {0}")]
    InvalidJobId(String),

    #[error("Invalid sync status: {0}")]
    InvalidStatus(String),

    #[error("Invalid collection type: {0}")]
    InvalidCollectionType(String),

    #[error("Invalid sync mode: {0}")]
    InvalidMode(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Storage error: {0}")]
    Storage(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Errors that end the whole run rather than a single page or item
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::ChallengeUnresolved { .. }
                | SyncError::Cancelled
                | SyncError::NotAuthenticatedOrStructureChanged(_)
                | SyncError::Storage(_)
        )
    }

    /// Errors after which the current position is worth checkpointing
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            SyncError::ChallengeUnresolved { .. } | SyncError::Cancelled
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SyncError::Network(_) => FailureKind::Network,
            SyncError::ChallengeUnresolved { .. } => FailureKind::ChallengeUnresolved,
            SyncError::NotAuthenticatedOrStructureChanged(_) => {
                FailureKind::NotAuthenticatedOrStructureChanged
            }
            SyncError::Storage(_) | SyncError::Checkpoint(_) | SyncError::Bridge(_) => {
                FailureKind::Storage
            }
            _ => FailureKind::Internal,
        }
    }
}

/// Coarse classification of a failed run, surfaced in the sync report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    ChallengeUnresolved,
    NotAuthenticatedOrStructureChanged,
    Storage,
    Internal,
}

pub type Result<T> = std::result::Result<T, SyncError>;
