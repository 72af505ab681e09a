//! # Collection Sync Engine
//!
//! Mirrors a user's remote collections (watched and wanted videos, favorite
//! actors, curated lists) into the local library, page by page.
//!
//! ## Overview
//!
//! - Resumable: cancellation and unresolved verification challenges leave a
//!   checkpoint at the exact page and item
//! - Polite: fixed pacing between requests and bounded retries
//! - Interactive: verification challenges are handed to the user through a
//!   host-provided session
//!
//! ## Components
//!
//! - **Sync Job State Machine** (`job`): job lifecycle with validated transitions
//! - **Checkpoints** (`checkpoint`): single-slot resume state with expiry
//! - **Fetch Layer** (`fetch`): retries, timeouts and challenge interception
//! - **Challenge Resolver** (`challenge`): detection and user-driven resolution
//! - **Collection Synchronizer** (`collection`): paginated collection walks
//! - **List Reconciler** (`lists`): list diff, confirmation and membership rebuild
//! - **Sync Orchestrator** (`coordinator`): job registry and terminal reports

pub mod challenge;
pub mod checkpoint;
pub mod collection;
pub mod coordinator;
pub mod error;
pub mod extractor;
pub mod fetch;
pub mod job;
pub mod lists;
pub mod progress;

pub use challenge::{ChallengeControl, ChallengeDetector, ChallengeFailure, ChallengeResolver};
pub use checkpoint::{Checkpoint, CheckpointStore, CheckpointSummary, SettingsCheckpointStore};
pub use collection::{CollectionRun, Pacing, PaginatedSynchronizer, RunContext};
pub use coordinator::{
    StartOutcome, SyncConfig, SyncEnvironment, SyncOrchestrator, SyncReport,
    REQUEST_DELAY_SETTING_KEY,
};
pub use error::{FailureKind, Result, SyncError};
pub use extractor::{RecordExtractor, RecordFields, RemoteItemRef, RemoteList};
pub use fetch::{FetchLayer, FetchPolicy, FetchedPage};
pub use job::{CollectionType, SyncCounters, SyncJob, SyncJobId, SyncMode, SyncStatus};
pub use lists::{ListDiff, ListReconciler, ListRun, Memberships};
pub use progress::ProgressReporter;
