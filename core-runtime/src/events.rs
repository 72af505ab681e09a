//! # Event Bus System
//!
//! Typed, decoupled notifications from the synchronization engine to whatever
//! UI or host is listening, built on `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **Event Types**: [`CoreEvent`] wraps one enum per domain ([`SyncEvent`],
//!   [`ChallengeEvent`])
//! - **EventBus**: cloneable publisher handle
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐
//! │ Synchronizer ├──────────────>│           │     subscribe    ┌────────────┐
//! └──────────────┘               │ EventBus  ├─────────────────>│ Progress UI│
//! ┌──────────────┐     emit      │ (broadcast│                  └────────────┘
//! │  Challenge   ├──────────────>│  channel) │     subscribe    ┌────────────┐
//! │  Resolver    │               │           ├─────────────────>│ Host shell │
//! └──────────────┘               └───────────┘                  └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let event_bus = EventBus::new(100);
//! let mut subscriber = event_bus.subscribe();
//!
//! event_bus
//!     .emit(CoreEvent::Sync(SyncEvent::Cancelled {
//!         job_id: "job-1".to_string(),
//!         collection_type: "watched_videos".to_string(),
//!         items_processed: 12,
//!     }))
//!     .ok();
//!
//! let received = subscriber.recv().await.unwrap();
//! assert!(matches!(received, CoreEvent::Sync(SyncEvent::Cancelled { .. })));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber fell behind and missed `n`
//!   events. Non-fatal; publishers never wait for slow subscribers.
//! - **`RecvError::Closed`**: all senders dropped, treat as shutdown.
//!
//! Publishers ignore the "no subscribers" error (`emit(..).ok()`): progress is
//! advisory and a headless run has nobody listening.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Item-level progress can burst; subscribers that can't keep up receive
/// `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Sync job lifecycle and progress
    Sync(SyncEvent),
    /// Interactive verification challenge flow
    Challenge(ChallengeEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Sync(e) => e.description(),
            CoreEvent::Challenge(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Sync(SyncEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Challenge(ChallengeEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Challenge(ChallengeEvent::Detected { .. }) => EventSeverity::Warning,
            CoreEvent::Challenge(ChallengeEvent::StillPresent { .. }) => EventSeverity::Warning,
            CoreEvent::Sync(SyncEvent::Completed { .. }) => EventSeverity::Info,
            CoreEvent::Sync(SyncEvent::Cancelled { .. }) => EventSeverity::Info,
            CoreEvent::Challenge(ChallengeEvent::Resolved { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Sync Events
// ============================================================================

/// Granularity of a progress report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStage {
    /// Walking index pages
    Pages,
    /// Fetching per-item detail pages
    Details,
    /// Enumerating and reconciling lists
    Lists,
    /// Clearing memberships of records no longer in any list
    Cleanup,
}

impl ProgressStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStage::Pages => "pages",
            ProgressStage::Details => "details",
            ProgressStage::Lists => "lists",
            ProgressStage::Cleanup => "cleanup",
        }
    }
}

/// Events related to collection synchronization jobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// Sync job initiated.
    Started {
        job_id: String,
        collection_type: String,
        /// Whether this is a full or incremental sync.
        is_full_sync: bool,
        /// Whether the run continues from a saved checkpoint.
        resumed: bool,
    },
    /// Progress update at page or item granularity.
    Progress {
        job_id: String,
        stage: ProgressStage,
        current: u64,
        total: u64,
        /// Progress percentage (0-100) within the current phase.
        percent: u8,
        message: String,
        /// Sub-phase label for composite collections (e.g. "watched 1/2").
        phase: Option<String>,
    },
    /// Resume state persisted.
    CheckpointSaved {
        job_id: String,
        collection_type: String,
        page: u32,
        item_index: u32,
    },
    /// Sync finished (possibly with per-item errors).
    Completed {
        job_id: String,
        collection_type: String,
        synced: u64,
        created: u64,
        updated: u64,
        skipped: u64,
        errored: u64,
        duration_secs: u64,
    },
    /// Sync aborted on a fatal error.
    Failed {
        job_id: String,
        collection_type: String,
        message: String,
        /// Whether a checkpoint allows the run to continue later.
        resumable: bool,
    },
    /// Sync was cancelled by the user.
    Cancelled {
        job_id: String,
        collection_type: String,
        /// Number of items processed before cancellation.
        items_processed: u64,
    },
}

impl SyncEvent {
    fn description(&self) -> &str {
        match self {
            SyncEvent::Started { .. } => "Sync started",
            SyncEvent::Progress { .. } => "Sync in progress",
            SyncEvent::CheckpointSaved { .. } => "Sync checkpoint saved",
            SyncEvent::Completed { .. } => "Sync completed",
            SyncEvent::Failed { .. } => "Sync failed",
            SyncEvent::Cancelled { .. } => "Sync cancelled",
        }
    }
}

// ============================================================================
// Challenge Events
// ============================================================================

/// Events emitted while an interactive verification challenge is handled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum ChallengeEvent {
    /// A challenge page was detected; the user needs to act.
    Detected { url: String },
    /// Liveness hint from polling the session title. Never auto-confirms.
    StatusHint { url: String, likely_complete: bool },
    /// The user confirmed but the session still shows a challenge.
    StillPresent { url: String },
    /// The session content validated as the real page.
    Resolved { url: String },
    /// Resolution ended without usable content.
    Failed { url: String, reason: String },
}

impl ChallengeEvent {
    fn description(&self) -> &str {
        match self {
            ChallengeEvent::Detected { .. } => "Verification challenge detected",
            ChallengeEvent::StatusHint { .. } => "Verification status updated",
            ChallengeEvent::StillPresent { .. } => "Verification still required",
            ChallengeEvent::Resolved { .. } => "Verification completed",
            ChallengeEvent::Failed { .. } => "Verification failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Clone it to get another publisher; every `subscribe()` creates an
/// independent receiver that sees all subsequent events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified per-subscriber buffer size.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let challenge_only = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Challenge(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |f| f(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching events are currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
