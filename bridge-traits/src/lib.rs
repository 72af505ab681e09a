//! # Host Bridge Traits
//!
//! Capabilities the synchronization core needs from its host but does not
//! implement itself.
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - One HTTP exchange per call
//!
//! ### Storage
//! - [`SettingsStore`](storage::SettingsStore) - Key-value preferences and the checkpoint slot
//!
//! ### User Interaction
//! - [`ChallengeSessionHost`](challenge::ChallengeSessionHost) - Visible sessions for solving verification challenges
//! - [`ConfirmationPrompt`](prompt::ConfirmationPrompt) - Yes/no approval of destructive changes
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! should convert platform errors into it and keep the messages actionable.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; implementations are shared across tasks
//! behind `Arc`.

pub mod challenge;
pub mod error;
pub mod http;
pub mod prompt;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use challenge::{ChallengeSessionHost, SessionHandle};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use prompt::{ConfirmationPrompt, ConfirmationRequest};
pub use storage::SettingsStore;
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, SystemClock};
