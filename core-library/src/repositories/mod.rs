//! # Repository Pattern Implementation
//!
//! Data access for the local collection store.
//!
//! ## Architecture
//!
//! - Traits define the interface the sync engine depends on
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `RecordRepository` - Mirrored records keyed by identity
//! - `ListRepository` - The snapshot of remote lists, replaced wholesale

pub mod list;
pub mod record;

pub use list::{ListRepository, SqliteListRepository};
pub use record::{RecordRepository, SqliteRecordRepository};
