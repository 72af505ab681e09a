//! # Local Store
//!
//! SQLite-backed storage for mirrored collection records and list snapshots.
//!
//! ## Overview
//!
//! This crate owns:
//! - The database pool and embedded migrations ([`db`])
//! - Domain models for records and lists ([`models`])
//! - Repository traits with SQLite implementations ([`repositories`])
//!
//! The sync engine only talks to the repository traits, so tests and other
//! hosts can substitute their own storage.

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{ListEntity, ListKind, RecordStatus, SyncedRecord};
pub use repositories::{
    ListRepository, RecordRepository, SqliteListRepository, SqliteRecordRepository,
};
