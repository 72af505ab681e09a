//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the individual
//! workspace crates. Host applications can depend on `collection-mirror`,
//! enable `desktop-shims` and reach the sync engine through the re-exported
//! `core-service` façade without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
