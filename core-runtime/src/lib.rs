//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the collection mirror crates:
//! - Logging and tracing setup
//! - Configuration (`CoreConfig`, `SiteConfig`)
//! - Typed event bus for sync progress and challenge notifications

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
