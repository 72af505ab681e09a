//! User Confirmation Prompt
//!
//! Destructive list reconciliation needs an explicit yes from the user. The
//! host renders the request however it likes and answers with a boolean.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Structured summary shown to the user before destructive changes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    /// Short headline, e.g. "Apply list changes?"
    pub title: String,
    /// Number of entries that will be created
    pub to_add: usize,
    /// Number of entries that will be refreshed
    pub to_update: usize,
    /// Number of entries that will be removed
    pub to_delete: usize,
    /// Up to N display names of entries being added
    pub sample_added: Vec<String>,
    /// Up to N display names of entries being removed
    pub sample_deleted: Vec<String>,
}

impl ConfirmationRequest {
    /// Whether anything destructive or additive would happen
    pub fn has_structural_changes(&self) -> bool {
        self.to_add > 0 || self.to_delete > 0
    }
}

/// Host capability that asks the user to approve a change set
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    /// Returns `Ok(true)` only if the user explicitly approved
    async fn confirm(&self, request: &ConfirmationRequest) -> Result<bool>;
}
