//! Site-specific content extraction
//!
//! The engine never parses markup itself. Hosts plug in a [`RecordExtractor`]
//! that knows the remote site's layout.

use crate::job::CollectionType;
use core_library::ListKind;
use serde::{Deserialize, Serialize};

/// An item reference found on an index page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteItemRef {
    /// Stable identity derived from the item URL
    pub url_identity: String,
    /// Display id shown on the index, when it differs from the URL identity
    pub best_effort_display_id: Option<String>,
    /// Detail page URL, possibly relative to the site base
    pub url: String,
}

/// Fields extracted from an item detail page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFields {
    pub identity: String,
    pub title: String,
    pub tags: Vec<String>,
    pub release_date: Option<String>,
    pub image_url: Option<String>,
}

/// A list found on a list index page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteList {
    pub id: String,
    pub name: String,
    pub kind: ListKind,
    pub url: String,
    pub item_count: Option<u32>,
    pub engagement_count: Option<u32>,
}

/// Parser for the remote site's pages
///
/// Implementations must reject challenge content: a verification page
/// yields no count, no items and no detail.
pub trait RecordExtractor: Send + Sync {
    /// Authoritative item count of `collection_type` from the profile page
    fn extract_count(&self, content: &str, collection_type: CollectionType) -> Option<u64>;

    /// Item references on one index page, in page order
    fn extract_index_items(&self, content: &str) -> Vec<RemoteItemRef>;

    /// Detail fields of one item. `fallback_identity` is used when the page
    /// does not state its own identity.
    fn extract_detail(&self, content: &str, fallback_identity: &str) -> Option<RecordFields>;

    /// Lists on one list index page
    fn extract_lists(&self, content: &str, kind: ListKind) -> Vec<RemoteList>;
}
