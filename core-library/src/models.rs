//! Domain models for mirrored collections
//!
//! Records and lists as the local store keeps them, plus the row types used
//! to map them onto SQLite columns.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::LibraryError;

// =============================================================================
// Enumerations
// =============================================================================

/// Which remote collection a record was last synced through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Watched,
    Want,
    FavoriteActor,
    /// Known only through list membership
    Listed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Watched => "watched",
            RecordStatus::Want => "want",
            RecordStatus::FavoriteActor => "favorite_actor",
            RecordStatus::Listed => "listed",
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watched" => Ok(RecordStatus::Watched),
            "want" => Ok(RecordStatus::Want),
            "favorite_actor" => Ok(RecordStatus::FavoriteActor),
            "listed" => Ok(RecordStatus::Listed),
            _ => Err(format!("Invalid record status: {}", s)),
        }
    }
}

/// Ownership of a remote list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    Owned,
    Favorited,
}

impl ListKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListKind::Owned => "owned",
            ListKind::Favorited => "favorited",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owned" => Ok(ListKind::Owned),
            "favorited" => Ok(ListKind::Favorited),
            _ => Err(format!("Invalid list kind: {}", s)),
        }
    }
}

// =============================================================================
// Synced record
// =============================================================================

/// A mirrored remote item, keyed by the identity its detail page states
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub identity: String,
    /// Identity derived from the item URL on index pages
    pub url_identity: String,
    pub title: String,
    pub status: RecordStatus,
    pub tags: Vec<String>,
    /// Unix seconds
    pub created_at: i64,
    /// Unix seconds
    pub updated_at: i64,
    pub release_date: Option<String>,
    pub source_url: String,
    pub image_url: Option<String>,
    /// Ids of the lists this record appeared in during the last completed list sync
    pub list_memberships: BTreeSet<String>,
}

impl SyncedRecord {
    pub fn new(
        identity: impl Into<String>,
        title: impl Into<String>,
        status: RecordStatus,
        source_url: impl Into<String>,
        now: i64,
    ) -> Self {
        let identity = identity.into();
        Self {
            url_identity: identity.clone(),
            identity,
            title: title.into(),
            status,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            release_date: None,
            source_url: source_url.into(),
            image_url: None,
            list_memberships: BTreeSet::new(),
        }
    }

    pub fn with_url_identity(mut self, url_identity: impl Into<String>) -> Self {
        self.url_identity = url_identity.into();
        self
    }

    pub fn is_listed(&self) -> bool {
        !self.list_memberships.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.identity.trim().is_empty() {
            return Err("Record identity cannot be empty".to_string());
        }

        if self.url_identity.trim().is_empty() {
            return Err("Record URL identity cannot be empty".to_string());
        }

        if self.source_url.trim().is_empty() {
            return Err("Record source URL cannot be empty".to_string());
        }

        if self.updated_at < self.created_at {
            return Err("Record updated_at cannot precede created_at".to_string());
        }

        Ok(())
    }
}

/// Column-level representation of [`SyncedRecord`]
///
/// Tags and memberships are stored as JSON arrays.
#[derive(Debug, Clone, FromRow)]
pub struct SyncedRecordRow {
    pub identity: String,
    pub url_identity: String,
    pub title: String,
    pub status: String,
    pub tags: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub release_date: Option<String>,
    pub source_url: String,
    pub image_url: Option<String>,
    pub list_memberships: String,
}

impl TryFrom<SyncedRecordRow> for SyncedRecord {
    type Error = LibraryError;

    fn try_from(row: SyncedRecordRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse()
            .map_err(|message| LibraryError::CorruptColumn {
                column: "synced_records.status".to_string(),
                message,
            })?;

        let tags: Vec<String> =
            serde_json::from_str(&row.tags).map_err(|e| LibraryError::CorruptColumn {
                column: "synced_records.tags".to_string(),
                message: e.to_string(),
            })?;

        let list_memberships: BTreeSet<String> = serde_json::from_str(&row.list_memberships)
            .map_err(|e| LibraryError::CorruptColumn {
                column: "synced_records.list_memberships".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            identity: row.identity,
            url_identity: row.url_identity,
            title: row.title,
            status,
            tags,
            created_at: row.created_at,
            updated_at: row.updated_at,
            release_date: row.release_date,
            source_url: row.source_url,
            image_url: row.image_url,
            list_memberships,
        })
    }
}

// =============================================================================
// List entity
// =============================================================================

/// A remote list as of the most recent list reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntity {
    pub id: String,
    pub name: String,
    pub kind: ListKind,
    pub source_url: String,
    pub item_count: Option<u32>,
    pub engagement_count: Option<u32>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ListEntity {
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("List id cannot be empty".to_string());
        }

        if self.name.trim().is_empty() {
            return Err(format!("List {} has an empty name", self.id));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ListEntityRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub source_url: String,
    pub item_count: Option<i64>,
    pub engagement_count: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ListEntityRow> for ListEntity {
    type Error = LibraryError;

    fn try_from(row: ListEntityRow) -> Result<Self, Self::Error> {
        let kind = row
            .kind
            .parse()
            .map_err(|message| LibraryError::CorruptColumn {
                column: "lists.kind".to_string(),
                message,
            })?;

        Ok(Self {
            id: row.id,
            name: row.name,
            kind,
            source_url: row.source_url,
            item_count: row.item_count.map(|c| c.max(0) as u32),
            engagement_count: row.engagement_count.map(|c| c.max(0) as u32),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            RecordStatus::Watched,
            RecordStatus::Want,
            RecordStatus::FavoriteActor,
            RecordStatus::Listed,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
        }
        assert!("archived".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn test_record_validation() {
        let mut record = SyncedRecord::new("abc-123", "Title", RecordStatus::Watched, "/v/abc", 10);
        assert!(record.validate().is_ok());
        assert!(!record.is_listed());

        record.updated_at = 5;
        assert!(record.validate().is_err());

        let blank = SyncedRecord::new(" ", "Title", RecordStatus::Want, "/v/x", 0);
        assert!(blank.validate().is_err());

        let record = SyncedRecord::new("ABC-123", "Title", RecordStatus::Want, "/v/x", 0)
            .with_url_identity("x");
        assert_eq!(record.url_identity, "x");
        assert!(record.with_url_identity("").validate().is_err());
    }

    #[test]
    fn test_row_conversion_rejects_bad_json() {
        let row = SyncedRecordRow {
            identity: "abc".to_string(),
            url_identity: "abc".to_string(),
            title: "T".to_string(),
            status: "watched".to_string(),
            tags: "not json".to_string(),
            created_at: 0,
            updated_at: 0,
            release_date: None,
            source_url: "/v/abc".to_string(),
            image_url: None,
            list_memberships: "[]".to_string(),
        };

        match SyncedRecord::try_from(row) {
            Err(LibraryError::CorruptColumn { column, .. }) => {
                assert_eq!(column, "synced_records.tags")
            }
            other => panic!("expected CorruptColumn, got {:?}", other),
        }
    }

    #[test]
    fn test_list_row_conversion() {
        let row = ListEntityRow {
            id: "l-1".to_string(),
            name: "Noir".to_string(),
            kind: "favorited".to_string(),
            source_url: "/lists/l-1".to_string(),
            item_count: Some(12),
            engagement_count: None,
            created_at: 1,
            updated_at: 2,
        };

        let list = ListEntity::try_from(row).unwrap();
        assert_eq!(list.kind, ListKind::Favorited);
        assert_eq!(list.item_count, Some(12));
    }
}
