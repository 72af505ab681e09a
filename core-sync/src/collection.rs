//! # Paginated Collection Synchronizer
//!
//! Mirrors one paginated remote collection (watched, want, actor favorites)
//! into the record store.
//!
//! ## Workflow
//!
//! 1. Read the authoritative item count from the profile page
//! 2. Walk index pages from the checkpointed page (or 1) to the last page
//! 3. For each item, fetch its detail page, extract and upsert the record
//! 4. In incremental mode, stop once enough consecutive items are already known
//!
//! Every cancellation point and every unresolved challenge saves a checkpoint
//! at the exact page and item that was about to be processed.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::extractor::{RecordExtractor, RemoteItemRef};
use crate::fetch::FetchLayer;
use crate::job::{CollectionType, SyncCounters, SyncJobId, SyncMode};
use crate::progress::ProgressReporter;
use crate::{Result, SyncError};
use bridge_traits::Clock;
use core_library::{LibraryError, RecordRepository, RecordStatus, SyncedRecord};
use core_runtime::config::SiteConfig;
use core_runtime::events::ProgressStage;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

// ============================================================================
// Run context
// ============================================================================

/// Request pacing for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Pause between item detail fetches
    pub item_delay: Duration,
    /// Pause between index pages
    pub page_delay: Duration,
}

/// State shared by every stage of one job
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: SyncJobId,
    /// Collection the job was started for
    pub collection_type: CollectionType,
    pub user_identity: String,
    pub mode: SyncMode,
    pub cancel: CancellationToken,
    pub progress: ProgressReporter,
    pub pacing: Pacing,
}

impl RunContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `duration`, returning early on cancellation
    pub async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.cancel.cancelled() => {}
        }
    }

    pub(crate) fn checkpoint(
        &self,
        counters: SyncCounters,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Checkpoint {
        Checkpoint {
            collection_type: self.collection_type,
            user_identity: self.user_identity.clone(),
            mode: self.mode,
            phase: None,
            current_page: 1,
            current_item_index: 0,
            total_pages: 0,
            total_items: 0,
            counters,
            timestamp: now,
            current_list_id: None,
            current_list_index: None,
            total_lists: None,
            memberships: BTreeMap::new(),
        }
    }
}

// ============================================================================
// Item sync
// ============================================================================

/// How a synced item's status is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusUpdate {
    /// Overwrite the status
    Set(RecordStatus),
    /// Keep an existing record's status; new records become `Listed`
    ListedIfNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ItemOutcome {
    Synced { identity: String, created: bool },
    Errored,
}

impl ItemOutcome {
    pub(crate) fn tally(&self, counters: &mut SyncCounters) {
        match self {
            ItemOutcome::Synced { created, .. } => {
                counters.synced += 1;
                if *created {
                    counters.created += 1;
                } else {
                    counters.updated += 1;
                }
            }
            ItemOutcome::Errored => counters.errored += 1,
        }
    }
}

/// Fetch, extract and upsert of a single item
pub(crate) struct ItemSyncer {
    fetch: Arc<FetchLayer>,
    extractor: Arc<dyn RecordExtractor>,
    records: Arc<dyn RecordRepository>,
    site: SiteConfig,
    clock: Arc<dyn Clock>,
}

impl ItemSyncer {
    pub(crate) fn new(
        fetch: Arc<FetchLayer>,
        extractor: Arc<dyn RecordExtractor>,
        records: Arc<dyn RecordRepository>,
        site: SiteConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetch,
            extractor,
            records,
            site,
            clock,
        }
    }

    /// Returns `Err` only for errors that end the run
    pub(crate) async fn sync(
        &self,
        item: &RemoteItemRef,
        update: StatusUpdate,
        cancel: &CancellationToken,
    ) -> Result<ItemOutcome> {
        let url = self.site.absolute_url(&item.url);

        let page = match self.fetch.fetch(&url, cancel).await {
            Ok(page) => page,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(identity = %item.url_identity, error = %e, "Item fetch failed");
                return Ok(ItemOutcome::Errored);
            }
        };

        if !page.is_success() {
            warn!(identity = %item.url_identity, status = page.status, "Item page not available");
            return Ok(ItemOutcome::Errored);
        }

        if self.fetch.resolver().detector().is_challenge(&page.content) {
            warn!(identity = %item.url_identity, "Item page is a verification challenge");
            return Ok(ItemOutcome::Errored);
        }

        let Some(fields) = self
            .extractor
            .extract_detail(&page.content, &item.url_identity)
        else {
            let err = SyncError::Parse {
                url,
                message: "no record fields found".to_string(),
            };
            warn!(identity = %item.url_identity, error = %err, "Skipping item");
            return Ok(ItemOutcome::Errored);
        };

        let now = self.clock.unix_timestamp();
        let existing = self.records.get(&fields.identity).await?;
        let created = existing.is_none();

        let record = match existing {
            Some(mut record) => {
                record.title = fields.title;
                record.tags = fields.tags;
                record.release_date = fields.release_date;
                record.image_url = fields.image_url;
                record.source_url = url;
                record.url_identity = item.url_identity.clone();
                if let StatusUpdate::Set(status) = update {
                    record.status = status;
                }
                record.updated_at = now.max(record.created_at);
                record
            }
            None => {
                let status = match update {
                    StatusUpdate::Set(status) => status,
                    StatusUpdate::ListedIfNew => RecordStatus::Listed,
                };
                let mut record =
                    SyncedRecord::new(fields.identity.as_str(), fields.title, status, url, now)
                        .with_url_identity(item.url_identity.as_str());
                record.tags = fields.tags;
                record.release_date = fields.release_date;
                record.image_url = fields.image_url;
                record
            }
        };

        match self.records.upsert(&record).await {
            Ok(()) => {}
            Err(LibraryError::InvalidInput { message, .. }) => {
                warn!(identity = %item.url_identity, %message, "Extracted record rejected");
                return Ok(ItemOutcome::Errored);
            }
            Err(e) => return Err(e.into()),
        }

        debug!(identity = %record.identity, created, "Item synced");
        Ok(ItemOutcome::Synced {
            identity: record.identity,
            created,
        })
    }
}

// ============================================================================
// Synchronizer
// ============================================================================

/// Outcome of one paginated collection walk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionRun {
    /// Incremental run stopped at the known-item tolerance
    pub early_exit: bool,
    pub total_items: u64,
    pub total_pages: u32,
}

pub struct PaginatedSynchronizer {
    items: Arc<ItemSyncer>,
    fetch: Arc<FetchLayer>,
    extractor: Arc<dyn RecordExtractor>,
    records: Arc<dyn RecordRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    site: SiteConfig,
    clock: Arc<dyn Clock>,
    page_size: u32,
    incremental_tolerance: u32,
}

impl PaginatedSynchronizer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        items: Arc<ItemSyncer>,
        fetch: Arc<FetchLayer>,
        extractor: Arc<dyn RecordExtractor>,
        records: Arc<dyn RecordRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        site: SiteConfig,
        clock: Arc<dyn Clock>,
        page_size: u32,
        incremental_tolerance: u32,
    ) -> Self {
        Self {
            items,
            fetch,
            extractor,
            records,
            checkpoints,
            site,
            clock,
            page_size: page_size.max(1),
            incremental_tolerance: incremental_tolerance.max(1),
        }
    }

    /// Walk `collection_type`, continuing from `checkpoint` when given.
    ///
    /// `counters` accumulates across phases and is written into every
    /// checkpoint saved on the way.
    #[instrument(skip_all, fields(job_id = %ctx.job_id, collection_type = %collection_type))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        collection_type: CollectionType,
        checkpoint: Option<&Checkpoint>,
        counters: &mut SyncCounters,
    ) -> Result<CollectionRun> {
        let (Some(template), Some(status)) = (
            self.index_template(collection_type),
            collection_type.record_status(),
        ) else {
            return Err(SyncError::InvalidCollectionType(
                collection_type.to_string(),
            ));
        };

        let total_items = self.resolve_count(ctx, collection_type).await?;
        if total_items == 0 {
            info!("Remote collection is empty");
            return Ok(CollectionRun::default());
        }

        let total_pages = total_items.div_ceil(self.page_size as u64) as u32;
        let known = match ctx.mode {
            SyncMode::Incremental => self.records.url_identities_with_status(status).await?,
            SyncMode::Full => HashSet::new(),
        };

        let resume_page = checkpoint.map(|cp| cp.current_page.max(1));
        let start_page = resume_page.unwrap_or(1);
        info!(
            total_items,
            total_pages,
            start_page,
            known = known.len(),
            "Walking collection"
        );

        let phase = (ctx.collection_type != collection_type).then_some(collection_type);
        let scope = CheckpointScope {
            phase,
            total_pages,
            total_items,
        };

        let mut consecutive_known: u32 = 0;

        for page in start_page..=total_pages {
            let start_index = match checkpoint {
                Some(cp) if Some(page) == resume_page => cp.current_item_index,
                _ => 0,
            };

            if ctx.is_cancelled() {
                self.save_checkpoint(ctx, &scope, page, start_index, counters).await;
                return Err(SyncError::Cancelled);
            }

            ctx.progress.report(
                ProgressStage::Pages,
                page as u64,
                total_pages as u64,
                format!("Page {} of {}", page, total_pages),
            );

            let url = self.site.render(template, Some(page), None);
            let fetched = match self.fetch.fetch(&url, &ctx.cancel).await {
                Ok(fetched) => fetched,
                Err(e) if e.is_resumable() => {
                    self.save_checkpoint(ctx, &scope, page, start_index, counters).await;
                    return Err(e);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(page, error = %e, "Index page failed");
                    counters.errored += 1;
                    ctx.pause(ctx.pacing.page_delay).await;
                    continue;
                }
            };

            if !fetched.is_success() {
                warn!(page, status = fetched.status, "Index page not available");
                counters.errored += 1;
                ctx.pause(ctx.pacing.page_delay).await;
                continue;
            }

            let items = self.extractor.extract_index_items(&fetched.content);
            debug!(page, items = items.len(), start_index, "Index page parsed");

            for (index, item) in items.iter().enumerate().skip(start_index as usize) {
                if ctx.is_cancelled() {
                    self.save_checkpoint(ctx, &scope, page, index as u32, counters)
                        .await;
                    return Err(SyncError::Cancelled);
                }

                if known.contains(&item.url_identity) {
                    counters.skipped += 1;
                    consecutive_known += 1;
                    if consecutive_known >= self.incremental_tolerance {
                        info!(page, consecutive_known, "Reached known items, stopping early");
                        return Ok(CollectionRun {
                            early_exit: true,
                            total_items,
                            total_pages,
                        });
                    }
                    continue;
                }
                consecutive_known = 0;

                let outcome = match self
                    .items
                    .sync(item, StatusUpdate::Set(status), &ctx.cancel)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_resumable() => {
                        self.save_checkpoint(ctx, &scope, page, index as u32, counters)
                            .await;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };
                outcome.tally(counters);

                let position = (page as u64 - 1) * self.page_size as u64 + index as u64 + 1;
                ctx.progress.report(
                    ProgressStage::Details,
                    position.min(total_items),
                    total_items,
                    format!("Item {} of {}", position.min(total_items), total_items),
                );

                if index + 1 < items.len() {
                    ctx.pause(ctx.pacing.item_delay).await;
                }
            }

            if page < total_pages {
                ctx.pause(ctx.pacing.page_delay).await;
            }
        }

        info!(
            synced = counters.synced,
            skipped = counters.skipped,
            errored = counters.errored,
            "Collection walk finished"
        );
        Ok(CollectionRun {
            early_exit: false,
            total_items,
            total_pages,
        })
    }

    fn index_template(&self, collection_type: CollectionType) -> Option<&str> {
        match collection_type {
            CollectionType::WatchedVideos => Some(&self.site.watched_index_url),
            CollectionType::WantVideos => Some(&self.site.want_index_url),
            CollectionType::ActorFavorites => Some(&self.site.actor_favorites_url),
            CollectionType::AllVideos | CollectionType::Lists => None,
        }
    }

    async fn resolve_count(
        &self,
        ctx: &RunContext,
        collection_type: CollectionType,
    ) -> Result<u64> {
        let url = self.site.render(&self.site.profile_url, None, None);
        let profile = self.fetch.fetch(&url, &ctx.cancel).await?;

        if profile.status == 401 || profile.status == 403 {
            return Err(SyncError::NotAuthenticatedOrStructureChanged(format!(
                "profile page answered HTTP {}",
                profile.status
            )));
        }

        if !profile.is_success() {
            return Err(SyncError::Network(format!(
                "profile page answered HTTP {}",
                profile.status
            )));
        }

        self.extractor
            .extract_count(&profile.content, collection_type)
            .ok_or_else(|| {
                SyncError::NotAuthenticatedOrStructureChanged(format!(
                    "no {} count on profile page",
                    collection_type
                ))
            })
    }

    async fn save_checkpoint(
        &self,
        ctx: &RunContext,
        scope: &CheckpointScope,
        page: u32,
        item_index: u32,
        counters: &SyncCounters,
    ) {
        let mut checkpoint = ctx.checkpoint(*counters, self.clock.now());
        checkpoint.phase = scope.phase;
        checkpoint.current_page = page;
        checkpoint.current_item_index = item_index;
        checkpoint.total_pages = scope.total_pages;
        checkpoint.total_items = scope.total_items;

        match self.checkpoints.save(&checkpoint).await {
            Ok(()) => ctx.progress.checkpoint_saved(page, item_index),
            Err(e) => error!(page, item_index, error = %e, "Failed to save checkpoint"),
        }
    }
}

struct CheckpointScope {
    phase: Option<CollectionType>,
    total_pages: u32,
    total_items: u64,
}
