//! # List Reconciliation
//!
//! Mirrors the user's owned and favorited lists. The local list table is
//! replaced by the remote index, every list's items are synced like a
//! collection, and record memberships are rebuilt from what was seen.
//!
//! Adding or deleting lists needs explicit user confirmation, unless the run
//! resumes an already-confirmed reconciliation.

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::collection::{ItemOutcome, ItemSyncer, RunContext, StatusUpdate};
use crate::extractor::{RecordExtractor, RemoteList};
use crate::fetch::FetchLayer;
use crate::job::SyncCounters;
use crate::{Result, SyncError};
use bridge_traits::{Clock, ConfirmationPrompt, ConfirmationRequest};
use core_library::{ListEntity, ListKind, ListRepository, RecordRepository};
use core_runtime::config::SiteConfig;
use core_runtime::events::ProgressStage;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// identity → ids of the lists it appeared in
pub type Memberships = BTreeMap<String, BTreeSet<String>>;

// ============================================================================
// Diff
// ============================================================================

/// Three-way comparison of the stored list snapshot against the remote index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListDiff {
    pub to_add: Vec<RemoteList>,
    pub to_update: Vec<RemoteList>,
    pub to_delete: Vec<ListEntity>,
}

impl ListDiff {
    /// Compare by list id. Remote order is kept for additions and updates.
    pub fn compute(local: &[ListEntity], remote: &[RemoteList]) -> Self {
        let local_ids: HashSet<&str> = local.iter().map(|l| l.id.as_str()).collect();
        let remote_ids: HashSet<&str> = remote.iter().map(|l| l.id.as_str()).collect();

        let (to_update, to_add) = remote
            .iter()
            .cloned()
            .partition(|list| local_ids.contains(list.id.as_str()));

        let to_delete = local
            .iter()
            .filter(|list| !remote_ids.contains(list.id.as_str()))
            .cloned()
            .collect();

        Self {
            to_add,
            to_update,
            to_delete,
        }
    }

    pub fn has_structural_changes(&self) -> bool {
        !self.to_add.is_empty() || !self.to_delete.is_empty()
    }

    pub fn confirmation_request(&self, sample_size: usize) -> ConfirmationRequest {
        ConfirmationRequest {
            title: "Apply list changes?".to_string(),
            to_add: self.to_add.len(),
            to_update: self.to_update.len(),
            to_delete: self.to_delete.len(),
            sample_added: self
                .to_add
                .iter()
                .take(sample_size)
                .map(|l| l.name.clone())
                .collect(),
            sample_deleted: self
                .to_delete
                .iter()
                .take(sample_size)
                .map(|l| l.name.clone())
                .collect(),
        }
    }
}

// ============================================================================
// Reconciler
// ============================================================================

/// Summary of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListRun {
    pub total_lists: u32,
    pub lists_added: usize,
    pub lists_deleted: usize,
    pub memberships_written: usize,
    pub orphans_cleared: usize,
}

/// Where inside the list walk a checkpoint points
struct ListPosition<'a> {
    list: &'a RemoteList,
    list_index: u32,
    total_lists: u32,
    total_pages: u32,
}

pub struct ListReconciler {
    items: Arc<ItemSyncer>,
    fetch: Arc<FetchLayer>,
    extractor: Arc<dyn RecordExtractor>,
    records: Arc<dyn RecordRepository>,
    lists: Arc<dyn ListRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    prompt: Option<Arc<dyn ConfirmationPrompt>>,
    site: SiteConfig,
    clock: Arc<dyn Clock>,
    page_size: u32,
    page_cap: u32,
    sample_size: usize,
}

impl ListReconciler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        items: Arc<ItemSyncer>,
        fetch: Arc<FetchLayer>,
        extractor: Arc<dyn RecordExtractor>,
        records: Arc<dyn RecordRepository>,
        lists: Arc<dyn ListRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        prompt: Option<Arc<dyn ConfirmationPrompt>>,
        site: SiteConfig,
        clock: Arc<dyn Clock>,
        page_size: u32,
        page_cap: u32,
        sample_size: usize,
    ) -> Self {
        Self {
            items,
            fetch,
            extractor,
            records,
            lists,
            checkpoints,
            prompt,
            site,
            clock,
            page_size: page_size.max(1),
            page_cap: page_cap.max(1),
            sample_size,
        }
    }

    #[instrument(skip_all, fields(job_id = %ctx.job_id))]
    pub async fn run(
        &self,
        ctx: &RunContext,
        checkpoint: Option<Checkpoint>,
        counters: &mut SyncCounters,
    ) -> Result<ListRun> {
        let remote = self.enumerate(ctx).await?;
        let local = self.lists.get_all().await?;
        let diff = ListDiff::compute(&local, &remote);
        info!(
            remote = remote.len(),
            add = diff.to_add.len(),
            update = diff.to_update.len(),
            delete = diff.to_delete.len(),
            "List index compared"
        );

        let resume = match checkpoint {
            Some(cp) => {
                let position = cp
                    .current_list_id
                    .as_deref()
                    .and_then(|id| remote.iter().position(|list| list.id == id));
                match position {
                    Some(position) => Some((position, cp)),
                    None => {
                        info!("Checkpointed list no longer exists, starting over");
                        self.checkpoints
                            .clear_if_owned(ctx.collection_type, &ctx.user_identity)
                            .await?;
                        *counters = SyncCounters::default();
                        None
                    }
                }
            }
            None => None,
        };

        if resume.is_none() && diff.has_structural_changes() {
            self.confirm(&diff).await?;
        }

        self.write_snapshot(&local, &remote).await;

        let (start_list, mut memberships) = match &resume {
            Some((position, cp)) => (*position, cp.memberships.clone()),
            None => (0, Memberships::new()),
        };
        let total_lists = remote.len() as u32;

        for (list_index, list) in remote.iter().enumerate().skip(start_list) {
            if list.item_count == Some(0) {
                debug!(list = %list.id, "Skipping empty list");
                continue;
            }

            ctx.progress.report(
                ProgressStage::Lists,
                list_index as u64 + 1,
                total_lists as u64,
                format!("List {} of {}: {}", list_index + 1, total_lists, list.name),
            );

            let resume_at = resume
                .as_ref()
                .filter(|(position, _)| *position == list_index)
                .map(|(_, cp)| (cp.current_page.max(1), cp.current_item_index));

            self.sync_list(
                ctx,
                list,
                list_index as u32,
                total_lists,
                resume_at,
                &mut memberships,
                counters,
            )
            .await?;
        }

        let memberships_written = self.write_memberships(ctx, &memberships).await?;
        let orphans_cleared = self.clear_orphans(ctx, &memberships).await?;

        Ok(ListRun {
            total_lists,
            lists_added: diff.to_add.len(),
            lists_deleted: diff.to_delete.len(),
            memberships_written,
            orphans_cleared,
        })
    }

    /// Owned then favorited lists, until an empty page or the page cap
    async fn enumerate(&self, ctx: &RunContext) -> Result<Vec<RemoteList>> {
        let mut lists = Vec::new();
        let mut seen = HashSet::new();

        let kinds = [
            (ListKind::Owned, &self.site.owned_lists_url),
            (ListKind::Favorited, &self.site.favorited_lists_url),
        ];

        for (kind, template) in kinds {
            for page in 1..=self.page_cap {
                if ctx.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }

                let url = self.site.render(template, Some(page), None);
                let fetched = self.fetch.fetch(&url, &ctx.cancel).await?;

                if fetched.status == 401 || fetched.status == 403 {
                    return Err(SyncError::NotAuthenticatedOrStructureChanged(format!(
                        "{} list index answered HTTP {}",
                        kind, fetched.status
                    )));
                }
                if !fetched.is_success() {
                    return Err(SyncError::Network(format!(
                        "{} list index page {} answered HTTP {}",
                        kind, page, fetched.status
                    )));
                }

                let found = self.extractor.extract_lists(&fetched.content, kind);
                if found.is_empty() {
                    if page == 1 && kind == ListKind::Owned {
                        return Err(SyncError::NotAuthenticatedOrStructureChanged(
                            "first owned list index page is empty".to_string(),
                        ));
                    }
                    break;
                }

                debug!(%kind, page, found = found.len(), "List index page parsed");
                for list in found {
                    if seen.insert(list.id.clone()) {
                        lists.push(list);
                    }
                }

                ctx.pause(ctx.pacing.page_delay).await;
            }
        }

        Ok(lists)
    }

    async fn confirm(&self, diff: &ListDiff) -> Result<()> {
        let request = diff.confirmation_request(self.sample_size);

        let approved = match &self.prompt {
            Some(prompt) => prompt.confirm(&request).await?,
            None => {
                warn!("List changes need confirmation but no prompt is configured");
                false
            }
        };

        if approved {
            Ok(())
        } else {
            info!(
                add = request.to_add,
                delete = request.to_delete,
                "List changes declined"
            );
            Err(SyncError::ConfirmationDeclined)
        }
    }

    /// Best effort; a failed write leaves the previous snapshot in place
    async fn write_snapshot(&self, local: &[ListEntity], remote: &[RemoteList]) {
        let now = self.clock.unix_timestamp();
        let created: HashMap<&str, i64> = local
            .iter()
            .map(|list| (list.id.as_str(), list.created_at))
            .collect();

        let snapshot: Vec<ListEntity> = remote
            .iter()
            .map(|list| ListEntity {
                id: list.id.clone(),
                name: list.name.clone(),
                kind: list.kind,
                source_url: self.site.absolute_url(&list.url),
                item_count: list.item_count,
                engagement_count: list.engagement_count,
                created_at: created.get(list.id.as_str()).copied().unwrap_or(now),
                updated_at: now,
            })
            .collect();

        if let Err(e) = self.lists.replace_all(&snapshot).await {
            warn!(error = %e, "Failed to store list snapshot");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_list(
        &self,
        ctx: &RunContext,
        list: &RemoteList,
        list_index: u32,
        total_lists: u32,
        resume_at: Option<(u32, u32)>,
        memberships: &mut Memberships,
        counters: &mut SyncCounters,
    ) -> Result<()> {
        // The cap only bounds lists whose size the index did not state
        let total_pages = match list.item_count {
            Some(count) => count.div_ceil(self.page_size),
            None => self.page_cap,
        };
        let position = ListPosition {
            list,
            list_index,
            total_lists,
            total_pages,
        };
        let (start_page, start_index) = resume_at.unwrap_or((1, 0));

        for page in start_page..=total_pages {
            let first_index = if page == start_page { start_index } else { 0 };

            if ctx.is_cancelled() {
                self.save_checkpoint(ctx, &position, page, first_index, memberships, counters)
                    .await;
                return Err(SyncError::Cancelled);
            }

            let url = self
                .site
                .render(&self.site.list_items_url, Some(page), Some(&list.id));
            let fetched = match self.fetch.fetch(&url, &ctx.cancel).await {
                Ok(fetched) => fetched,
                Err(e) if e.is_resumable() => {
                    self.save_checkpoint(ctx, &position, page, first_index, memberships, counters)
                        .await;
                    return Err(e);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(list = %list.id, page, error = %e, "List page failed");
                    counters.errored += 1;
                    ctx.pause(ctx.pacing.page_delay).await;
                    continue;
                }
            };

            if !fetched.is_success() {
                warn!(list = %list.id, page, status = fetched.status, "List page not available");
                counters.errored += 1;
                ctx.pause(ctx.pacing.page_delay).await;
                continue;
            }

            let items = self.extractor.extract_index_items(&fetched.content);
            if items.is_empty() {
                break;
            }

            for (index, item) in items.iter().enumerate().skip(first_index as usize) {
                if ctx.is_cancelled() {
                    self.save_checkpoint(ctx, &position, page, index as u32, memberships, counters)
                        .await;
                    return Err(SyncError::Cancelled);
                }

                let outcome = match self
                    .items
                    .sync(item, StatusUpdate::ListedIfNew, &ctx.cancel)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) if e.is_resumable() => {
                        self.save_checkpoint(
                            ctx,
                            &position,
                            page,
                            index as u32,
                            memberships,
                            counters,
                        )
                        .await;
                        return Err(e);
                    }
                    Err(e) => return Err(e),
                };

                let identity = match &outcome {
                    ItemOutcome::Synced { identity, .. } => identity.clone(),
                    ItemOutcome::Errored => self
                        .records
                        .identity_for_url(&item.url_identity)
                        .await?
                        .unwrap_or_else(|| item.url_identity.clone()),
                };
                memberships
                    .entry(identity)
                    .or_default()
                    .insert(list.id.clone());
                outcome.tally(counters);

                if index + 1 < items.len() {
                    ctx.pause(ctx.pacing.item_delay).await;
                }
            }

            if list.item_count.is_none() && (items.len() as u32) < self.page_size {
                break;
            }
            if page < total_pages {
                ctx.pause(ctx.pacing.page_delay).await;
            }
        }

        Ok(())
    }

    async fn write_memberships(
        &self,
        ctx: &RunContext,
        memberships: &Memberships,
    ) -> Result<usize> {
        ctx.progress.report(
            ProgressStage::Cleanup,
            0,
            memberships.len() as u64,
            "Writing list memberships",
        );

        let now = self.clock.unix_timestamp();
        let mut written = 0;
        for (identity, lists) in memberships {
            if self
                .records
                .set_list_memberships(identity, lists, now)
                .await?
            {
                written += 1;
            } else {
                debug!(%identity, "No local record for list member");
            }
        }
        Ok(written)
    }

    /// Clear memberships of records that no list contains any more
    async fn clear_orphans(&self, ctx: &RunContext, memberships: &Memberships) -> Result<usize> {
        let now = self.clock.unix_timestamp();
        let orphans: Vec<String> = self
            .records
            .list_all()
            .await?
            .into_iter()
            .filter(|record| record.is_listed() && !memberships.contains_key(&record.identity))
            .map(|record| record.identity)
            .collect();

        let empty = BTreeSet::new();
        for (done, identity) in orphans.iter().enumerate() {
            if ctx.is_cancelled() {
                if let Err(e) = self
                    .checkpoints
                    .clear_if_owned(ctx.collection_type, &ctx.user_identity)
                    .await
                {
                    warn!(error = %e, "Failed to clear checkpoint");
                }
                return Err(SyncError::Cancelled);
            }

            self.records
                .set_list_memberships(identity, &empty, now)
                .await?;
            ctx.progress.report(
                ProgressStage::Cleanup,
                done as u64 + 1,
                orphans.len() as u64,
                "Clearing stale memberships",
            );
        }

        if !orphans.is_empty() {
            info!(cleared = orphans.len(), "Cleared stale list memberships");
        }
        Ok(orphans.len())
    }

    async fn save_checkpoint(
        &self,
        ctx: &RunContext,
        position: &ListPosition<'_>,
        page: u32,
        item_index: u32,
        memberships: &Memberships,
        counters: &SyncCounters,
    ) {
        let mut checkpoint = ctx.checkpoint(*counters, self.clock.now());
        checkpoint.current_page = page;
        checkpoint.current_item_index = item_index;
        checkpoint.total_pages = position.total_pages;
        checkpoint.total_items = position.list.item_count.map(u64::from).unwrap_or(0);
        checkpoint.current_list_id = Some(position.list.id.clone());
        checkpoint.current_list_index = Some(position.list_index);
        checkpoint.total_lists = Some(position.total_lists);
        checkpoint.memberships = memberships.clone();

        match self.checkpoints.save(&checkpoint).await {
            Ok(()) => ctx.progress.checkpoint_saved(page, item_index),
            Err(e) => error!(
                list = %position.list.id,
                page,
                item_index,
                error = %e,
                "Failed to save checkpoint"
            ),
        }
    }
}
