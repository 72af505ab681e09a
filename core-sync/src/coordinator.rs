//! # Sync Orchestrator
//!
//! Entry point for hosts. Owns the job registry, decides whether a run
//! resumes from the stored checkpoint, dispatches to the collection
//! synchronizer or the list reconciler and turns the outcome into one
//! [`SyncReport`].
//!
//! ## Single flight
//!
//! At most one job runs per (collection type, user). The registry is checked
//! and written under one lock, so a second `start` fails fast with
//! [`SyncError::AlreadyRunning`] and touches nothing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let orchestrator = SyncOrchestrator::new(environment, site, SyncConfig::default());
//!
//! match orchestrator.start(CollectionType::WatchedVideos, SyncMode::Incremental, None).await? {
//!     StartOutcome::ResumeDecisionRequired(summary) => ask_user(summary),
//!     StartOutcome::Finished(report) => println!("{:?}", report.status),
//! }
//! ```

use crate::challenge::{ChallengeControl, ChallengeDetector, ChallengeResolver};
use crate::checkpoint::{
    Checkpoint, CheckpointStore, CheckpointSummary, SettingsCheckpointStore,
    DEFAULT_CHECKPOINT_TTL_HOURS,
};
use crate::collection::{ItemSyncer, PaginatedSynchronizer, Pacing, RunContext};
use crate::error::FailureKind;
use crate::extractor::RecordExtractor;
use crate::fetch::{FetchLayer, FetchPolicy};
use crate::job::{CollectionType, SyncCounters, SyncJob, SyncJobId, SyncMode, SyncStatus};
use crate::lists::ListReconciler;
use crate::progress::ProgressReporter;
use crate::{Result, SyncError};
use bridge_traits::{
    ChallengeSessionHost, Clock, ConfirmationPrompt, HttpClient, SettingsStore,
};
use core_library::{ListRepository, RecordRepository};
use core_runtime::config::SiteConfig;
use core_runtime::events::{EventBus, SyncEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// User setting overriding the per-item request delay, in milliseconds
pub const REQUEST_DELAY_SETTING_KEY: &str = "sync.request_delay_ms";

// ============================================================================
// Configuration
// ============================================================================

/// Engine tunables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Items per remote index page
    pub page_size: u32,
    /// Pause between item detail fetches
    pub request_delay: Duration,
    /// Pause between index pages
    pub page_delay: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
    /// Consecutive known items that end an incremental run
    pub incremental_tolerance: u32,
    /// Maximum pages walked per list index kind, and per list whose size
    /// the index does not state
    pub list_page_cap: u32,
    /// Names per bucket shown in the list confirmation
    pub confirmation_sample_size: usize,
    pub checkpoint_ttl: Duration,
    pub challenge_poll_interval: Duration,
    pub user_agent: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let fetch = FetchPolicy::default();
        Self {
            page_size: 20,
            request_delay: Duration::from_millis(1500),
            page_delay: Duration::from_millis(3000),
            max_attempts: fetch.max_attempts,
            retry_delay: fetch.retry_delay,
            request_timeout: fetch.request_timeout,
            incremental_tolerance: 20,
            list_page_cap: 50,
            confirmation_sample_size: 5,
            checkpoint_ttl: Duration::from_secs(DEFAULT_CHECKPOINT_TTL_HOURS as u64 * 3600),
            challenge_poll_interval: crate::challenge::DEFAULT_POLL_INTERVAL,
            user_agent: fetch.user_agent,
        }
    }
}

impl SyncConfig {
    fn fetch_policy(&self, site: &SiteConfig) -> FetchPolicy {
        let user_agent = if site.user_agent.trim().is_empty() {
            self.user_agent.clone()
        } else {
            site.user_agent.clone()
        };

        FetchPolicy {
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
            request_timeout: self.request_timeout,
            user_agent,
        }
    }
}

/// Host capabilities and stores the orchestrator runs against
pub struct SyncEnvironment {
    pub http_client: Arc<dyn HttpClient>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub challenge_host: Option<Arc<dyn ChallengeSessionHost>>,
    pub confirmation_prompt: Option<Arc<dyn ConfirmationPrompt>>,
    pub extractor: Arc<dyn RecordExtractor>,
    pub records: Arc<dyn RecordRepository>,
    pub lists: Arc<dyn ListRepository>,
    pub event_bus: EventBus,
    pub clock: Arc<dyn Clock>,
}

// ============================================================================
// Results
// ============================================================================

/// Terminal summary of one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub job_id: SyncJobId,
    pub collection_type: CollectionType,
    pub mode: SyncMode,
    /// Completed, Failed or Cancelled
    pub status: SyncStatus,
    pub counters: SyncCounters,
    pub message: Option<String>,
    pub failure: Option<FailureKind>,
    /// Incremental run stopped at already-known items
    pub early_exit: bool,
    /// A checkpoint is stored for this collection
    pub resumable: bool,
    pub duration_secs: u64,
}

impl SyncReport {
    /// Completed, but some pages or items failed along the way
    pub fn has_errors(&self) -> bool {
        self.counters.errored > 0
    }

    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A checkpoint exists; call `start` again with `resume` set
    ResumeDecisionRequired(CheckpointSummary),
    Finished(SyncReport),
}

// ============================================================================
// Registry
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct JobKey {
    collection_type: CollectionType,
    user_identity: String,
}

struct ActiveSync {
    job_id: SyncJobId,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
}

/// What the dispatched run produced on success
#[derive(Debug, Default)]
struct RunSummary {
    early_exit: bool,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct SyncOrchestrator {
    config: SyncConfig,
    site: SiteConfig,
    settings: Arc<dyn SettingsStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    resolver: Arc<ChallengeResolver>,
    synchronizer: PaginatedSynchronizer,
    reconciler: ListReconciler,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    active: Mutex<HashMap<JobKey, ActiveSync>>,
}

impl SyncOrchestrator {
    pub fn new(environment: SyncEnvironment, site: SiteConfig, config: SyncConfig) -> Self {
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(
            SettingsCheckpointStore::new(
                environment.settings_store.clone(),
                environment.clock.clone(),
            )
            .with_ttl(config.checkpoint_ttl),
        );
        Self::with_checkpoint_store(environment, site, config, checkpoints)
    }

    /// Build with a caller-supplied checkpoint store
    pub fn with_checkpoint_store(
        environment: SyncEnvironment,
        site: SiteConfig,
        config: SyncConfig,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let resolver = Arc::new(
            ChallengeResolver::new(
                environment.challenge_host.clone(),
                ChallengeDetector::new(&site.challenge_markers),
                environment.event_bus.clone(),
            )
            .with_poll_interval(config.challenge_poll_interval),
        );

        let fetch = Arc::new(FetchLayer::new(
            environment.http_client.clone(),
            config.fetch_policy(&site),
            resolver.clone(),
        ));

        let items = Arc::new(ItemSyncer::new(
            fetch.clone(),
            environment.extractor.clone(),
            environment.records.clone(),
            site.clone(),
            environment.clock.clone(),
        ));

        let synchronizer = PaginatedSynchronizer::new(
            items.clone(),
            fetch.clone(),
            environment.extractor.clone(),
            environment.records.clone(),
            checkpoints.clone(),
            site.clone(),
            environment.clock.clone(),
            config.page_size,
            config.incremental_tolerance,
        );

        let reconciler = ListReconciler::new(
            items,
            fetch,
            environment.extractor.clone(),
            environment.records.clone(),
            environment.lists.clone(),
            checkpoints.clone(),
            environment.confirmation_prompt.clone(),
            site.clone(),
            environment.clock.clone(),
            config.page_size,
            config.list_page_cap,
            config.confirmation_sample_size,
        );

        Self {
            config,
            site,
            settings: environment.settings_store,
            checkpoints,
            resolver,
            synchronizer,
            reconciler,
            event_bus: environment.event_bus,
            clock: environment.clock,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Handle for answering verification challenges
    pub fn challenge_control(&self) -> ChallengeControl {
        self.resolver.control()
    }

    /// Run a sync for `collection_type`.
    ///
    /// `resume` must be set when a checkpoint exists: `Some(true)` continues
    /// from it, `Some(false)` discards it. With `None` and a stored checkpoint
    /// nothing runs and the checkpoint summary is returned instead.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::AlreadyRunning`] if a job for this collection and
    /// user is active. Every other outcome is reported through [`SyncReport`].
    #[instrument(skip(self), fields(user = %self.site.user_identity))]
    pub async fn start(
        &self,
        collection_type: CollectionType,
        mode: SyncMode,
        resume: Option<bool>,
    ) -> Result<StartOutcome> {
        let key = self.key(collection_type);
        let job = SyncJob::new(collection_type, mode);
        let cancel = CancellationToken::new();
        let running = Arc::new(AtomicBool::new(false));

        {
            let mut active = self.active.lock().await;
            if active.contains_key(&key) {
                warn!("Sync already running");
                return Err(SyncError::AlreadyRunning {
                    collection_type: collection_type.to_string(),
                    user: self.site.user_identity.clone(),
                });
            }
            active.insert(
                key.clone(),
                ActiveSync {
                    job_id: job.id,
                    cancel: cancel.clone(),
                    running: running.clone(),
                },
            );
        }

        let outcome = self.run_job(job, resume, cancel, &running).await;

        self.active.lock().await.remove(&key);
        outcome
    }

    /// Request cooperative cancellation of a running job.
    ///
    /// Returns `false` when no job for `collection_type` is in `Running`.
    pub async fn cancel(&self, collection_type: CollectionType) -> bool {
        let active = self.active.lock().await;
        match active.get(&self.key(collection_type)) {
            Some(sync) if sync.running.load(Ordering::SeqCst) => {
                info!(job_id = %sync.job_id, %collection_type, "Cancelling sync");
                sync.cancel.cancel();
                true
            }
            _ => false,
        }
    }

    pub async fn is_running(&self, collection_type: CollectionType) -> bool {
        self.active
            .lock()
            .await
            .contains_key(&self.key(collection_type))
    }

    /// Summary of the stored checkpoint for `collection_type`, if any
    pub async fn pending_checkpoint(
        &self,
        collection_type: CollectionType,
    ) -> Result<Option<CheckpointSummary>> {
        let now = self.clock.now();
        let checkpoint = self.checkpoints.peek().await?;
        Ok(checkpoint
            .filter(|cp| self.owns(cp, collection_type))
            .filter(|cp| cp.age(now).to_std().unwrap_or_default() <= self.config.checkpoint_ttl)
            .map(|cp| cp.summary(now)))
    }

    fn key(&self, collection_type: CollectionType) -> JobKey {
        JobKey {
            collection_type,
            user_identity: self.site.user_identity.clone(),
        }
    }

    async fn run_job(
        &self,
        job: SyncJob,
        resume: Option<bool>,
        cancel: CancellationToken,
        running: &AtomicBool,
    ) -> Result<StartOutcome> {
        let started = Instant::now();
        let collection_type = job.collection_type;
        let job = job.prepare()?;

        let stored = match self
            .checkpoints
            .load(collection_type, &self.site.user_identity)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                error!(error = %e, "Failed to load checkpoint");
                let job = job.fail(e.to_string())?;
                return Ok(StartOutcome::Finished(self.failure_report(
                    &job,
                    SyncCounters::default(),
                    &e,
                    false,
                    started,
                )));
            }
        };

        let checkpoint = match (stored, resume) {
            (Some(cp), None) => {
                info!("Checkpoint found, waiting for resume decision");
                return Ok(StartOutcome::ResumeDecisionRequired(
                    cp.summary(self.clock.now()),
                ));
            }
            (Some(cp), Some(true)) => Some(cp),
            (Some(_), Some(false)) => {
                info!("Discarding checkpoint, restarting from scratch");
                self.checkpoints.clear().await?;
                None
            }
            (None, _) => None,
        };

        let mut job = job;
        job.resumed = checkpoint.is_some();
        if let Some(cp) = &checkpoint {
            job.mode = cp.mode;
        }
        let mut counters = checkpoint
            .as_ref()
            .map(|cp| cp.counters)
            .unwrap_or_default();

        let ctx = RunContext {
            job_id: job.id,
            collection_type,
            user_identity: self.site.user_identity.clone(),
            mode: job.mode,
            cancel,
            progress: ProgressReporter::new(self.event_bus.clone(), job.id, collection_type),
            pacing: self.pacing().await,
        };

        let job = job.start()?;
        running.store(true, Ordering::SeqCst);
        info!(
            job_id = %job.id,
            mode = %job.mode,
            resumed = job.resumed,
            "Sync started"
        );
        ctx.progress.emit(SyncEvent::Started {
            job_id: job.id.as_str(),
            collection_type: collection_type.to_string(),
            is_full_sync: job.mode == SyncMode::Full,
            resumed: job.resumed,
        });

        let result = self.dispatch(&ctx, checkpoint, &mut counters).await;
        running.store(false, Ordering::SeqCst);

        let report = self.finish(job, &ctx, result, counters, started).await?;
        Ok(StartOutcome::Finished(report))
    }

    async fn dispatch(
        &self,
        ctx: &RunContext,
        checkpoint: Option<Checkpoint>,
        counters: &mut SyncCounters,
    ) -> Result<RunSummary> {
        if ctx.collection_type == CollectionType::Lists {
            self.reconciler.run(ctx, checkpoint, counters).await?;
            return Ok(RunSummary::default());
        }

        let phases = ctx.collection_type.phases();
        let composite = phases.len() > 1;
        let resume_phase = checkpoint
            .as_ref()
            .map(|cp| cp.phase.unwrap_or(cp.collection_type));
        let skip = resume_phase
            .and_then(|phase| phases.iter().position(|p| *p == phase))
            .unwrap_or(0);

        let mut summary = RunSummary::default();
        for (index, phase) in phases.iter().enumerate().skip(skip) {
            let phase_ctx = if composite {
                RunContext {
                    progress: ctx.progress.with_phase(format!(
                        "{} {}/{}",
                        phase_label(*phase),
                        index + 1,
                        phases.len()
                    )),
                    ..ctx.clone()
                }
            } else {
                ctx.clone()
            };

            let phase_checkpoint = checkpoint
                .as_ref()
                .filter(|_| resume_phase == Some(*phase));

            info!(phase = %phase, "Running phase");
            let run = self
                .synchronizer
                .run(&phase_ctx, *phase, phase_checkpoint, counters)
                .await?;
            summary.early_exit |= run.early_exit;
        }

        Ok(summary)
    }

    async fn finish(
        &self,
        job: SyncJob,
        ctx: &RunContext,
        result: Result<RunSummary>,
        counters: SyncCounters,
        started: Instant,
    ) -> Result<SyncReport> {
        let collection_type = job.collection_type;

        match result {
            Ok(summary) => {
                if let Err(e) = self
                    .checkpoints
                    .clear_if_owned(collection_type, &self.site.user_identity)
                    .await
                {
                    warn!(error = %e, "Failed to clear checkpoint after completion");
                }
                let job = job.complete()?;
                let duration_secs = started.elapsed().as_secs();
                info!(
                    synced = counters.synced,
                    created = counters.created,
                    updated = counters.updated,
                    skipped = counters.skipped,
                    errored = counters.errored,
                    early_exit = summary.early_exit,
                    "Sync completed"
                );
                ctx.progress.emit(SyncEvent::Completed {
                    job_id: job.id.as_str(),
                    collection_type: collection_type.to_string(),
                    synced: counters.synced,
                    created: counters.created,
                    updated: counters.updated,
                    skipped: counters.skipped,
                    errored: counters.errored,
                    duration_secs,
                });
                Ok(SyncReport {
                    job_id: job.id,
                    collection_type,
                    mode: job.mode,
                    status: job.status,
                    counters,
                    message: None,
                    failure: None,
                    early_exit: summary.early_exit,
                    resumable: false,
                    duration_secs,
                })
            }
            Err(SyncError::ConfirmationDeclined) => {
                let job = job.cancel()?;
                info!("Sync cancelled: confirmation declined");
                ctx.progress.emit(SyncEvent::Cancelled {
                    job_id: job.id.as_str(),
                    collection_type: collection_type.to_string(),
                    items_processed: counters.processed(),
                });
                Ok(SyncReport {
                    job_id: job.id,
                    collection_type,
                    mode: job.mode,
                    status: job.status,
                    counters,
                    message: Some("confirmation declined".to_string()),
                    failure: None,
                    early_exit: false,
                    resumable: false,
                    duration_secs: started.elapsed().as_secs(),
                })
            }
            Err(SyncError::Cancelled) => {
                let job = job.cancel()?;
                let resumable = self.has_checkpoint(collection_type).await;
                info!(resumable, "Sync cancelled");
                ctx.progress.emit(SyncEvent::Cancelled {
                    job_id: job.id.as_str(),
                    collection_type: collection_type.to_string(),
                    items_processed: counters.processed(),
                });
                Ok(SyncReport {
                    job_id: job.id,
                    collection_type,
                    mode: job.mode,
                    status: job.status,
                    counters,
                    message: Some("cancelled".to_string()),
                    failure: None,
                    early_exit: false,
                    resumable,
                    duration_secs: started.elapsed().as_secs(),
                })
            }
            Err(e) => {
                let resumable = self.has_checkpoint(collection_type).await;
                error!(error = %e, resumable, "Sync failed");
                let job = job.fail(e.to_string())?;
                ctx.progress.emit(SyncEvent::Failed {
                    job_id: job.id.as_str(),
                    collection_type: collection_type.to_string(),
                    message: e.to_string(),
                    resumable,
                });
                Ok(self.failure_report(&job, counters, &e, resumable, started))
            }
        }
    }

    fn failure_report(
        &self,
        job: &SyncJob,
        counters: SyncCounters,
        error: &SyncError,
        resumable: bool,
        started: Instant,
    ) -> SyncReport {
        SyncReport {
            job_id: job.id,
            collection_type: job.collection_type,
            mode: job.mode,
            status: job.status,
            counters,
            message: Some(error.to_string()),
            failure: Some(error.failure_kind()),
            early_exit: false,
            resumable,
            duration_secs: started.elapsed().as_secs(),
        }
    }

    async fn has_checkpoint(&self, collection_type: CollectionType) -> bool {
        match self.checkpoints.peek().await {
            Ok(Some(cp)) => self.owns(&cp, collection_type),
            _ => false,
        }
    }

    fn owns(&self, checkpoint: &Checkpoint, collection_type: CollectionType) -> bool {
        checkpoint.collection_type == collection_type
            && checkpoint.user_identity == self.site.user_identity
    }

    /// Configured pacing, with the user's request delay setting applied
    async fn pacing(&self) -> Pacing {
        let item_delay = match self.settings.get_i64(REQUEST_DELAY_SETTING_KEY).await {
            Ok(Some(ms)) if ms >= 0 => Duration::from_millis(ms as u64),
            Ok(Some(ms)) => {
                warn!(ms, "Ignoring negative request delay setting");
                self.config.request_delay
            }
            Ok(None) => self.config.request_delay,
            Err(e) => {
                warn!(error = %e, "Failed to read request delay setting");
                self.config.request_delay
            }
        };

        Pacing {
            item_delay,
            page_delay: self.config.page_delay,
        }
    }
}

fn phase_label(collection_type: CollectionType) -> &'static str {
    match collection_type {
        CollectionType::WatchedVideos => "watched",
        CollectionType::WantVideos => "want",
        other => other.as_str(),
    }
}
