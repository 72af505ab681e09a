//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, settings,
//! challenge sessions, confirmation prompts) and a site-specific
//! [`RecordExtractor`] into the sync engine. Desktop apps typically enable the
//! `desktop-shims` feature so that `CoreConfig::builder()` falls back to the
//! `bridge-desktop` HTTP client and settings store.
//!
//! ```rust,ignore
//! let config = CoreConfig::builder()
//!     .database_path("/data/mirror.db")
//!     .site(SiteConfig::new("https://example.test", "alice"))
//!     .build()?;
//! let core = CoreService::bootstrap(config, Arc::new(MyExtractor), SyncConfig::default()).await?;
//!
//! match core.start_sync(CollectionType::WatchedVideos, SyncMode::Incremental, None).await? {
//!     StartOutcome::ResumeDecisionRequired(summary) => { /* ask the user */ }
//!     StartOutcome::Finished(report) => println!("{:?}", report.counters),
//! }
//! ```

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::SystemClock;
use core_library::db::{create_pool, DatabaseConfig};
use core_library::{
    ListEntity, ListRepository, RecordRepository, SqliteListRepository, SqliteRecordRepository,
    SyncedRecord,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus};
use core_sync::{
    ChallengeControl, CheckpointSummary, CollectionType, RecordExtractor, StartOutcome,
    SyncConfig, SyncEnvironment, SyncMode, SyncOrchestrator,
};
use tokio::sync::broadcast::Receiver;
use tracing::info;

/// Capacity of the event bus created by [`CoreService::bootstrap`]
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    orchestrator: Arc<SyncOrchestrator>,
    records: Arc<dyn RecordRepository>,
    lists: Arc<dyn ListRepository>,
}

impl CoreService {
    /// Open the record store at `config.database_path` and build the engine.
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the database cannot be
    /// opened and migrated.
    pub async fn bootstrap(
        config: CoreConfig,
        extractor: Arc<dyn RecordExtractor>,
        sync_config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;

        let pool = create_pool(DatabaseConfig::new(&config.database_path)).await?;
        let records: Arc<dyn RecordRepository> =
            Arc::new(SqliteRecordRepository::new(pool.clone()));
        let lists: Arc<dyn ListRepository> = Arc::new(SqliteListRepository::new(pool));

        let environment = SyncEnvironment {
            http_client: config.http_client,
            settings_store: config.settings_store,
            challenge_host: config.challenge_host,
            confirmation_prompt: config.confirmation_prompt,
            extractor,
            records,
            lists,
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
            clock: Arc::new(SystemClock),
        };

        info!(
            database = %config.database_path.display(),
            site = %config.site.base_url,
            user = %config.site.user_identity,
            "Core service initialized"
        );
        Ok(Self::from_environment(environment, config.site, sync_config))
    }

    /// Build the service from explicit components.
    pub fn from_environment(
        environment: SyncEnvironment,
        site: core_runtime::config::SiteConfig,
        sync_config: SyncConfig,
    ) -> Self {
        let records = environment.records.clone();
        let lists = environment.lists.clone();
        Self {
            orchestrator: Arc::new(SyncOrchestrator::new(environment, site, sync_config)),
            records,
            lists,
        }
    }

    pub async fn start_sync(
        &self,
        collection_type: CollectionType,
        mode: SyncMode,
        resume: Option<bool>,
    ) -> Result<StartOutcome> {
        Ok(self.orchestrator.start(collection_type, mode, resume).await?)
    }

    pub async fn cancel_sync(&self, collection_type: CollectionType) -> bool {
        self.orchestrator.cancel(collection_type).await
    }

    pub async fn is_syncing(&self, collection_type: CollectionType) -> bool {
        self.orchestrator.is_running(collection_type).await
    }

    pub async fn pending_checkpoint(
        &self,
        collection_type: CollectionType,
    ) -> Result<Option<CheckpointSummary>> {
        Ok(self.orchestrator.pending_checkpoint(collection_type).await?)
    }

    /// Progress and challenge notifications
    pub fn subscribe_events(&self) -> Receiver<CoreEvent> {
        self.orchestrator.event_bus().subscribe()
    }

    /// Handle the host uses to report a solved or abandoned challenge
    pub fn challenge_control(&self) -> ChallengeControl {
        self.orchestrator.challenge_control()
    }

    pub async fn records(&self) -> Result<Vec<SyncedRecord>> {
        Ok(self.records.list_all().await?)
    }

    pub async fn lists(&self) -> Result<Vec<ListEntity>> {
        Ok(self.lists.get_all().await?)
    }
}
