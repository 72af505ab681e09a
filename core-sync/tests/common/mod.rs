//! Shared fixtures: a scripted fake site, a line-based extractor and a fully
//! wired orchestrator over in-memory stores.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_desktop::SqliteSettingsStore;
use bridge_traits::error::Result as BridgeResult;
use bridge_traits::{
    ChallengeSessionHost, ConfirmationPrompt, ConfirmationRequest, HttpClient, HttpRequest,
    HttpResponse, SessionHandle, SettingsStore, SystemClock,
};
use bytes::Bytes;
use core_library::db::create_test_pool;
use core_library::Result as LibraryResult;
use core_library::{
    ListKind, RecordRepository, RecordStatus, SqliteListRepository, SqliteRecordRepository,
    SyncedRecord,
};
use core_runtime::config::SiteConfig;
use core_runtime::events::{ChallengeEvent, CoreEvent, EventBus};
use core_sync::{
    CollectionType, RecordExtractor, RecordFields, RemoteItemRef, RemoteList, StartOutcome,
    SyncConfig, SyncEnvironment, SyncMode, SyncOrchestrator, SyncReport,
};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const BASE_URL: &str = "https://site.test";
pub const USER: &str = "alice";

pub const CHALLENGE_PAGE: &str =
    "<html><title>Just a moment</title><body>Verify you are human</body></html>";

// ============================================================================
// Fake site
// ============================================================================

/// Pauses the first request to one URL until released
pub struct Gate {
    pub reached: Notify,
    pub release: Notify,
}

#[derive(Default)]
pub struct FakeSite {
    pages: Mutex<HashMap<String, (u16, String)>>,
    queued: Mutex<HashMap<String, VecDeque<(u16, String)>>>,
    gates: Mutex<HashMap<String, Arc<Gate>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeSite {
    pub fn page(&self, url: &str, body: impl Into<String>) {
        self.status(url, 200, body);
    }

    pub fn status(&self, url: &str, status: u16, body: impl Into<String>) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.into()));
    }

    pub fn remove(&self, url: &str) {
        self.pages.lock().unwrap().remove(url);
    }

    /// Serve this response before the regular page, once
    pub fn once(&self, url: &str, status: u16, body: impl Into<String>) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back((status, body.into()));
    }

    pub fn gate(&self, url: &str) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            reached: Notify::new(),
            release: Notify::new(),
        });
        self.gates
            .lock()
            .unwrap()
            .insert(url.to_string(), gate.clone());
        gate
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }
}

#[async_trait]
impl HttpClient for FakeSite {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(url.clone());

        let gate = self.gates.lock().unwrap().remove(&url);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        let queued = self
            .queued
            .lock()
            .unwrap()
            .get_mut(&url)
            .and_then(|q| q.pop_front());
        let (status, body) = match queued {
            Some(response) => response,
            None => self
                .pages
                .lock()
                .unwrap()
                .get(&url)
                .cloned()
                .unwrap_or((404, "<html>not found</html>".to_string())),
        };

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "text/html; charset=utf-8".to_string());
        Ok(HttpResponse {
            status,
            headers,
            body: Bytes::from(body),
        })
    }
}

// ============================================================================
// Markup fixtures
// ============================================================================

fn wrap(lines: Vec<String>) -> String {
    format!(
        "<html><div id=\"site-header\"></div>\n{}\n</html>",
        lines.join("\n")
    )
}

pub fn profile_page(counts: &[(CollectionType, u64)]) -> String {
    wrap(
        counts
            .iter()
            .map(|(ct, count)| format!("count:{}={}", ct, count))
            .collect(),
    )
}

pub fn index_page(identities: &[String]) -> String {
    wrap(
        identities
            .iter()
            .map(|id| format!("item:{}:/v/{}", id, id))
            .collect(),
    )
}

pub fn detail_page(identity: &str) -> String {
    wrap(vec![format!("detail:{}|Title {}|drama,1990s", identity, identity)])
}

pub fn list_index_page(lists: &[FixtureList]) -> String {
    wrap(
        lists
            .iter()
            .map(|l| {
                let count = l
                    .item_count
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                format!("list:{}|{}|{}", l.id, l.name, count)
            })
            .collect(),
    )
}

/// Parses the line format above
pub struct LineExtractor;

impl RecordExtractor for LineExtractor {
    fn extract_count(&self, content: &str, collection_type: CollectionType) -> Option<u64> {
        let prefix = format!("count:{}=", collection_type);
        content
            .lines()
            .find_map(|line| line.strip_prefix(prefix.as_str()))
            .and_then(|n| n.trim().parse().ok())
    }

    fn extract_index_items(&self, content: &str) -> Vec<RemoteItemRef> {
        content
            .lines()
            .filter_map(|line| line.strip_prefix("item:"))
            .filter_map(|rest| rest.split_once(':'))
            .map(|(identity, url)| RemoteItemRef {
                url_identity: identity.to_string(),
                best_effort_display_id: Some(identity.to_uppercase()),
                url: url.to_string(),
            })
            .collect()
    }

    fn extract_detail(&self, content: &str, fallback_identity: &str) -> Option<RecordFields> {
        let line = content.lines().find_map(|l| l.strip_prefix("detail:"))?;
        let mut parts = line.split('|');
        let identity = parts
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback_identity);
        let title = parts.next()?;
        let tags = parts
            .next()
            .map(|t| t.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        Some(RecordFields {
            identity: identity.to_string(),
            title: title.to_string(),
            tags,
            release_date: None,
            image_url: None,
        })
    }

    fn extract_lists(&self, content: &str, kind: ListKind) -> Vec<RemoteList> {
        content
            .lines()
            .filter_map(|line| line.strip_prefix("list:"))
            .filter_map(|rest| {
                let mut parts = rest.split('|');
                let id = parts.next()?;
                let name = parts.next()?;
                let count = parts.next()?.parse().ok();
                Some(RemoteList {
                    id: id.to_string(),
                    name: name.to_string(),
                    kind,
                    url: format!("/lists/{}", id),
                    item_count: count,
                    engagement_count: None,
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FixtureList {
    pub id: String,
    pub name: String,
    pub item_count: Option<u32>,
    pub items: Vec<String>,
}

impl FixtureList {
    pub fn new(id: &str, items: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: format!("List {}", id),
            item_count: Some(items.len() as u32),
            items: items.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ============================================================================
// Record store
// ============================================================================

/// SQLite records whose full scan can be held at a gate
pub struct GatedRecords {
    inner: Arc<SqliteRecordRepository>,
    scan_gate: Mutex<Option<Arc<Gate>>>,
}

impl GatedRecords {
    pub fn new(inner: Arc<SqliteRecordRepository>) -> Self {
        Self {
            inner,
            scan_gate: Mutex::new(None),
        }
    }

    /// Pause the next `list_all` until released
    pub fn gate_scan(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate {
            reached: Notify::new(),
            release: Notify::new(),
        });
        *self.scan_gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl RecordRepository for GatedRecords {
    async fn get(&self, identity: &str) -> LibraryResult<Option<SyncedRecord>> {
        self.inner.get(identity).await
    }

    async fn upsert(&self, record: &SyncedRecord) -> LibraryResult<()> {
        self.inner.upsert(record).await
    }

    async fn list_all(&self) -> LibraryResult<Vec<SyncedRecord>> {
        let gate = self.scan_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        self.inner.list_all().await
    }

    async fn url_identities_with_status(
        &self,
        status: RecordStatus,
    ) -> LibraryResult<HashSet<String>> {
        self.inner.url_identities_with_status(status).await
    }

    async fn identity_for_url(&self, url_identity: &str) -> LibraryResult<Option<String>> {
        self.inner.identity_for_url(url_identity).await
    }

    async fn set_list_memberships(
        &self,
        identity: &str,
        memberships: &BTreeSet<String>,
        updated_at: i64,
    ) -> LibraryResult<bool> {
        self.inner
            .set_list_memberships(identity, memberships, updated_at)
            .await
    }

    async fn count(&self) -> LibraryResult<i64> {
        self.inner.count().await
    }
}

// ============================================================================
// Host capabilities
// ============================================================================

pub struct ScriptedPrompt {
    answer: AtomicBool,
    pub requests: Mutex<Vec<ConfirmationRequest>>,
}

impl ScriptedPrompt {
    pub fn new(answer: bool) -> Self {
        Self {
            answer: AtomicBool::new(answer),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn answer(&self, answer: bool) {
        self.answer.store(answer, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ConfirmationPrompt for ScriptedPrompt {
    async fn confirm(&self, request: &ConfirmationRequest) -> BridgeResult<bool> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(self.answer.load(Ordering::SeqCst))
    }
}

/// Session host whose session always shows the real page
#[derive(Default)]
pub struct InstantHost {
    pub opened: AtomicUsize,
}

#[async_trait]
impl ChallengeSessionHost for InstantHost {
    async fn open_session(&self, url: &str) -> BridgeResult<SessionHandle> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(SessionHandle::new(url))
    }

    async fn poll_title(&self, _handle: &SessionHandle) -> BridgeResult<Option<String>> {
        Ok(Some("Site".to_string()))
    }

    async fn extract_content(&self, _handle: &SessionHandle) -> BridgeResult<String> {
        Ok(wrap(vec!["verified".to_string()]))
    }

    async fn close_session(&self, _handle: &SessionHandle) -> BridgeResult<()> {
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

#[derive(Default)]
pub struct HarnessOptions {
    pub prompt: Option<Arc<ScriptedPrompt>>,
    pub challenge_host: Option<Arc<InstantHost>>,
    pub config: Option<SyncConfig>,
}

pub struct Harness {
    pub site: Arc<FakeSite>,
    pub site_config: SiteConfig,
    pub records: Arc<SqliteRecordRepository>,
    pub gated_records: Arc<GatedRecords>,
    pub lists: Arc<SqliteListRepository>,
    pub settings: Arc<SqliteSettingsStore>,
    pub event_bus: EventBus,
    pub orchestrator: Arc<SyncOrchestrator>,
    counts: Mutex<Vec<(CollectionType, u64)>>,
}

pub fn fast_config() -> SyncConfig {
    SyncConfig {
        request_delay: Duration::ZERO,
        page_delay: Duration::ZERO,
        retry_delay: Duration::from_millis(1),
        challenge_poll_interval: Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

pub fn identities(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}-{:03}", prefix, i)).collect()
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let site = Arc::new(FakeSite::default());
        let site_config = SiteConfig::new(BASE_URL, USER);
        let pool = create_test_pool().await.unwrap();
        let records = Arc::new(SqliteRecordRepository::new(pool.clone()));
        let gated_records = Arc::new(GatedRecords::new(records.clone()));
        let lists = Arc::new(SqliteListRepository::new(pool));
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        let event_bus = EventBus::new(1024);

        let environment = SyncEnvironment {
            http_client: site.clone(),
            settings_store: settings.clone(),
            challenge_host: options
                .challenge_host
                .map(|h| h as Arc<dyn ChallengeSessionHost>),
            confirmation_prompt: options
                .prompt
                .map(|p| p as Arc<dyn ConfirmationPrompt>),
            extractor: Arc::new(LineExtractor),
            records: gated_records.clone(),
            lists: lists.clone(),
            event_bus: event_bus.clone(),
            clock: Arc::new(SystemClock),
        };

        let orchestrator = Arc::new(SyncOrchestrator::new(
            environment,
            site_config.clone(),
            options.config.unwrap_or_else(fast_config),
        ));

        let harness = Self {
            site,
            site_config,
            records,
            gated_records,
            lists,
            settings,
            event_bus,
            orchestrator,
            counts: Mutex::new(Vec::new()),
        };
        harness.publish_profile();
        harness
    }

    pub fn url(&self, template: &str, page: Option<u32>, list: Option<&str>) -> String {
        self.site_config.render(template, page, list)
    }

    pub fn profile_url(&self) -> String {
        self.url(&self.site_config.profile_url, None, None)
    }

    pub fn detail_url(&self, identity: &str) -> String {
        format!("{}/v/{}", BASE_URL, identity)
    }

    pub fn index_url(&self, collection_type: CollectionType, page: u32) -> String {
        let template = match collection_type {
            CollectionType::WatchedVideos => &self.site_config.watched_index_url,
            CollectionType::WantVideos => &self.site_config.want_index_url,
            CollectionType::ActorFavorites => &self.site_config.actor_favorites_url,
            other => panic!("{} has no index", other),
        };
        self.url(template, Some(page), None)
    }

    fn publish_profile(&self) {
        let counts = self.counts.lock().unwrap().clone();
        self.site.page(&self.profile_url(), profile_page(&counts));
    }

    /// Serve `ids` as the collection, 20 per page, with detail pages
    pub fn seed_collection(&self, collection_type: CollectionType, ids: &[String]) {
        {
            let mut counts = self.counts.lock().unwrap();
            counts.retain(|(ct, _)| *ct != collection_type);
            counts.push((collection_type, ids.len() as u64));
        }
        self.publish_profile();

        for (page, chunk) in ids.chunks(20).enumerate() {
            self.site.page(
                &self.index_url(collection_type, page as u32 + 1),
                index_page(chunk),
            );
        }
        for id in ids {
            self.site.page(&self.detail_url(id), detail_page(id));
        }
    }

    /// Serve owned and favorited list indexes and every list's items
    pub fn seed_lists(&self, owned: &[FixtureList], favorited: &[FixtureList]) {
        let owned_template = self.site_config.owned_lists_url.clone();
        let favorited_template = self.site_config.favorited_lists_url.clone();

        self.site
            .page(&self.url(&owned_template, Some(1), None), list_index_page(owned));
        self.site
            .page(&self.url(&owned_template, Some(2), None), list_index_page(&[]));
        self.site.page(
            &self.url(&favorited_template, Some(1), None),
            list_index_page(favorited),
        );
        self.site.page(
            &self.url(&favorited_template, Some(2), None),
            list_index_page(&[]),
        );

        for list in owned.iter().chain(favorited) {
            let chunks: Vec<Vec<String>> = list.items.chunks(20).map(|c| c.to_vec()).collect();
            for (page, chunk) in chunks.iter().enumerate() {
                self.site.page(
                    &self.list_items_url(&list.id, page as u32 + 1),
                    index_page(chunk),
                );
            }
            for id in &list.items {
                self.site.page(&self.detail_url(id), detail_page(id));
            }
        }
    }

    pub fn list_items_url(&self, list_id: &str, page: u32) -> String {
        self.url(&self.site_config.list_items_url, Some(page), Some(list_id))
    }

    pub async fn set_setting(&self, key: &str, value: i64) {
        self.settings.set_i64(key, value).await.unwrap();
    }

    pub async fn run(
        &self,
        collection_type: CollectionType,
        mode: SyncMode,
        resume: Option<bool>,
    ) -> StartOutcome {
        self.orchestrator
            .start(collection_type, mode, resume)
            .await
            .unwrap()
    }

    /// Run and expect a terminal report
    pub async fn sync(
        &self,
        collection_type: CollectionType,
        mode: SyncMode,
        resume: Option<bool>,
    ) -> SyncReport {
        match self.run(collection_type, mode, resume).await {
            StartOutcome::Finished(report) => report,
            other => panic!("expected a finished sync, got {:?}", other),
        }
    }

    /// Confirm every challenge the moment it is detected
    pub fn auto_confirm_challenges(&self) -> tokio::task::JoinHandle<()> {
        let mut events = self.event_bus.subscribe();
        let control = self.orchestrator.challenge_control();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let CoreEvent::Challenge(ChallengeEvent::Detected { .. }) = event {
                    control.confirm_completed();
                }
            }
        })
    }
}

/// Run `start` in the background and cancel once `gate` is reached
pub async fn cancel_at_gate(
    harness: &Harness,
    gate: Arc<Gate>,
    collection_type: CollectionType,
    mode: SyncMode,
    resume: Option<bool>,
) -> SyncReport {
    let orchestrator = harness.orchestrator.clone();
    let task =
        tokio::spawn(async move { orchestrator.start(collection_type, mode, resume).await });

    gate.reached.notified().await;
    assert!(harness.orchestrator.cancel(collection_type).await);
    gate.release.notify_one();

    match task.await.unwrap().unwrap() {
        StartOutcome::Finished(report) => report,
        other => panic!("expected a finished sync, got {:?}", other),
    }
}
