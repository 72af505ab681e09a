//! List reconciliation against a scripted site.

mod common;

use common::{
    cancel_at_gate, detail_page, fast_config, identities, FixtureList, Harness, HarnessOptions,
    ScriptedPrompt,
};
use core_library::{ListKind, ListRepository, RecordRepository, RecordStatus};
use core_sync::{CollectionType, FailureKind, SyncConfig, SyncMode, SyncStatus};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

const LISTS: CollectionType = CollectionType::Lists;

async fn harness_with_prompt(answer: bool) -> (Harness, Arc<ScriptedPrompt>) {
    let prompt = Arc::new(ScriptedPrompt::new(answer));
    let harness = Harness::with_options(HarnessOptions {
        prompt: Some(prompt.clone()),
        ..HarnessOptions::default()
    })
    .await;
    (harness, prompt)
}

fn set(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

async fn memberships(harness: &Harness, identity: &str) -> BTreeSet<String> {
    harness
        .records
        .get(identity)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("record {} missing", identity))
        .list_memberships
}

#[tokio::test]
async fn test_first_run_confirms_and_mirrors_lists() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[
            FixtureList::new("l1", &["x1", "x2"]),
            FixtureList::new("l2", &["x2", "x3"]),
        ],
        &[FixtureList::new("f1", &["x4"])],
    );

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.counters.synced, 5);
    assert_eq!(report.counters.created, 4);
    assert_eq!(report.counters.updated, 1);

    assert_eq!(prompt.calls(), 1);
    let request = prompt.requests.lock().unwrap()[0].clone();
    assert_eq!(request.to_add, 3);
    assert_eq!(request.to_delete, 0);

    let stored = harness.lists.get_all().await.unwrap();
    assert_eq!(stored.len(), 3);
    let favorited = stored.iter().find(|l| l.id == "f1").unwrap();
    assert_eq!(favorited.kind, ListKind::Favorited);
    assert_eq!(favorited.item_count, Some(1));

    assert_eq!(memberships(&harness, "x1").await, set(&["l1"]));
    assert_eq!(memberships(&harness, "x2").await, set(&["l1", "l2"]));
    assert_eq!(memberships(&harness, "x4").await, set(&["f1"]));
    assert_eq!(
        harness.records.get("x1").await.unwrap().unwrap().status,
        RecordStatus::Listed
    );
}

#[tokio::test]
async fn test_declined_confirmation_changes_nothing() {
    let (harness, prompt) = harness_with_prompt(false).await;
    harness.seed_lists(&[FixtureList::new("l1", &["x1", "x2"])], &[]);

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(prompt.calls(), 1);
    assert_eq!(report.status, SyncStatus::Cancelled);
    assert_eq!(report.message.as_deref(), Some("confirmation declined"));
    assert!(!report.resumable);
    assert!(harness.lists.get_all().await.unwrap().is_empty());
    assert_eq!(harness.records.count().await.unwrap(), 0);
    assert_eq!(harness.site.request_count(&harness.detail_url("x1")), 0);
}

#[tokio::test]
async fn test_missing_prompt_declines() {
    let harness = Harness::new().await;
    harness.seed_lists(&[FixtureList::new("l1", &["x1"])], &[]);

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Cancelled);
    assert_eq!(report.message.as_deref(), Some("confirmation declined"));
    assert!(harness.lists.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_removed_list_clears_member_memberships() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[
            FixtureList::new("a", &["x1", "x2"]),
            FixtureList::new("b", &["x3"]),
        ],
        &[],
    );
    harness.sync(LISTS, SyncMode::Full, None).await;

    harness.seed_lists(
        &[
            FixtureList::new("b", &["x3"]),
            FixtureList::new("c", &["x4"]),
        ],
        &[],
    );
    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(prompt.calls(), 2);
    let request = prompt.requests.lock().unwrap()[1].clone();
    assert_eq!(request.to_add, 1);
    assert_eq!(request.to_update, 1);
    assert_eq!(request.to_delete, 1);

    let ids: BTreeSet<String> = harness
        .lists
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|l| l.id)
        .collect();
    assert_eq!(ids, set(&["b", "c"]));

    assert!(memberships(&harness, "x1").await.is_empty());
    assert!(memberships(&harness, "x2").await.is_empty());
    assert_eq!(memberships(&harness, "x3").await, set(&["b"]));
    assert_eq!(memberships(&harness, "x4").await, set(&["c"]));
}

#[tokio::test]
async fn test_unchanged_lists_do_not_prompt() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(&[FixtureList::new("l1", &["x1"])], &[]);
    harness.sync(LISTS, SyncMode::Full, None).await;

    prompt.answer(false);
    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(prompt.calls(), 1);
    assert_eq!(report.counters.updated, 1);
}

#[tokio::test]
async fn test_empty_lists_are_stored_but_not_walked() {
    let (harness, _prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[FixtureList::new("l1", &["x1"]), FixtureList::new("empty", &[])],
        &[],
    );

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(harness.lists.get_all().await.unwrap().len(), 2);
    assert_eq!(
        harness
            .site
            .request_count(&harness.list_items_url("empty", 1)),
        0
    );
}

#[tokio::test]
async fn test_unknown_item_count_walks_until_short_page() {
    let (harness, _prompt) = harness_with_prompt(true).await;
    let mut list = FixtureList::new("big", &[]);
    list.items = identities("x", 25);
    list.item_count = None;
    harness.seed_lists(&[list], &[]);

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.counters.synced, 25);
    assert_eq!(harness.site.request_count(&harness.list_items_url("big", 2)), 1);
    assert_eq!(harness.site.request_count(&harness.list_items_url("big", 3)), 0);
}

#[tokio::test]
async fn test_empty_owned_index_is_not_authenticated() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(&[], &[FixtureList::new("f1", &["x1"])]);

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Failed);
    assert_eq!(
        report.failure,
        Some(FailureKind::NotAuthenticatedOrStructureChanged)
    );
    assert_eq!(prompt.calls(), 0);
}

#[tokio::test]
async fn test_list_item_keeps_existing_status() {
    let (harness, _prompt) = harness_with_prompt(true).await;
    harness.seed_collection(CollectionType::WatchedVideos, &["x1".to_string()]);
    harness
        .sync(CollectionType::WatchedVideos, SyncMode::Full, None)
        .await;

    harness.seed_lists(&[FixtureList::new("l1", &["x1", "x2"])], &[]);
    harness.sync(LISTS, SyncMode::Full, None).await;

    let watched = harness.records.get("x1").await.unwrap().unwrap();
    assert_eq!(watched.status, RecordStatus::Watched);
    assert_eq!(watched.list_memberships, set(&["l1"]));
    assert_eq!(
        harness.records.get("x2").await.unwrap().unwrap().status,
        RecordStatus::Listed
    );
}

#[tokio::test]
async fn test_resume_skips_confirmation_and_keeps_memberships() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[
            FixtureList::new("a", &["x1", "x2", "x3", "x4", "x5"]),
            FixtureList::new("b", &["x1", "x6"]),
        ],
        &[],
    );
    let gate = harness.site.gate(&harness.detail_url("x3"));

    let cancelled = cancel_at_gate(&harness, gate, LISTS, SyncMode::Full, None).await;
    assert_eq!(cancelled.status, SyncStatus::Cancelled);
    assert!(cancelled.resumable);
    assert_eq!(cancelled.counters.synced, 3);

    let summary = harness
        .orchestrator
        .pending_checkpoint(LISTS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.current_list_index, Some(0));
    assert_eq!(summary.total_lists, Some(2));
    assert_eq!(summary.current_item_index, 3);

    prompt.answer(false);
    let report = harness.sync(LISTS, SyncMode::Full, Some(true)).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(prompt.calls(), 1);
    assert_eq!(report.counters.synced, 7);
    assert_eq!(harness.site.request_count(&harness.detail_url("x2")), 1);
    assert_eq!(memberships(&harness, "x1").await, set(&["a", "b"]));
    assert_eq!(memberships(&harness, "x2").await, set(&["a"]));
    assert_eq!(memberships(&harness, "x6").await, set(&["b"]));
}

#[tokio::test]
async fn test_checkpoint_for_removed_list_starts_over() {
    let (harness, prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[
            FixtureList::new("a", &["x1", "x2"]),
            FixtureList::new("b", &["x3", "x4"]),
        ],
        &[],
    );
    let gate = harness.site.gate(&harness.detail_url("x3"));
    cancel_at_gate(&harness, gate, LISTS, SyncMode::Full, None).await;

    harness.seed_lists(
        &[
            FixtureList::new("a", &["x1", "x2"]),
            FixtureList::new("c", &["x5"]),
        ],
        &[],
    );
    let report = harness.sync(LISTS, SyncMode::Full, Some(true)).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(prompt.calls(), 2);
    assert_eq!(report.counters.synced, 3);
    assert!(memberships(&harness, "x3").await.is_empty());
    assert_eq!(memberships(&harness, "x5").await, set(&["c"]));
    assert!(harness
        .orchestrator
        .pending_checkpoint(LISTS)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_long_list_is_walked_past_page_cap() {
    let prompt = Arc::new(ScriptedPrompt::new(true));
    let harness = Harness::with_options(HarnessOptions {
        prompt: Some(prompt),
        config: Some(SyncConfig {
            list_page_cap: 2,
            ..fast_config()
        }),
        ..HarnessOptions::default()
    })
    .await;
    let ids = identities("x", 45);
    let items: Vec<&str> = ids.iter().map(String::as_str).collect();
    harness.seed_lists(&[FixtureList::new("long", &items)], &[]);

    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.counters.synced, 45);
    assert_eq!(harness.site.request_count(&harness.list_items_url("long", 3)), 1);
    assert_eq!(memberships(&harness, "x-045").await, set(&["long"]));
}

#[tokio::test]
async fn test_failed_item_keeps_membership_of_its_record() {
    let (harness, _prompt) = harness_with_prompt(true).await;
    harness.seed_lists(&[FixtureList::new("l1", &["x1", "x2"])], &[]);
    harness.site.page(&harness.detail_url("x1"), detail_page("ABC-001"));
    harness.site.page(&harness.detail_url("x2"), detail_page("ABC-002"));

    harness.sync(LISTS, SyncMode::Full, None).await;
    assert_eq!(memberships(&harness, "ABC-001").await, set(&["l1"]));

    harness.site.status(&harness.detail_url("x1"), 404, "<html>gone</html>");
    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.counters.errored, 1);
    assert_eq!(memberships(&harness, "ABC-001").await, set(&["l1"]));
    assert_eq!(memberships(&harness, "ABC-002").await, set(&["l1"]));
    assert!(harness.records.get("x1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_during_orphan_cleanup_leaves_no_checkpoint() {
    let (harness, _prompt) = harness_with_prompt(true).await;
    harness.seed_lists(
        &[
            FixtureList::new("l1", &["x1", "x2"]),
            FixtureList::new("l2", &["x3"]),
        ],
        &[],
    );
    harness.sync(LISTS, SyncMode::Full, None).await;

    harness.seed_lists(&[FixtureList::new("l1", &["x1", "x2"])], &[]);
    let gate = harness.gated_records.gate_scan();
    let report = cancel_at_gate(&harness, gate, LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Cancelled);
    assert!(!report.resumable);
    assert!(harness
        .orchestrator
        .pending_checkpoint(LISTS)
        .await
        .unwrap()
        .is_none());
    assert_eq!(memberships(&harness, "x3").await, set(&["l2"]));
    assert_eq!(memberships(&harness, "x1").await, set(&["l1"]));
}

#[tokio::test]
async fn test_unavailable_list_page_still_waits_page_delay() {
    let prompt = Arc::new(ScriptedPrompt::new(true));
    let harness = Harness::with_options(HarnessOptions {
        prompt: Some(prompt),
        config: Some(SyncConfig {
            page_delay: Duration::from_millis(60),
            ..fast_config()
        }),
        ..HarnessOptions::default()
    })
    .await;
    let ids = identities("x", 40);
    let items: Vec<&str> = ids.iter().map(String::as_str).collect();
    harness.seed_lists(&[FixtureList::new("l1", &items)], &[]);
    harness.site.status(&harness.list_items_url("l1", 1), 404, "<html>missing</html>");

    let started = Instant::now();
    let report = harness.sync(LISTS, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.counters.errored, 1);
    assert_eq!(report.counters.synced, 20);
    // one pause after the owned index page, one after the missing list page
    assert!(started.elapsed() >= Duration::from_millis(120));
}
