//! Job registry, resume decisions and event flow of the orchestrator.

mod common;

use bridge_traits::SystemClock;
use chrono::{Duration as ChronoDuration, Utc};
use common::{cancel_at_gate, identities, Harness};
use core_runtime::events::{CoreEvent, SyncEvent};
use core_sync::{
    Checkpoint, CheckpointStore, CollectionType, SettingsCheckpointStore, StartOutcome,
    SyncCounters, SyncError, SyncMode, SyncStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const WATCHED: CollectionType = CollectionType::WatchedVideos;

fn checkpoint(collection_type: CollectionType, age_hours: i64) -> Checkpoint {
    Checkpoint {
        collection_type,
        user_identity: common::USER.to_string(),
        mode: SyncMode::Full,
        phase: None,
        current_page: 2,
        current_item_index: 4,
        total_pages: 3,
        total_items: 45,
        counters: SyncCounters {
            synced: 24,
            created: 24,
            ..SyncCounters::default()
        },
        timestamp: Utc::now() - ChronoDuration::hours(age_hours),
        current_list_id: None,
        current_list_index: None,
        total_lists: None,
        memberships: BTreeMap::new(),
    }
}

fn sync_events(events: &mut tokio::sync::broadcast::Receiver<CoreEvent>) -> Vec<SyncEvent> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(event) = event {
            collected.push(event);
        }
    }
    collected
}

#[tokio::test]
async fn test_second_start_for_same_collection_is_rejected() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 3));
    let gate = harness.site.gate(&harness.profile_url());

    let orchestrator = harness.orchestrator.clone();
    let first =
        tokio::spawn(async move { orchestrator.start(WATCHED, SyncMode::Full, None).await });
    gate.reached.notified().await;

    assert!(harness.orchestrator.is_running(WATCHED).await);
    let second = harness.orchestrator.start(WATCHED, SyncMode::Full, None).await;
    assert!(matches!(second, Err(SyncError::AlreadyRunning { .. })));

    gate.release.notify_one();
    match first.await.unwrap().unwrap() {
        StartOutcome::Finished(report) => assert_eq!(report.status, SyncStatus::Completed),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!harness.orchestrator.is_running(WATCHED).await);
}

#[tokio::test]
async fn test_different_collections_run_concurrently() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 2));
    harness.seed_collection(CollectionType::WantVideos, &identities("t", 2));
    let gate = harness.site.gate(&harness.profile_url());

    let orchestrator = harness.orchestrator.clone();
    let watched =
        tokio::spawn(async move { orchestrator.start(WATCHED, SyncMode::Full, None).await });
    gate.reached.notified().await;

    let want = harness
        .sync(CollectionType::WantVideos, SyncMode::Full, None)
        .await;
    assert_eq!(want.status, SyncStatus::Completed);
    assert!(harness.orchestrator.is_running(WATCHED).await);

    gate.release.notify_one();
    assert!(watched.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_completion_keeps_checkpoint_of_other_collection() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 5));
    harness.seed_collection(CollectionType::ActorFavorites, &identities("a", 3));
    let actor_gate = harness.site.gate(&harness.index_url(CollectionType::ActorFavorites, 1));

    let orchestrator = harness.orchestrator.clone();
    let actor = tokio::spawn(async move {
        orchestrator
            .start(CollectionType::ActorFavorites, SyncMode::Full, None)
            .await
    });
    actor_gate.reached.notified().await;

    let gate = harness.site.gate(&harness.detail_url("w-003"));
    let watched = cancel_at_gate(&harness, gate, WATCHED, SyncMode::Full, None).await;
    assert_eq!(watched.status, SyncStatus::Cancelled);
    assert!(watched.resumable);

    actor_gate.release.notify_one();
    match actor.await.unwrap().unwrap() {
        StartOutcome::Finished(report) => assert_eq!(report.status, SyncStatus::Completed),
        other => panic!("unexpected outcome {:?}", other),
    }

    let pending = harness
        .orchestrator
        .pending_checkpoint(WATCHED)
        .await
        .unwrap()
        .expect("watched checkpoint survives");
    assert_eq!(pending.current_page, 1);
    assert_eq!(pending.current_item_index, 3);
}

#[tokio::test]
async fn test_cancel_without_running_job_returns_false() {
    let harness = Harness::new().await;
    assert!(!harness.orchestrator.cancel(WATCHED).await);
}

#[tokio::test]
async fn test_expired_checkpoint_is_ignored() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 5));
    let store = SettingsCheckpointStore::new(harness.settings.clone(), Arc::new(SystemClock));
    store.save(&checkpoint(WATCHED, 25)).await.unwrap();

    assert!(harness
        .orchestrator
        .pending_checkpoint(WATCHED)
        .await
        .unwrap()
        .is_none());

    let report = harness.sync(WATCHED, SyncMode::Full, None).await;

    assert_eq!(report.status, SyncStatus::Completed);
    assert_eq!(report.counters.synced, 5);
    assert!(store.peek().await.unwrap().is_none());
}

#[tokio::test]
async fn test_fresh_checkpoint_requires_decision() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 5));
    let store = SettingsCheckpointStore::new(harness.settings.clone(), Arc::new(SystemClock));
    store.save(&checkpoint(WATCHED, 1)).await.unwrap();

    let pending = harness
        .orchestrator
        .pending_checkpoint(WATCHED)
        .await
        .unwrap()
        .expect("fresh checkpoint");
    assert_eq!(pending.current_page, 2);
    assert!(pending.age_secs >= 3600);

    match harness.run(WATCHED, SyncMode::Full, None).await {
        StartOutcome::ResumeDecisionRequired(summary) => {
            assert_eq!(summary.counters.synced, 24);
        }
        other => panic!("expected a resume decision, got {:?}", other),
    }
    assert!(!harness.orchestrator.is_running(WATCHED).await);
    assert!(store.peek().await.unwrap().is_some());
    assert!(harness
        .orchestrator
        .pending_checkpoint(CollectionType::WantVideos)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_resume_uses_checkpoint_mode() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 5));
    let store = SettingsCheckpointStore::new(harness.settings.clone(), Arc::new(SystemClock));
    let mut saved = checkpoint(WATCHED, 0);
    saved.mode = SyncMode::Incremental;
    saved.current_page = 1;
    saved.current_item_index = 2;
    saved.total_pages = 1;
    saved.counters = SyncCounters {
        synced: 2,
        created: 2,
        ..SyncCounters::default()
    };
    store.save(&saved).await.unwrap();

    let report = harness.sync(WATCHED, SyncMode::Full, Some(true)).await;

    assert_eq!(report.mode, SyncMode::Incremental);
    assert_eq!(report.counters.synced, 5);
    assert_eq!(harness.site.request_count(&harness.detail_url("w-001")), 0);
    assert_eq!(harness.site.request_count(&harness.detail_url("w-003")), 1);
}

#[tokio::test]
async fn test_events_bracket_the_run() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 3));
    let mut events = harness.event_bus.subscribe();

    let report = harness.sync(WATCHED, SyncMode::Incremental, None).await;
    let events = sync_events(&mut events);

    assert!(matches!(
        events.first(),
        Some(SyncEvent::Started {
            is_full_sync: false,
            resumed: false,
            ..
        })
    ));
    match events.last() {
        Some(SyncEvent::Completed {
            job_id, synced, ..
        }) => {
            assert_eq!(*job_id, report.job_id.as_str());
            assert_eq!(*synced, 3);
        }
        other => panic!("expected completion last, got {:?}", other),
    }
    assert!(events
        .iter()
        .all(|e| !matches!(e, SyncEvent::CheckpointSaved { .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Progress {
            percent: 100,
            ..
        }
    )));
}

#[tokio::test]
async fn test_cancel_emits_checkpoint_then_cancelled() {
    let harness = Harness::new().await;
    harness.seed_collection(WATCHED, &identities("w", 5));
    let mut events = harness.event_bus.subscribe();
    let gate = harness.site.gate(&harness.detail_url("w-002"));

    let report = cancel_at_gate(&harness, gate, WATCHED, SyncMode::Full, None).await;
    let events = sync_events(&mut events);

    assert_eq!(report.status, SyncStatus::Cancelled);
    let tail: Vec<&SyncEvent> = events.iter().rev().take(2).collect();
    assert!(matches!(
        tail[1],
        SyncEvent::CheckpointSaved {
            page: 1,
            item_index: 2,
            ..
        }
    ));
    assert!(matches!(
        tail[0],
        SyncEvent::Cancelled {
            items_processed: 2,
            ..
        }
    ));
}
