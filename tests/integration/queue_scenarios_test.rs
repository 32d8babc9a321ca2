//! Queue behavior through the sync coordinator
//!
//! Covers in-flight exclusivity, removal on success, bounded retry, the
//! permanent-failure short-circuit, idempotent dismissal, drain order and
//! reconnect-triggered drains.

use crate::common::*;
use assert_matches::assert_matches;
use doublecheck_sync::offline::action::{ActionKind, ActionPatch, ActionStatus};
use doublecheck_sync::offline::store::{ActionStore, MemoryBackend, PersistenceBackend};
use doublecheck_sync::offline::OfflineQueue;
use doublecheck_sync::shared::clock::SystemClock;
use doublecheck_sync::shared::error::{ExecutorError, QueueError};
use doublecheck_sync::shared::event::SyncEvent;
use doublecheck_sync::sync::{ExecutorRegistry, NetworkStatus, Submission, SyncCoordinator};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_concurrent_drains_never_overlap_an_action() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_millis(30));
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());

    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(
            harness
                .store
                .enqueue(ActionKind::PhotoUpload, json!({ "n": n }))
                .await
                .unwrap(),
        );
    }

    let drains = (0..8).map(|_| coordinator.drain());
    let reports = futures_util::future::join_all(drains).await;

    let started: usize = reports.iter().map(|r| r.as_ref().unwrap().started).sum();
    assert_eq!(started, 3);
    assert!(!executor.overlapped());
    assert_eq!(executor.call_count(), 3);
    for id in &ids {
        crate::assert_absent!(harness.store, id);
    }
}

#[tokio::test]
async fn test_success_removes_action() {
    let harness = Harness::new().await;
    let coordinator = harness.coordinator(ActionKind::InspectionCreate, ScriptedExecutor::succeeding());
    let id = harness
        .store
        .enqueue(ActionKind::InspectionCreate, json!({}))
        .await
        .unwrap();

    let report = coordinator.drain().await.unwrap();

    assert_eq!(report.succeeded, 1);
    crate::assert_absent!(harness.store, &id);
    assert!(harness.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transient_failures_exhaust_exactly_max_attempts() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::transient("HTTP 503");
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());
    let mut events = coordinator.subscribe();

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();

    for attempt in 1..=MAX_ATTEMPTS {
        let report = coordinator.drain().await.unwrap();
        assert_eq!(report.started, 1, "drain {} should run the action", attempt);

        let action = harness.store.get(&id).await.unwrap().unwrap();
        assert_eq!(action.attempts, attempt);
        if attempt < MAX_ATTEMPTS {
            assert_eq!(action.status, ActionStatus::Pending);
            // Not eligible until the backoff elapses
            assert_eq!(coordinator.drain().await.unwrap().started, 0);
            harness.advance_past_retry(&id).await;
        }
    }

    let action = crate::assert_action!(harness.store, &id, ActionStatus::Failed, attempts = 3);
    assert_eq!(action.last_error.as_deref(), Some("HTTP 503"));
    assert_eq!(executor.call_count(), 3);

    // Failed actions are never picked up again
    harness.clock.advance(Duration::from_secs(3600));
    assert_eq!(coordinator.drain().await.unwrap().started, 0);
    assert_eq!(executor.call_count(), 3);

    let delays: Vec<u64> = drain_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            SyncEvent::RetryScheduled { delay_ms, .. } => Some(delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![2000, 4000]);
}

#[tokio::test]
async fn test_permanent_failure_short_circuits() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::permanent("HTTP 422: invalid property");
    let coordinator = harness.coordinator(ActionKind::InspectionCreate, executor.clone());
    let mut events = coordinator.subscribe();

    let id = harness
        .store
        .enqueue(ActionKind::InspectionCreate, json!({}))
        .await
        .unwrap();
    let report = coordinator.drain().await.unwrap();

    assert_eq!(report.failed, 1);
    crate::assert_action!(harness.store, &id, ActionStatus::Failed, attempts = 1);
    assert_eq!(executor.call_count(), 1);

    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::Failed { .. })).await;
    assert_matches!(event, SyncEvent::Failed { attempts: 1, ref error, .. } if error.contains("422"));
}

#[tokio::test]
async fn test_dismiss_is_idempotent() {
    let harness = Harness::new().await;
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, ScriptedExecutor::permanent("HTTP 400"));
    let mut events = coordinator.subscribe();

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();
    coordinator.drain().await.unwrap();
    assert_eq!(coordinator.failed_actions().await.unwrap().len(), 1);

    coordinator.dismiss(&id).await.unwrap();
    coordinator.dismiss(&id).await.unwrap();
    coordinator.dismiss(&"never-existed".into()).await.unwrap();

    assert!(coordinator.failed_actions().await.unwrap().is_empty());
    let dismissed = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Dismissed { .. }))
        .count();
    assert_eq!(dismissed, 1);
}

#[tokio::test]
async fn test_drain_runs_in_creation_order() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::succeeding();
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());

    let a = harness.store.enqueue(ActionKind::PhotoUpload, json!({"name": "A"})).await.unwrap();
    let b = harness.store.enqueue(ActionKind::PhotoUpload, json!({"name": "B"})).await.unwrap();
    let c = harness.store.enqueue(ActionKind::PhotoUpload, json!({"name": "C"})).await.unwrap();

    coordinator.drain().await.unwrap();

    assert_eq!(executor.calls(), vec![a, b, c]);
}

#[tokio::test]
async fn test_reconnect_triggers_drain() {
    let harness = Harness::offline().await;
    let executor = ScriptedExecutor::succeeding();
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());
    let mut events = coordinator.subscribe();

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();
    assert!(coordinator.drain().await.unwrap().skipped_offline);

    harness.network.set_status(NetworkStatus::Online);

    let event = wait_for_event(&mut events, |e| matches!(e, SyncEvent::Succeeded { .. })).await;
    assert_eq!(event.action_id(), Some(&id));
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_offline_enqueue_then_recovery_scenario() {
    let harness = Harness::offline().await;
    let executor = ScriptedExecutor::transient("network unreachable");
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());
    let mut events = coordinator.subscribe();

    let submission = coordinator
        .enqueue_or_execute(ActionKind::PhotoUpload, json!({"file_path": "porch.jpg"}))
        .await
        .unwrap();
    assert_matches!(submission, Submission::Queued { .. });
    assert_eq!(coordinator.pending_count().await.unwrap(), 1);

    executor.set_fallback(Ok(()));
    harness.network.set_status(NetworkStatus::Online);

    wait_for_event(&mut events, |e| matches!(e, SyncEvent::Succeeded { .. })).await;
    coordinator.drain().await.unwrap();

    assert_eq!(coordinator.pending_count().await.unwrap(), 0);
    let extra_successes = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Succeeded { .. }))
        .count();
    assert_eq!(extra_successes, 0);
    assert_eq!(executor.call_count(), 1);
}

#[tokio::test]
async fn test_bounded_retry_with_fake_clock_scenario() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::transient("HTTP 502");
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();

    for _ in 0..3 {
        coordinator.drain().await.unwrap();
        if harness.store.get(&id).await.unwrap().unwrap().status == ActionStatus::Pending {
            harness.advance_past_retry(&id).await;
        }
    }

    crate::assert_action!(harness.store, &id, ActionStatus::Failed, attempts = 3);
}

#[tokio::test]
async fn test_dismiss_while_in_flight_discards_completion() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_millis(100));
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();

    let draining = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.drain().await })
    };
    while executor.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    coordinator.dismiss(&id).await.unwrap();

    let report = draining.await.unwrap().unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.succeeded, 0);
    crate::assert_absent!(harness.store, &id);
}

#[tokio::test]
async fn test_retry_gives_fresh_attempt_budget() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::succeeding().then([
        Err(ExecutorError::transient("HTTP 503")),
        Err(ExecutorError::transient("HTTP 503")),
        Err(ExecutorError::transient("HTTP 503")),
    ]);
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, executor.clone());
    let mut events = coordinator.subscribe();

    let id = harness
        .store
        .enqueue(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap();
    for _ in 0..3 {
        coordinator.drain().await.unwrap();
        if harness.store.get(&id).await.unwrap().unwrap().status == ActionStatus::Pending {
            harness.advance_past_retry(&id).await;
        }
    }
    crate::assert_action!(harness.store, &id, ActionStatus::Failed, attempts = 3);

    assert!(coordinator.retry(&id).await.unwrap());
    wait_for_event(&mut events, |e| matches!(e, SyncEvent::Succeeded { .. })).await;

    crate::assert_absent!(harness.store, &id);
    assert_eq!(executor.call_count(), 4);
}

#[tokio::test]
async fn test_storage_failure_surfaces_to_caller() {
    let harness = Harness::with_backend(MemoryBackend::with_capacity_limit(0), NetworkStatus::Offline).await;
    let coordinator = harness.coordinator(ActionKind::PhotoUpload, ScriptedExecutor::succeeding());

    let err = coordinator
        .enqueue_or_execute(ActionKind::PhotoUpload, json!({}))
        .await
        .unwrap_err();
    assert_matches!(err, QueueError::Storage { .. });
}

#[tokio::test]
async fn test_immediate_success_leaves_nothing_queued() {
    let harness = Harness::new().await;
    let executor = ScriptedExecutor::succeeding();
    let coordinator = harness.coordinator(ActionKind::InspectionCreate, executor.clone());

    let submission = crate::assert_ok!(
        coordinator
            .enqueue_or_execute(ActionKind::InspectionCreate, json!({"property_id": "p"}))
            .await
    );

    assert_matches!(submission, Submission::Completed { .. });
    assert_eq!(executor.call_count(), 1);
    assert_eq!(coordinator.pending_count().await.unwrap(), 0);
    assert!(harness.store.list(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_drain_without_executors_keeps_backlog_pending() {
    let harness = Harness::new().await;
    let a = harness.store.enqueue(ActionKind::PhotoUpload, json!({"n": 1})).await.unwrap();
    let b = harness.store.enqueue(ActionKind::InspectionCreate, json!({"n": 2})).await.unwrap();
    let c = harness.store.enqueue(ActionKind::PhotoUpload, json!({"n": 3})).await.unwrap();
    harness
        .store
        .update(
            &c,
            ActionPatch::default()
                .status(ActionStatus::Failed)
                .increment_attempts(),
        )
        .await
        .unwrap();

    let queue = OfflineQueue::new(Arc::clone(&harness.store), ExecutorRegistry::new(), test_config());
    assert!(queue.retry(&c).await.unwrap());
    let report = queue.drain().await.unwrap();

    assert_eq!(report.started, 0);
    assert_eq!(report.failed, 0);
    crate::assert_action!(harness.store, &a, ActionStatus::Pending, attempts = 0);
    crate::assert_action!(harness.store, &b, ActionStatus::Pending, attempts = 0);
    crate::assert_action!(harness.store, &c, ActionStatus::Pending, attempts = 0);
    assert!(queue.failed_actions().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_store_handle_does_not_release_in_flight_work() {
    let backend: Arc<dyn PersistenceBackend> = Arc::new(MemoryBackend::new());
    let store = Arc::new(
        ActionStore::open(Arc::clone(&backend), Arc::new(SystemClock))
            .await
            .unwrap(),
    );
    let executor = ScriptedExecutor::succeeding().with_delay(Duration::from_millis(300));
    let coordinator = SyncCoordinator::builder(Arc::clone(&store))
        .executor(ActionKind::PhotoUpload, executor.clone())
        .config(test_config())
        .build();

    let id = store.enqueue(ActionKind::PhotoUpload, json!({})).await.unwrap();
    let draining = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.drain().await })
    };
    while executor.call_count() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Another process inspecting the queue while the daemon runs
    let viewer = ActionStore::open(Arc::clone(&backend), Arc::new(SystemClock))
        .await
        .unwrap();
    assert_eq!(viewer.get(&id).await.unwrap().unwrap().status, ActionStatus::InFlight);

    let second = coordinator.drain().await.unwrap();
    assert_eq!(second.started, 0);

    let first = draining.await.unwrap().unwrap();
    assert_eq!(first.succeeded, 1);
    assert_eq!(executor.call_count(), 1);
    assert!(!executor.overlapped());
    crate::assert_absent!(store, &id);
}
