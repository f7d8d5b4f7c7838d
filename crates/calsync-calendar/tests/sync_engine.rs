#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use calsync_calendar::error::CalendarError;
use calsync_calendar::{
    compute_hash, derive_remote_id, CountFilter, DeleteAction, EngineOptions, ErrorKind,
    EventData, ListQuery, Page, RecordFilter, SyncAction, SyncKey, SyncStatus, SyncStore,
};
use common::{engine, engine_with, standup, Call, FakeCalendar};

fn key() -> SyncKey {
    SyncKey::new("u1", Some("p1"), "standup-2024-01-15")
}

fn derived(key: &SyncKey) -> String {
    derive_remote_id(&key.id_seed(), 1024)
}

#[tokio::test]
async fn test_example_scenario() {
    let (engine, remote, store) = engine();
    let key = key();

    let first = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();
    assert_eq!(first.action, SyncAction::Created);
    let h1 = store.get(&key).await.unwrap().unwrap().content_hash.unwrap();
    assert_eq!(h1, compute_hash(&standup()));

    let second = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();
    assert_eq!(second.action, SyncAction::Unchanged);
    assert_eq!(second.remote_event_id, first.remote_event_id);
    assert_eq!(remote.call_count(), 1);

    let mut moved = standup();
    moved.start = "2024-01-15T09:05:00".into();
    let third = engine
        .create_or_update(&key, &moved, None, "manual")
        .await
        .unwrap();
    assert_eq!(third.action, SyncAction::Updated);

    let h2 = store.get(&key).await.unwrap().unwrap().content_hash.unwrap();
    assert_ne!(h1, h2);
    assert_eq!(remote.creates(), 1);
    assert_eq!(remote.updates(), 1);
}

#[tokio::test]
async fn test_created_record_contents() {
    let (engine, remote, _store) = engine();
    let key = key();

    let outcome = engine
        .create_or_update(&key, &standup(), Some("work"), "lms")
        .await
        .unwrap();

    assert_eq!(outcome.remote_event_id, derived(&key));
    assert_eq!(
        remote.calls(),
        vec![Call::Create {
            explicit_id: Some(derived(&key)),
            calendar_id: "work".into()
        }]
    );

    let record = engine.get_sync_state(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.remote_calendar_id, "work");
    assert_eq!(record.source_system, "lms");
    assert_eq!(record.remote_event_id.as_deref(), Some(outcome.remote_event_id.as_str()));
    assert!(record.last_synced_at.is_some());
    assert!(record.sync_error.is_none());
}

#[tokio::test]
async fn test_each_tracked_field_triggers_update() {
    let variants: Vec<(&str, EventData)> = vec![
        ("summary", {
            let mut e = standup();
            e.summary = "Daily Standup".into();
            e
        }),
        ("start", {
            let mut e = standup();
            e.start = "2024-01-15T08:55:00".into();
            e
        }),
        ("end", {
            let mut e = standup();
            e.end = "2024-01-15T09:30:00".into();
            e
        }),
        ("description", standup().with_description("Blockers first")),
        ("location", standup().with_location("Room 4")),
    ];

    for (field, changed) in variants {
        let (engine, remote, _store) = engine();
        let key = key();
        engine
            .create_or_update(&key, &standup(), None, "manual")
            .await
            .unwrap();

        let outcome = engine
            .create_or_update(&key, &changed, None, "manual")
            .await
            .unwrap();
        assert_eq!(outcome.action, SyncAction::Updated, "changing {} must update", field);
        assert_eq!(remote.updates(), 1);
        assert_eq!(remote.event(&outcome.remote_event_id), Some(changed));
    }
}

#[tokio::test]
async fn test_attendees_and_timezone_do_not_trigger_update() {
    let (engine, remote, _store) = engine();
    let key = key();
    engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    let with_attendees = standup().with_attendees(vec!["alice@example.com".into()]);
    let outcome = engine
        .create_or_update(&key, &with_attendees, None, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.action, SyncAction::Unchanged);

    let other_zone = standup().with_timezone("America/New_York");
    let outcome = engine
        .create_or_update(&key, &other_zone, None, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.action, SyncAction::Unchanged);

    assert_eq!(remote.call_count(), 1);
}

#[tokio::test]
async fn test_drift_recovery_recreates_event() {
    let (engine, remote, store) = engine();
    let key = key();
    let first = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();
    let created_at = store.get(&key).await.unwrap().unwrap().created_at;

    remote.remove_out_of_band(&first.remote_event_id);

    let changed = standup().with_description("Moved online");
    let outcome = engine
        .create_or_update(&key, &changed, None, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.action, SyncAction::Created);
    assert_ne!(outcome.remote_event_id, first.remote_event_id);

    let calls = remote.calls();
    assert_eq!(
        calls[1..],
        [
            Call::Update {
                id: first.remote_event_id.clone(),
                calendar_id: "primary".into()
            },
            Call::Create {
                explicit_id: None,
                calendar_id: "primary".into()
            },
        ]
    );

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert_eq!(record.remote_event_id.as_deref(), Some(outcome.remote_event_id.as_str()));
    assert_eq!(record.content_hash, Some(compute_hash(&changed)));
    assert!(record.created_at >= created_at);
    assert_eq!(remote.event(&outcome.remote_event_id), Some(changed));
}

#[tokio::test]
async fn test_update_failure_is_recorded_and_propagated() {
    let (engine, remote, store) = engine();
    let key = key();
    engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    remote.fail_next(CalendarError::ServerError {
        status: 503,
        message: "backend unavailable".into(),
    });
    let changed = standup().with_location("Room 4");
    let err = engine
        .create_or_update(&key, &changed, None, "manual")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);
    assert!(err.is_retryable());

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Failed);
    assert!(record.sync_error.unwrap().contains("backend unavailable"));
    // The remote still holds the original content.
    assert_eq!(record.content_hash, Some(compute_hash(&standup())));

    let retried = engine
        .create_or_update(&key, &changed, None, "manual")
        .await
        .unwrap();
    assert_eq!(retried.action, SyncAction::Updated);
    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.sync_error.is_none());
}

#[tokio::test]
async fn test_reverting_after_failed_update_restores_synced() {
    let (engine, remote, store) = engine();
    let key = key();
    engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    remote.fail_next(CalendarError::TokenExpired);
    let changed = standup().with_location("Room 4");
    assert!(engine
        .create_or_update(&key, &changed, None, "manual")
        .await
        .is_err());

    let calls_before = remote.call_count();
    let outcome = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.action, SyncAction::Unchanged);
    assert_eq!(remote.call_count(), calls_before);
    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
    assert!(record.sync_error.is_none());
}

#[tokio::test]
async fn test_failed_create_leaves_failed_record() {
    let (engine, remote, store) = engine();
    let key = key();

    remote.fail_next(CalendarError::AuthRequired);
    let err = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Failed);
    assert!(record.remote_event_id.is_none());
    assert!(record.content_hash.is_none());
    assert!(record.sync_error.is_some());

    let outcome = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.action, SyncAction::Created);
    let retried = store.get(&key).await.unwrap().unwrap();
    assert_eq!(retried.sync_status, SyncStatus::Synced);
    assert_eq!(retried.created_at, record.created_at);
}

#[tokio::test]
async fn test_conflict_adopts_existing_event() {
    let (engine, remote, store) = engine();
    let key = key();
    let id = derived(&key);

    // Left behind by an attempt that never recorded its result.
    remote.seed(&id, "primary", EventData::new("Old", "2024-01-15T08:00:00", "2024-01-15T08:15:00"));

    let outcome = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.action, SyncAction::Created);
    assert_eq!(outcome.remote_event_id, id);
    assert_eq!(
        remote.calls(),
        vec![
            Call::Create {
                explicit_id: Some(id.clone()),
                calendar_id: "primary".into()
            },
            Call::Update {
                id: id.clone(),
                calendar_id: "primary".into()
            },
        ]
    );
    assert_eq!(remote.event(&id), Some(standup()));
    assert_eq!(remote.event_count(), 1);

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Synced);
}

#[tokio::test]
async fn test_conflict_on_reserved_id_creates_without_id() {
    let (engine, remote, _store) = engine();
    let key = key();
    let id = derived(&key);
    remote.remove_out_of_band(&id);

    let outcome = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.action, SyncAction::Created);
    assert_ne!(outcome.remote_event_id, id);
    assert_eq!(remote.creates(), 2);
    assert_eq!(remote.event_count(), 1);
}

#[tokio::test]
async fn test_provider_assigned_ids() {
    let (engine, remote, _store) = engine_with(FakeCalendar::without_explicit_ids());
    let outcome = engine
        .create_or_update(&key(), &standup(), None, "manual")
        .await
        .unwrap();

    assert_eq!(outcome.remote_event_id, "gen00001");
    assert_eq!(
        remote.calls(),
        vec![Call::Create {
            explicit_id: None,
            calendar_id: "primary".into()
        }]
    );
}

#[tokio::test]
async fn test_explicit_ids_can_be_disabled() {
    let (engine, remote, _store) = engine();
    let engine = engine.with_options(EngineOptions {
        explicit_ids: false,
        ..Default::default()
    });
    engine
        .create_or_update(&key(), &standup(), None, "manual")
        .await
        .unwrap();

    assert!(matches!(
        remote.calls()[0],
        Call::Create {
            explicit_id: None,
            ..
        }
    ));
}

#[tokio::test]
async fn test_short_max_id_length() {
    let (engine, _remote, _store) = engine();
    let engine = engine.with_options(EngineOptions {
        explicit_ids: true,
        max_id_length: 8,
    });
    let outcome = engine
        .create_or_update(&key(), &standup(), None, "manual")
        .await
        .unwrap();
    assert_eq!(outcome.remote_event_id.len(), 8);
}

/// Two local IDs of user `u1` whose derived IDs agree at `max_length`.
fn colliding_keys(max_length: usize) -> (SyncKey, SyncKey) {
    let mut seen: HashMap<String, SyncKey> = HashMap::new();
    for i in 0..200_000 {
        let key = SyncKey::new("u1", None, format!("evt-{}", i));
        let id = derive_remote_id(&key.id_seed(), max_length);
        if let Some(earlier) = seen.insert(id, key.clone()) {
            return (earlier, key);
        }
    }
    unreachable!("no collision at length {}", max_length)
}

#[tokio::test]
async fn test_truncated_id_collision_does_not_take_over_other_event() {
    let (engine, remote, store) = engine();
    let engine = engine.with_options(EngineOptions {
        explicit_ids: true,
        max_id_length: 5,
    });
    let (a, b) = colliding_keys(5);
    let mut dentist = standup();
    dentist.summary = "Dentist".into();

    let first = engine
        .create_or_update(&a, &standup(), None, "manual")
        .await
        .unwrap();
    let second = engine
        .create_or_update(&b, &dentist, None, "manual")
        .await
        .unwrap();

    assert_eq!(second.action, SyncAction::Created);
    assert_ne!(first.remote_event_id, second.remote_event_id);
    assert_eq!(remote.event_count(), 2);
    assert_eq!(
        remote.event(&first.remote_event_id).unwrap().summary,
        standup().summary
    );
    assert_eq!(
        store.get_by_remote_id(&second.remote_event_id).await.unwrap().unwrap().key(),
        b
    );

    let action = engine
        .delete("u1", None, &b.local_event_id, None, false)
        .await
        .unwrap();
    assert_eq!(action, DeleteAction::Deleted);
    assert_eq!(remote.event_count(), 1);
    assert!(remote.event(&first.remote_event_id).is_some());

    let again = engine
        .create_or_update(&a, &standup(), None, "manual")
        .await
        .unwrap();
    assert_eq!(again.action, SyncAction::Unchanged);
    assert_eq!(again.remote_event_id, first.remote_event_id);
}

#[tokio::test]
async fn test_invalid_event_is_rejected_up_front() {
    let (engine, remote, store) = engine();
    let key = key();
    let backwards = EventData::new("Backwards", "2024-01-15T10:00:00", "2024-01-15T09:00:00");

    let err = engine
        .create_or_update(&key, &backwards, None, "manual")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.kind().http_status(), 422);
    assert_eq!(remote.call_count(), 0);
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_same_local_id_for_two_users() {
    let (engine, remote, _store) = engine();
    let a = engine
        .create_or_update(&SyncKey::new("u1", None, "standup"), &standup(), None, "manual")
        .await
        .unwrap();
    let b = engine
        .create_or_update(&SyncKey::new("u2", None, "standup"), &standup(), None, "manual")
        .await
        .unwrap();

    assert_eq!(a.action, SyncAction::Created);
    assert_eq!(b.action, SyncAction::Created);
    assert_ne!(a.remote_event_id, b.remote_event_id);
    assert_eq!(remote.updates(), 0);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let (engine, remote, store) = engine();
    let key = key();
    let created = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    let first = engine
        .delete("u1", Some("p1"), "standup-2024-01-15", None, false)
        .await
        .unwrap();
    assert_eq!(first, DeleteAction::Deleted);
    assert!(remote.event(&created.remote_event_id).is_none());
    assert!(store.get(&key).await.unwrap().is_none());

    let second = engine
        .delete("u1", Some("p1"), "standup-2024-01-15", None, false)
        .await
        .unwrap();
    assert!(matches!(
        second,
        DeleteAction::AlreadyDeleted | DeleteAction::NotFound
    ));
}

#[tokio::test]
async fn test_delete_when_remote_already_gone() {
    let (engine, remote, store) = engine();
    let key = key();
    let created = engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();
    remote.remove_out_of_band(&created.remote_event_id);

    let action = engine
        .delete("u1", Some("p1"), "standup-2024-01-15", None, false)
        .await
        .unwrap();

    assert_eq!(action, DeleteAction::AlreadyDeleted);
    assert!(store.get(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_unknown_event() {
    let (engine, remote, _store) = engine();
    let action = engine
        .delete("u1", None, "never-synced", None, false)
        .await
        .unwrap();
    assert_eq!(action, DeleteAction::NotFound);
    assert_eq!(remote.call_count(), 0);
}

#[tokio::test]
async fn test_delete_by_remote_id_checks_owner() {
    let (engine, remote, store) = engine();
    let key = key();
    let created = engine
        .create_or_update(&key, &standup(), Some("work"), "manual")
        .await
        .unwrap();

    let stranger = engine
        .delete("u2", None, &created.remote_event_id, None, true)
        .await
        .unwrap();
    assert_eq!(stranger, DeleteAction::NotFound);

    let wrong_persona = engine
        .delete("u1", Some("p2"), &created.remote_event_id, None, true)
        .await
        .unwrap();
    assert_eq!(wrong_persona, DeleteAction::NotFound);
    assert!(store.get(&key).await.unwrap().is_some());

    let owner = engine
        .delete("u1", None, &created.remote_event_id, None, true)
        .await
        .unwrap();
    assert_eq!(owner, DeleteAction::Deleted);
    assert_eq!(
        remote.calls().last(),
        Some(&Call::Delete {
            id: created.remote_event_id.clone(),
            calendar_id: "work".into()
        })
    );
}

#[tokio::test]
async fn test_delete_calendar_override() {
    let (engine, remote, _store) = engine();
    let created = engine
        .create_or_update(&key(), &standup(), None, "manual")
        .await
        .unwrap();

    engine
        .delete("u1", Some("p1"), "standup-2024-01-15", Some("shared"), false)
        .await
        .unwrap();

    assert_eq!(
        remote.calls().last(),
        Some(&Call::Delete {
            id: created.remote_event_id,
            calendar_id: "shared".into()
        })
    );
}

#[tokio::test]
async fn test_delete_failure_marks_record_failed() {
    let (engine, remote, store) = engine();
    let key = key();
    engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .unwrap();

    remote.fail_next(CalendarError::AuthRequired);
    let err = engine
        .delete("u1", Some("p1"), "standup-2024-01-15", None, false)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthFailure);

    let record = store.get(&key).await.unwrap().unwrap();
    assert_eq!(record.sync_status, SyncStatus::Failed);
    assert!(record.remote_event_id.is_some());
}

#[tokio::test]
async fn test_delete_record_without_remote_event() {
    let (engine, remote, store) = engine();
    let key = key();
    remote.fail_next(CalendarError::ServerError {
        status: 500,
        message: "boom".into(),
    });
    assert!(engine
        .create_or_update(&key, &standup(), None, "manual")
        .await
        .is_err());

    let action = engine
        .delete("u1", Some("p1"), "standup-2024-01-15", None, false)
        .await
        .unwrap();
    assert_eq!(action, DeleteAction::AlreadyDeleted);
    assert!(store.get(&key).await.unwrap().is_none());
    assert_eq!(remote.creates(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_create_once() {
    let (engine, remote, store) =
        engine_with(FakeCalendar::new().with_create_delay(Duration::from_millis(20)));
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .create_or_update(&key(), &standup(), None, "manual")
                .await
        }));
    }

    let mut outcomes = Vec::new();
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(remote.creates(), 1);
    assert_eq!(remote.event_count(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| o.action == SyncAction::Created).count(),
        1
    );
    assert!(outcomes
        .iter()
        .all(|o| o.remote_event_id == outcomes[0].remote_event_id));

    let counts = store
        .count_by_calendar(&CountFilter {
            user_id: "u1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(counts.total, 1);
}

#[tokio::test]
async fn test_read_throughs() {
    let (engine, remote, _store) = engine();
    for local in ["a", "b", "c"] {
        engine
            .create_or_update(&SyncKey::new("u1", Some("p1"), local), &standup(), None, "manual")
            .await
            .unwrap();
    }
    engine
        .create_or_update(&SyncKey::new("u1", Some("p2"), "d"), &standup(), Some("work"), "manual")
        .await
        .unwrap();
    let calls_before = remote.call_count();

    let records = engine
        .list_records(&RecordFilter::for_user("u1"), Page::new(2, 0))
        .await
        .unwrap();
    assert_eq!(records.len(), 2);

    let counts = engine
        .count(&CountFilter {
            user_id: "u1".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(counts.total, 4);
    assert_eq!(counts.by_calendar.get("primary"), Some(&3));
    assert_eq!(counts.by_calendar.get("work"), Some(&1));

    let state = engine
        .get_sync_state(&SyncKey::new("u1", Some("p2"), "d"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.remote_calendar_id, "work");
    assert_eq!(remote.call_count(), calls_before);

    let events = engine
        .list_events(Some("work"), &ListQuery::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        remote.calls().last(),
        Some(&Call::List {
            calendar_id: "work".into()
        })
    );
}
