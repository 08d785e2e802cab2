mod common;

use std::time::Duration;

use common::{memory_bus, wait_until};
use serde_json::json;
use taskweave::config::{PersistenceMode, StoreConfig};
use taskweave::event_bus::{Event, RestoreSource, StoreEvent};
use taskweave::store::{PersistenceError, StateStore};
use tempfile::TempDir;

fn local_config(dir: &TempDir, max_backups: usize) -> StoreConfig {
    StoreConfig::default()
        .with_state_dir(dir.path())
        .with_backup_interval(Duration::ZERO)
        .with_max_backups(max_backups)
}

fn backup_files(dir: &TempDir) -> Vec<String> {
    let backups = dir.path().join("backups");
    if !backups.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(backups)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn restore_after_set_yields_the_persisted_state() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 5), bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    store.restore(None).await.unwrap();
    assert_eq!(store.get("a"), Some(json!(1)));
}

#[tokio::test]
async fn restore_replaces_the_map_wholesale() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 5), bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    let backup = store.backup().await.unwrap();
    let timestamp: i64 = backup
        .strip_prefix("state_")
        .and_then(|s| s.strip_suffix(".json"))
        .unwrap()
        .parse()
        .unwrap();

    store.set("b", json!(2)).await.unwrap();
    assert_eq!(store.status().size, 2);

    store.restore(Some(timestamp)).await.unwrap();
    assert_eq!(store.get("a"), Some(json!(1)));
    assert_eq!(store.get("b"), None);
    assert_eq!(store.status().size, 1);
}

#[tokio::test]
async fn backups_rotate_down_to_the_retention_count() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 2), bus.get_sender());

    store.set("key", json!("value")).await.unwrap();

    let mut taken = Vec::new();
    for _ in 0..3 {
        taken.push(store.backup().await.unwrap());
        // Backup names embed millisecond timestamps; keep them distinct.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let remaining = backup_files(&dir);
    assert_eq!(remaining.len(), 2);
    assert!(!remaining.contains(&taken[0]), "oldest backup should be pruned");
    assert!(remaining.contains(&taken[1]));
    assert!(remaining.contains(&taken[2]));
}

#[tokio::test]
async fn update_events_carry_old_and_new_values() {
    let dir = TempDir::new().unwrap();
    let (bus, sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 5), bus.get_sender());

    store.set("counter", json!(1)).await.unwrap();
    store.set("counter", json!(2)).await.unwrap();
    store.delete("counter");
    store.clear();

    wait_until("store events observed", || {
        let events = sink.snapshot();
        events
            .iter()
            .any(|e| matches!(e, Event::Store(StoreEvent::Cleared { .. })))
    })
    .await;

    let events = sink.snapshot();
    let updates: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Store(StoreEvent::Updated {
                key,
                old_value,
                new_value,
                ..
            }) if key == "counter" => Some((old_value.clone(), new_value.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(updates.len(), 2);
    assert_eq!(updates[0], (None, json!(1)));
    assert_eq!(updates[1], (Some(json!(1)), json!(2)));

    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Store(StoreEvent::Deleted { key, .. }) if key == "counter")));
}

#[tokio::test]
async fn disabled_persistence_never_touches_the_medium() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    let config = StoreConfig::disabled().with_state_dir(dir.path());
    assert_eq!(config.persistence, PersistenceMode::Disabled);
    let store = StateStore::new(config, bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    assert!(!dir.path().join("state.json").exists());
    assert_eq!(store.get("a"), Some(json!(1)));
}

#[tokio::test]
async fn restoring_a_missing_snapshot_fails_and_reports_on_the_stream() {
    let dir = TempDir::new().unwrap();
    let (bus, sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 5), bus.get_sender());

    let err = store.restore(None).await.unwrap_err();
    assert!(matches!(err, PersistenceError::MissingSnapshot { .. }));

    wait_until("error event observed", || {
        sink.snapshot().iter().any(|e| {
            matches!(
                e,
                Event::Store(StoreEvent::Error { operation, .. }) if operation == "restore"
            )
        })
    })
    .await;
}

#[tokio::test]
async fn backup_events_name_the_snapshot_and_record_the_source_on_restore() {
    let dir = TempDir::new().unwrap();
    let (bus, sink) = memory_bus();
    let store = StateStore::new(local_config(&dir, 5), bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    let file = store.backup().await.unwrap();
    store.restore(None).await.unwrap();

    wait_until("backup and restore events observed", || {
        let events = sink.snapshot();
        let backed_up = events.iter().any(|e| {
            matches!(e, Event::Store(StoreEvent::BackedUp { file: f, .. }) if *f == file)
        });
        let restored = events.iter().any(|e| {
            matches!(
                e,
                Event::Store(StoreEvent::Restored { source: RestoreSource::Primary, .. })
            )
        });
        backed_up && restored
    })
    .await;

    assert!(store.status().last_backup.is_some());
}

#[tokio::test]
async fn periodic_backup_timer_fires_and_stops_deterministically() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    let config = StoreConfig::default()
        .with_state_dir(dir.path())
        .with_backup_interval(Duration::from_millis(30))
        .with_max_backups(50);
    let store = StateStore::new(config, bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    wait_until("timer takes a backup", || {
        store.status().last_backup.is_some()
    })
    .await;

    store.stop_backup_timer().await;
    let count_after_stop = backup_files(&dir).len();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(backup_files(&dir).len(), count_after_stop);
}

#[tokio::test]
async fn changing_the_interval_rearms_the_timer() {
    let dir = TempDir::new().unwrap();
    let (bus, _sink) = memory_bus();
    // Armed with a long interval, then re-armed with a short one.
    let config = StoreConfig::default()
        .with_state_dir(dir.path())
        .with_backup_interval(Duration::from_secs(3600))
        .with_max_backups(50);
    let store = StateStore::new(config, bus.get_sender());

    store.set("a", json!(1)).await.unwrap();
    assert!(store.status().last_backup.is_none());

    store.set_backup_interval(Duration::from_millis(25));
    wait_until("re-armed timer takes a backup", || {
        store.status().last_backup.is_some()
    })
    .await;
    store.stop_backup_timer().await;
}
