//! Durable key-value state store with snapshot persistence and backup rotation.
//!
//! The store keeps one in-memory map of string keys to JSON values. Every
//! mutation is serialized through a single lock; snapshot I/O goes through a
//! second async lock so a backup can never interleave with a concurrent
//! `set`'s write. Snapshots are written as a sorted JSON entries array:
//! the primary snapshot (`state.json`) is rewritten on every `set` when
//! persistence is enabled, and timestamp-named backups
//! (`backups/state_<millis>.json`) rotate down to the configured retention
//! count, oldest first.

pub mod persistence;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task;

use crate::config::{PersistenceMode, StoreConfig};
use crate::event_bus::{Event, RestoreSource, StoreEvent};

pub use persistence::{FsSnapshotMedium, PersistenceError, SnapshotMedium};

const PRIMARY_SNAPSHOT: &str = "state.json";
const BACKUP_PREFIX: &str = "state_";
const BACKUP_SUFFIX: &str = ".json";

/// Durable key-value store for workflow artifacts and intermediate results.
///
/// Owned by the orchestrator and shared (via `Arc`) with unit behaviors that
/// persist their outputs. All failure paths emit a
/// [`StoreEvent::Error`] before the error is returned to the caller.
pub struct StateStore {
    map: Mutex<FxHashMap<String, Value>>,
    /// Serializes snapshot file operations (persist, backup, restore).
    io_lock: tokio::sync::Mutex<()>,
    events: flume::Sender<Event>,
    config: StoreConfig,
    backup_interval: Mutex<Duration>,
    medium: Arc<dyn SnapshotMedium>,
    last_backup: Mutex<Option<DateTime<Utc>>>,
    timer: Mutex<Option<TimerState>>,
}

/// Point-in-time summary of the store, aggregated into the orchestrator status.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStatus {
    pub size: usize,
    pub last_backup: Option<DateTime<Utc>>,
    pub persistence: PersistenceMode,
}

struct TimerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl StateStore {
    /// Create a store backed by the local filesystem.
    ///
    /// If persistence is enabled and the configured backup interval is
    /// non-zero, the periodic backup timer is armed immediately.
    pub fn new(config: StoreConfig, events: flume::Sender<Event>) -> Arc<Self> {
        Self::with_medium(config, events, Arc::new(FsSnapshotMedium::new()))
    }

    /// Create a store with a custom [`SnapshotMedium`].
    pub fn with_medium(
        config: StoreConfig,
        events: flume::Sender<Event>,
        medium: Arc<dyn SnapshotMedium>,
    ) -> Arc<Self> {
        let backup_interval = config.backup_interval;
        let store = Arc::new(Self {
            map: Mutex::new(FxHashMap::default()),
            io_lock: tokio::sync::Mutex::new(()),
            events,
            config,
            backup_interval: Mutex::new(backup_interval),
            medium,
            last_backup: Mutex::new(None),
            timer: Mutex::new(None),
        });
        store.arm_backup_timer();
        store
    }

    /// Replace the value stored under `key` wholesale.
    ///
    /// Emits [`StoreEvent::Updated`] with the previous value, then rewrites
    /// the primary snapshot when persistence is enabled.
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<(), PersistenceError> {
        let key = key.into();
        let old_value = {
            let mut map = self.map.lock();
            map.insert(key.clone(), value.clone())
        };

        self.emit(StoreEvent::Updated {
            key,
            old_value,
            new_value: value,
            timestamp: Utc::now(),
        });

        if self.config.persistence == PersistenceMode::Local {
            self.persist().await?;
        }
        Ok(())
    }

    /// Current value under `key`, if any.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.map.lock().get(key).cloned()
    }

    /// Remove `key`. Returns whether a value was present.
    pub fn delete(&self, key: &str) -> bool {
        let deleted = self.map.lock().remove(key).is_some();
        if deleted {
            self.emit(StoreEvent::Deleted {
                key: key.to_string(),
                timestamp: Utc::now(),
            });
        }
        deleted
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.map.lock().clear();
        self.emit(StoreEvent::Cleared {
            timestamp: Utc::now(),
        });
    }

    /// Write the full map to the primary snapshot location.
    pub async fn persist(&self) -> Result<(), PersistenceError> {
        let result = self.persist_inner().await;
        if let Err(e) = &result {
            self.emit_error("persist", e);
        }
        result
    }

    async fn persist_inner(&self) -> Result<(), PersistenceError> {
        let _io = self.io_lock.lock().await;
        let bytes = self.encode_snapshot()?;
        let path = self.config.state_dir.join(PRIMARY_SNAPSHOT);
        self.medium.write_snapshot(&path, &bytes).await?;
        self.emit(StoreEvent::Persisted {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Take a timestamp-named full backup and prune snapshots beyond the
    /// retention count, oldest first. Returns the backup file name.
    pub async fn backup(&self) -> Result<String, PersistenceError> {
        let result = self.backup_inner().await;
        if let Err(e) = &result {
            self.emit_error("backup", e);
        }
        result
    }

    async fn backup_inner(&self) -> Result<String, PersistenceError> {
        let _io = self.io_lock.lock().await;
        let bytes = self.encode_snapshot()?;

        let taken_at = Utc::now();
        let file = format!("{BACKUP_PREFIX}{}{BACKUP_SUFFIX}", taken_at.timestamp_millis());
        let backups_dir = self.config.state_dir.join("backups");
        self.medium
            .write_snapshot(&backups_dir.join(&file), &bytes)
            .await?;

        // Rotate: keep the max_backups most recent by embedded timestamp.
        let mut stamped: Vec<(i64, String)> = self
            .medium
            .list_snapshots(&backups_dir)
            .await?
            .into_iter()
            .filter_map(|name| Some((backup_timestamp(&name)?, name)))
            .collect();
        stamped.sort_by(|a, b| b.0.cmp(&a.0));
        for (_, stale) in stamped.into_iter().skip(self.config.max_backups) {
            self.medium
                .delete_snapshot(&backups_dir.join(&stale))
                .await?;
        }

        *self.last_backup.lock() = Some(taken_at);
        self.emit(StoreEvent::BackedUp {
            file: file.clone(),
            timestamp: taken_at,
        });
        Ok(file)
    }

    /// Replace the in-memory map wholesale from a snapshot.
    ///
    /// With a `timestamp`, loads the matching backup; otherwise loads the
    /// primary (latest) snapshot.
    pub async fn restore(&self, timestamp: Option<i64>) -> Result<(), PersistenceError> {
        let result = self.restore_inner(timestamp).await;
        if let Err(e) = &result {
            self.emit_error("restore", e);
        }
        result
    }

    async fn restore_inner(&self, timestamp: Option<i64>) -> Result<(), PersistenceError> {
        let _io = self.io_lock.lock().await;
        let (path, source) = match timestamp {
            Some(millis) => (
                self.config
                    .state_dir
                    .join("backups")
                    .join(format!("{BACKUP_PREFIX}{millis}{BACKUP_SUFFIX}")),
                RestoreSource::Backup,
            ),
            None => (
                self.config.state_dir.join(PRIMARY_SNAPSHOT),
                RestoreSource::Primary,
            ),
        };

        let bytes = self.medium.read_snapshot(&path).await?;
        let entries: Vec<(String, Value)> = serde_json::from_slice(&bytes)?;
        *self.map.lock() = entries.into_iter().collect();

        self.emit(StoreEvent::Restored {
            source,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Summary for status aggregation.
    pub fn status(&self) -> StoreStatus {
        StoreStatus {
            size: self.map.lock().len(),
            last_backup: *self.last_backup.lock(),
            persistence: self.config.persistence,
        }
    }

    /// Change the periodic backup interval, cancelling and re-arming the
    /// timer. A zero interval disables periodic backups.
    pub fn set_backup_interval(self: &Arc<Self>, interval: Duration) {
        *self.backup_interval.lock() = interval;
        self.arm_backup_timer();
    }

    /// Stop the periodic backup timer, waiting for the task to exit.
    /// Restores become deterministic in tests once the timer is stopped.
    pub async fn stop_backup_timer(&self) {
        let state = self.timer.lock().take();
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }

    fn arm_backup_timer(self: &Arc<Self>) {
        let mut guard = self.timer.lock();
        if let Some(state) = guard.take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }

        let interval = *self.backup_interval.lock();
        if self.config.persistence != PersistenceMode::Local || interval.is_zero() {
            return;
        }

        let weak = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = tokio::time::sleep(interval) => {
                        let Some(store) = weak.upgrade() else { break };
                        if let Err(e) = store.backup().await {
                            tracing::warn!(error = %e, "periodic backup failed");
                        }
                    }
                }
            }
        });

        *guard = Some(TimerState {
            shutdown_tx,
            handle,
        });
    }

    /// Snapshot bytes: the full map as a key-sorted JSON entries array.
    fn encode_snapshot(&self) -> Result<Vec<u8>, PersistenceError> {
        let mut entries: Vec<(String, Value)> = self
            .map
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(serde_json::to_vec_pretty(&entries)?)
    }

    fn emit(&self, event: StoreEvent) {
        if self.events.send(Event::Store(event)).is_err() {
            tracing::debug!("event bus closed; store event dropped");
        }
    }

    fn emit_error(&self, operation: &str, error: &PersistenceError) {
        self.emit(StoreEvent::Error {
            operation: operation.to_string(),
            message: error.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl Drop for StateStore {
    fn drop(&mut self) {
        if let Some(state) = self.timer.lock().take() {
            let _ = state.shutdown_tx.send(());
            state.handle.abort();
        }
    }
}

/// Parse the millisecond timestamp out of a backup file name.
fn backup_timestamp(name: &str) -> Option<i64> {
    name.strip_prefix(BACKUP_PREFIX)?
        .strip_suffix(BACKUP_SUFFIX)?
        .parse()
        .ok()
}
