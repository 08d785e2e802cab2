//! Configuration for the orchestrator and its subsystems.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::event_bus::{EventBus, EventSink, MemorySink, StdOutSink};

/// Top-level configuration consumed by [`crate::orchestrator::Orchestrator::new`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Concurrency bound applied independently to the graph scheduler and
    /// the work queue.
    pub max_concurrency: usize,
    pub store: StoreConfig,
    pub event_bus: EventBusConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 2,
            store: StoreConfig::default(),
            event_bus: EventBusConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: EventBusConfig) -> Self {
        self.event_bus = event_bus;
        self
    }
}

/// Whether the state store writes snapshots to its persistence medium.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PersistenceMode {
    /// In-memory only; `persist`/`backup`/`restore` are still callable but
    /// nothing runs automatically.
    Disabled,
    /// Snapshot to the local persistence medium on every `set`, with
    /// periodic backups.
    #[default]
    Local,
}

/// State store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub persistence: PersistenceMode,
    /// Directory holding the primary snapshot and the `backups/` subdirectory.
    pub state_dir: PathBuf,
    /// Cadence of the periodic backup timer; zero disables it.
    pub backup_interval: Duration,
    /// How many timestamped backups to retain; older ones are deleted.
    pub max_backups: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            persistence: PersistenceMode::Local,
            state_dir: Self::resolve_state_dir(None),
            backup_interval: Duration::from_secs(5 * 60),
            max_backups: 5,
        }
    }
}

impl StoreConfig {
    /// Resolve the state directory from an explicit value, the
    /// `TASKWEAVE_STATE_DIR` environment variable, or the `.state` default.
    fn resolve_state_dir(provided: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = provided {
            return dir;
        }
        dotenvy::dotenv().ok();
        std::env::var("TASKWEAVE_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".state"))
    }

    /// Configuration for a store that never touches the persistence medium.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            persistence: PersistenceMode::Disabled,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.state_dir = state_dir.into();
        self
    }

    #[must_use]
    pub fn with_backup_interval(mut self, interval: Duration) -> Self {
        self.backup_interval = interval;
        self
    }

    #[must_use]
    pub fn with_max_backups(mut self, max_backups: usize) -> Self {
        self.max_backups = max_backups;
        self
    }
}

/// Which sinks an orchestrator's event bus is built with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    StdOut,
    Memory,
}

/// Event bus configuration.
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    pub sinks: Vec<SinkConfig>,
}

impl EventBusConfig {
    #[must_use]
    pub fn new(sinks: Vec<SinkConfig>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with_stdout_only() -> Self {
        Self::new(vec![SinkConfig::StdOut])
    }

    #[must_use]
    pub fn with_memory_sink() -> Self {
        Self::new(vec![SinkConfig::StdOut, SinkConfig::Memory])
    }

    #[must_use]
    pub fn add_sink(mut self, sink: SinkConfig) -> Self {
        if !self.sinks.contains(&sink) {
            self.sinks.push(sink);
        }
        self
    }

    /// Materialize the configured sinks into an [`EventBus`].
    pub fn build_event_bus(&self) -> EventBus {
        let sinks: Vec<Box<dyn EventSink>> = self
            .sinks
            .iter()
            .map(|sink| match sink {
                SinkConfig::StdOut => Box::new(StdOutSink::default()) as Box<dyn EventSink>,
                SinkConfig::Memory => Box::new(MemorySink::new()) as Box<dyn EventSink>,
            })
            .collect();
        EventBus::with_sinks(sinks)
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self::with_stdout_only()
    }
}
