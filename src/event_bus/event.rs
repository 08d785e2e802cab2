use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One discrete, typed message on the orchestration event stream.
///
/// Each subsystem gets its own tagged variant so observers can match on the
/// source without parsing event-name strings. The orchestrator merges all
/// four subsystem streams (plus its own lifecycle notices) onto one bus.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum Event {
    Unit(UnitEvent),
    Graph(GraphEvent),
    Queue(QueueEvent),
    Store(StoreEvent),
    Orchestrator(OrchestratorEvent),
}

impl Event {
    /// Short label identifying the event for sinks and logs.
    pub fn scope_label(&self) -> &str {
        match self {
            Event::Unit(unit) => unit.scope(),
            Event::Graph(graph) => graph.scope_label(),
            Event::Queue(queue) => queue.scope_label(),
            Event::Store(store) => store.scope_label(),
            Event::Orchestrator(orch) => orch.scope_label(),
        }
    }

    /// Convert the event to a structured JSON value with a normalized schema:
    /// `{"source", "scope", "timestamp", "payload"}`.
    pub fn to_json_value(&self) -> Value {
        use serde_json::json;

        let (source, timestamp) = match self {
            Event::Unit(e) => ("unit", e.timestamp),
            Event::Graph(e) => ("graph", e.timestamp()),
            Event::Queue(e) => ("queue", e.timestamp()),
            Event::Store(e) => ("store", e.timestamp()),
            Event::Orchestrator(e) => ("orchestrator", e.timestamp()),
        };

        json!({
            "source": source,
            "scope": self.scope_label(),
            "timestamp": timestamp.to_rfc3339(),
            "payload": serde_json::to_value(self).unwrap_or(Value::Null),
        })
    }

    /// Compact JSON string form of [`to_json_value`](Self::to_json_value).
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Unit(unit) => write!(
                f,
                "[{} {}] {}",
                unit.metadata.unit_type,
                unit.scope(),
                unit.content
            ),
            Event::Graph(graph) => match graph.node_id() {
                Some(id) => write!(f, "[graph {}] {}", graph.scope_label(), id),
                None => write!(f, "[graph] {}", graph.scope_label()),
            },
            Event::Queue(queue) => match queue.task_id() {
                Some(id) => write!(f, "[queue {}] {}", queue.scope_label(), id),
                None => write!(f, "[queue] {}", queue.scope_label()),
            },
            Event::Store(store) => write!(f, "[store] {}", store.scope_label()),
            Event::Orchestrator(orch) => write!(f, "[orchestrator] {}", orch.scope_label()),
        }
    }
}

/// Identity of the unit that emitted an event, carried on every message.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitMetadata {
    pub unit_id: String,
    pub unit_type: String,
    pub parent_id: Option<String>,
}

/// Message emitted by a work unit through its event capability.
///
/// `sequence` increases monotonically per emitting unit; wall-clock
/// timestamps alone are not strictly ordered under load.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UnitEvent {
    pub id: String,
    scope: String,
    pub content: Value,
    pub metadata: UnitMetadata,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl UnitEvent {
    /// Scope emitted once when a unit announces readiness.
    pub const INITIALIZED: &'static str = "unit:initialized";
    /// Scope emitted when a unit's `execute` finishes successfully.
    pub const COMPLETED: &'static str = "unit:completed";
    /// Scope emitted when a unit's `execute` fails, before the error is rethrown.
    pub const FAILED: &'static str = "unit:failed";
    /// Scope emitted when a unit replaces a value in its snapshot state.
    pub const STATE_UPDATED: &'static str = "unit:state_updated";

    pub fn new(
        id: String,
        scope: impl Into<String>,
        content: Value,
        metadata: UnitMetadata,
        sequence: u64,
    ) -> Self {
        Self {
            id,
            scope: scope.into(),
            content,
            metadata,
            sequence,
            timestamp: Utc::now(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }
}

/// Lifecycle notices from the dependency graph scheduler.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum GraphEvent {
    Started {
        timestamp: DateTime<Utc>,
    },
    Stopped {
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEvent {
    pub fn scope_label(&self) -> &'static str {
        match self {
            GraphEvent::Started { .. } => "graph:started",
            GraphEvent::Stopped { .. } => "graph:stopped",
            GraphEvent::NodeStarted { .. } => "node:started",
            GraphEvent::NodeCompleted { .. } => "node:completed",
            GraphEvent::NodeFailed { .. } => "node:failed",
        }
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEvent::NodeStarted { node_id, .. }
            | GraphEvent::NodeCompleted { node_id, .. }
            | GraphEvent::NodeFailed { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            GraphEvent::Started { timestamp }
            | GraphEvent::Stopped { timestamp }
            | GraphEvent::NodeStarted { timestamp, .. }
            | GraphEvent::NodeCompleted { timestamp, .. }
            | GraphEvent::NodeFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Lifecycle notices from the work queue.
///
/// Terminal task events carry the task's `result`/`error` because the queue
/// drops terminal tasks from its live set; the event stream is the only
/// place an outcome can be captured.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum QueueEvent {
    Started {
        timestamp: DateTime<Utc>,
    },
    Stopped {
        timestamp: DateTime<Utc>,
    },
    TaskAdded {
        task_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        task_id: String,
        task_type: String,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: String,
        task_type: String,
        result: Value,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        task_id: String,
        task_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn scope_label(&self) -> &'static str {
        match self {
            QueueEvent::Started { .. } => "queue:started",
            QueueEvent::Stopped { .. } => "queue:stopped",
            QueueEvent::TaskAdded { .. } => "task:added",
            QueueEvent::TaskStarted { .. } => "task:started",
            QueueEvent::TaskCompleted { .. } => "task:completed",
            QueueEvent::TaskFailed { .. } => "task:failed",
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            QueueEvent::TaskAdded { task_id, .. }
            | QueueEvent::TaskStarted { task_id, .. }
            | QueueEvent::TaskCompleted { task_id, .. }
            | QueueEvent::TaskFailed { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::Started { timestamp }
            | QueueEvent::Stopped { timestamp }
            | QueueEvent::TaskAdded { timestamp, .. }
            | QueueEvent::TaskStarted { timestamp, .. }
            | QueueEvent::TaskCompleted { timestamp, .. }
            | QueueEvent::TaskFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Which snapshot a restore loaded from.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum RestoreSource {
    /// The primary (latest) snapshot.
    Primary,
    /// A specific timestamped backup.
    Backup,
}

/// Notices from the state store: mutations, persistence, and failures.
///
/// `Updated` carries both the old and new value so observers can diff
/// without querying the store.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub enum StoreEvent {
    Updated {
        key: String,
        old_value: Option<Value>,
        new_value: Value,
        timestamp: DateTime<Utc>,
    },
    Deleted {
        key: String,
        timestamp: DateTime<Utc>,
    },
    Cleared {
        timestamp: DateTime<Utc>,
    },
    Persisted {
        timestamp: DateTime<Utc>,
    },
    BackedUp {
        file: String,
        timestamp: DateTime<Utc>,
    },
    Restored {
        source: RestoreSource,
        timestamp: DateTime<Utc>,
    },
    Error {
        operation: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl StoreEvent {
    pub fn scope_label(&self) -> &'static str {
        match self {
            StoreEvent::Updated { .. } => "state:updated",
            StoreEvent::Deleted { .. } => "state:deleted",
            StoreEvent::Cleared { .. } => "state:cleared",
            StoreEvent::Persisted { .. } => "state:persisted",
            StoreEvent::BackedUp { .. } => "state:backup",
            StoreEvent::Restored { .. } => "state:restored",
            StoreEvent::Error { .. } => "state:error",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            StoreEvent::Updated { timestamp, .. }
            | StoreEvent::Deleted { timestamp, .. }
            | StoreEvent::Cleared { timestamp }
            | StoreEvent::Persisted { timestamp }
            | StoreEvent::BackedUp { timestamp, .. }
            | StoreEvent::Restored { timestamp, .. }
            | StoreEvent::Error { timestamp, .. } => *timestamp,
        }
    }
}

/// Lifecycle notices from the orchestrator itself.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrchestratorEvent {
    Started { timestamp: DateTime<Utc> },
    Stopped { timestamp: DateTime<Utc> },
}

impl OrchestratorEvent {
    pub fn scope_label(&self) -> &'static str {
        match self {
            OrchestratorEvent::Started { .. } => "orchestrator:started",
            OrchestratorEvent::Stopped { .. } => "orchestrator:stopped",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            OrchestratorEvent::Started { timestamp }
            | OrchestratorEvent::Stopped { timestamp } => *timestamp,
        }
    }
}
