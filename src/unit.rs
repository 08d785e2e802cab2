//! Work unit abstraction: the atomic, runnable step of a workflow.
//!
//! A [`WorkUnit`] carries identity (id + type tag), hierarchy links (parent
//! id, spawned children), a private snapshot-state map, and an
//! event-emission capability. What the unit *does* is supplied separately as
//! a [`UnitBehavior`] — a capability interface, not a base class. A type tag
//! with no registered behavior is simply not runnable.
//!
//! # Lifecycle
//!
//! Units are created by a caller (often another unit building child units),
//! initialized once ([`WorkUnit::initialize`] announces readiness), executed
//! exactly once per graph membership by the scheduler, and terminate by
//! emitting `unit:completed` or `unit:failed`. Failure is reported on the
//! event stream first and then rethrown to the caller — never swallowed.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;

use crate::event_bus::{Event, UnitEvent, UnitMetadata};
use crate::generation::GenerationError;
use crate::store::PersistenceError;
use crate::utils::ids::IdGenerator;

// ============================================================================
// Core Trait
// ============================================================================

/// Capability interface for a work unit's behavior.
///
/// Implementors perform the unit's actual work: calling the text-generation
/// collaborator, validating output, persisting artifacts, spawning dependent
/// child units. Behaviors hold their own collaborator handles; the context
/// gives them access to the owning unit's identity, state, and event stream.
///
/// # Error Handling
///
/// Returning `Err` is the unit's failure path: the owning [`WorkUnit`] emits
/// `unit:failed` with the error message and rethrows to the scheduler, which
/// treats the node as failed (fail-fast for the graph).
#[async_trait]
pub trait UnitBehavior: Send + Sync {
    /// Execute this unit's behavior.
    async fn execute(&self, input: UnitInput, ctx: UnitContext) -> Result<(), UnitError>;
}

/// Input handed to a unit's behavior at execution time.
#[derive(Clone, Debug, Default)]
pub struct UnitInput {
    /// Graph node id when executed by the scheduler.
    pub node_id: Option<String>,
    /// Arbitrary payload from the caller.
    pub payload: Value,
}

impl UnitInput {
    pub fn new(payload: Value) -> Self {
        Self {
            node_id: None,
            payload,
        }
    }

    pub(crate) fn for_node(node_id: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id.into()),
            payload: Value::Null,
        }
    }
}

// ============================================================================
// Work Unit
// ============================================================================

/// The atomic, typed, executable step of a workflow.
///
/// Units are shared as `Arc<WorkUnit>`: the registry, the scheduler's graph
/// node, and any parent unit all reference the same instance. Hierarchy is
/// recorded by id — a child never owns its parent's lifetime.
pub struct WorkUnit {
    id: String,
    unit_type: String,
    parent_id: Mutex<Option<String>>,
    children: Mutex<ChildSet>,
    state: Mutex<FxHashMap<String, Value>>,
    behavior: Arc<dyn UnitBehavior>,
    events: flume::Sender<Event>,
    sequence: AtomicU64,
    initialized: AtomicBool,
    ids: IdGenerator,
}

/// Children spawned by a unit, tracked with a hand-off cursor so the
/// scheduler can pick up only the ones it has not yet wired into the graph.
#[derive(Default)]
struct ChildSet {
    all: Vec<Arc<WorkUnit>>,
    handed_off: usize,
}

impl WorkUnit {
    /// Create a unit with the given type tag and behavior, emitting onto the
    /// given event channel (obtain one from the orchestrator's bus).
    pub fn new(
        unit_type: impl Into<String>,
        behavior: Arc<dyn UnitBehavior>,
        events: flume::Sender<Event>,
    ) -> Arc<Self> {
        let ids = IdGenerator::new();
        Arc::new(Self {
            id: ids.generate_unit_id(),
            unit_type: unit_type.into(),
            parent_id: Mutex::new(None),
            children: Mutex::new(ChildSet::default()),
            state: Mutex::new(FxHashMap::default()),
            behavior,
            events,
            sequence: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            ids,
        })
    }

    /// Process-unique identifier generated at construction.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Type tag naming this unit's behavior/role.
    pub fn unit_type(&self) -> &str {
        &self.unit_type
    }

    /// Id of the parent unit, if this unit was attached as a child.
    pub fn parent_id(&self) -> Option<String> {
        self.parent_id.lock().clone()
    }

    /// Units this unit has spawned, in spawn order.
    pub fn children(&self) -> Vec<Arc<WorkUnit>> {
        self.children.lock().all.clone()
    }

    /// Announce readiness. Idempotent: `unit:initialized` is emitted once.
    pub fn initialize(&self) -> Result<(), UnitContextError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.emit(
            UnitEvent::INITIALIZED,
            json!({ "id": self.id, "type": self.unit_type }),
        )
    }

    /// Run this unit's behavior.
    ///
    /// On success emits `unit:completed`; on failure emits `unit:failed`
    /// with the error message and rethrows the error to the caller. The
    /// once-per-graph-membership guarantee is enforced by the scheduler's
    /// node statuses, not here.
    pub async fn execute(self: &Arc<Self>, input: UnitInput) -> Result<(), UnitError> {
        let ctx = UnitContext {
            unit: Arc::clone(self),
        };
        match self.behavior.execute(input, ctx).await {
            Ok(()) => {
                self.emit(UnitEvent::COMPLETED, json!({ "id": self.id }))?;
                Ok(())
            }
            Err(error) => {
                // Report on the stream even if the bus is gone; the caller
                // still gets the original error.
                let _ = self.emit(UnitEvent::FAILED, json!({ "error": error.to_string() }));
                Err(error)
            }
        }
    }

    /// Attach `child`, setting its parent reference to this unit.
    pub fn add_child(self: &Arc<Self>, child: Arc<WorkUnit>) {
        *child.parent_id.lock() = Some(self.id.clone());
        self.children.lock().all.push(child);
    }

    /// Create a new unit with the same event channel and attach it as a
    /// child. The scheduler collects children spawned during execution and
    /// adds them to the running graph, depending on this unit's node.
    pub fn spawn_child(
        self: &Arc<Self>,
        unit_type: impl Into<String>,
        behavior: Arc<dyn UnitBehavior>,
    ) -> Arc<WorkUnit> {
        let child = WorkUnit::new(unit_type, behavior, self.events.clone());
        self.add_child(Arc::clone(&child));
        child
    }

    /// Drain children that have not yet been handed to the scheduler.
    pub(crate) fn take_unscheduled_children(&self) -> Vec<Arc<WorkUnit>> {
        let mut set = self.children.lock();
        let fresh = set.all[set.handed_off..].to_vec();
        set.handed_off = set.all.len();
        fresh
    }

    /// Clone of the unit's private snapshot state.
    pub fn state(&self) -> FxHashMap<String, Value> {
        self.state.lock().clone()
    }

    /// Current value under `key` in the unit's snapshot state.
    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    /// Replace the value under `key` wholesale and emit `unit:state_updated`
    /// carrying the previous and current value.
    pub fn set_state(&self, key: impl Into<String>, value: Value) -> Result<(), UnitContextError> {
        let key = key.into();
        let previous = self.state.lock().insert(key.clone(), value.clone());
        self.emit(
            UnitEvent::STATE_UPDATED,
            json!({ "key": key, "previous": previous, "current": value }),
        )
    }

    /// Emit a typed message carrying this unit's identity and a per-unit
    /// monotonically increasing sequence number.
    pub fn emit(&self, scope: impl Into<String>, content: Value) -> Result<(), UnitContextError> {
        let metadata = UnitMetadata {
            unit_id: self.id.clone(),
            unit_type: self.unit_type.clone(),
            parent_id: self.parent_id.lock().clone(),
        };
        let event = UnitEvent::new(
            self.ids.generate_message_id(),
            scope,
            content,
            metadata,
            self.sequence.fetch_add(1, Ordering::SeqCst),
        );
        self.events
            .send(Event::Unit(event))
            .map_err(|_| UnitContextError::EventBusUnavailable)
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("unit_type", &self.unit_type)
            .field("parent_id", &*self.parent_id.lock())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to behaviors.
///
/// A thin handle on the owning unit: identity, event emission, snapshot
/// state, and child spawning. Collaborator handles (generator, store, queue)
/// are held by the behavior itself, injected at construction.
#[derive(Clone)]
pub struct UnitContext {
    unit: Arc<WorkUnit>,
}

impl UnitContext {
    pub fn unit_id(&self) -> &str {
        self.unit.id()
    }

    pub fn unit_type(&self) -> &str {
        self.unit.unit_type()
    }

    pub fn parent_id(&self) -> Option<String> {
        self.unit.parent_id()
    }

    /// Emit a unit-scoped event enriched with the unit's metadata.
    pub fn emit(&self, scope: impl Into<String>, content: Value) -> Result<(), UnitContextError> {
        self.unit.emit(scope, content)
    }

    /// Clone of the unit's snapshot state.
    pub fn state(&self) -> FxHashMap<String, Value> {
        self.unit.state()
    }

    /// Current value under `key` in the unit's snapshot state.
    pub fn state_value(&self, key: &str) -> Option<Value> {
        self.unit.state_value(key)
    }

    /// Replace the value under `key` wholesale.
    pub fn set_state(&self, key: impl Into<String>, value: Value) -> Result<(), UnitContextError> {
        self.unit.set_state(key, value)
    }

    /// Spawn a dependent child unit; the scheduler adds it to the running
    /// graph once this unit completes.
    pub fn spawn_child(
        &self,
        unit_type: impl Into<String>,
        behavior: Arc<dyn UnitBehavior>,
    ) -> Arc<WorkUnit> {
        self.unit.spawn_child(unit_type, behavior)
    }
}

impl fmt::Debug for UnitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitContext")
            .field("unit_id", &self.unit.id())
            .field("unit_type", &self.unit.unit_type())
            .finish()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when using UnitContext methods.
#[derive(Debug, Error, Diagnostic)]
pub enum UnitContextError {
    /// Event could not be sent because the bus receiver is gone.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(taskweave::unit::event_bus_unavailable),
        help("The event bus may be stopped or dropped. Check orchestrator lifetime.")
    )]
    EventBusUnavailable,
}

/// Errors that can occur during unit execution.
///
/// A `UnitError` is fatal to the emitting unit: the scheduler marks the node
/// failed and stops admitting further work.
#[derive(Debug, Error, Diagnostic)]
pub enum UnitError {
    /// Expected input data is missing from the unit's state or payload.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(taskweave::unit::missing_input),
        help("Check that upstream units produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// Produced output failed the behavior's validation.
    #[error("validation failed: {0}")]
    #[diagnostic(
        code(taskweave::unit::validation),
        help("Check generated output format and required sections.")
    )]
    ValidationFailed(String),

    /// Text-generation collaborator failure.
    #[error(transparent)]
    #[diagnostic(code(taskweave::unit::generation))]
    Generation(#[from] GenerationError),

    /// State store persistence failure.
    #[error(transparent)]
    #[diagnostic(code(taskweave::unit::persistence))]
    Persistence(#[from] PersistenceError),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    #[diagnostic(code(taskweave::unit::serde_json))]
    Serde(#[from] serde_json::Error),

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(taskweave::unit::event_bus))]
    EventBus(#[from] UnitContextError),

    /// Any other failure inside the behavior body.
    #[error("execution failed: {0}")]
    #[diagnostic(code(taskweave::unit::execution))]
    Execution(String),
}
