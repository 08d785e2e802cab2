//! Composition root binding scheduler, queue, state store, and the unit
//! registry into one observable system.
//!
//! The orchestrator owns one [`WorkQueue`], one [`GraphScheduler`], one
//! [`StateStore`], and one [`EventBus`]; every subsystem emits onto the same
//! bus, so registering a sink observes the merged stream. Accessors expose
//! the subsystems directly — a unit behavior can enqueue ad-hoc background
//! work or persist results without the orchestrator mediating every call.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;
use tracing::instrument;

use crate::config::OrchestratorConfig;
use crate::event_bus::{Event, EventBus, OrchestratorEvent};
use crate::graph::{GraphError, GraphScheduler, GraphStatus};
use crate::queue::{QueueStatus, WorkQueue};
use crate::store::{StateStore, StoreStatus};
use crate::unit::{UnitContextError, WorkUnit};

/// Errors from wiring units and sequences together.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigurationError {
    /// A sequence declaration named a type with no registered unit.
    #[error("no unit registered for type: {unit_type}")]
    #[diagnostic(
        code(taskweave::orchestrator::unknown_unit_type),
        help("Register a unit with this type tag before declaring a sequence over it.")
    )]
    UnknownUnitType { unit_type: String },

    #[error(transparent)]
    #[diagnostic(code(taskweave::orchestrator::graph))]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(code(taskweave::orchestrator::event_bus))]
    EventBus(#[from] UnitContextError),
}

/// One step of a declared dependency sequence: a unit type tag plus the
/// node ids it depends on.
#[derive(Clone, Debug, Default)]
pub struct SequenceStep {
    pub unit_type: String,
    pub dependencies: Vec<String>,
}

impl SequenceStep {
    pub fn new(unit_type: impl Into<String>) -> Self {
        Self {
            unit_type: unit_type.into(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn depends_on(mut self, node_id: impl Into<String>) -> Self {
        self.dependencies.push(node_id.into());
        self
    }
}

/// Aggregated snapshot across all subsystems.
#[derive(Clone, Debug, Serialize)]
pub struct OrchestratorStatus {
    pub units: usize,
    pub graph: GraphStatus,
    pub queue: QueueStatus,
    pub store: StoreStatus,
}

/// Composition root for one workflow system.
pub struct Orchestrator {
    units: Mutex<FxHashMap<String, Arc<WorkUnit>>>,
    queue: WorkQueue,
    scheduler: GraphScheduler,
    store: Arc<StateStore>,
    event_bus: EventBus,
}

impl Orchestrator {
    /// Build the subsystems from configuration and start the event bus
    /// listener. The scheduler and queue stay stopped until
    /// [`start`](Self::start).
    pub fn new(config: OrchestratorConfig) -> Self {
        let event_bus = config.event_bus.build_event_bus();
        event_bus.listen_for_events();
        let sender = event_bus.get_sender();

        Self {
            units: Mutex::new(FxHashMap::default()),
            queue: WorkQueue::new(config.max_concurrency, sender.clone()),
            scheduler: GraphScheduler::new(config.max_concurrency, sender.clone()),
            store: StateStore::new(config.store, sender),
            event_bus,
        }
    }

    /// Sender handle for constructing units that emit onto this
    /// orchestrator's merged event stream.
    pub fn event_sender(&self) -> flume::Sender<Event> {
        self.event_bus.get_sender()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Add a unit to the registry under its type tag and announce its
    /// readiness. Re-registering a type replaces the previous unit.
    pub fn register_unit(&self, unit: Arc<WorkUnit>) -> Result<(), ConfigurationError> {
        unit.initialize()?;
        self.units
            .lock()
            .insert(unit.unit_type().to_string(), unit);
        Ok(())
    }

    /// Registered unit for a type tag, if any.
    pub fn get_unit(&self, unit_type: &str) -> Option<Arc<WorkUnit>> {
        self.units.lock().get(unit_type).cloned()
    }

    /// Resolve each declaration's type to a registered unit and add it to
    /// the scheduler with its declared dependency ids.
    ///
    /// All types are resolved before the scheduler is touched, so an
    /// unknown type leaves the graph unchanged.
    #[instrument(skip(self, steps), err)]
    pub fn create_sequence(&self, steps: &[SequenceStep]) -> Result<(), ConfigurationError> {
        let resolved: Vec<(Arc<WorkUnit>, Vec<String>)> = {
            let units = self.units.lock();
            steps
                .iter()
                .map(|step| {
                    units
                        .get(&step.unit_type)
                        .cloned()
                        .map(|unit| (unit, step.dependencies.clone()))
                        .ok_or_else(|| ConfigurationError::UnknownUnitType {
                            unit_type: step.unit_type.clone(),
                        })
                })
                .collect::<Result<_, _>>()?
        };

        for (unit, dependencies) in resolved {
            self.scheduler.add_node(unit, dependencies)?;
        }
        Ok(())
    }

    /// Start the queue and the scheduler together.
    #[instrument(skip(self))]
    pub fn start(&self) {
        self.queue.start();
        self.scheduler.start();
        self.emit(OrchestratorEvent::Started {
            timestamp: Utc::now(),
        });
    }

    /// Stop admission on the queue and the scheduler together. In-flight
    /// work is not cancelled.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        self.queue.stop();
        self.scheduler.stop();
        self.emit(OrchestratorEvent::Stopped {
            timestamp: Utc::now(),
        });
    }

    /// Stop everything, including the store's backup timer and the event
    /// bus listener. Call at the end of the orchestrator's life.
    pub async fn shutdown(&self) {
        self.stop();
        self.store.stop_backup_timer().await;
        self.event_bus.stop_listener().await;
    }

    /// Aggregate unit count, scheduler, queue, and store status.
    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            units: self.units.lock().len(),
            graph: self.scheduler.status(),
            queue: self.queue.status(),
            store: self.store.status(),
        }
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn scheduler(&self) -> &GraphScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    fn emit(&self, event: OrchestratorEvent) {
        if self.event_bus.get_sender().send(Event::Orchestrator(event)).is_err() {
            tracing::debug!("event bus closed; orchestrator event dropped");
        }
    }
}
