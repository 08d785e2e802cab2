//! Dependency graph scheduler.
//!
//! Wires registered work units into a directed acyclic graph and drives
//! execution respecting both dependency order and a global concurrency
//! bound. Admission is a single-writer domain: every pass over the ready set
//! runs to completion under one lock before the next completion or addition
//! is processed, so two passes can never double-count capacity. Unit bodies
//! themselves run with true parallelism on spawned tasks.
//!
//! Failure is fail-fast: the first failed node halts admission of further
//! work. In-flight nodes are not cancelled or retried.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use thiserror::Error;

use crate::event_bus::{Event, GraphEvent};
use crate::unit::{UnitError, UnitInput, WorkUnit};

/// Status of one graph node. Terminal states are absorbing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Ordered dependency-to-dependent pair. Edges are append-only for the
/// lifetime of one graph execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

struct GraphNode {
    unit: Arc<WorkUnit>,
    dependencies: Vec<String>,
    dependents: Vec<String>,
    status: NodeStatus,
}

/// Snapshot of all node ids and statuses, in insertion order.
#[derive(Clone, Debug, Serialize)]
pub struct GraphStatus {
    pub running: bool,
    pub nodes: Vec<NodeStatusEntry>,
}

#[derive(Clone, Debug, Serialize)]
pub struct NodeStatusEntry {
    pub id: String,
    pub status: NodeStatus,
}

/// Graph construction errors.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("node already registered: {node_id}")]
    #[diagnostic(code(taskweave::graph::duplicate_node))]
    DuplicateNode { node_id: String },

    #[error("adding node {node_id} would close a dependency cycle")]
    #[diagnostic(
        code(taskweave::graph::dependency_cycle),
        help("A node can never become ready inside a cycle; restructure the dependency declarations.")
    )]
    DependencyCycle { node_id: String },
}

/// Executes work units respecting dependency order and a concurrency cap.
///
/// Cheap to clone; clones share the same graph. Nodes may be added while the
/// graph is running — both externally and by completing units that spawned
/// children during execution.
#[derive(Clone)]
pub struct GraphScheduler {
    inner: Arc<Mutex<GraphInner>>,
    events: flume::Sender<Event>,
    max_concurrency: usize,
}

struct GraphInner {
    nodes: FxHashMap<String, GraphNode>,
    edges: Vec<GraphEdge>,
    /// Insertion order, used for a deterministic ready-set scan.
    order: Vec<String>,
    running: bool,
    in_flight: FxHashSet<String>,
}

impl GraphScheduler {
    pub fn new(max_concurrency: usize, events: flume::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(GraphInner {
                nodes: FxHashMap::default(),
                edges: Vec::new(),
                order: Vec::new(),
                running: false,
                in_flight: FxHashSet::default(),
            })),
            events,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Register a node for `unit`, depending on the given node ids.
    ///
    /// Dependencies may name nodes that are not registered yet; such a node
    /// stays pending until the missing dependency is added and completes.
    /// An edge set that closes a cycle is rejected before registration.
    pub fn add_node(
        &self,
        unit: Arc<WorkUnit>,
        dependencies: Vec<String>,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock();
        inner.insert_node(unit, dependencies)?;
        if inner.running {
            self.admit_locked(&mut inner);
        }
        Ok(())
    }

    /// Transition to running and begin admitting ready nodes.
    /// Idempotent while already running.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;
        self.emit(GraphEvent::Started {
            timestamp: Utc::now(),
        });
        self.admit_locked(&mut inner);
    }

    /// Halt admission of further nodes. In-flight nodes are not cancelled.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        inner.running = false;
        self.emit(GraphEvent::Stopped {
            timestamp: Utc::now(),
        });
    }

    /// Snapshot of all node ids and statuses.
    pub fn status(&self) -> GraphStatus {
        let inner = self.inner.lock();
        GraphStatus {
            running: inner.running,
            nodes: inner
                .order
                .iter()
                .filter_map(|id| {
                    inner.nodes.get(id).map(|node| NodeStatusEntry {
                        id: id.clone(),
                        status: node.status,
                    })
                })
                .collect(),
        }
    }

    /// Status of a single node, if registered.
    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.inner.lock().nodes.get(node_id).map(|n| n.status)
    }

    /// Append-only edge list recorded so far.
    pub fn edges(&self) -> Vec<GraphEdge> {
        self.inner.lock().edges.clone()
    }

    /// Derived dependent ids of a node.
    pub fn dependents(&self, node_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .nodes
            .get(node_id)
            .map(|n| n.dependents.clone())
            .unwrap_or_default()
    }

    /// One admission pass: fill free capacity with ready nodes.
    ///
    /// A node is ready iff it is pending, not in flight, and every
    /// dependency resolves to a completed node. Runs entirely under the
    /// graph lock; only the unit bodies escape onto spawned tasks.
    fn admit_locked(&self, inner: &mut GraphInner) {
        if !inner.running {
            return;
        }
        let slots = self.max_concurrency.saturating_sub(inner.in_flight.len());
        if slots == 0 {
            return;
        }

        let ready: Vec<String> = inner
            .order
            .iter()
            .filter(|id| inner.is_ready(id.as_str()))
            .take(slots)
            .cloned()
            .collect();

        for node_id in ready {
            let unit = {
                let node = inner
                    .nodes
                    .get_mut(&node_id)
                    .expect("ready node exists in table");
                node.status = NodeStatus::Running;
                Arc::clone(&node.unit)
            };
            inner.in_flight.insert(node_id.clone());
            self.emit(GraphEvent::NodeStarted {
                node_id: node_id.clone(),
                timestamp: Utc::now(),
            });

            let scheduler = self.clone();
            tokio::spawn(async move {
                let result = unit.execute(UnitInput::for_node(node_id.as_str())).await;
                scheduler.finish_node(&node_id, result);
            });
        }
    }

    /// Record a node outcome and recompute the ready set.
    fn finish_node(&self, node_id: &str, result: Result<(), UnitError>) {
        let mut inner = self.inner.lock();
        inner.in_flight.remove(node_id);

        match result {
            Ok(()) => {
                let children = {
                    let Some(node) = inner.nodes.get_mut(node_id) else {
                        return;
                    };
                    node.status = NodeStatus::Completed;
                    node.unit.take_unscheduled_children()
                };
                self.emit(GraphEvent::NodeCompleted {
                    node_id: node_id.to_string(),
                    timestamp: Utc::now(),
                });

                // Children spawned during execution join the running graph,
                // depending on the node that spawned them.
                for child in children {
                    match inner.insert_node(child, vec![node_id.to_string()]) {
                        Ok(()) => {}
                        Err(e) => {
                            tracing::warn!(parent = node_id, error = %e, "skipping runtime child");
                        }
                    }
                }

                self.admit_locked(&mut inner);
            }
            Err(error) => {
                if let Some(node) = inner.nodes.get_mut(node_id) {
                    node.status = NodeStatus::Failed;
                }
                self.emit(GraphEvent::NodeFailed {
                    node_id: node_id.to_string(),
                    error: error.to_string(),
                    timestamp: Utc::now(),
                });
                // Fail-fast: one failure stops new admissions; in-flight
                // nodes run to completion on their own.
                inner.running = false;
            }
        }
    }

    fn emit(&self, event: GraphEvent) {
        if self.events.send(Event::Graph(event)).is_err() {
            tracing::debug!("event bus closed; graph event dropped");
        }
    }
}

impl GraphInner {
    fn insert_node(
        &mut self,
        unit: Arc<WorkUnit>,
        dependencies: Vec<String>,
    ) -> Result<(), GraphError> {
        let node_id = unit.id().to_string();
        if self.nodes.contains_key(&node_id) {
            return Err(GraphError::DuplicateNode { node_id });
        }
        if self.would_cycle(&node_id, &dependencies) {
            return Err(GraphError::DependencyCycle { node_id });
        }

        // Earlier nodes may have declared this node as a dependency before
        // it existed; pick those dependents up from the edge list.
        let dependents: Vec<String> = self
            .edges
            .iter()
            .filter(|edge| edge.from == node_id)
            .map(|edge| edge.to.clone())
            .collect();

        for dep in &dependencies {
            self.edges.push(GraphEdge {
                from: dep.clone(),
                to: node_id.clone(),
            });
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.dependents.push(node_id.clone());
            }
        }

        self.nodes.insert(
            node_id.clone(),
            GraphNode {
                unit,
                dependencies,
                dependents,
                status: NodeStatus::Pending,
            },
        );
        self.order.push(node_id);
        Ok(())
    }

    /// Would registering `node_id` with these dependencies close a cycle?
    /// Walks the dependency direction through already-known nodes.
    fn would_cycle(&self, node_id: &str, dependencies: &[String]) -> bool {
        let mut stack: Vec<&str> = dependencies.iter().map(String::as_str).collect();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        while let Some(current) = stack.pop() {
            if current == node_id {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(node) = self.nodes.get(current) {
                stack.extend(node.dependencies.iter().map(String::as_str));
            }
        }
        false
    }

    fn is_ready(&self, node_id: &str) -> bool {
        let Some(node) = self.nodes.get(node_id) else {
            return false;
        };
        if node.status != NodeStatus::Pending || self.in_flight.contains(node_id) {
            return false;
        }
        node.dependencies.iter().all(|dep| {
            self.nodes
                .get(dep)
                .is_some_and(|dep_node| dep_node.status == NodeStatus::Completed)
        })
    }
}
