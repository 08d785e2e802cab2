//! Priority work queue for ad-hoc background jobs.
//!
//! Independent of the dependency graph: tasks are keyed by a type tag that
//! selects a registered [`TaskProcessor`], ordered by priority with strict
//! FIFO among equals, and run with bounded concurrency. Unlike the graph
//! scheduler, one task's failure never blocks the rest — failures are
//! isolated to the failing task's event.
//!
//! Terminal tasks are removed from the live set; capture `task:completed` /
//! `task:failed` events if the outcome matters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::event_bus::{Event, QueueEvent};
use crate::generation::GenerationError;
use crate::store::PersistenceError;
use crate::utils::ids::IdGenerator;

/// Status of one queue task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One admitted task: identity, payload, and ordering keys.
///
/// `sequence` is assigned at admission and breaks priority ties — the
/// ordering `(priority desc, sequence asc)` is strictly total even when two
/// tasks are admitted within the same millisecond.
#[derive(Clone, Debug)]
pub struct QueueTask {
    pub id: String,
    pub task_type: String,
    pub payload: Value,
    pub priority: i64,
    pub sequence: u64,
    pub admitted_at: DateTime<Utc>,
    pub status: TaskStatus,
}

/// Per-type processing logic for queue tasks.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Process one task, returning a JSON result carried on the
    /// `task:completed` event.
    async fn process(&self, task: &QueueTask) -> Result<Value, TaskError>;
}

/// Errors from a task processor body.
#[derive(Debug, Error, Diagnostic)]
pub enum TaskError {
    #[error("task failed: {0}")]
    #[diagnostic(code(taskweave::queue::task_failed))]
    Failed(String),

    #[error(transparent)]
    #[diagnostic(code(taskweave::queue::generation))]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    #[diagnostic(code(taskweave::queue::persistence))]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    #[diagnostic(code(taskweave::queue::serde_json))]
    Serde(#[from] serde_json::Error),
}

/// Admission-side errors.
#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("no processor registered for task type: {task_type}")]
    #[diagnostic(
        code(taskweave::queue::unregistered_processor),
        help("Call register_processor for this type before adding tasks.")
    )]
    UnregisteredProcessor { task_type: String },
}

/// Counts of live tasks, aggregated into the orchestrator status.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct QueueStatus {
    pub running: bool,
    pub pending_tasks: usize,
    pub running_tasks: usize,
}

/// Priority-ordered task runner with per-type processors.
///
/// Cheap to clone; clones share the same task list. Admission bookkeeping is
/// a single-writer domain guarded by one lock; task bodies run with true
/// parallelism on spawned tasks, bounded by `max_concurrency`.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Mutex<QueueInner>>,
    events: flume::Sender<Event>,
    max_concurrency: usize,
    next_sequence: Arc<AtomicU64>,
    ids: IdGenerator,
}

struct QueueInner {
    processors: FxHashMap<String, Arc<dyn TaskProcessor>>,
    tasks: Vec<QueueTask>,
    running: bool,
    running_tasks: FxHashSet<String>,
}

impl WorkQueue {
    pub fn new(max_concurrency: usize, events: flume::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                processors: FxHashMap::default(),
                tasks: Vec::new(),
                running: false,
                running_tasks: FxHashSet::default(),
            })),
            events,
            max_concurrency: max_concurrency.max(1),
            next_sequence: Arc::new(AtomicU64::new(0)),
            ids: IdGenerator::new(),
        }
    }

    /// Bind one handler for a task type. Re-registering replaces the handler.
    pub fn register_processor(
        &self,
        task_type: impl Into<String>,
        processor: Arc<dyn TaskProcessor>,
    ) {
        self.inner
            .lock()
            .processors
            .insert(task_type.into(), processor);
    }

    /// Admit a task; returns its id.
    ///
    /// Fails up front when no processor is registered for `task_type`.
    /// If the queue is running, admission is attempted immediately.
    pub fn add_task(
        &self,
        task_type: impl Into<String>,
        payload: Value,
        priority: i64,
    ) -> Result<String, QueueError> {
        let task_type = task_type.into();
        let task = QueueTask {
            id: self.ids.generate_task_id(),
            task_type: task_type.clone(),
            payload,
            priority,
            sequence: self.next_sequence.fetch_add(1, Ordering::SeqCst),
            admitted_at: Utc::now(),
            status: TaskStatus::Pending,
        };
        let task_id = task.id.clone();

        let mut inner = self.inner.lock();
        if !inner.processors.contains_key(&task_type) {
            return Err(QueueError::UnregisteredProcessor { task_type });
        }
        inner.tasks.push(task);
        inner.sort_tasks();

        self.emit(QueueEvent::TaskAdded {
            task_id: task_id.clone(),
            task_type,
            timestamp: Utc::now(),
        });

        if inner.running {
            self.admit_locked(&mut inner);
        }
        Ok(task_id)
    }

    /// Start dispatching. Idempotent while already running.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;
        self.emit(QueueEvent::Started {
            timestamp: Utc::now(),
        });
        self.admit_locked(&mut inner);
    }

    /// Halt admission of further tasks. In-flight tasks are not cancelled.
    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if !inner.running {
            return;
        }
        inner.running = false;
        self.emit(QueueEvent::Stopped {
            timestamp: Utc::now(),
        });
    }

    /// Counts of pending and running tasks.
    pub fn status(&self) -> QueueStatus {
        let inner = self.inner.lock();
        QueueStatus {
            running: inner.running,
            pending_tasks: inner
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Pending)
                .count(),
            running_tasks: inner.running_tasks.len(),
        }
    }

    /// One admission pass: dispatch the highest-ranked pending tasks into
    /// free capacity. Runs entirely under the queue lock.
    fn admit_locked(&self, inner: &mut QueueInner) {
        if !inner.running {
            return;
        }
        let slots = self.max_concurrency.saturating_sub(inner.running_tasks.len());
        if slots == 0 {
            return;
        }

        let to_run: Vec<String> = inner
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && !inner.running_tasks.contains(&t.id))
            .take(slots)
            .map(|t| t.id.clone())
            .collect();

        for task_id in to_run {
            let Some(index) = inner.tasks.iter().position(|t| t.id == task_id) else {
                continue;
            };
            let Some(processor) = inner
                .processors
                .get(&inner.tasks[index].task_type)
                .cloned()
            else {
                continue;
            };
            inner.tasks[index].status = TaskStatus::Running;
            let task_snapshot = inner.tasks[index].clone();
            inner.running_tasks.insert(task_id.clone());
            self.emit(QueueEvent::TaskStarted {
                task_id: task_id.clone(),
                task_type: task_snapshot.task_type.clone(),
                timestamp: Utc::now(),
            });

            let queue = self.clone();
            tokio::spawn(async move {
                let result = processor.process(&task_snapshot).await;
                queue.finish_task(task_snapshot, result);
            });
        }
    }

    /// Record a task outcome, drop it from the live set, and refill capacity.
    fn finish_task(&self, task: QueueTask, result: Result<Value, TaskError>) {
        let mut inner = self.inner.lock();
        inner.running_tasks.remove(&task.id);
        inner.tasks.retain(|t| t.id != task.id);

        match result {
            Ok(result) => self.emit(QueueEvent::TaskCompleted {
                task_id: task.id,
                task_type: task.task_type,
                result,
                timestamp: Utc::now(),
            }),
            Err(error) => self.emit(QueueEvent::TaskFailed {
                task_id: task.id,
                task_type: task.task_type,
                error: error.to_string(),
                timestamp: Utc::now(),
            }),
        }

        self.admit_locked(&mut inner);
    }

    fn emit(&self, event: QueueEvent) {
        if self.events.send(Event::Queue(event)).is_err() {
            tracing::debug!("event bus closed; queue event dropped");
        }
    }
}

impl QueueInner {
    /// Priority-then-FIFO: higher priority first, admission sequence breaks
    /// ties.
    fn sort_tasks(&mut self) {
        self.tasks
            .sort_by(|a, b| b.priority.cmp(&a.priority).then(a.sequence.cmp(&b.sequence)));
    }
}
