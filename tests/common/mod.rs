//! Shared fixtures for integration tests: recording behaviors, gated
//! processors, and event-capture helpers.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use taskweave::event_bus::{Event, EventBus, MemorySink};
use taskweave::queue::{QueueTask, TaskError, TaskProcessor};
use taskweave::unit::{UnitBehavior, UnitContext, UnitError, UnitInput};

/// Event bus wired to a memory sink, listener already running.
pub fn memory_bus() -> (EventBus, MemorySink) {
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.listen_for_events();
    (bus, sink)
}

/// Poll `predicate` every 10ms until it holds, panicking after 2 seconds.
pub async fn wait_until(description: &str, mut predicate: impl FnMut() -> bool) {
    for _ in 0..200 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {description}");
}

/// Execution log shared between behaviors: `(phase, label)` entries.
pub type RunLog = Arc<Mutex<Vec<(String, String)>>>;

pub fn run_log() -> RunLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Behavior that records start/end markers around a short sleep.
pub struct RecordingBehavior {
    pub label: String,
    pub log: RunLog,
    pub delay: Duration,
}

impl RecordingBehavior {
    pub fn new(label: &str, log: &RunLog) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            log: Arc::clone(log),
            delay: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl UnitBehavior for RecordingBehavior {
    async fn execute(&self, _input: UnitInput, _ctx: UnitContext) -> Result<(), UnitError> {
        self.log
            .lock()
            .push(("start".to_string(), self.label.clone()));
        tokio::time::sleep(self.delay).await;
        self.log.lock().push(("end".to_string(), self.label.clone()));
        Ok(())
    }
}

/// Behavior that always fails with a validation error.
pub struct FailingBehavior;

#[async_trait]
impl UnitBehavior for FailingBehavior {
    async fn execute(&self, _input: UnitInput, _ctx: UnitContext) -> Result<(), UnitError> {
        Err(UnitError::ValidationFailed("forced failure".to_string()))
    }
}

/// Behavior that completes immediately.
pub struct NoopBehavior;

#[async_trait]
impl UnitBehavior for NoopBehavior {
    async fn execute(&self, _input: UnitInput, _ctx: UnitContext) -> Result<(), UnitError> {
        Ok(())
    }
}

/// Behavior that spawns one child unit during execution.
pub struct SpawningBehavior {
    pub child_label: String,
    pub log: RunLog,
}

#[async_trait]
impl UnitBehavior for SpawningBehavior {
    async fn execute(&self, _input: UnitInput, ctx: UnitContext) -> Result<(), UnitError> {
        self.log
            .lock()
            .push(("end".to_string(), "parent".to_string()));
        ctx.spawn_child(
            self.child_label.clone(),
            RecordingBehavior::new(&self.child_label, &self.log),
        );
        Ok(())
    }
}

/// Processor that records the payload's `index` and tracks concurrency.
pub struct CountingProcessor {
    pub order: Arc<Mutex<Vec<i64>>>,
    pub active: Arc<Mutex<(usize, usize)>>, // (current, observed max)
    pub delay: Duration,
}

impl CountingProcessor {
    pub fn new(order: &Arc<Mutex<Vec<i64>>>, active: &Arc<Mutex<(usize, usize)>>) -> Arc<Self> {
        Arc::new(Self {
            order: Arc::clone(order),
            active: Arc::clone(active),
            delay: Duration::from_millis(20),
        })
    }
}

#[async_trait]
impl TaskProcessor for CountingProcessor {
    async fn process(&self, task: &QueueTask) -> Result<Value, TaskError> {
        {
            let mut active = self.active.lock();
            active.0 += 1;
            active.1 = active.1.max(active.0);
        }
        if let Some(index) = task.payload.get("index").and_then(Value::as_i64) {
            self.order.lock().push(index);
        }
        tokio::time::sleep(self.delay).await;
        self.active.lock().0 -= 1;
        Ok(json!({ "done": true }))
    }
}

/// Processor that fails for payloads with `"fail": true`.
pub struct FlakyProcessor;

#[async_trait]
impl TaskProcessor for FlakyProcessor {
    async fn process(&self, task: &QueueTask) -> Result<Value, TaskError> {
        if task.payload.get("fail").and_then(Value::as_bool) == Some(true) {
            return Err(TaskError::Failed("forced task failure".to_string()));
        }
        Ok(json!({ "ok": true }))
    }
}

/// Count events in a capture matching a predicate.
pub fn count_events(events: &[Event], predicate: impl Fn(&Event) -> bool) -> usize {
    events.iter().filter(|e| predicate(e)).count()
}

/// Generator that echoes the prompt back with a prefix.
pub struct EchoGenerator {
    pub prefix: String,
}

impl EchoGenerator {
    pub fn new(prefix: &str) -> Arc<Self> {
        Arc::new(Self {
            prefix: prefix.to_string(),
        })
    }
}

#[async_trait]
impl taskweave::generation::TextGenerator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, taskweave::generation::GenerationError> {
        Ok(format!("{}:{}", self.prefix, prompt))
    }
}

/// Generator that returns empty output, for validation-failure paths.
pub struct EmptyGenerator;

#[async_trait]
impl taskweave::generation::TextGenerator for EmptyGenerator {
    async fn generate(&self, _prompt: &str) -> Result<String, taskweave::generation::GenerationError> {
        Ok(String::new())
    }
}
