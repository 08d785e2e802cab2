//! Identifier generation helpers.
//!
//! All orchestration identifiers (unit ids, task ids, event message ids) are
//! process-unique strings minted from UUIDv4. Prefixes keep the id's origin
//! readable in logs and event payloads.

use uuid::Uuid;

/// Generates prefixed, process-unique identifiers for orchestration objects.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Identifier for a work unit, e.g. `unit-1f6e...`.
    #[must_use]
    pub fn generate_unit_id(&self) -> String {
        format!("unit-{}", Uuid::new_v4())
    }

    /// Identifier for a queue task, e.g. `task-9c2a...`.
    #[must_use]
    pub fn generate_task_id(&self) -> String {
        format!("task-{}", Uuid::new_v4())
    }

    /// Identifier for a single emitted event message.
    #[must_use]
    pub fn generate_message_id(&self) -> String {
        format!("msg-{}", Uuid::new_v4())
    }
}
