//! # Taskweave: Hierarchical Work-Unit Orchestration
//!
//! Taskweave coordinates multi-step, AI-generated analysis workflows: a
//! project description is decomposed into a chain of work units that each
//! produce an artifact consumed by later units. Units can spawn new
//! dependent units at runtime, run with bounded parallelism, and expose live
//! progress to external observers while remaining resumable across process
//! restarts.
//!
//! ## Core Concepts
//!
//! - **Work Units**: Atomic, typed, executable workflow steps with a
//!   polymorphic [`UnitBehavior`](unit::UnitBehavior) capability
//! - **Graph Scheduler**: Executes units respecting dependency order and a
//!   concurrency cap, fail-fast on node failure
//! - **Work Queue**: Independent priority-ordered task runner keyed by task
//!   type, with isolated failures
//! - **State Store**: Durable key-value store with periodic snapshot/backup
//!   rotation and restore
//! - **Orchestrator**: Composition root merging all subsystem event streams
//!   onto one bus
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::json;
//! use taskweave::config::OrchestratorConfig;
//! use taskweave::orchestrator::{Orchestrator, SequenceStep};
//! use taskweave::unit::{UnitBehavior, UnitContext, UnitError, UnitInput, WorkUnit};
//!
//! struct Requirements;
//!
//! #[async_trait]
//! impl UnitBehavior for Requirements {
//!     async fn execute(&self, _input: UnitInput, ctx: UnitContext) -> Result<(), UnitError> {
//!         ctx.emit("analysis:started", json!({}))?;
//!         // ... call the text-generation collaborator, persist results ...
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = Orchestrator::new(OrchestratorConfig::default());
//!
//! let requirements = WorkUnit::new(
//!     "requirements",
//!     Arc::new(Requirements),
//!     orchestrator.event_sender(),
//! );
//! let requirements_id = requirements.id().to_string();
//! orchestrator.register_unit(requirements)?;
//!
//! orchestrator.create_sequence(&[SequenceStep::new("requirements")])?;
//! orchestrator.start();
//! # let _ = requirements_id;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`unit`] - Work unit abstraction and execution primitives
//! - [`graph`] - Dependency graph scheduler
//! - [`queue`] - Priority work queue
//! - [`store`] - Durable state store with backup rotation
//! - [`orchestrator`] - Composition root and unit registry
//! - [`event_bus`] - Typed events, bus, and sinks
//! - [`generation`] - Text-generation collaborator contract
//! - [`behaviors`] - Template-driven analysis behaviors
//! - [`config`] - Orchestrator, store, and event bus configuration

pub mod behaviors;
pub mod config;
pub mod event_bus;
pub mod generation;
pub mod graph;
pub mod orchestrator;
pub mod queue;
pub mod store;
pub mod telemetry;
pub mod unit;
pub mod utils;
