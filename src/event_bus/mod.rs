//! Typed event publication for the orchestration core.
//!
//! The module is organised around a sink-based [`EventBus`]: producers send
//! [`Event`] values over a cloned flume sender, a background listener fans
//! them out to registered [`EventSink`]s (stdout, memory, channel).

pub mod bus;
pub mod event;
pub mod sink;

pub use bus::EventBus;
pub use event::{
    Event, GraphEvent, OrchestratorEvent, QueueEvent, RestoreSource, StoreEvent, UnitEvent,
    UnitMetadata,
};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
