//! Task events, sinks, and engine metrics.
//!
//! Events are the engine's progress stream: every workflow emits them as it
//! moves through planning, routing, agent execution and synthesis. Transports
//! subscribe through an [`EventSink`]; emission failures are logged and
//! suppressed so no workflow ever fails on telemetry.

pub mod event;
pub mod metrics;
pub mod sink;

pub use event::{EventType, TaskEvent};
pub use metrics::{DelayHistogram, EngineMetrics, MetricsSnapshot};
pub use sink::{Emitter, EventSink, MemorySink, NullSink, SinkError};
