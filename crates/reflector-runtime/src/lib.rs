//! `reflector-runtime` – the running detector node.
//!
//! # Modules
//!
//! - [`node`] – [`ReflectorNode`][node::ReflectorNode]: wires a scan source
//!   and a cloud sink to the detector through the event bus, or replays a
//!   recording scan by scan.
//! - [`stats`] – [`NodeStats`][stats::NodeStats]: lock-free counters for
//!   processed, dropped and degraded scans.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter tagged with the run's topics.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable trace export.

pub mod node;
pub mod stats;
pub mod telemetry;

pub use node::ReflectorNode;
pub use stats::{NodeStats, StatsSnapshot};
pub use telemetry::{Pipeline, TelemetryContext, TracerProviderGuard, init_tracing};
