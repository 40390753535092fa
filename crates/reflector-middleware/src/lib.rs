//! `reflector-middleware` – transport plumbing around the detector.
//!
//! Routes scans in and reflector clouds out without caring about what the
//! detector does with them.
//!
//! # Modules
//!
//! - [`bus`] – Topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels, with a depth-1 scan lane.
//! - [`adapter`] – [`ScanSource`] / [`CloudSink`], the traits every transport
//!   implements.
//! - [`rosbridge`] – rosbridge v2 WebSocket client.
//! - [`replay`] – JSON-lines recordings.

pub mod adapter;
pub mod bus;
pub mod replay;
pub mod rosbridge;

pub use adapter::{CloudSink, ScanSource};
pub use bus::{EventBus, Topic, TopicReceiver};
pub use replay::{JsonLinesSink, JsonLinesSource};
pub use rosbridge::{RosbridgeClouds, RosbridgeScans};
