//! Typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Traffic | Depth |
//! |---|---|---|
//! | [`Topic::Scans`] | Inbound laser scans awaiting detection | 1 |
//! | [`Topic::Reflectors`] | One reflector point cloud per processed scan | bus capacity |
//! | [`Topic::Diagnostics`] | Per-scan processing counters | bus capacity |
//!
//! The scan lane holds a single pending scan.  A scan published while the
//! previous one is still queued replaces it; the slow subscriber sees
//! [`RecvError::Lagged`] and then the newest scan.

use reflector_types::{Event, ReflectorError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

/// Default capacity of the output lanes.
const DEFAULT_CAPACITY: usize = 64;

/// Depth of the scan lane.
pub const SCAN_QUEUE_DEPTH: usize = 1;

/// Routing lanes of the [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound laser scans.
    Scans,
    /// Detected reflector clouds.
    Reflectors,
    /// Per-scan [`ScanDiagnostics`][reflector_types::ScanDiagnostics].
    Diagnostics,
}

/// Shared event bus.  Clone it cheaply; all clones share the same underlying
/// broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    scans: broadcast::Sender<Event>,
    reflectors: broadcast::Sender<Event>,
    diagnostics: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus.  `capacity` applies to the output lanes; the scan
    /// lane is always [`SCAN_QUEUE_DEPTH`] deep.
    pub fn new(capacity: usize) -> Self {
        let (scans, _) = broadcast::channel(SCAN_QUEUE_DEPTH);
        let (reflectors, _) = broadcast::channel(capacity);
        let (diagnostics, _) = broadcast::channel(capacity);
        Self {
            scans,
            reflectors,
            diagnostics,
        }
    }

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    /// Returns `Ok(0)` when no subscribers are currently listening on the
    /// topic; nobody listening is a normal condition.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, ReflectorError> {
        Ok(self.topic_sender(topic).send(event).unwrap_or(0))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Scans => &self.scans,
            Topic::Reflectors => &self.reflectors,
            Topic::Diagnostics => &self.diagnostics,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.  The next call yields the oldest retained one.
    /// * `Err(RecvError::Closed)` – every sender has been dropped.
    pub async fn recv(&mut self) -> Result<Event, RecvError> {
        self.receiver.recv().await
    }

    /// Take the next queued event without waiting.
    ///
    /// `Err(TryRecvError::Empty)` means nothing is queued right now.
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflector_types::{EventPayload, LaserScan, PointCloud, ScanDiagnostics};

    fn scan_event(first_range: f32) -> Event {
        Event::new(
            "reflector-middleware::test",
            EventPayload::LaserScan(LaserScan::from_ranges(vec![first_range], 0.0, 0.01)),
        )
    }

    fn first_range(event: &Event) -> Option<f32> {
        match &event.payload {
            EventPayload::LaserScan(scan) => scan.ranges.first().copied(),
            _ => None,
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        let delivered = bus.publish_to(Topic::Reflectors, scan_event(1.0)).unwrap();
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut sub1 = bus.subscribe_to(Topic::Reflectors);
        let mut sub2 = bus.subscribe_to(Topic::Reflectors);

        let event = Event::new(
            "reflector-runtime::node",
            EventPayload::ReflectorCloud(PointCloud::default()),
        );
        assert_eq!(bus.publish_to(Topic::Reflectors, event.clone())?, 2);

        assert_eq!(sub1.recv().await?.id, event.id, "subscriber 1 got wrong event");
        assert_eq!(sub2.recv().await?.id, event.id, "subscriber 2 got wrong event");
        assert_eq!(sub1.topic(), Topic::Reflectors);
        Ok(())
    }

    /// A subscriber on `Diagnostics` must not receive events published to
    /// `Reflectors` because they are routed through separate channels.
    #[tokio::test]
    async fn subscriber_does_not_receive_other_topic_events() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut diag_sub = bus.subscribe_to(Topic::Diagnostics);
        let _cloud_sub = bus.subscribe_to(Topic::Reflectors);

        bus.publish_to(
            Topic::Reflectors,
            Event::new("test", EventPayload::ReflectorCloud(PointCloud::default())),
        )?;

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), diag_sub.recv()).await;
        assert!(
            result.is_err(),
            "Diagnostics subscriber must not receive a Reflectors event"
        );

        bus.publish_to(
            Topic::Diagnostics,
            Event::new("test", EventPayload::Diagnostics(ScanDiagnostics::default())),
        )?;
        assert!(matches!(
            diag_sub.recv().await?.payload,
            EventPayload::Diagnostics(_)
        ));
        Ok(())
    }

    /// A scan published while another is pending replaces it.
    #[tokio::test]
    async fn scan_lane_keeps_only_the_newest_scan() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut scans = bus.subscribe_to(Topic::Scans);

        for r in [1.0, 2.0, 3.0] {
            bus.publish_to(Topic::Scans, scan_event(r))?;
        }

        let result = scans.recv().await;
        assert!(
            matches!(result, Err(RecvError::Lagged(2))),
            "expected Lagged(2), got: {result:?}"
        );
        let newest = scans.recv().await?;
        assert_eq!(first_range(&newest), Some(3.0));
        Ok(())
    }

    #[tokio::test]
    async fn output_lanes_buffer_up_to_capacity() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe_to(Topic::Reflectors);
        for _ in 0..8 {
            bus.publish_to(
                Topic::Reflectors,
                Event::new("test", EventPayload::ReflectorCloud(PointCloud::default())),
            )?;
        }
        for _ in 0..8 {
            assert!(sub.recv().await.is_ok());
        }
        Ok(())
    }

    #[test]
    fn try_recv_drains_the_pending_scan() {
        let bus = EventBus::default();
        let mut scans = bus.subscribe_to(Topic::Scans);
        assert!(matches!(scans.try_recv(), Err(TryRecvError::Empty)));

        bus.publish_to(Topic::Scans, scan_event(1.0)).unwrap();
        bus.publish_to(Topic::Scans, scan_event(2.0)).unwrap();
        assert!(matches!(scans.try_recv(), Err(TryRecvError::Lagged(1))));
        match scans.try_recv().unwrap().payload {
            EventPayload::LaserScan(scan) => assert_eq!(scan.ranges, vec![2.0]),
            other => panic!("expected scan, got {other:?}"),
        }
        assert!(matches!(scans.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn closed_bus_reports_closed() {
        let bus = EventBus::default();
        let mut sub = bus.subscribe_to(Topic::Diagnostics);
        drop(bus);
        assert!(matches!(sub.recv().await, Err(RecvError::Closed)));
    }
}
