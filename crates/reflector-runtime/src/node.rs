//! The reflector node: scans in, reflector clouds out.
//!
//! [`ReflectorNode::run`] drives a live transport through the [`EventBus`]:
//!
//! ```text
//!  ScanSource ──► Topic::Scans (depth 1) ──► detector task
//!                                               │
//!  CloudSink  ◄── Topic::Reflectors ◄───────────┤
//!                 Topic::Diagnostics ◄──────────┘
//! ```
//!
//! The scan lane holds one pending scan.  When the detector falls behind,
//! stale scans are dropped, logged, and counted in [`NodeStats`].
//!
//! [`ReflectorNode::replay`] processes every scan of a finite source in
//! order, without the bus, so no recorded scan is ever dropped.

use std::sync::Arc;

use reflector_middleware::{CloudSink, EventBus, ScanSource, Topic, TopicReceiver};
use reflector_perception::ReflectorDetector;
use reflector_types::{Event, EventPayload, LaserScan, PointCloud, ReflectorError};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinError;
use tracing::{debug, info, instrument, warn};

use crate::stats::{NodeStats, StatsSnapshot};

/// Event source tag for everything the node publishes.
pub const NODE_SOURCE: &str = "reflector-runtime::node";
/// Event source tag for scans entering the bus.
pub const SCAN_SOURCE: &str = "reflector-runtime::node/scan";

/// Scan-to-cloud pipeline bound to an [`EventBus`].
#[derive(Clone)]
pub struct ReflectorNode {
    detector: ReflectorDetector,
    bus: EventBus,
    stats: Arc<NodeStats>,
}

impl ReflectorNode {
    pub fn new(detector: ReflectorDetector) -> Self {
        Self::with_bus(detector, EventBus::default())
    }

    pub fn with_bus(detector: ReflectorDetector, bus: EventBus) -> Self {
        Self {
            detector,
            bus,
            stats: Arc::new(NodeStats::new()),
        }
    }

    /// A handle to the node's bus, e.g. to watch [`Topic::Diagnostics`].
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn stats(&self) -> Arc<NodeStats> {
        Arc::clone(&self.stats)
    }

    /// Detect reflectors in one scan.
    ///
    /// Records the scan's diagnostics, publishes them on
    /// [`Topic::Diagnostics`] and returns the cloud, stamped with the scan's
    /// header.
    #[instrument(
        skip_all,
        fields(readings = scan.ranges.len(), frame_id = %scan.header.frame_id)
    )]
    pub fn process_scan(&self, scan: &LaserScan) -> PointCloud {
        let detection = self.detector.detect(scan);
        self.stats
            .record_detection(&detection.diagnostics, detection.reflectors.len());

        let diagnostics = Event::new(
            NODE_SOURCE,
            EventPayload::Diagnostics(detection.diagnostics.clone()),
        );
        if let Err(e) = self.bus.publish_to(Topic::Diagnostics, diagnostics) {
            warn!(error = %e, "failed to publish diagnostics");
        }

        let cloud = detection.into_cloud(scan.header.clone());
        debug!(reflectors = cloud.points.len(), "scan processed");
        cloud
    }

    /// Process every scan from `source` in order and write one cloud per scan
    /// to `sink`.  Returns when the source is exhausted.
    pub async fn replay<S, K>(&self, mut source: S, mut sink: K) -> Result<StatsSnapshot, ReflectorError>
    where
        S: ScanSource,
        K: CloudSink,
    {
        while let Some(scan) = source.next_scan().await? {
            self.stats.record_received();
            let cloud = self.process_scan(&scan);
            sink.send_cloud(&cloud).await?;
            self.stats.record_cloud_sent();
        }
        sink.finish().await?;

        let snapshot = self.stats.snapshot();
        info!(
            scans = snapshot.scans_processed,
            reflectors = snapshot.reflectors,
            "replay finished"
        );
        Ok(snapshot)
    }

    /// Run the live pipeline until `shutdown` flips, the source is exhausted,
    /// or a transport error occurs.
    ///
    /// When the source runs dry the scan still waiting in the lane is
    /// processed and its cloud delivered before `run` returns.  The detector
    /// task stopping on its own is reported as [`ReflectorError::Channel`].
    pub async fn run<S, K>(
        &self,
        mut source: S,
        mut sink: K,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<StatsSnapshot, ReflectorError>
    where
        S: ScanSource,
        K: CloudSink,
    {
        let scans = self.bus.subscribe_to(Topic::Scans);
        let mut clouds = self.bus.subscribe_to(Topic::Reflectors);
        let (drain_tx, drain_rx) = oneshot::channel();
        let mut drain_tx = Some(drain_tx);
        let mut worker = {
            let node = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { node.detect_loop(scans, shutdown, drain_rx).await })
        };
        let mut worker_done = false;
        info!("reflector node running");

        let result = loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown requested");
                    break Ok(());
                }
                next = source.next_scan(), if drain_tx.is_some() => match next {
                    Ok(Some(scan)) => {
                        self.stats.record_received();
                        let event = Event::new(SCAN_SOURCE, EventPayload::LaserScan(scan));
                        if let Err(e) = self.bus.publish_to(Topic::Scans, event) {
                            break Err(e);
                        }
                    }
                    Ok(None) => {
                        info!("scan source exhausted, finishing pending scan");
                        if let Some(tx) = drain_tx.take() {
                            let _ = tx.send(());
                        }
                    }
                    Err(e) => break Err(e),
                },
                joined = &mut worker => {
                    worker_done = true;
                    let stopping = *shutdown.borrow() || shutdown.has_changed().is_err();
                    let draining = drain_tx.is_none();
                    if let Err(e) = detector_exited(joined, stopping || draining) {
                        break Err(e);
                    }
                    if draining {
                        break self.flush_clouds(&mut clouds, &mut sink).await;
                    }
                    break Ok(());
                }
                received = clouds.recv() => match received {
                    Ok(event) => {
                        if let Err(e) = self.forward_cloud(event, &mut sink).await {
                            break Err(e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(topic = ?clouds.topic(), lagged_by = n, "cloud sink lagged, clouds lost");
                    }
                    Err(RecvError::Closed) => {
                        break Err(ReflectorError::Channel("reflector lane closed".to_string()));
                    }
                },
            }
        };

        if !worker_done {
            worker.abort();
            let _ = worker.await;
        }
        let finished = sink.finish().await;

        let snapshot = self.stats.snapshot();
        info!(
            received = snapshot.scans_received,
            processed = snapshot.scans_processed,
            dropped = snapshot.scans_dropped,
            "reflector node stopped"
        );
        result?;
        finished?;
        Ok(snapshot)
    }

    /// Detector task: takes the newest pending scan, publishes its cloud.
    ///
    /// Once `drain` fires, whatever is still queued is processed and the task
    /// returns.
    async fn detect_loop(
        self,
        mut scans: TopicReceiver,
        mut shutdown: watch::Receiver<bool>,
        mut drain: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = &mut drain => {
                    loop {
                        match scans.try_recv() {
                            Ok(event) => self.detect_event(event),
                            Err(TryRecvError::Lagged(n)) => self.record_lag(&scans, n),
                            Err(_) => break,
                        }
                    }
                    break;
                }
                received = scans.recv() => match received {
                    Ok(event) => self.detect_event(event),
                    Err(RecvError::Lagged(n)) => self.record_lag(&scans, n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    fn detect_event(&self, event: Event) {
        if let EventPayload::LaserScan(scan) = event.payload {
            let cloud = self.process_scan(&scan);
            let event = Event::new(NODE_SOURCE, EventPayload::ReflectorCloud(cloud));
            if let Err(e) = self.bus.publish_to(Topic::Reflectors, event) {
                warn!(error = %e, "failed to publish reflectors");
            }
        }
    }

    fn record_lag(&self, scans: &TopicReceiver, n: u64) {
        self.stats.record_dropped(n);
        warn!(topic = ?scans.topic(), dropped = n, "detector fell behind, dropping stale scans");
    }

    async fn forward_cloud<K: CloudSink>(&self, event: Event, sink: &mut K) -> Result<(), ReflectorError> {
        if let EventPayload::ReflectorCloud(cloud) = event.payload {
            sink.send_cloud(&cloud).await?;
            self.stats.record_cloud_sent();
        }
        Ok(())
    }

    /// Send every cloud already queued on the reflector lane.
    async fn flush_clouds<K: CloudSink>(
        &self,
        clouds: &mut TopicReceiver,
        sink: &mut K,
    ) -> Result<(), ReflectorError> {
        loop {
            match clouds.try_recv() {
                Ok(event) => self.forward_cloud(event, sink).await?,
                Err(TryRecvError::Lagged(n)) => {
                    warn!(topic = ?clouds.topic(), lagged_by = n, "cloud sink lagged, clouds lost");
                }
                Err(_) => return Ok(()),
            }
        }
    }
}

/// Map the detector task's exit onto the node's result.  `expected` is true
/// when the node itself asked the task to stop.
fn detector_exited(joined: Result<(), JoinError>, expected: bool) -> Result<(), ReflectorError> {
    match joined {
        Err(e) => Err(ReflectorError::Channel(format!("detector task failed: {e}"))),
        Ok(()) if expected => Ok(()),
        Ok(()) => Err(ReflectorError::Channel(
            "detector task stopped unexpectedly".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reflector_middleware::{JsonLinesSink, JsonLinesSource};
    use reflector_perception::REFLECTOR_RADIUS;
    use reflector_types::{Header, Time};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// 200 beams from −1.0 rad in 0.01 steps; beams 100–104 hit a post
    /// centred 1.0425 m away at bearing 0.02.
    fn scan_with_post(seq: u32) -> LaserScan {
        let range = 1.0 + REFLECTOR_RADIUS;
        let (cx, cy) = (range * 0.02_f64.cos(), range * 0.02_f64.sin());
        let ranges = (0..200)
            .map(|i| {
                if !(100..=104).contains(&i) {
                    return f32::NAN;
                }
                let (s, c) = (-1.0 + i as f64 * 0.01).sin_cos();
                let b = c * cx + s * cy;
                let disc = b * b - range * range + REFLECTOR_RADIUS * REFLECTOR_RADIUS;
                (b - disc.sqrt()) as f32
            })
            .collect();
        let mut scan = LaserScan::from_ranges(ranges, -1.0, 0.01);
        scan.header = Header {
            seq: Some(seq),
            stamp: Time {
                sec: 100 + seq as i32,
                nanosec: 0,
            },
            frame_id: "laser".to_string(),
        };
        scan
    }

    #[tokio::test]
    async fn process_scan_stamps_cloud_and_publishes_diagnostics() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let mut diagnostics = node.bus().subscribe_to(Topic::Diagnostics);

        let scan = scan_with_post(1);
        let cloud = node.process_scan(&scan);
        assert_eq!(cloud.header, scan.header);
        assert_eq!(cloud.points.len(), 1);
        assert!((cloud.points[0].x - 1.0425).abs() < 1e-3);

        let event = diagnostics.recv().await.unwrap();
        assert_eq!(event.source, NODE_SOURCE);
        match event.payload {
            EventPayload::Diagnostics(d) => {
                assert_eq!(d.readings, 200);
                assert_eq!(d.clusters, 1);
            }
            other => panic!("expected diagnostics, got {other:?}"),
        }
        assert_eq!(node.stats().snapshot().reflectors, 1);
    }

    #[tokio::test]
    async fn replay_emits_one_cloud_per_decodable_scan() {
        let mut input = String::new();
        for seq in 0..2 {
            input.push_str(&serde_json::to_string(&scan_with_post(seq)).unwrap());
            input.push('\n');
        }
        input.push_str("{broken\n");
        input.push_str(
            &serde_json::to_string(&LaserScan::from_ranges(vec![f32::NAN; 10], 0.0, 0.1))
                .unwrap(),
        );
        input.push('\n');

        let node = ReflectorNode::new(ReflectorDetector::default());
        let mut output = Vec::new();
        let snapshot = node
            .replay(
                JsonLinesSource::new(input.as_bytes()),
                JsonLinesSink::new(&mut output),
            )
            .await
            .unwrap();

        assert_eq!(snapshot.scans_processed, 3);
        assert_eq!(snapshot.clouds_sent, 3);
        assert_eq!(snapshot.reflectors, 2);

        let clouds: Vec<PointCloud> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(clouds.len(), 3);
        assert_eq!(clouds[0].header.seq, Some(0));
        assert_eq!(clouds[1].header.seq, Some(1));
        assert!(clouds[2].points.is_empty());
    }

    #[tokio::test]
    async fn run_forwards_clouds_until_shutdown() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let (scan_tx, scan_rx) = mpsc::channel::<LaserScan>(4);
        let (cloud_tx, mut cloud_rx) = mpsc::channel::<PointCloud>(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let running = {
            let node = node.clone();
            tokio::spawn(async move { node.run(scan_rx, cloud_tx, stop_rx).await })
        };

        for seq in 0..3 {
            scan_tx.send(scan_with_post(seq)).await.unwrap();
            let cloud = tokio::time::timeout(Duration::from_secs(5), cloud_rx.recv())
                .await
                .expect("cloud within timeout")
                .expect("sink open");
            assert_eq!(cloud.header.seq, Some(seq));
            assert_eq!(cloud.points.len(), 1);
        }

        stop_tx.send(true).unwrap();
        let snapshot = running.await.unwrap().unwrap();
        assert_eq!(snapshot.scans_received, 3);
        assert_eq!(snapshot.scans_processed, 3);
        assert_eq!(snapshot.clouds_sent, 3);
        assert_eq!(snapshot.scans_dropped, 0);
    }

    #[tokio::test]
    async fn run_stops_when_source_is_exhausted() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let (scan_tx, scan_rx) = mpsc::channel::<LaserScan>(1);
        let (cloud_tx, _cloud_rx) = mpsc::channel::<PointCloud>(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        drop(scan_tx);

        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            node.run(scan_rx, cloud_tx, stop_rx),
        )
        .await
        .expect("run returns")
        .unwrap();
        assert_eq!(snapshot.scans_received, 0);
    }

    #[tokio::test]
    async fn run_surfaces_sink_errors() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let (scan_tx, scan_rx) = mpsc::channel::<LaserScan>(1);
        let (cloud_tx, cloud_rx) = mpsc::channel::<PointCloud>(1);
        let (_stop_tx, stop_rx) = watch::channel(false);
        drop(cloud_rx);

        scan_tx.send(scan_with_post(0)).await.unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            node.run(scan_rx, cloud_tx, stop_rx),
        )
        .await
        .expect("run returns");
        assert!(
            matches!(result, Err(ReflectorError::Channel(_))),
            "expected Channel error, got: {result:?}"
        );
    }

    #[tokio::test]
    async fn pending_scan_is_finished_when_source_ends() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let (scan_tx, scan_rx) = mpsc::channel::<LaserScan>(1);
        let (cloud_tx, mut cloud_rx) = mpsc::channel::<PointCloud>(4);
        let (_stop_tx, stop_rx) = watch::channel(false);

        scan_tx.send(scan_with_post(7)).await.unwrap();
        drop(scan_tx);

        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            node.run(scan_rx, cloud_tx, stop_rx),
        )
        .await
        .expect("run returns")
        .unwrap();
        assert_eq!(snapshot.scans_processed, 1);
        assert_eq!(snapshot.clouds_sent, 1);

        let cloud = cloud_rx.recv().await.expect("cloud delivered");
        assert_eq!(cloud.header.seq, Some(7));
        assert_eq!(cloud.points.len(), 1);
    }

    #[tokio::test]
    async fn absurd_scan_geometry_does_not_stop_detection() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let (scan_tx, scan_rx) = mpsc::channel::<LaserScan>(4);
        let (cloud_tx, mut cloud_rx) = mpsc::channel::<PointCloud>(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        let running = {
            let node = node.clone();
            tokio::spawn(async move { node.run(scan_rx, cloud_tx, stop_rx).await })
        };

        let mut absurd = LaserScan::from_ranges(vec![1.0; 10], -1.0, 1e-30);
        absurd.angle_max = 1.0;
        absurd.header.seq = Some(1);
        scan_tx.send(absurd).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), cloud_rx.recv())
            .await
            .expect("cloud for absurd scan")
            .expect("sink open");
        assert_eq!(first.header.seq, Some(1));

        scan_tx.send(scan_with_post(2)).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), cloud_rx.recv())
            .await
            .expect("cloud for valid scan")
            .expect("sink open");
        assert_eq!(second.header.seq, Some(2));
        assert_eq!(second.points.len(), 1);

        stop_tx.send(true).unwrap();
        let snapshot = running.await.unwrap().unwrap();
        assert_eq!(snapshot.malformed_scans, 1);
        assert_eq!(snapshot.scans_processed, 2);
    }

    #[tokio::test]
    async fn detector_task_failure_is_a_channel_error() {
        let crashed: Result<(), JoinError> =
            tokio::spawn(async { panic!("detector crashed") }).await;
        assert!(matches!(
            detector_exited(crashed, true),
            Err(ReflectorError::Channel(msg)) if msg.contains("detector task failed")
        ));

        assert!(matches!(
            detector_exited(Ok(()), false),
            Err(ReflectorError::Channel(_))
        ));
        assert!(detector_exited(Ok(()), true).is_ok());
    }

    /// Scans queued while the detector is busy are replaced by the newest.
    #[tokio::test]
    async fn stale_scans_are_dropped_and_counted() {
        let node = ReflectorNode::new(ReflectorDetector::default());
        let bus = node.bus();
        let scans = bus.subscribe_to(Topic::Scans);
        let mut clouds = bus.subscribe_to(Topic::Reflectors);

        for seq in 0..3 {
            bus.publish_to(
                Topic::Scans,
                Event::new(SCAN_SOURCE, EventPayload::LaserScan(scan_with_post(seq))),
            )
            .unwrap();
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let (_drain_tx, drain_rx) = oneshot::channel();
        let worker = tokio::spawn(node.clone().detect_loop(scans, stop_rx, drain_rx));

        let event = tokio::time::timeout(Duration::from_secs(5), clouds.recv())
            .await
            .expect("cloud within timeout")
            .unwrap();
        match event.payload {
            EventPayload::ReflectorCloud(cloud) => assert_eq!(cloud.header.seq, Some(2)),
            other => panic!("expected cloud, got {other:?}"),
        }

        stop_tx.send(true).unwrap();
        worker.await.unwrap();

        let snapshot = node.stats().snapshot();
        assert_eq!(snapshot.scans_dropped, 2);
        assert_eq!(snapshot.scans_processed, 1);
    }
}
