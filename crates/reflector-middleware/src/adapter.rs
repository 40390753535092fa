//! The adapter seam between the detector and the outside world.
//!
//! The node never speaks directly to rosbridge or to files.  It pulls scans
//! from a [`ScanSource`] and pushes clouds into a [`CloudSink`]; adapters
//! translate those into a concrete protocol.
//!
//! - [`RosbridgeScans`][crate::rosbridge::RosbridgeScans] /
//!   [`RosbridgeClouds`][crate::rosbridge::RosbridgeClouds] – a live
//!   rosbridge WebSocket connection.
//! - [`JsonLinesSource`][crate::replay::JsonLinesSource] /
//!   [`JsonLinesSink`][crate::replay::JsonLinesSink] – newline-delimited JSON
//!   recordings.
//! - Tokio `mpsc` channels, for embedding the node in another program.

use async_trait::async_trait;
use reflector_types::{LaserScan, PointCloud, ReflectorError};
use tokio::sync::mpsc;

/// Producer of inbound scans.
///
/// `next_scan` must be cancel-safe: the node polls it inside `select!`.
#[async_trait]
pub trait ScanSource: Send {
    /// Wait for the next scan.  `Ok(None)` means the source is exhausted.
    async fn next_scan(&mut self) -> Result<Option<LaserScan>, ReflectorError>;
}

/// Consumer of outbound reflector clouds.
#[async_trait]
pub trait CloudSink: Send {
    async fn send_cloud(&mut self, cloud: &PointCloud) -> Result<(), ReflectorError>;

    /// Flush anything buffered and release the transport.  Called once when
    /// the node stops.
    async fn finish(&mut self) -> Result<(), ReflectorError> {
        Ok(())
    }
}

#[async_trait]
impl ScanSource for mpsc::Receiver<LaserScan> {
    async fn next_scan(&mut self) -> Result<Option<LaserScan>, ReflectorError> {
        Ok(self.recv().await)
    }
}

#[async_trait]
impl CloudSink for mpsc::Sender<PointCloud> {
    async fn send_cloud(&mut self, cloud: &PointCloud) -> Result<(), ReflectorError> {
        self.send(cloud.clone())
            .await
            .map_err(|e| ReflectorError::Channel(format!("cloud receiver dropped: {e}")))
    }
}
