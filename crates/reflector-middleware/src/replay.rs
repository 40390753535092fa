//! Newline-delimited JSON recordings.
//!
//! One `LaserScan` object per input line; one `PointCloud` object per output
//! line.  Blank input lines are skipped.  A line that does not decode is
//! logged and skipped so a single corrupt record does not end a replay.
//!
//! # Example
//!
//! ```rust
//! use reflector_middleware::adapter::ScanSource;
//! use reflector_middleware::replay::JsonLinesSource;
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let input = b"{\"angle_min\":0.0,\"angle_increment\":0.1,\"ranges\":[1.0,null]}\n" as &[u8];
//!     let mut source = JsonLinesSource::new(input);
//!     let scan = source.next_scan().await.unwrap().unwrap();
//!     assert!(scan.ranges[1].is_nan());
//!     assert!(source.next_scan().await.unwrap().is_none());
//! });
//! ```

use async_trait::async_trait;
use reflector_types::{LaserScan, PointCloud, ReflectorError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tracing::warn;

use crate::adapter::{CloudSink, ScanSource};

/// Reads scans from a JSON-lines stream.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: usize,
    skipped: usize,
}

impl<R: AsyncBufRead + Unpin> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines that were not valid scans.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ScanSource for JsonLinesSource<R> {
    async fn next_scan(&mut self) -> Result<Option<LaserScan>, ReflectorError> {
        while let Some(line) = self.lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LaserScan>(&line) {
                Ok(scan) => return Ok(Some(scan)),
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_no, error = %e, "skipping undecodable scan");
                }
            }
        }
        Ok(None)
    }
}

/// Writes clouds as JSON lines.
pub struct JsonLinesSink<W> {
    writer: W,
    written: usize,
}

impl<W: AsyncWrite + Unpin> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> CloudSink for JsonLinesSink<W> {
    async fn send_cloud(&mut self, cloud: &PointCloud) -> Result<(), ReflectorError> {
        let mut line =
            serde_json::to_vec(cloud).map_err(|e| ReflectorError::Codec(e.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), ReflectorError> {
        self.writer.flush().await?;
        Ok(())
    }
}
