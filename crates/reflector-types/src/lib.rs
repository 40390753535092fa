//! `reflector-types` – shared message and error types.
//!
//! The message structs mirror the ROS `sensor_msgs` layouts that travel over
//! rosbridge, so they serialise to the same JSON field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Header
// ────────────────────────────────────────────────────────────────────────────

/// Message timestamp.  Accepts both the ROS 2 (`sec`/`nanosec`) and the
/// ROS 1 (`secs`/`nsecs`) spellings on input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Time {
    #[serde(alias = "secs")]
    pub sec: i32,
    #[serde(alias = "nsecs")]
    pub nanosec: u32,
}

/// Standard message header.  Carried from an inbound scan to the outbound
/// point cloud without modification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Sequence number (ROS 1 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u32>,
    #[serde(default)]
    pub stamp: Time,
    #[serde(default)]
    pub frame_id: String,
}

// ────────────────────────────────────────────────────────────────────────────
// LaserScan
// ────────────────────────────────────────────────────────────────────────────

/// A single sweep of a planar rangefinder (`sensor_msgs/LaserScan`).
///
/// Reading `i` was taken at `angle_min + i * angle_increment`.  Invalid
/// readings are NaN; on the JSON wire they are `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LaserScan {
    #[serde(default)]
    pub header: Header,
    pub angle_min: f32,
    #[serde(default)]
    pub angle_max: f32,
    pub angle_increment: f32,
    #[serde(default)]
    pub time_increment: f32,
    #[serde(default)]
    pub scan_time: f32,
    #[serde(default)]
    pub range_min: f32,
    #[serde(default)]
    pub range_max: f32,
    #[serde(with = "nullable_floats")]
    pub ranges: Vec<f32>,
    #[serde(default, with = "nullable_floats", skip_serializing_if = "Vec::is_empty")]
    pub intensities: Vec<f32>,
}

impl LaserScan {
    /// Build a scan from the three fields the detector actually reads.
    pub fn from_ranges(ranges: Vec<f32>, angle_min: f32, angle_increment: f32) -> Self {
        Self {
            angle_min,
            angle_increment,
            ranges,
            ..Self::default()
        }
    }

    /// Number of readings implied by `angle_min`, `angle_max` and
    /// `angle_increment`, or `None` when `angle_max` is unset (zero) or the
    /// geometry cannot be evaluated.
    pub fn expected_len(&self) -> Option<usize> {
        if !self.angle_increment.is_finite() || self.angle_increment == 0.0 {
            return None;
        }
        if self.angle_max == 0.0 {
            return None;
        }
        let span = f64::from(self.angle_max) - f64::from(self.angle_min);
        let steps = (span / f64::from(self.angle_increment)).round();
        if !steps.is_finite() || steps < 0.0 {
            return None;
        }
        // Float-to-int casts saturate, so absurd geometry pins at usize::MAX.
        Some((steps as usize).saturating_add(1))
    }

    /// True when the scan geometry cannot describe its own `ranges`: the
    /// increment is zero or non-finite, or `angle_max` implies a reading count
    /// more than one away from `ranges.len()`.
    pub fn is_malformed(&self) -> bool {
        if !self.angle_increment.is_finite() || self.angle_increment == 0.0 {
            return true;
        }
        match self.expected_len() {
            Some(expected) => expected.abs_diff(self.ranges.len()) > 1,
            None => false,
        }
    }
}

/// Serde adapter mapping NaN/±∞ to JSON `null` and back to NaN.
mod nullable_floats {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(values: &[f32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| v.is_finite().then_some(*v)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f32>, D::Error> {
        let raw = Vec::<Option<f32>>::deserialize(deserializer)?;
        Ok(raw.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PointCloud
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D point with single-precision coordinates (`geometry_msgs/Point32`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point32 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point32 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// An unordered point set in one frame (`sensor_msgs/PointCloud`).
///
/// The detector emits one point per reflector, in scan-angle order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointCloud {
    pub header: Header,
    pub points: Vec<Point32>,
}

// ────────────────────────────────────────────────────────────────────────────
// Diagnostics
// ────────────────────────────────────────────────────────────────────────────

/// Side-channel counters describing how one scan was processed.
///
/// None of these conditions stop detection; they exist so that operators can
/// see degraded input without the pipeline ever refusing a scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanDiagnostics {
    /// Number of readings in the scan.
    pub readings: usize,
    /// Clusters handed to the circle fitter.
    pub clusters: usize,
    /// Runs of exactly one valid reading that were thrown away.
    pub singletons_discarded: usize,
    /// Length of a run that touched the last reading and was never flushed
    /// (0 when the scan ended on an invalid reading).
    pub trailing_run_dropped: usize,
    /// Fits whose solver stopped without meeting its tolerances.
    pub nonconverged_fits: usize,
    /// The scan geometry does not match the number of readings.
    pub malformed: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Bus events
// ────────────────────────────────────────────────────────────────────────────

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "reflector-middleware::rosbridge/scan_filtered"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` in a fresh event stamped with the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// An inbound scan awaiting detection.
    LaserScan(LaserScan),
    /// Detected reflector centres for one scan.
    ReflectorCloud(PointCloud),
    /// Processing diagnostics for one scan.
    Diagnostics(ScanDiagnostics),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Errors raised by the transport layers around the detector.  Detection
/// itself never fails.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ReflectorError {
    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Codec Error: {0}")]
    Codec(String),

    #[error("Transport Error: {0}")]
    Transport(String),

    #[error("I/O Error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ReflectorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn laser_scan_null_ranges_decode_as_nan() {
        let json = r#"{"angle_min":-1.0,"angle_increment":0.01,"ranges":[1.0,null,2.5]}"#;
        let scan: LaserScan = serde_json::from_str(json).unwrap();
        assert_eq!(scan.ranges.len(), 3);
        assert!((scan.ranges[0] - 1.0).abs() < f32::EPSILON);
        assert!(scan.ranges[1].is_nan());
        assert!(scan.intensities.is_empty());
        assert_eq!(scan.header, Header::default());
    }

    #[test]
    fn laser_scan_non_finite_ranges_encode_as_null() {
        let scan = LaserScan::from_ranges(vec![f32::NAN, 0.5, f32::INFINITY], 0.0, 0.1);
        let json = serde_json::to_string(&scan).unwrap();
        assert!(json.contains(r#""ranges":[null,0.5,null]"#), "got {json}");
        assert!(!json.contains("intensities"));
    }

    #[test]
    fn header_accepts_ros1_stamp_spelling() {
        let json = r#"{"seq":7,"stamp":{"secs":12,"nsecs":500},"frame_id":"laser"}"#;
        let header: Header = serde_json::from_str(json).unwrap();
        assert_eq!(header.seq, Some(7));
        assert_eq!(header.stamp, Time { sec: 12, nanosec: 500 });
        assert_eq!(header.frame_id, "laser");
    }

    #[test]
    fn header_without_seq_omits_it() {
        let header = Header {
            seq: None,
            stamp: Time { sec: 1, nanosec: 2 },
            frame_id: "base_laser".to_string(),
        };
        let json = serde_json::to_string(&header).unwrap();
        assert!(!json.contains("seq"));
        let back: Header = serde_json::from_str(&json).unwrap();
        assert_eq!(back, header);
    }

    #[test]
    fn expected_len_follows_sweep_geometry() {
        let mut scan = LaserScan::from_ranges(vec![0.0; 201], -1.0, 0.01);
        assert_eq!(scan.expected_len(), None);
        assert!(!scan.is_malformed());

        scan.angle_max = 1.0;
        assert_eq!(scan.expected_len(), Some(201));
        assert!(!scan.is_malformed());

        scan.ranges.truncate(150);
        assert!(scan.is_malformed());
    }

    #[test]
    fn tiny_increment_saturates_instead_of_overflowing() {
        let mut scan = LaserScan::from_ranges(vec![1.0; 10], -1.0, 1e-30);
        scan.angle_max = 1.0;
        assert_eq!(scan.expected_len(), Some(usize::MAX));
        assert!(scan.is_malformed());
    }

    #[test]
    fn zero_increment_is_malformed() {
        let scan = LaserScan::from_ranges(vec![1.0, 1.0], 0.0, 0.0);
        assert!(scan.is_malformed());
    }

    #[test]
    fn point_cloud_roundtrip_keeps_header() {
        let cloud = PointCloud {
            header: Header {
                seq: Some(3),
                stamp: Time { sec: 10, nanosec: 20 },
                frame_id: "laser".to_string(),
            },
            points: vec![Point32::new(1.0, 2.0, 0.0)],
        };
        let json = serde_json::to_string(&cloud).unwrap();
        let back: PointCloud = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cloud);
    }

    #[test]
    fn event_new_stamps_source() {
        let event = Event::new(
            "reflector-runtime::node",
            EventPayload::Diagnostics(ScanDiagnostics::default()),
        );
        assert_eq!(event.source, "reflector-runtime::node");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Diagnostics"));
    }

    #[test]
    fn reflector_error_display() {
        let err = ReflectorError::Codec("bad frame".to_string());
        assert!(err.to_string().contains("bad frame"));

        let io: ReflectorError = std::io::Error::other("disk gone").into();
        assert!(matches!(io, ReflectorError::Io(_)));
    }
}
