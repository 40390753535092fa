//! Range-sequence segmentation.
//!
//! A single left-to-right pass over the readings groups contiguous valid
//! readings into [`Cluster`]s.  A run ends on the first invalid reading or on
//! a range jump larger than the gap threshold.
//!
//! Rules that callers depend on:
//!
//! - A run of exactly one reading is noise and is discarded.
//! - The reading that ends a run by a range jump does not start the next run;
//!   counting resumes on the reading after it.
//! - A run still open at the last reading is never emitted.  A reflector
//!   touching the final beam is therefore dropped, as is anything that might
//!   be truncated by the edge of the field of view.
//!
//! # Example
//!
//! ```rust
//! use reflector_perception::clustering::cluster;
//!
//! let nan = f64::NAN;
//! let ranges = [nan, 1.00, 1.01, 1.02, nan, 2.0, nan];
//! let clusters = cluster(&ranges, -0.5, 0.01);
//!
//! // The lone 2.0 reading is discarded as noise.
//! assert_eq!(clusters.len(), 1);
//! assert_eq!(clusters[0].first_index(), 1);
//! assert_eq!(clusters[0].last_index(), 3);
//! ```

use crate::polar::{Point2D, pol2cart};

/// Largest range jump (scan units) between consecutive readings of one
/// cluster.
pub const GAP_THRESHOLD: f64 = 1.0;

// ────────────────────────────────────────────────────────────────────────────
// Cluster
// ────────────────────────────────────────────────────────────────────────────

/// One reading of a cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSample {
    /// Index of the reading in the scan.
    pub index: usize,
    /// Measured range; always finite.
    pub range: f64,
    /// Bearing of the reading: `angle_min + index * angle_increment`.
    pub angle: f64,
}

/// A contiguous run of at least two valid readings.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    samples: Vec<ClusterSample>,
}

impl Cluster {
    pub fn samples(&self) -> &[ClusterSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Scan index of the first reading.
    pub fn first_index(&self) -> usize {
        self.samples.first().map_or(0, |s| s.index)
    }

    /// Scan index of the last reading.
    pub fn last_index(&self) -> usize {
        self.samples.last().map_or(0, |s| s.index)
    }

    /// The readings converted to Cartesian points, in scan order.
    pub fn points(&self) -> Vec<Point2D> {
        self.samples
            .iter()
            .map(|s| pol2cart(s.range, s.angle))
            .collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Clusterer
// ────────────────────────────────────────────────────────────────────────────

/// Output of [`Clusterer::segment`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Segmentation {
    pub clusters: Vec<Cluster>,
    /// Runs of a single reading that were thrown away.
    pub singletons_discarded: usize,
    /// Length of the run left open at the last reading (0 if none).
    pub trailing_run_len: usize,
}

/// Splits a range sequence into clusters.
#[derive(Debug, Clone, Copy)]
pub struct Clusterer {
    gap_threshold: f64,
}

impl Default for Clusterer {
    fn default() -> Self {
        Self::new(GAP_THRESHOLD)
    }
}

impl Clusterer {
    pub fn new(gap_threshold: f64) -> Self {
        Self { gap_threshold }
    }

    /// Segment `ranges` into clusters.
    ///
    /// A reading is valid when it is finite.  Never fails: a scan with no
    /// valid readings yields no clusters.
    pub fn segment(&self, ranges: &[f64], angle_min: f64, angle_increment: f64) -> Segmentation {
        let mut out = Segmentation::default();
        // Length of the run currently open.
        let mut num = 0usize;
        let mut prev_range = f64::NAN;

        for (i, &d) in ranges.iter().enumerate() {
            let valid = d.is_finite();
            let closes_run = num != 0 && (!valid || (d - prev_range).abs() > self.gap_threshold);

            if closes_run {
                if num == 1 {
                    out.singletons_discarded += 1;
                } else {
                    out.clusters
                        .push(Self::flush(ranges, i - num..i, angle_min, angle_increment));
                }
                num = 0;
            } else if valid {
                num += 1;
            }
            prev_range = d;
        }

        out.trailing_run_len = num;
        out
    }

    fn flush(
        ranges: &[f64],
        indices: std::ops::Range<usize>,
        angle_min: f64,
        angle_increment: f64,
    ) -> Cluster {
        let samples = indices
            .map(|index| ClusterSample {
                index,
                range: ranges[index],
                angle: angle_min + index as f64 * angle_increment,
            })
            .collect();
        Cluster { samples }
    }
}

/// Segment `ranges` with the default gap threshold and return the clusters.
pub fn cluster(ranges: &[f64], angle_min: f64, angle_increment: f64) -> Vec<Cluster> {
    Clusterer::default()
        .segment(ranges, angle_min, angle_increment)
        .clusters
}
