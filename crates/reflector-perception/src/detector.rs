//! Scan-level reflector detection.
//!
//! [`ReflectorDetector`] ties the [`Clusterer`] and the [`CircleFitter`]
//! together: one [`LaserScan`] in, one [`Detection`] out.  Detection never
//! fails; degraded input shows up in [`Detection::diagnostics`] instead.
//!
//! # Example
//!
//! ```rust
//! use reflector_perception::detector::ReflectorDetector;
//! use reflector_types::{Header, LaserScan};
//!
//! let scan = LaserScan::from_ranges(vec![f32::NAN; 360], -1.0, 0.01);
//! let detection = ReflectorDetector::default().detect(&scan);
//! assert!(detection.reflectors.is_empty());
//!
//! let cloud = detection.into_cloud(Header::default());
//! assert!(cloud.points.is_empty());
//! ```

use reflector_types::{Header, LaserScan, Point32, PointCloud, ScanDiagnostics};
use tracing::{debug, warn};

use crate::circle_fit::CircleFitter;
use crate::clustering::Clusterer;
use crate::solver::SolverOptions;

pub use crate::circle_fit::{BIAS_SCALE, REFLECTOR_RADIUS};
pub use crate::clustering::GAP_THRESHOLD;

// ────────────────────────────────────────────────────────────────────────────
// DetectorConfig
// ────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for [`ReflectorDetector`].
///
/// The defaults are the values the detector is calibrated for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Largest range jump between neighbouring readings of one cluster.
    pub gap_threshold: f64,
    /// Radius of the reflector posts.
    pub reflector_radius: f64,
    /// Outward scale applied to each cluster centroid before fitting.
    pub bias_scale: f64,
    pub solver: SolverOptions,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            gap_threshold: GAP_THRESHOLD,
            reflector_radius: REFLECTOR_RADIUS,
            bias_scale: BIAS_SCALE,
            solver: SolverOptions::default(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Detection
// ────────────────────────────────────────────────────────────────────────────

/// Estimated centre of one reflector, in the scan frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectorEstimate {
    pub x: f64,
    pub y: f64,
}

impl ReflectorEstimate {
    /// Narrow to a `Point32` on the scan plane.
    pub fn to_point32(self) -> Point32 {
        Point32::new(self.x as f32, self.y as f32, 0.0)
    }
}

/// Result of running the detector over one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// One estimate per accepted cluster, in scan-angle order.
    pub reflectors: Vec<ReflectorEstimate>,
    pub diagnostics: ScanDiagnostics,
}

impl Detection {
    /// Package the estimates as a point cloud stamped with `header`.
    pub fn into_cloud(self, header: Header) -> PointCloud {
        PointCloud {
            header,
            points: self
                .reflectors
                .into_iter()
                .map(ReflectorEstimate::to_point32)
                .collect(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ReflectorDetector
// ────────────────────────────────────────────────────────────────────────────

/// Stateless scan → reflector-centre pipeline.
#[derive(Debug, Clone, Copy)]
pub struct ReflectorDetector {
    config: DetectorConfig,
    clusterer: Clusterer,
    fitter: CircleFitter,
}

impl Default for ReflectorDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl ReflectorDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            clusterer: Clusterer::new(config.gap_threshold),
            fitter: CircleFitter::new(config.reflector_radius, config.bias_scale, config.solver),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Cluster `scan` and fit one circle per cluster.
    pub fn detect(&self, scan: &LaserScan) -> Detection {
        let malformed = scan.is_malformed();
        if malformed {
            warn!(
                readings = scan.ranges.len(),
                angle_min = scan.angle_min,
                angle_max = scan.angle_max,
                angle_increment = scan.angle_increment,
                "scan geometry does not match its readings"
            );
        }

        let ranges: Vec<f64> = scan.ranges.iter().map(|&r| f64::from(r)).collect();
        let segmentation = self.clusterer.segment(
            &ranges,
            f64::from(scan.angle_min),
            f64::from(scan.angle_increment),
        );

        let mut nonconverged_fits = 0;
        let reflectors: Vec<ReflectorEstimate> = segmentation
            .clusters
            .iter()
            .map(|cluster| {
                let fit = self.fitter.fit_cluster(cluster);
                if !fit.converged {
                    nonconverged_fits += 1;
                    debug!(
                        first_index = cluster.first_index(),
                        iterations = fit.iterations,
                        cost = fit.cost,
                        "circle fit did not converge, keeping last iterate"
                    );
                }
                ReflectorEstimate {
                    x: fit.center.x,
                    y: fit.center.y,
                }
            })
            .collect();

        let diagnostics = ScanDiagnostics {
            readings: scan.ranges.len(),
            clusters: segmentation.clusters.len(),
            singletons_discarded: segmentation.singletons_discarded,
            trailing_run_dropped: segmentation.trailing_run_len,
            nonconverged_fits,
            malformed,
        };
        debug!(
            readings = diagnostics.readings,
            clusters = diagnostics.clusters,
            reflectors = reflectors.len(),
            "scan processed"
        );

        Detection {
            reflectors,
            diagnostics,
        }
    }
}
