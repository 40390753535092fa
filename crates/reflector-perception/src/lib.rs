//! `reflector-perception` – reflector landmark extraction.
//!
//! Turns one planar laser scan into the centres of the cylindrical
//! retro-reflectors it hit.
//!
//! # Modules
//!
//! - [`polar`] – [`Point2D`][polar::Point2D] and the polar/Cartesian
//!   conversions shared by the other stages.
//! - [`clustering`] – [`Clusterer`][clustering::Clusterer]: splits the range
//!   sequence into contiguous runs of valid readings.
//! - [`solver`] – a two-parameter Levenberg–Marquardt minimiser.
//! - [`circle_fit`] – [`CircleFitter`][circle_fit::CircleFitter]: fits a
//!   circle of known radius to one cluster and returns its centre.
//! - [`detector`] – [`ReflectorDetector`][detector::ReflectorDetector]: runs
//!   both stages over a [`LaserScan`][reflector_types::LaserScan] and reports
//!   side-channel diagnostics.

pub mod circle_fit;
pub mod clustering;
pub mod detector;
pub mod polar;
pub mod solver;

pub use circle_fit::{CircleFit, CircleFitter};
pub use clustering::{Cluster, ClusterSample, Clusterer, Segmentation, cluster};
pub use detector::{
    BIAS_SCALE, Detection, DetectorConfig, GAP_THRESHOLD, REFLECTOR_RADIUS, ReflectorDetector,
    ReflectorEstimate,
};
pub use polar::{Point2D, PolarPoint, cart2pol, pol2cart};
