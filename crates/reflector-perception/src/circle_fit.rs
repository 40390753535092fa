//! Fixed-radius circle fitting.
//!
//! Estimates the centre of a reflector of known radius `R` from the points a
//! cluster put on its surface:
//!
//! 1. Start from the centroid of the points.
//! 2. Push that guess radially away from the sensor by [`BIAS_SCALE`] so the
//!    solver does not begin at a point where the Jacobian degenerates.
//! 3. Minimise over the centre `c` with residuals
//!    `r_k = (R − ‖c − p_k‖)²`.
//!
//! The residual is squared before the least-squares solver squares it again,
//! so the effective per-point cost is `(R − d_k)⁴`.  This matches the fielded
//! detector and is kept for output compatibility; it weights points far from
//! the circle more heavily than a plain geometric fit would.
//!
//! The solver's last iterate is returned whether or not it converged.
//!
//! # Example
//!
//! ```rust
//! use reflector_perception::circle_fit::{CircleFitter, REFLECTOR_RADIUS};
//! use reflector_perception::polar::Point2D;
//!
//! let centre = Point2D::new(1.0, 0.5);
//! let points: Vec<Point2D> = [2.8_f64, 3.1, 3.4]
//!     .iter()
//!     .map(|t| Point2D::new(
//!         centre.x + REFLECTOR_RADIUS * t.cos(),
//!         centre.y + REFLECTOR_RADIUS * t.sin(),
//!     ))
//!     .collect();
//!
//! let fit = CircleFitter::default().fit_points(&points);
//! assert!(fit.center.distance(centre) < 1e-4);
//! ```

use nalgebra::Vector2;
use tracing::trace;

use crate::clustering::Cluster;
use crate::polar::Point2D;
use crate::solver::{self, LeastSquaresProblem, SolverOptions};

/// Radius of the reflector posts (diameter 85 mm).
pub const REFLECTOR_RADIUS: f64 = 0.085 / 2.0;

/// Outward scale applied to the centroid before optimisation.
pub const BIAS_SCALE: f64 = 1.0001;

// ────────────────────────────────────────────────────────────────────────────
// Residual model
// ────────────────────────────────────────────────────────────────────────────

struct FixedRadiusCircle<'a> {
    points: &'a [Point2D],
    radius: f64,
}

impl LeastSquaresProblem for FixedRadiusCircle<'_> {
    fn evaluate(
        &self,
        params: &Vector2<f64>,
        residuals: &mut Vec<f64>,
        jacobian: &mut Vec<Vector2<f64>>,
    ) {
        for p in self.points {
            let dx = params.x - p.x;
            let dy = params.y - p.y;
            let dist = dx.hypot(dy);
            let err = self.radius - dist;
            residuals.push(err * err);
            // ∂/∂c (R − d)² = −2 (R − d) (c − p) / d
            if dist > 1e-12 {
                let k = -2.0 * err / dist;
                jacobian.push(Vector2::new(k * dx, k * dy));
            } else {
                jacobian.push(Vector2::zeros());
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// CircleFitter
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircleFit {
    /// Estimated centre; the solver's last iterate.
    pub center: Point2D,
    /// Biased centroid the solver started from.
    pub initial_guess: Point2D,
    pub iterations: usize,
    /// Sum of squared residuals at `center`.
    pub cost: f64,
    /// Whether the solver met its tolerances.
    pub converged: bool,
}

/// Fits a circle of fixed radius to a cluster.
#[derive(Debug, Clone, Copy)]
pub struct CircleFitter {
    radius: f64,
    bias_scale: f64,
    options: SolverOptions,
}

impl Default for CircleFitter {
    fn default() -> Self {
        Self::new(REFLECTOR_RADIUS, BIAS_SCALE, SolverOptions::default())
    }
}

impl CircleFitter {
    pub fn new(radius: f64, bias_scale: f64, options: SolverOptions) -> Self {
        Self {
            radius,
            bias_scale,
            options,
        }
    }

    /// Centre of the circle best matching `cluster`.
    pub fn fit(&self, cluster: &Cluster) -> Point2D {
        self.fit_cluster(cluster).center
    }

    /// Fit `cluster` and return the full report.
    pub fn fit_cluster(&self, cluster: &Cluster) -> CircleFit {
        self.fit_points(&cluster.points())
    }

    /// Fit Cartesian `points` directly.
    ///
    /// Two points are accepted even though they do not pin down a circle;
    /// the solver settles on one of the two candidate centres.
    pub fn fit_points(&self, points: &[Point2D]) -> CircleFit {
        let centroid = Point2D::centroid(points).unwrap_or_default();
        let initial_guess = centroid.scaled_radially(self.bias_scale);

        let problem = FixedRadiusCircle {
            points,
            radius: self.radius,
        };
        let report = solver::minimize(
            &problem,
            Vector2::new(initial_guess.x, initial_guess.y),
            &self.options,
        );
        trace!(
            points = points.len(),
            iterations = report.iterations,
            cost = report.cost,
            termination = ?report.termination,
            "circle fit finished"
        );

        CircleFit {
            center: Point2D::new(report.params.x, report.params.y),
            initial_guess,
            iterations: report.iterations,
            cost: report.cost,
            converged: report.termination.converged(),
        }
    }
}
