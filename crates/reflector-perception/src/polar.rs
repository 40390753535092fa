//! Polar ↔ Cartesian conversion.
//!
//! Laser readings arrive as `(range, angle)` pairs; the circle fitter works
//! on `(x, y)`.  Angles are radians, measured counter-clockwise from +X in the
//! scan frame.
//!
//! # Example
//!
//! ```rust
//! use reflector_perception::polar::{cart2pol, pol2cart};
//!
//! let p = pol2cart(2.0, std::f64::consts::FRAC_PI_2);
//! assert!(p.x.abs() < 1e-12);
//! assert!((p.y - 2.0).abs() < 1e-12);
//!
//! let back = cart2pol(p);
//! assert!((back.range - 2.0).abs() < 1e-12);
//! ```

/// A point in the scan's Cartesian frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Arithmetic mean of `points`, or `None` for an empty slice.
    pub fn centroid(points: &[Point2D]) -> Option<Point2D> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (sx, sy) = points
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Some(Point2D::new(sx / n, sy / n))
    }

    /// Push this point radially away from the origin by `scale`.
    ///
    /// Used to move an initial guess off the exact centroid before
    /// optimisation.  A point at the origin stays at the origin.
    pub fn scaled_radially(self, scale: f64) -> Point2D {
        let polar = cart2pol(self);
        pol2cart(polar.range * scale, polar.angle)
    }
}

/// A `(range, angle)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PolarPoint {
    pub range: f64,
    /// Bearing in `(-π, π]`.
    pub angle: f64,
}

/// `x = range·cos(angle)`, `y = range·sin(angle)`.
pub fn pol2cart(range: f64, angle: f64) -> Point2D {
    let (sin, cos) = angle.sin_cos();
    Point2D::new(range * cos, range * sin)
}

/// Inverse of [`pol2cart`]; the angle comes from `atan2`.
pub fn cart2pol(p: Point2D) -> PolarPoint {
    PolarPoint {
        range: p.x.hypot(p.y),
        angle: p.y.atan2(p.x),
    }
}
