//! Levenberg–Marquardt minimiser for two-parameter least-squares problems.
//!
//! Minimises `Σ r_k(p)²` over `p ∈ ℝ²` given residuals and their analytic
//! Jacobian.  Damping uses Marquardt's diagonal scaling and is divided by 10
//! after every accepted step and multiplied by 10 after every rejected one.
//!
//! The solver never fails: whatever the termination reason, the report
//! carries the last accepted parameters.
//!
//! # Example
//!
//! ```rust
//! use nalgebra::Vector2;
//! use reflector_perception::solver::{minimize, LeastSquaresProblem, SolverOptions};
//!
//! /// r = (x − 1, y + 2)
//! struct Offset;
//!
//! impl LeastSquaresProblem for Offset {
//!     fn evaluate(&self, p: &Vector2<f64>, r: &mut Vec<f64>, j: &mut Vec<Vector2<f64>>) {
//!         r.extend([p.x - 1.0, p.y + 2.0]);
//!         j.extend([Vector2::new(1.0, 0.0), Vector2::new(0.0, 1.0)]);
//!     }
//! }
//!
//! let report = minimize(&Offset, Vector2::new(5.0, 5.0), &SolverOptions::default());
//! assert!(report.termination.converged());
//! assert!((report.params - Vector2::new(1.0, -2.0)).norm() < 1e-6);
//! ```

use nalgebra::{Matrix2, Vector2};

/// MINPACK's default relative tolerance (`sqrt` of machine epsilon).
pub const DEFAULT_TOLERANCE: f64 = 1.49012e-8;

const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// A least-squares problem over two parameters.
pub trait LeastSquaresProblem {
    /// Append the residuals at `params` to `residuals` and one gradient row
    /// per residual to `jacobian`.  Both buffers arrive empty.
    fn evaluate(
        &self,
        params: &Vector2<f64>,
        residuals: &mut Vec<f64>,
        jacobian: &mut Vec<Vector2<f64>>,
    );
}

/// Stopping criteria.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Stop when an accepted step reduces the cost by at most this fraction.
    pub ftol: f64,
    /// Stop when a step is at most this fraction of the parameter norm.
    pub xtol: f64,
    pub initial_damping: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            ftol: DEFAULT_TOLERANCE,
            xtol: DEFAULT_TOLERANCE,
            initial_damping: 1e-3,
        }
    }
}

/// Why the solver stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The cost reached exactly zero.
    ZeroCost,
    /// The gradient vanished.
    ZeroGradient,
    /// Relative cost reduction fell below `ftol`.
    CostTolerance,
    /// Relative step size fell below `xtol`.
    StepTolerance,
    /// `max_iterations` accepted steps were taken.
    MaxIterations,
    /// No damping level produced a cost reduction.
    DampingExhausted,
    /// The cost at the initial guess was not finite.
    NonFinite,
}

impl Termination {
    /// True for the terminations that mean the tolerances were met.
    pub fn converged(self) -> bool {
        matches!(
            self,
            Self::ZeroCost | Self::ZeroGradient | Self::CostTolerance | Self::StepTolerance
        )
    }
}

/// Result of [`minimize`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverReport {
    /// Last accepted parameters.
    pub params: Vector2<f64>,
    /// `Σ r_k²` at `params`.
    pub cost: f64,
    pub iterations: usize,
    pub termination: Termination,
}

/// Minimise `problem` starting from `initial`.
pub fn minimize<P: LeastSquaresProblem>(
    problem: &P,
    initial: Vector2<f64>,
    options: &SolverOptions,
) -> SolverReport {
    let mut params = initial;
    let mut residuals = Vec::new();
    let mut jacobian = Vec::new();
    problem.evaluate(&params, &mut residuals, &mut jacobian);
    let mut cost = sum_of_squares(&residuals);

    let report = |params: Vector2<f64>,
                  cost: f64,
                  iterations: usize,
                  termination: Termination| SolverReport {
        params,
        cost,
        iterations,
        termination,
    };

    if !cost.is_finite() {
        return report(params, cost, 0, Termination::NonFinite);
    }

    let mut trial_residuals = Vec::with_capacity(residuals.len());
    let mut trial_jacobian = Vec::with_capacity(jacobian.len());
    let mut lambda = options.initial_damping.max(MIN_DAMPING);

    for iteration in 1..=options.max_iterations {
        if cost == 0.0 {
            return report(params, cost, iteration - 1, Termination::ZeroCost);
        }

        let (h, g) = normal_equations(&residuals, &jacobian);
        if g.x == 0.0 && g.y == 0.0 {
            return report(params, cost, iteration - 1, Termination::ZeroGradient);
        }

        loop {
            if lambda > MAX_DAMPING {
                return report(params, cost, iteration, Termination::DampingExhausted);
            }

            let mut damped = h;
            damped[(0, 0)] += lambda * h[(0, 0)].max(f64::MIN_POSITIVE);
            damped[(1, 1)] += lambda * h[(1, 1)].max(f64::MIN_POSITIVE);

            let step = match damped.lu().solve(&(-g)) {
                Some(step) if step.x.is_finite() && step.y.is_finite() => step,
                _ => {
                    lambda *= 10.0;
                    continue;
                }
            };

            let candidate = params + step;
            trial_residuals.clear();
            trial_jacobian.clear();
            problem.evaluate(&candidate, &mut trial_residuals, &mut trial_jacobian);
            let trial_cost = sum_of_squares(&trial_residuals);
            let small_step = step.norm() <= options.xtol * (candidate.norm() + options.xtol);

            if trial_cost.is_finite() && trial_cost < cost {
                let reduction = (cost - trial_cost) / cost;
                params = candidate;
                cost = trial_cost;
                std::mem::swap(&mut residuals, &mut trial_residuals);
                std::mem::swap(&mut jacobian, &mut trial_jacobian);
                lambda = (lambda / 10.0).max(MIN_DAMPING);

                if reduction <= options.ftol {
                    return report(params, cost, iteration, Termination::CostTolerance);
                }
                if small_step {
                    return report(params, cost, iteration, Termination::StepTolerance);
                }
                break;
            }

            // Rejected, but already below the step tolerance: nothing left
            // to gain at this precision.
            if small_step {
                return report(params, cost, iteration, Termination::StepTolerance);
            }
            lambda *= 10.0;
        }
    }

    report(
        params,
        cost,
        options.max_iterations,
        Termination::MaxIterations,
    )
}

fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

/// `(JᵀJ, Jᵀr)`
fn normal_equations(residuals: &[f64], jacobian: &[Vector2<f64>]) -> (Matrix2<f64>, Vector2<f64>) {
    let mut h = Matrix2::zeros();
    let mut g = Vector2::zeros();
    for (r, j) in residuals.iter().zip(jacobian) {
        h += *j * j.transpose();
        g += *j * *r;
    }
    (h, g)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rosenbrock;

    impl LeastSquaresProblem for Rosenbrock {
        fn evaluate(&self, p: &Vector2<f64>, r: &mut Vec<f64>, j: &mut Vec<Vector2<f64>>) {
            r.push(10.0 * (p.y - p.x * p.x));
            r.push(1.0 - p.x);
            j.push(Vector2::new(-20.0 * p.x, 10.0));
            j.push(Vector2::new(-1.0, 0.0));
        }
    }

    struct NoResiduals;

    impl LeastSquaresProblem for NoResiduals {
        fn evaluate(&self, _: &Vector2<f64>, _: &mut Vec<f64>, _: &mut Vec<Vector2<f64>>) {}
    }

    struct NanCost;

    impl LeastSquaresProblem for NanCost {
        fn evaluate(&self, _: &Vector2<f64>, r: &mut Vec<f64>, j: &mut Vec<Vector2<f64>>) {
            r.push(f64::NAN);
            j.push(Vector2::zeros());
        }
    }

    #[test]
    fn solves_rosenbrock_from_classic_start() {
        let report = minimize(
            &Rosenbrock,
            Vector2::new(-1.2, 1.0),
            &SolverOptions::default(),
        );
        assert!(report.termination.converged(), "{:?}", report.termination);
        assert!((report.params.x - 1.0).abs() < 1e-4, "x = {}", report.params.x);
        assert!((report.params.y - 1.0).abs() < 1e-4, "y = {}", report.params.y);
        assert!(report.iterations < 200);
    }

    #[test]
    fn iteration_cap_returns_last_iterate() {
        let options = SolverOptions {
            max_iterations: 2,
            ..SolverOptions::default()
        };
        let start = Vector2::new(-1.2, 1.0);
        let report = minimize(&Rosenbrock, start, &options);
        assert_eq!(report.termination, Termination::MaxIterations);
        assert!(!report.termination.converged());
        assert_eq!(report.iterations, 2);
        assert_ne!(report.params, start);
        // 24.2 is the cost at the classic starting point.
        assert!(report.cost < 24.2);
    }

    #[test]
    fn empty_problem_is_already_optimal() {
        let start = Vector2::new(3.0, 4.0);
        let report = minimize(&NoResiduals, start, &SolverOptions::default());
        assert_eq!(report.termination, Termination::ZeroCost);
        assert_eq!(report.params, start);
        assert_eq!(report.iterations, 0);
    }

    #[test]
    fn non_finite_start_is_reported() {
        let report = minimize(&NanCost, Vector2::zeros(), &SolverOptions::default());
        assert_eq!(report.termination, Termination::NonFinite);
        assert!(!report.termination.converged());
    }
}
