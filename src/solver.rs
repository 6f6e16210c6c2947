// Least-squares engine shared by the TDoA and RSSI solvers
//
// Levenberg-Marquardt over a small, fixed number of unknowns with a
// numerically differentiated Jacobian.

use nalgebra as na;
use na::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{MAX_CONDITION_NUMBER, SOLVER_MAX_ITERATIONS, SOLVER_TOLERANCE};
use crate::geodesy::GeoPoint;

/// Residual norm below which a solution is exact for all practical purposes (m)
const ABSOLUTE_EPSILON: f64 = 1e-8;

/// Central-difference step for the Jacobian (m)
const JACOBIAN_STEP: f64 = 1e-2;

/// Damping attempts per iteration before the point is declared stationary
const MAX_DAMPING_STEPS: usize = 12;

/// Tuning knobs for the iterative solve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Relative residual-norm improvement that counts as converged
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig {
            tolerance: SOLVER_TOLERANCE,
            max_iterations: SOLVER_MAX_ITERATIONS,
        }
    }
}

/// A residual function over a parameter vector
pub trait LeastSquaresProblem {
    /// Number of unknowns
    fn dimension(&self) -> usize;

    /// Residual vector at `x`; the solver minimizes its squared norm
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64>;
}

/// Converged estimate
#[derive(Debug, Clone)]
pub struct Solution {
    pub x: DVector<f64>,
    pub residual_norm: f64,
    pub iterations: usize,
    pub condition_number: f64,
    /// Parameter covariance sigma^2 (J^T J)^-1, sigma^2 from the residual with
    /// m - n degrees of freedom. Zero when the system is exactly determined.
    pub covariance: Option<DMatrix<f64>>,
    /// (J^T J)^-1 at the solution, the geometry part of the covariance
    pub normal_inverse: Option<DMatrix<f64>>,
}

impl Solution {
    /// Twice the horizontal DRMS from the first two parameters (east, north), ~95% radius
    pub fn horizontal_2drms(&self) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let var = cov[(0, 0)] + cov[(1, 1)];
        Some(2.0 * var.max(0.0).sqrt())
    }

    /// Horizontal dilution of precision: meters of horizontal error per meter
    /// of residual noise
    pub fn horizontal_dilution(&self) -> Option<f64> {
        let inv = self.normal_inverse.as_ref()?;
        Some((inv[(0, 0)] + inv[(1, 1)]).max(0.0).sqrt())
    }
}

/// A solve mapped back to geographic coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct Fix {
    pub position: GeoPoint,
    /// `None` for 2D solves
    pub altitude: Option<f64>,
    pub uncertainty_radius_m: f64,
    pub residual_norm: f64,
    pub iterations: usize,
    /// Set when the estimate is a fallback rather than a converged fit
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    IllConditioned { condition_number: f64 },
    NoConvergence { iterations: usize, residual_norm: f64 },
}

/// Compute Jacobian matrix of the residuals by central differences
pub fn jacobian<P: LeastSquaresProblem>(problem: &P, x: &DVector<f64>) -> DMatrix<f64> {
    let n = problem.dimension();
    let mut columns = Vec::with_capacity(n);

    for j in 0..n {
        let mut x_plus = x.clone();
        let mut x_minus = x.clone();
        x_plus[j] += JACOBIAN_STEP;
        x_minus[j] -= JACOBIAN_STEP;
        columns.push((problem.residuals(&x_plus) - problem.residuals(&x_minus)) / (2.0 * JACOBIAN_STEP));
    }

    DMatrix::from_columns(&columns)
}

/// Ratio of the largest to the smallest singular value
pub fn condition_number(jacobian: &DMatrix<f64>) -> f64 {
    let singular = jacobian.clone().svd(false, false).singular_values;
    let max = singular.max();
    let min = singular.min();
    if min <= 0.0 || !min.is_finite() {
        f64::INFINITY
    } else {
        max / min
    }
}

/// Minimize the squared residual norm of `problem` starting at `initial_guess`
///
/// # Arguments
/// * `problem` - Residual function
/// * `initial_guess` - Starting parameters, length `problem.dimension()`
/// * `config` - Tolerance and iteration budget
///
/// # Returns
/// * `Ok(Solution)` when the relative improvement drops below the tolerance or
///   no damped step can reduce the residual any further
/// * `Err(IllConditioned)` when the Jacobian is near-singular at the start or at the solution
/// * `Err(NoConvergence)` when the budget runs out while still improving
pub fn solve<P: LeastSquaresProblem>(
    problem: &P,
    initial_guess: DVector<f64>,
    config: &SolverConfig,
) -> Result<Solution, SolverError> {
    let n = problem.dimension();
    let mut x = initial_guess;
    let mut residuals = problem.residuals(&x);
    let mut residual_norm = residuals.norm();
    let mut lambda = 1e-3; // Initial damping factor

    let initial_condition = condition_number(&jacobian(problem, &x));
    if initial_condition > MAX_CONDITION_NUMBER {
        debug!(condition_number = initial_condition, "Jacobian ill-conditioned at initial guess");
        return Err(SolverError::IllConditioned { condition_number: initial_condition });
    }

    for iter in 0..config.max_iterations {
        if residual_norm < ABSOLUTE_EPSILON {
            return finish(problem, x, residuals, iter);
        }

        let jac = jacobian(problem, &x);

        // Levenberg-Marquardt: (J^T J + λI) Δx = -J^T r
        let jt = jac.transpose();
        let jtj = &jt * &jac;
        let jtr = &jt * &residuals;

        let mut accepted = None;
        for _ in 0..MAX_DAMPING_STEPS {
            let mut jtj_damped = jtj.clone();
            for i in 0..n {
                jtj_damped[(i, i)] += lambda;
            }

            if let Some(jtj_inv) = jtj_damped.try_inverse() {
                let step = jtj_inv * (-&jtr);
                let x_new = &x + step;
                let new_residuals = problem.residuals(&x_new);
                let new_norm = new_residuals.norm();

                if new_norm < residual_norm {
                    // Good step, accept it and decrease damping
                    lambda = (lambda * 0.1).max(1e-12);
                    accepted = Some((x_new, new_residuals, new_norm));
                    break;
                }
            }
            // Bad step or singular system, increase damping and try again
            lambda *= 10.0;
        }

        let Some((x_new, new_residuals, new_norm)) = accepted else {
            // No step reduces the residual: numerically stationary
            debug!(iter, residual_norm, "No improving step, stopping");
            return finish(problem, x, residuals, iter);
        };

        let improvement = (residual_norm - new_norm) / residual_norm;
        x = x_new;
        residuals = new_residuals;
        residual_norm = new_norm;

        if improvement < config.tolerance {
            return finish(problem, x, residuals, iter + 1);
        }
    }

    debug!(iterations = config.max_iterations, residual_norm, "Iteration budget exhausted");
    Err(SolverError::NoConvergence {
        iterations: config.max_iterations,
        residual_norm,
    })
}

/// Conditioning check and covariance at the final estimate
fn finish<P: LeastSquaresProblem>(
    problem: &P,
    x: DVector<f64>,
    residuals: DVector<f64>,
    iterations: usize,
) -> Result<Solution, SolverError> {
    let jac = jacobian(problem, &x);
    let cond = condition_number(&jac);
    if cond > MAX_CONDITION_NUMBER {
        return Err(SolverError::IllConditioned { condition_number: cond });
    }

    let m = residuals.len();
    let n = x.len();
    let residual_norm = residuals.norm();
    let sigma_sq = if m > n {
        residual_norm * residual_norm / (m - n) as f64
    } else {
        0.0
    };

    let jtj = jac.transpose() * &jac;
    let normal_inverse = jtj.try_inverse();
    let covariance = normal_inverse.as_ref().map(|inv| inv * sigma_sq);

    debug!(iterations, residual_norm, condition_number = cond, "Solver converged");

    Ok(Solution {
        x,
        residual_norm,
        iterations,
        condition_number: cond,
        covariance,
        normal_inverse,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Plain 2D trilateration on a flat plane
    struct FlatRanges {
        anchors: Vec<(f64, f64)>,
        ranges: Vec<f64>,
    }

    impl LeastSquaresProblem for FlatRanges {
        fn dimension(&self) -> usize {
            2
        }

        fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(
                self.anchors.len(),
                self.anchors.iter().zip(&self.ranges).map(|(&(ax, ay), &r)| {
                    ((x[0] - ax).powi(2) + (x[1] - ay).powi(2)).sqrt() - r
                }),
            )
        }
    }

    fn problem_for(anchors: Vec<(f64, f64)>, target: (f64, f64)) -> FlatRanges {
        let ranges = anchors
            .iter()
            .map(|&(ax, ay)| ((target.0 - ax).powi(2) + (target.1 - ay).powi(2)).sqrt())
            .collect();
        FlatRanges { anchors, ranges }
    }

    #[test]
    fn test_solve_basic() {
        let problem = problem_for(
            vec![(0.0, 0.0), (10_000.0, 0.0), (0.0, 10_000.0), (10_000.0, 10_000.0)],
            (3_200.0, 7_100.0),
        );
        let result = solve(&problem, DVector::from_vec(vec![5_000.0, 5_000.0]), &SolverConfig::default()).unwrap();

        assert!((result.x[0] - 3_200.0).abs() < 1e-3, "x: {}", result.x[0]);
        assert!((result.x[1] - 7_100.0).abs() < 1e-3, "y: {}", result.x[1]);
        assert!(result.residual_norm < 1e-3);
        assert!(result.condition_number < 100.0);
    }

    #[test]
    fn test_collinear_anchors_ill_conditioned() {
        // Anchors on the x axis, start on the axis: y is unobservable
        let problem = problem_for(
            vec![(0.0, 0.0), (5_000.0, 0.0), (10_000.0, 0.0)],
            (4_000.0, 3_000.0),
        );
        let result = solve(&problem, DVector::from_vec(vec![5_000.0, 0.0]), &SolverConfig::default());
        assert!(matches!(result, Err(SolverError::IllConditioned { .. })));
    }

    #[test]
    fn test_iteration_budget() {
        let problem = problem_for(
            vec![(0.0, 0.0), (10_000.0, 0.0), (0.0, 10_000.0)],
            (9_000.0, 9_000.0),
        );
        let config = SolverConfig { tolerance: 1e-6, max_iterations: 1 };
        let result = solve(&problem, DVector::from_vec(vec![100.0, 100.0]), &config);
        assert!(matches!(result, Err(SolverError::NoConvergence { iterations: 1, .. })));
    }

    #[test]
    fn test_covariance_scales_with_noise() {
        let mut problem = problem_for(
            vec![(0.0, 0.0), (10_000.0, 0.0), (0.0, 10_000.0), (10_000.0, 10_000.0), (5_000.0, -2_000.0)],
            (4_000.0, 6_000.0),
        );
        problem.ranges[0] += 30.0;
        problem.ranges[3] -= 20.0;

        let result = solve(&problem, DVector::from_vec(vec![5_000.0, 5_000.0]), &SolverConfig::default()).unwrap();
        let cov = result.covariance.unwrap();
        assert!(cov[(0, 0)] > 0.0 && cov[(1, 1)] > 0.0);
        assert!(result.residual_norm > 1.0);
    }

    #[test]
    fn test_exactly_determined_keeps_geometry() {
        // Two ranges, two unknowns: no residual left to estimate noise from
        let problem = problem_for(vec![(0.0, 0.0), (10_000.0, 0.0)], (4_000.0, 6_000.0));
        let result = solve(&problem, DVector::from_vec(vec![5_000.0, 5_000.0]), &SolverConfig::default()).unwrap();

        assert_eq!(result.horizontal_2drms(), Some(0.0));
        let hdop = result.horizontal_dilution().unwrap();
        assert!(hdop.is_finite() && hdop > 0.5, "HDOP: {}", hdop);
    }
}
