// TDoA multilateration
//
// Range differences against a reference receiver define hyperbolae of
// constant delay; the transmitter sits at their intersection. Solved as a
// least-squares problem in a local east/north(/up) frame centred on the
// receiver centroid.

use nalgebra::DVector;
use tracing::debug;

use crate::constants::{
    MIN_SPREAD_RATIO, SPEED_OF_LIGHT, TDOA_MAX_UNCERTAINTY_M, TDOA_MIN_UNCERTAINTY_M, TDOA_TIMING_SIGMA_S,
};
use crate::error::GeolocationError;
use crate::geodesy::{self, GeoPoint, LocalFrame};
use crate::solver::{self, Fix, LeastSquaresProblem, SolverConfig, SolverError};

/// Minimum receivers for a 2D fix
pub const MIN_RECEIVERS_2D: usize = 3;

/// Minimum receivers for a fix that also estimates altitude
pub const MIN_RECEIVERS_3D: usize = 4;

/// A receiver position paired with its annotated arrival-time difference
#[derive(Debug, Clone)]
pub struct TdoaObservation {
    pub receiver_id: String,
    pub position: GeoPoint,
    pub altitude: f64,
    pub tdoa_seconds: f64,
}

/// Range difference of one receiver against the reference
struct RangeDifference {
    position: GeoPoint,
    altitude: f64,
    meters: f64,
}

struct TdoaProblem {
    frame: LocalFrame,
    reference: (GeoPoint, f64),
    differences: Vec<RangeDifference>,
    solve_altitude: bool,
}

impl TdoaProblem {
    fn candidate(&self, x: &DVector<f64>) -> (GeoPoint, f64) {
        let position = self.frame.to_geo(x[0], x[1]);
        let altitude = if self.solve_altitude { x[2] } else { 0.0 };
        (position, altitude)
    }
}

impl LeastSquaresProblem for TdoaProblem {
    fn dimension(&self) -> usize {
        if self.solve_altitude {
            3
        } else {
            2
        }
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (p, alt) = self.candidate(x);
        let ref_range = geodesy::slant_range(p, alt, self.reference.0, self.reference.1);

        DVector::from_iterator(
            self.differences.len(),
            self.differences.iter().map(|d| {
                let range = geodesy::slant_range(p, alt, d.position, d.altitude);
                (range - ref_range) - d.meters
            }),
        )
    }
}

/// Multilateration solver over annotated measurements
#[derive(Debug, Clone)]
pub struct TdoaSolver {
    config: SolverConfig,
    estimate_altitude: bool,
}

impl TdoaSolver {
    pub fn new(config: SolverConfig, estimate_altitude: bool) -> Self {
        TdoaSolver { config, estimate_altitude }
    }

    /// Estimate the transmitter position
    ///
    /// The reference is the first observation whose `tdoa_seconds` is exactly 0.
    /// Altitude is estimated only when enabled and at least four receivers
    /// participate; otherwise the transmitter is assumed to be at altitude 0.
    ///
    /// # Errors
    /// * `InsufficientReceivers` with fewer than three observations
    /// * `InvalidMeasurement` when no observation is a reference
    /// * `DegenerateGeometry` for collinear receivers or an ill-conditioned solve
    /// * `NoConvergence` when the iteration budget runs out
    pub fn locate(&self, observations: &[TdoaObservation]) -> Result<Fix, GeolocationError> {
        if observations.len() < MIN_RECEIVERS_2D {
            return Err(GeolocationError::InsufficientReceivers {
                required: MIN_RECEIVERS_2D,
                available: observations.len(),
            });
        }

        let ref_idx = observations
            .iter()
            .position(|o| o.tdoa_seconds == 0.0)
            .ok_or_else(|| {
                GeolocationError::invalid_measurement(
                    &observations[0].receiver_id,
                    "no reference measurement with zero tdoa",
                )
            })?;

        let positions: Vec<GeoPoint> = observations.iter().map(|o| o.position).collect();
        let spread = geodesy::spread_ratio(&positions);
        if spread < MIN_SPREAD_RATIO {
            debug!(spread, "TDoA receivers collinear");
            return Err(GeolocationError::DegenerateGeometry {
                condition_number: spread_condition(spread),
            });
        }

        let solve_altitude = self.estimate_altitude && observations.len() >= MIN_RECEIVERS_3D;
        let origin = geodesy::centroid(&positions).ok_or(GeolocationError::InsufficientReceivers {
            required: MIN_RECEIVERS_2D,
            available: 0,
        })?;

        let reference = &observations[ref_idx];
        let problem = TdoaProblem {
            frame: LocalFrame::new(origin),
            reference: (reference.position, reference.altitude),
            differences: observations
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != ref_idx)
                .map(|(_, o)| RangeDifference {
                    position: o.position,
                    altitude: o.altitude,
                    meters: o.tdoa_seconds * SPEED_OF_LIGHT,
                })
                .collect(),
            solve_altitude,
        };

        // Centroid, altitude 0
        let initial_guess = DVector::zeros(problem.dimension());
        let solution = solver::solve(&problem, initial_guess, &self.config).map_err(|e| match e {
            SolverError::IllConditioned { condition_number } => {
                GeolocationError::DegenerateGeometry { condition_number }
            }
            SolverError::NoConvergence { iterations, residual_norm } => {
                GeolocationError::NoConvergence { iterations, residual_norm }
            }
        })?;

        let (position, altitude) = problem.candidate(&solution.x);
        // Residual scatter says nothing when the system is exactly determined,
        // so the nominal timing error through the geometry sets a lower bound
        let geometry = solution
            .horizontal_dilution()
            .map(|hdop| 2.0 * TDOA_TIMING_SIGMA_S * SPEED_OF_LIGHT * hdop);
        let uncertainty = match (solution.horizontal_2drms(), geometry) {
            (Some(fit), Some(geometry)) => fit.max(geometry),
            _ => f64::INFINITY,
        }
        .clamp(TDOA_MIN_UNCERTAINTY_M, TDOA_MAX_UNCERTAINTY_M);

        debug!(
            lat = position.latitude,
            lon = position.longitude,
            iterations = solution.iterations,
            residual = solution.residual_norm,
            "TDoA fix"
        );

        Ok(Fix {
            position,
            altitude: solve_altitude.then_some(altitude),
            uncertainty_radius_m: uncertainty,
            residual_norm: solution.residual_norm,
            iterations: solution.iterations,
            low_confidence: false,
        })
    }
}

/// Express a scatter-matrix eigenvalue ratio as a condition number
pub(crate) fn spread_condition(spread: f64) -> f64 {
    if spread > 0.0 {
        1.0 / spread
    } else {
        f64::INFINITY
    }
}
