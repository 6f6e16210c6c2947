// RSSI trilateration
//
// Received power is converted to a range with a log-distance path-loss model,
// then ranges are fitted by weighted least squares. Much coarser than TDoA:
// the fixed exponent absorbs every real-world propagation effect.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{
    CENTROID_MIN_UNCERTAINTY_M, FULL_SCALE_DBM, MIN_SPREAD_RATIO, PATH_LOSS_EXPONENT,
    PATH_LOSS_REFERENCE_DBM, RSSI_MIN_UNCERTAINTY_M,
};
use crate::error::GeolocationError;
use crate::geodesy::{self, GeoPoint, LocalFrame};
use crate::solver::{self, Fix, LeastSquaresProblem, SolverConfig, SolverError};

/// Minimum receivers for trilateration
pub const MIN_RECEIVERS: usize = 3;

/// Log-distance path-loss model
///
/// `P(d) = P0 - 10 n log10(d)` with `P0` the power at 1 m. Normalized power
/// maps to dBm through `full_scale_dbm`, the level that reads as 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathLossModel {
    pub reference_power_dbm: f64,
    pub exponent: f64,
    pub full_scale_dbm: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        PathLossModel {
            reference_power_dbm: PATH_LOSS_REFERENCE_DBM,
            exponent: PATH_LOSS_EXPONENT,
            full_scale_dbm: FULL_SCALE_DBM,
        }
    }
}

impl PathLossModel {
    pub fn power_to_dbm(&self, power: f64) -> f64 {
        self.full_scale_dbm + 10.0 * power.log10()
    }

    pub fn dbm_to_power(&self, dbm: f64) -> f64 {
        10f64.powf((dbm - self.full_scale_dbm) / 10.0)
    }

    /// Estimated range in meters for a normalized received power
    pub fn estimate_range(&self, power: f64) -> f64 {
        let measured_dbm = self.power_to_dbm(power);
        10f64.powf((self.reference_power_dbm - measured_dbm) / (10.0 * self.exponent))
    }

    /// Received level in dBm for a transmitter of normalized power `tx_power` at `range_m`
    ///
    /// Ranges under 1 m are treated as 1 m, where the model is anchored.
    pub fn received_dbm(&self, tx_power: f64, range_m: f64) -> f64 {
        self.reference_power_dbm + 10.0 * tx_power.log10()
            - 10.0 * self.exponent * range_m.max(1.0).log10()
    }
}

/// A receiver position paired with its measured power
#[derive(Debug, Clone)]
pub struct RssiObservation {
    pub receiver_id: String,
    pub position: GeoPoint,
    pub altitude: f64,
    pub power: f64,
}

struct RangeConstraint {
    position: GeoPoint,
    altitude: f64,
    range: f64,
    weight_sqrt: f64,
}

struct RssiProblem {
    frame: LocalFrame,
    constraints: Vec<RangeConstraint>,
}

impl LeastSquaresProblem for RssiProblem {
    fn dimension(&self) -> usize {
        2
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let p = self.frame.to_geo(x[0], x[1]);
        DVector::from_iterator(
            self.constraints.len(),
            self.constraints.iter().map(|c| {
                c.weight_sqrt * (geodesy::slant_range(p, 0.0, c.position, c.altitude) - c.range)
            }),
        )
    }
}

/// Weighted trilateration solver
#[derive(Debug, Clone)]
pub struct RssiSolver {
    model: PathLossModel,
    config: SolverConfig,
}

impl RssiSolver {
    pub fn new(model: PathLossModel, config: SolverConfig) -> Self {
        RssiSolver { model, config }
    }

    /// Estimate the transmitter position from received powers
    ///
    /// Weights are proportional to power: a strong signal gives a more
    /// trustworthy range. Collinear receivers or an ill-conditioned fit fall
    /// back to the power-weighted centroid, flagged `low_confidence`.
    ///
    /// # Errors
    /// * `InsufficientReceivers` with fewer than three observations
    /// * `InvalidMeasurement` when a power is not positive
    /// * `NoConvergence` when the iteration budget runs out
    pub fn locate(&self, observations: &[RssiObservation]) -> Result<Fix, GeolocationError> {
        if observations.len() < MIN_RECEIVERS {
            return Err(GeolocationError::InsufficientReceivers {
                required: MIN_RECEIVERS,
                available: observations.len(),
            });
        }
        if let Some(bad) = observations.iter().find(|o| !(o.power > 0.0)) {
            return Err(GeolocationError::invalid_measurement(
                &bad.receiver_id,
                "power must be positive for range estimation",
            ));
        }

        let positions: Vec<GeoPoint> = observations.iter().map(|o| o.position).collect();
        let spread = geodesy::spread_ratio(&positions);
        if spread < MIN_SPREAD_RATIO {
            debug!(spread, "RSSI receivers collinear, using weighted centroid");
            return self.weighted_centroid(observations);
        }

        let max_power = observations.iter().map(|o| o.power).fold(0.0, f64::max);
        let origin = geodesy::centroid(&positions).ok_or(GeolocationError::InsufficientReceivers {
            required: MIN_RECEIVERS,
            available: 0,
        })?;

        let problem = RssiProblem {
            frame: LocalFrame::new(origin),
            constraints: observations
                .iter()
                .map(|o| RangeConstraint {
                    position: o.position,
                    altitude: o.altitude,
                    range: self.model.estimate_range(o.power),
                    weight_sqrt: (o.power / max_power).sqrt(),
                })
                .collect(),
        };

        match solver::solve(&problem, DVector::zeros(2), &self.config) {
            Ok(solution) => {
                let position = problem.frame.to_geo(solution.x[0], solution.x[1]);
                let uncertainty = solution
                    .horizontal_2drms()
                    .unwrap_or(RSSI_MIN_UNCERTAINTY_M)
                    .max(RSSI_MIN_UNCERTAINTY_M);

                debug!(
                    lat = position.latitude,
                    lon = position.longitude,
                    iterations = solution.iterations,
                    residual = solution.residual_norm,
                    "RSSI fix"
                );

                Ok(Fix {
                    position,
                    altitude: None,
                    uncertainty_radius_m: uncertainty,
                    residual_norm: solution.residual_norm,
                    iterations: solution.iterations,
                    low_confidence: false,
                })
            }
            Err(SolverError::IllConditioned { condition_number }) => {
                debug!(condition_number, "RSSI normal equations singular, using weighted centroid");
                self.weighted_centroid(observations)
            }
            Err(SolverError::NoConvergence { iterations, residual_norm }) => {
                Err(GeolocationError::NoConvergence { iterations, residual_norm })
            }
        }
    }

    /// Power-weighted centroid of the receivers; radius covers the farthest receiver
    fn weighted_centroid(&self, observations: &[RssiObservation]) -> Result<Fix, GeolocationError> {
        let weighted: Vec<(GeoPoint, f64)> = observations.iter().map(|o| (o.position, o.power)).collect();
        let position = geodesy::weighted_centroid(&weighted).ok_or(GeolocationError::InsufficientReceivers {
            required: MIN_RECEIVERS,
            available: 0,
        })?;

        let spread = observations
            .iter()
            .map(|o| geodesy::distance(position, o.position))
            .fold(0.0, f64::max);

        Ok(Fix {
            position,
            altitude: None,
            uncertainty_radius_m: spread.max(CENTROID_MIN_UNCERTAINTY_M),
            residual_norm: f64::NAN,
            iterations: 0,
            low_confidence: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observations(model: &PathLossModel, center: GeoPoint, tx: GeoPoint, bearings: &[f64], radius: f64) -> Vec<RssiObservation> {
        bearings
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                let position = geodesy::destination(center, b, radius);
                let range = geodesy::distance(position, tx);
                RssiObservation {
                    receiver_id: format!("R{}", i),
                    position,
                    altitude: 0.0,
                    power: model.dbm_to_power(model.received_dbm(1.0, range)),
                }
            })
            .collect()
    }

    #[test]
    fn test_path_loss_roundtrip() {
        let model = PathLossModel::default();
        for &range in &[5.0, 120.0, 3_000.0, 25_000.0] {
            let power = model.dbm_to_power(model.received_dbm(1.0, range));
            let back = model.estimate_range(power);
            assert!((back - range).abs() / range < 1e-9, "{} vs {}", back, range);
        }
    }

    #[test]
    fn test_weaker_signal_means_farther() {
        let model = PathLossModel::default();
        assert!(model.estimate_range(0.01) > model.estimate_range(0.5));
    }

    #[test]
    fn test_locate_noiseless() {
        let model = PathLossModel::default();
        let center = GeoPoint::new(37.7749, -122.4194);
        let tx = GeoPoint::new(37.8199, -122.4783);
        let obs = observations(&model, center, tx, &[0.0, 72.0, 144.0, 216.0, 288.0], 10_000.0);

        let fix = RssiSolver::new(model, SolverConfig::default()).locate(&obs).unwrap();
        let error = geodesy::distance(fix.position, tx);
        assert!(error < 2_000.0, "Position error too large: {} meters", error);
        assert!(!fix.low_confidence);
        assert!(fix.uncertainty_radius_m >= RSSI_MIN_UNCERTAINTY_M);
    }

    #[test]
    fn test_collinear_falls_back_to_centroid() {
        let model = PathLossModel::default();
        let center = GeoPoint::new(10.0, 20.0);
        let tx = geodesy::destination(center, 90.0, 4_000.0);
        let mut obs = observations(&model, center, tx, &[0.0, 180.0], 3_000.0);
        obs.extend(observations(&model, center, tx, &[0.0, 180.0], 9_000.0));

        let fix = RssiSolver::new(model, SolverConfig::default()).locate(&obs).unwrap();
        assert!(fix.low_confidence);
        assert!(fix.uncertainty_radius_m >= CENTROID_MIN_UNCERTAINTY_M);
        assert!((fix.position.longitude - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_diagonal_great_circle_falls_back_to_centroid() {
        let model = PathLossModel::default();
        let center = GeoPoint::new(37.7749, -122.4194);
        let tx = geodesy::destination(center, 315.0, 4_000.0);
        let mut obs = observations(&model, center, tx, &[45.0, 225.0], 10_000.0);
        obs.extend(observations(&model, center, tx, &[45.0, 225.0], 30_000.0));

        let fix = RssiSolver::new(model, SolverConfig::default()).locate(&obs).unwrap();
        assert!(fix.low_confidence);
        assert!(fix.uncertainty_radius_m >= CENTROID_MIN_UNCERTAINTY_M);
    }

    #[test]
    fn test_zero_power_rejected() {
        let model = PathLossModel::default();
        let center = GeoPoint::new(37.7749, -122.4194);
        let mut obs = observations(&model, center, center, &[0.0, 120.0, 240.0], 5_000.0);
        obs[1].power = 0.0;

        let result = RssiSolver::new(model, SolverConfig::default()).locate(&obs);
        assert!(matches!(result, Err(GeolocationError::InvalidMeasurement { .. })));
    }

    #[test]
    fn test_insufficient() {
        let model = PathLossModel::default();
        let center = GeoPoint::new(37.7749, -122.4194);
        let obs = observations(&model, center, center, &[0.0, 180.0], 5_000.0);
        let result = RssiSolver::new(model, SolverConfig::default()).locate(&obs);
        assert_eq!(
            result,
            Err(GeolocationError::InsufficientReceivers { required: 3, available: 2 })
        );
    }
}
