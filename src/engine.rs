// Geolocation engine - receiver registry and solve orchestration
//
// Owns the receiver registry, resolves measurement batches against it and
// dispatches to the TDoA or RSSI solver. The hybrid policy prefers TDoA and
// degrades to RSSI, then to a single-receiver ring.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::RING_POINTS;
use crate::error::GeolocationError;
use crate::geodesy::{self, GeoPoint};
use crate::measurement::{self, Measurement};
use crate::receiver::Receiver;
use crate::rssi::{self, PathLossModel, RssiObservation, RssiSolver};
use crate::solver::{Fix, SolverConfig};
use crate::tdoa::{self, TdoaObservation, TdoaSolver};

/// Engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub path_loss: PathLossModel,
    pub solver: SolverConfig,
    /// Points on a single-receiver ring
    pub ring_points: usize,
    /// Solve for transmitter altitude when at least four receivers participate
    pub estimate_altitude: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            path_loss: PathLossModel::default(),
            solver: SolverConfig::default(),
            ring_points: RING_POINTS,
            estimate_altitude: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeolocationMethod {
    Tdoa,
    Rssi,
    /// RSSI result reached through the hybrid fallback
    Hybrid,
    SingleReceiver,
}

impl GeolocationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeolocationMethod::Tdoa => "tdoa",
            GeolocationMethod::Rssi => "rssi",
            GeolocationMethod::Hybrid => "hybrid",
            GeolocationMethod::SingleReceiver => "single_receiver",
        }
    }
}

impl fmt::Display for GeolocationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one solve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeolocationResult {
    /// `None` for single-receiver estimates
    pub position: Option<GeoPoint>,
    /// `None` for 2D solves
    pub altitude: Option<f64>,
    pub method: GeolocationMethod,
    pub receiver_count: usize,
    pub frequency_hz: f64,
    pub modulation: Option<String>,
    pub uncertainty_radius_m: f64,
    /// Estimate is the power-weighted centroid rather than a fit
    pub low_confidence: bool,
    /// Candidate ring for single-receiver estimates, empty otherwise
    pub possible_locations: Vec<GeoPoint>,
}

/// Exportable copy of the registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub receivers: Vec<Receiver>,
}

/// A measurement joined with the receiver that produced it
struct Usable {
    measurement: Measurement,
    receiver: Receiver,
}

pub struct GeolocationEngine {
    config: EngineConfig,
    receivers: RwLock<HashMap<String, Receiver>>,
}

impl Default for GeolocationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl GeolocationEngine {
    pub fn new(config: EngineConfig) -> Self {
        GeolocationEngine {
            config,
            receivers: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild an engine from an exported registry
    pub fn from_snapshot(config: EngineConfig, snapshot: RegistrySnapshot) -> Result<Self, GeolocationError> {
        let engine = Self::new(config);
        for receiver in snapshot.receivers {
            engine.add_receiver(receiver)?;
        }
        Ok(engine)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn registry(&self) -> RwLockReadGuard<'_, HashMap<String, Receiver>> {
        self.receivers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Receiver>> {
        self.receivers.write().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Registry ---

    /// Register a receiver, replacing any existing record with the same id
    pub fn add_receiver(&self, receiver: Receiver) -> Result<(), GeolocationError> {
        receiver.validate()?;
        info!(
            receiver_id = %receiver.id,
            lat = receiver.latitude,
            lon = receiver.longitude,
            alt = receiver.altitude,
            "Receiver registered"
        );
        self.registry_mut().insert(receiver.id.clone(), receiver);
        Ok(())
    }

    pub fn remove_receiver(&self, id: &str) -> Option<Receiver> {
        let removed = self.registry_mut().remove(id);
        if removed.is_some() {
            info!(receiver_id = id, "Receiver removed");
        }
        removed
    }

    /// All receivers, sorted by id
    pub fn list_receivers(&self) -> Vec<Receiver> {
        let mut list: Vec<Receiver> = self.registry().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn receiver(&self, id: &str) -> Option<Receiver> {
        self.registry().get(id).cloned()
    }

    pub fn receiver_count(&self) -> usize {
        self.registry().len()
    }

    /// Mark a receiver alive as of `now`
    pub fn heartbeat(&self, id: &str, now: f64) -> Result<(), GeolocationError> {
        let mut registry = self.registry_mut();
        let receiver = registry
            .get_mut(id)
            .ok_or_else(|| GeolocationError::UnknownReceiver(id.to_string()))?;
        receiver.heartbeat(now);
        Ok(())
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<(), GeolocationError> {
        let mut registry = self.registry_mut();
        let receiver = registry
            .get_mut(id)
            .ok_or_else(|| GeolocationError::UnknownReceiver(id.to_string()))?;
        if receiver.active != active {
            info!(receiver_id = id, active, "Receiver state changed");
        }
        receiver.active = active;
        Ok(())
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            receivers: self.list_receivers(),
        }
    }

    // --- Solves ---

    /// Annotate a batch with arrival times relative to its earliest measurement
    pub fn calculate_tdoa(&self, measurements: &[Measurement]) -> Vec<Measurement> {
        measurement::calculate_tdoa(measurements)
    }

    /// Locate by time difference of arrival
    ///
    /// Measurements may arrive pre-annotated (every one carrying `tdoa_seconds`)
    /// or bare, in which case the engine annotates them. Annotated values are
    /// shifted so that the earliest usable measurement reads exactly 0; the
    /// original reference may belong to a receiver that is now inactive.
    pub fn geolocate_tdoa(&self, measurements: &[Measurement]) -> Result<GeolocationResult, GeolocationError> {
        if measurements.is_empty() {
            return Err(insufficient(tdoa::MIN_RECEIVERS_2D, 0));
        }
        let usable = self.resolve(measurements)?;
        self.solve_tdoa(&usable)
    }

    /// Locate by received power
    pub fn geolocate_rssi(&self, measurements: &[Measurement]) -> Result<GeolocationResult, GeolocationError> {
        if measurements.is_empty() {
            return Err(insufficient(rssi::MIN_RECEIVERS, 0));
        }
        let usable = self.resolve(measurements)?;
        self.solve_rssi(&usable)
    }

    /// Best available estimate: TDoA, then RSSI, then a single-receiver ring
    ///
    /// Only geometry and data-volume failures trigger a fallback; malformed
    /// input and unknown receivers are returned as-is.
    pub fn geolocate_hybrid(&self, measurements: &[Measurement]) -> Result<GeolocationResult, GeolocationError> {
        if measurements.is_empty() {
            return Err(insufficient(tdoa::MIN_RECEIVERS_2D, 0));
        }
        let usable = self.resolve(measurements)?;

        let tdoa_err = match self.solve_tdoa(&usable) {
            Ok(result) => return Ok(result),
            Err(e) if e.is_recoverable() => e,
            Err(e) => return Err(e),
        };
        debug!(error = %tdoa_err, "TDoA failed, falling back to RSSI");

        let rssi_err = match self.solve_rssi(&usable) {
            Ok(mut result) => {
                result.method = GeolocationMethod::Hybrid;
                return Ok(result);
            }
            Err(e) if e.is_recoverable() => e,
            Err(e) => return Err(e),
        };

        if let [only] = usable.as_slice() {
            debug!(receiver_id = %only.receiver.id, "Falling back to single-receiver ring");
            return self.ring_estimate(only);
        }
        Err(rssi_err)
    }

    /// Range ring around one receiver from its received power
    pub fn estimate_single_receiver(&self, measurement: &Measurement) -> Result<GeolocationResult, GeolocationError> {
        let usable = self.resolve(std::slice::from_ref(measurement))?;
        match usable.as_slice() {
            [only] => self.ring_estimate(only),
            _ => Err(insufficient(1, 0)),
        }
    }

    // --- Internals ---

    /// Validate a batch and join it with a snapshot of the registry
    ///
    /// Inactive receivers are dropped. The read lock is released before returning.
    fn resolve(&self, measurements: &[Measurement]) -> Result<Vec<Usable>, GeolocationError> {
        for m in measurements {
            m.validate()?;
        }

        let registry = self.registry();
        let mut seen = HashSet::new();
        let mut usable = Vec::with_capacity(measurements.len());

        for m in measurements {
            let receiver = registry
                .get(&m.receiver_id)
                .ok_or_else(|| GeolocationError::UnknownReceiver(m.receiver_id.clone()))?;
            if !seen.insert(m.receiver_id.as_str()) {
                return Err(GeolocationError::invalid_measurement(
                    &m.receiver_id,
                    "duplicate receiver in batch",
                ));
            }
            if !receiver.active {
                debug!(receiver_id = %m.receiver_id, "Skipping inactive receiver");
                continue;
            }
            usable.push(Usable {
                measurement: m.clone(),
                receiver: receiver.clone(),
            });
        }

        Ok(usable)
    }

    fn solve_tdoa(&self, usable: &[Usable]) -> Result<GeolocationResult, GeolocationError> {
        let annotated = usable.iter().filter(|u| u.measurement.tdoa_seconds.is_some()).count();
        let tdoas: Vec<f64> = if annotated == usable.len() {
            let values: Vec<f64> = usable.iter().filter_map(|u| u.measurement.tdoa_seconds).collect();
            let earliest = values.iter().copied().fold(f64::INFINITY, f64::min);
            values.into_iter().map(|t| t - earliest).collect()
        } else if annotated == 0 {
            let batch: Vec<Measurement> = usable.iter().map(|u| u.measurement.clone()).collect();
            measurement::calculate_tdoa(&batch)
                .into_iter()
                .filter_map(|m| m.tdoa_seconds)
                .collect()
        } else {
            let missing = usable
                .iter()
                .find(|u| u.measurement.tdoa_seconds.is_none())
                .map(|u| u.measurement.receiver_id.as_str())
                .unwrap_or_default();
            return Err(GeolocationError::invalid_measurement(
                missing,
                "batch is partially annotated with tdoa",
            ));
        };

        let observations: Vec<TdoaObservation> = usable
            .iter()
            .zip(tdoas)
            .map(|(u, tdoa_seconds)| TdoaObservation {
                receiver_id: u.receiver.id.clone(),
                position: u.receiver.position(),
                altitude: u.receiver.altitude,
                tdoa_seconds,
            })
            .collect();

        let solver = TdoaSolver::new(self.config.solver, self.config.estimate_altitude);
        let fix = solver.locate(&observations)?;
        let result = point_result(GeolocationMethod::Tdoa, fix, usable);
        log_result(&result);
        Ok(result)
    }

    fn solve_rssi(&self, usable: &[Usable]) -> Result<GeolocationResult, GeolocationError> {
        let observations: Vec<RssiObservation> = usable
            .iter()
            .map(|u| RssiObservation {
                receiver_id: u.receiver.id.clone(),
                position: u.receiver.position(),
                altitude: u.receiver.altitude,
                power: u.measurement.power,
            })
            .collect();

        let solver = RssiSolver::new(self.config.path_loss, self.config.solver);
        let fix = solver.locate(&observations)?;
        let result = point_result(GeolocationMethod::Rssi, fix, usable);
        log_result(&result);
        Ok(result)
    }

    fn ring_estimate(&self, usable: &Usable) -> Result<GeolocationResult, GeolocationError> {
        let m = &usable.measurement;
        if !(m.power > 0.0) {
            return Err(GeolocationError::invalid_measurement(
                &m.receiver_id,
                "power must be positive for range estimation",
            ));
        }

        let range = self.config.path_loss.estimate_range(m.power);
        let center = usable.receiver.position();
        let n = self.config.ring_points;
        let ring: Vec<GeoPoint> = (0..n)
            .map(|k| geodesy::destination(center, 360.0 * k as f64 / n as f64, range))
            .collect();

        info!(receiver_id = %m.receiver_id, range_m = range, "Single-receiver ring estimate");

        Ok(GeolocationResult {
            position: None,
            altitude: None,
            method: GeolocationMethod::SingleReceiver,
            receiver_count: 1,
            frequency_hz: m.frequency_hz,
            modulation: m.modulation.clone(),
            uncertainty_radius_m: range,
            low_confidence: false,
            possible_locations: ring,
        })
    }
}

fn insufficient(required: usize, available: usize) -> GeolocationError {
    GeolocationError::InsufficientReceivers { required, available }
}

fn point_result(method: GeolocationMethod, fix: Fix, usable: &[Usable]) -> GeolocationResult {
    let frequency_hz = if usable.is_empty() {
        0.0
    } else {
        usable.iter().map(|u| u.measurement.frequency_hz).sum::<f64>() / usable.len() as f64
    };

    GeolocationResult {
        position: Some(fix.position),
        altitude: fix.altitude,
        method,
        receiver_count: usable.len(),
        frequency_hz,
        modulation: usable.iter().find_map(|u| u.measurement.modulation.clone()),
        uncertainty_radius_m: fix.uncertainty_radius_m,
        low_confidence: fix.low_confidence,
        possible_locations: Vec::new(),
    }
}

fn log_result(result: &GeolocationResult) {
    if let Some(p) = result.position {
        info!(
            method = %result.method,
            lat = p.latitude,
            lon = p.longitude,
            receivers = result.receiver_count,
            uncertainty_m = result.uncertainty_radius_m,
            "Transmitter located"
        );
    }
}
