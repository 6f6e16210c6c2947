// Signal measurements and the TDoA annotation step

use serde::{Deserialize, Serialize};

use crate::error::GeolocationError;

/// One receiver's observation of a signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub receiver_id: String,
    pub frequency_hz: f64,
    /// Normalized received power in (0, 1]
    pub power: f64,
    /// Arrival time, epoch seconds
    pub timestamp: f64,
    /// Arrival time relative to the batch reference; engine-computed
    #[serde(default)]
    pub tdoa_seconds: Option<f64>,
    #[serde(default)]
    pub snr_db: Option<f64>,
    #[serde(default)]
    pub modulation: Option<String>,
}

impl Measurement {
    pub fn new(receiver_id: impl Into<String>, frequency_hz: f64, power: f64, timestamp: f64) -> Self {
        Measurement {
            receiver_id: receiver_id.into(),
            frequency_hz,
            power,
            timestamp,
            tdoa_seconds: None,
            snr_db: None,
            modulation: None,
        }
    }

    pub fn with_snr(mut self, snr_db: f64) -> Self {
        self.snr_db = Some(snr_db);
        self
    }

    pub fn with_modulation(mut self, modulation: impl Into<String>) -> Self {
        self.modulation = Some(modulation.into());
        self
    }

    /// Reject malformed records before they reach a solver
    pub fn validate(&self) -> Result<(), GeolocationError> {
        let fail = |reason: &str| Err(GeolocationError::invalid_measurement(&self.receiver_id, reason));

        if self.receiver_id.is_empty() {
            return fail("empty receiver id");
        }
        if !self.frequency_hz.is_finite() || self.frequency_hz <= 0.0 {
            return fail("frequency must be positive");
        }
        // Zero power has no range
        if !(self.power > 0.0 && self.power <= 1.0) {
            return fail("power outside (0, 1]");
        }
        if !self.timestamp.is_finite() {
            return fail("timestamp is not finite");
        }
        if self.tdoa_seconds.map_or(false, |t| !t.is_finite()) {
            return fail("tdoa is not finite");
        }
        if self.snr_db.map_or(false, |s| !s.is_finite()) {
            return fail("snr is not finite");
        }
        Ok(())
    }
}

/// Index of the reference measurement: earliest timestamp, first in input order on ties
pub fn reference_index(measurements: &[Measurement]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, m) in measurements.iter().enumerate() {
        match best {
            Some(b) if measurements[b].timestamp <= m.timestamp => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Annotate each measurement with its arrival time relative to the reference
///
/// The reference gets exactly 0; every other value is signed relative to it.
/// Returns new records and leaves the input untouched.
pub fn calculate_tdoa(measurements: &[Measurement]) -> Vec<Measurement> {
    let Some(ref_idx) = reference_index(measurements) else {
        return Vec::new();
    };
    let reference_time = measurements[ref_idx].timestamp;

    measurements
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let mut annotated = m.clone();
            annotated.tdoa_seconds = Some(if i == ref_idx { 0.0 } else { m.timestamp - reference_time });
            annotated
        })
        .collect()
}

/// Measurements of one signal, clustered by carrier frequency
#[derive(Debug, Clone)]
pub struct FrequencyGroup {
    /// Mean frequency of the members
    pub frequency_hz: f64,
    pub measurements: Vec<Measurement>,
}

/// Split a mixed batch into per-signal groups
///
/// Frequencies closer than `tolerance_hz` to their sorted neighbour share a
/// group. Members keep their input order; groups come out by ascending frequency.
pub fn group_by_frequency(measurements: &[Measurement], tolerance_hz: f64) -> Vec<FrequencyGroup> {
    let mut order: Vec<usize> = (0..measurements.len()).collect();
    order.sort_by(|&a, &b| measurements[a].frequency_hz.total_cmp(&measurements[b].frequency_hz));

    let mut cluster_of = vec![0usize; measurements.len()];
    let mut n_clusters = 0;
    for (pos, &idx) in order.iter().enumerate() {
        if pos > 0 {
            let prev = measurements[order[pos - 1]].frequency_hz;
            if (measurements[idx].frequency_hz - prev).abs() > tolerance_hz {
                n_clusters += 1;
            }
        }
        cluster_of[idx] = n_clusters;
    }

    if measurements.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<Vec<Measurement>> = vec![Vec::new(); n_clusters + 1];
    for (idx, m) in measurements.iter().enumerate() {
        groups[cluster_of[idx]].push(m.clone());
    }

    groups
        .into_iter()
        .map(|members| {
            let frequency_hz = members.iter().map(|m| m.frequency_hz).sum::<f64>() / members.len() as f64;
            FrequencyGroup { frequency_hz, measurements: members }
        })
        .collect()
}
