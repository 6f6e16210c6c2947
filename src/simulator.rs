// Synthetic receivers and measurements for tests and the demo binary
//
// Arrival times follow slant range at the speed of light, received power
// follows the path-loss model inverted, and noise comes from a seedable RNG.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::SPEED_OF_LIGHT;
use crate::geodesy::{self, GeoPoint};
use crate::measurement::Measurement;
use crate::receiver::Receiver;
use crate::rssi::PathLossModel;

/// Simulator settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Emission time of the first signal (s). Keep small: epoch-scale f64
    /// timestamps only resolve to ~0.24 us, about 70 m of range.
    pub start_time: f64,
    pub path_loss: PathLossModel,
    /// Receiver noise floor for SNR (dBm)
    pub noise_floor_dbm: f64,
    /// Tag copied onto every generated measurement
    pub modulation: Option<String>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        SimulatorConfig {
            start_time: 0.0,
            path_loss: PathLossModel::default(),
            noise_floor_dbm: -120.0,
            modulation: Some("AM".to_string()),
        }
    }
}

/// Measurement impairments, as standard deviations
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseProfile {
    /// Log-normal shadowing (dB)
    pub power_noise_db: f64,
    /// Arrival-time jitter (s)
    pub timing_jitter_s: f64,
}

impl NoiseProfile {
    /// Noiseless measurements
    pub fn none() -> Self {
        NoiseProfile {
            power_noise_db: 0.0,
            timing_jitter_s: 0.0,
        }
    }
}

impl Default for NoiseProfile {
    fn default() -> Self {
        NoiseProfile {
            power_noise_db: 2.0,
            timing_jitter_s: 1e-9,
        }
    }
}

/// Kinematics of a transmitter moving on a constant heading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trajectory {
    pub start: GeoPoint,
    pub altitude: f64,
    pub speed_mps: f64,
    pub heading_deg: f64,
    pub duration_s: f64,
    pub interval_s: f64,
}

impl Trajectory {
    /// Number of sampling instants, both ends included
    pub fn steps(&self) -> usize {
        if !(self.interval_s > 0.0) || !(self.duration_s >= 0.0) {
            return 0;
        }
        (self.duration_s / self.interval_s).floor() as usize + 1
    }

    /// Transmitter position at sampling instant `step`
    pub fn position_at(&self, step: usize) -> GeoPoint {
        let travelled = self.speed_mps * self.interval_s * step as f64;
        geodesy::destination(self.start, self.heading_deg, travelled)
    }
}

pub struct MeasurementSimulator {
    config: SimulatorConfig,
    rng: StdRng,
}

impl MeasurementSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        MeasurementSimulator {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible simulator
    pub fn with_seed(config: SimulatorConfig, seed: u64) -> Self {
        MeasurementSimulator {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Place `count` active receivers `R0..` evenly on a circle around `center`
    pub fn generate_receivers(&self, center: GeoPoint, radius_km: f64, count: usize) -> Vec<Receiver> {
        (0..count)
            .map(|i| {
                let bearing = 360.0 * i as f64 / count as f64;
                let p = geodesy::destination(center, bearing, radius_km * 1000.0);
                Receiver::new(format!("R{}", i), p.latitude, p.longitude, 0.0)
            })
            .collect()
    }

    /// One batch of measurements for a transmitter emitting at `config.start_time`
    ///
    /// # Arguments
    /// * `tx` - Transmitter position
    /// * `tx_altitude` - Transmitter altitude (m)
    /// * `frequency_hz` - Carrier frequency
    /// * `power` - Normalized transmitter power; 1.0 is the path-loss reference
    /// * `receivers` - Listening stations; inactive ones produce nothing
    /// * `noise` - Impairments to apply
    pub fn simulate_signal(
        &mut self,
        tx: GeoPoint,
        tx_altitude: f64,
        frequency_hz: f64,
        power: f64,
        receivers: &[Receiver],
        noise: NoiseProfile,
    ) -> Vec<Measurement> {
        let emitted_at = self.config.start_time;
        self.emit(emitted_at, tx, tx_altitude, frequency_hz, power, receivers, noise)
    }

    /// One batch per sampling instant of a transmitter moving along `trajectory`
    ///
    /// Emission time advances by `interval_s` each step.
    pub fn simulate_moving_transmitter(
        &mut self,
        trajectory: &Trajectory,
        frequency_hz: f64,
        power: f64,
        receivers: &[Receiver],
        noise: NoiseProfile,
    ) -> Vec<Vec<Measurement>> {
        (0..trajectory.steps())
            .map(|step| {
                let emitted_at = self.config.start_time + trajectory.interval_s * step as f64;
                let tx = trajectory.position_at(step);
                debug!(step, lat = tx.latitude, lon = tx.longitude, "Moving transmitter sample");
                self.emit(emitted_at, tx, trajectory.altitude, frequency_hz, power, receivers, noise)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &mut self,
        emitted_at: f64,
        tx: GeoPoint,
        tx_altitude: f64,
        frequency_hz: f64,
        power: f64,
        receivers: &[Receiver],
        noise: NoiseProfile,
    ) -> Vec<Measurement> {
        let model = self.config.path_loss;
        let mut measurements = Vec::with_capacity(receivers.len());

        for receiver in receivers.iter().filter(|r| r.active) {
            let range = geodesy::slant_range(tx, tx_altitude, receiver.position(), receiver.altitude);
            let arrival = emitted_at + range / SPEED_OF_LIGHT + self.gaussian(noise.timing_jitter_s);

            let received_dbm = model.received_dbm(power, range) + self.gaussian(noise.power_noise_db);
            let received_power = model.dbm_to_power(received_dbm).min(1.0);

            let mut m = Measurement::new(receiver.id.clone(), frequency_hz, received_power, arrival)
                .with_snr(model.power_to_dbm(received_power) - self.config.noise_floor_dbm);
            if let Some(modulation) = &self.config.modulation {
                m = m.with_modulation(modulation.clone());
            }
            measurements.push(m);
        }

        measurements
    }

    /// Zero-mean normal sample; exactly 0 when `std_dev` is not positive
    fn gaussian(&mut self, std_dev: f64) -> f64 {
        if !(std_dev > 0.0) {
            return 0.0;
        }
        match Normal::new(0.0, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf() -> GeoPoint {
        GeoPoint::new(37.7749, -122.4194)
    }

    #[test]
    fn test_generate_receivers_on_circle() {
        let sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), 1);
        let receivers = sim.generate_receivers(sf(), 10.0, 5);

        assert_eq!(receivers.len(), 5);
        assert_eq!(receivers[0].id, "R0");
        assert_eq!(receivers[4].id, "R4");
        for r in &receivers {
            assert!((geodesy::distance(sf(), r.position()) - 10_000.0).abs() < 1e-3);
            assert!(r.active);
        }
        // R1 sits at bearing 72
        assert!((geodesy::bearing(sf(), receivers[1].position()) - 72.0).abs() < 1e-6);
    }

    #[test]
    fn test_noiseless_timestamps_follow_range() {
        let mut sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), 1);
        let receivers = sim.generate_receivers(sf(), 10.0, 4);
        let tx = GeoPoint::new(37.8199, -122.4783);
        let batch = sim.simulate_signal(tx, 0.0, 100e6, 1.0, &receivers, NoiseProfile::none());

        assert_eq!(batch.len(), 4);
        for (m, r) in batch.iter().zip(&receivers) {
            let expected = geodesy::distance(tx, r.position()) / SPEED_OF_LIGHT;
            assert!((m.timestamp - expected).abs() < 1e-15);
            assert!(m.power > 0.0 && m.power <= 1.0);
            assert_eq!(m.frequency_hz, 100e6);
            assert_eq!(m.modulation.as_deref(), Some("AM"));
            assert!(m.validate().is_ok());
        }
    }

    #[test]
    fn test_power_clamped_near_transmitter() {
        let mut sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), 1);
        let receivers = vec![Receiver::new("R0", 37.7749, -122.4194, 0.0)];
        let batch = sim.simulate_signal(sf(), 0.0, 100e6, 1.0, &receivers, NoiseProfile::none());
        assert_eq!(batch[0].power, 1.0);
    }

    #[test]
    fn test_seeded_runs_repeat() {
        let noise = NoiseProfile { power_noise_db: 3.0, timing_jitter_s: 5e-9 };
        let run = |seed| {
            let mut sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), seed);
            let receivers = sim.generate_receivers(sf(), 10.0, 5);
            sim.simulate_signal(GeoPoint::new(37.8, -122.45), 0.0, 145e6, 1.0, &receivers, noise)
        };
        assert_eq!(run(42), run(42));
        assert_ne!(run(42), run(43));
    }

    #[test]
    fn test_inactive_receivers_skipped() {
        let mut sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), 1);
        let mut receivers = sim.generate_receivers(sf(), 10.0, 4);
        receivers[2].active = false;
        let batch = sim.simulate_signal(sf(), 0.0, 100e6, 1.0, &receivers, NoiseProfile::none());
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|m| m.receiver_id != "R2"));
    }

    #[test]
    fn test_moving_transmitter_steps() {
        let mut sim = MeasurementSimulator::with_seed(SimulatorConfig::default(), 1);
        let receivers = sim.generate_receivers(sf(), 15.0, 6);
        let trajectory = Trajectory {
            start: GeoPoint::new(37.8199, -122.4783),
            altitude: 0.0,
            speed_mps: 20.0,
            heading_deg: 120.0,
            duration_s: 60.0,
            interval_s: 10.0,
        };
        let batches = sim.simulate_moving_transmitter(&trajectory, 100e6, 1.0, &receivers, NoiseProfile::none());

        assert_eq!(batches.len(), 7);
        assert!(batches.iter().all(|b| b.len() == 6));
        assert!((geodesy::distance(trajectory.start, trajectory.position_at(6)) - 1_200.0).abs() < 1e-6);

        // Each batch is emitted one interval after the previous
        let earliest = |b: &Vec<Measurement>| b.iter().map(|m| m.timestamp).fold(f64::INFINITY, f64::min);
        assert!(earliest(&batches[1]) > 10.0 && earliest(&batches[1]) < 10.001);
    }

    #[test]
    fn test_trajectory_without_interval_is_empty() {
        let trajectory = Trajectory {
            start: sf(),
            altitude: 0.0,
            speed_mps: 1.0,
            heading_deg: 0.0,
            duration_s: 10.0,
            interval_s: 0.0,
        };
        assert_eq!(trajectory.steps(), 0);
    }
}
