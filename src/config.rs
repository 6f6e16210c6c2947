use std::path::Path;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;
use crate::geodesy::GeoPoint;
use crate::measurement::Measurement;
use crate::receiver::Receiver;
use crate::rssi::PathLossModel;
use crate::simulator::{NoiseProfile, SimulatorConfig, Trajectory};
use crate::solver::SolverConfig;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON location frame per line
    Json,
    Csv,
}

/// RF Geolocation Configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Read receivers and measurements from a JSON file instead of simulating.
    #[arg(long, value_name = "FILE")]
    pub input: Option<String>,

    /// Output format written to stdout.
    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Measurements closer than this in frequency belong to the same signal.
    #[arg(long, value_name = "HZ", default_value_t = 1_000.0)]
    pub frequency_tolerance_hz: f64,

    // --- Engine tuning ---

    /// Log-distance path-loss exponent
    #[arg(long, default_value_t = crate::constants::PATH_LOSS_EXPONENT)]
    pub path_loss_exponent: f64,

    /// Received power at 1 m from a nominal transmitter (dBm)
    #[arg(long, default_value_t = crate::constants::PATH_LOSS_REFERENCE_DBM, allow_hyphen_values = true)]
    pub reference_power_dbm: f64,

    /// Received power that reads as normalized power 1.0 (dBm)
    #[arg(long, default_value_t = crate::constants::FULL_SCALE_DBM, allow_hyphen_values = true)]
    pub full_scale_dbm: f64,

    /// Relative improvement at which the solver stops
    #[arg(long, default_value_t = crate::constants::SOLVER_TOLERANCE)]
    pub tolerance: f64,

    #[arg(long, default_value_t = crate::constants::SOLVER_MAX_ITERATIONS)]
    pub max_iterations: usize,

    /// Points on a single-receiver range ring
    #[arg(long, default_value_t = crate::constants::RING_POINTS)]
    pub ring_points: usize,

    /// Estimate transmitter altitude when four or more receivers hear it
    #[arg(long, default_value_t = false)]
    pub estimate_altitude: bool,

    /// Wall-clock deadline per solve in milliseconds
    #[arg(long, default_value_t = 1_000)]
    pub deadline_ms: u64,

    // --- Simulation ---

    #[arg(long, default_value_t = 37.7749, allow_hyphen_values = true)]
    pub center_lat: f64,

    #[arg(long, default_value_t = -122.4194, allow_hyphen_values = true)]
    pub center_lon: f64,

    /// Radius of the simulated receiver circle (km)
    #[arg(long, default_value_t = 10.0)]
    pub radius_km: f64,

    /// Number of simulated receivers
    #[arg(long, default_value_t = 5)]
    pub receivers: usize,

    #[arg(long, default_value_t = 37.8199, allow_hyphen_values = true)]
    pub tx_lat: f64,

    #[arg(long, default_value_t = -122.4783, allow_hyphen_values = true)]
    pub tx_lon: f64,

    /// Transmitter altitude (m)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub tx_alt: f64,

    /// Carrier frequency of the simulated signal (MHz)
    #[arg(long, default_value_t = 100.0)]
    pub frequency_mhz: f64,

    /// Log-normal shadowing on received power (dB)
    #[arg(long, default_value_t = 0.0)]
    pub power_noise_db: f64,

    /// Arrival-time jitter (ns)
    #[arg(long, default_value_t = 0.0)]
    pub timing_jitter_ns: f64,

    /// Number of samples; more than one moves the transmitter between samples
    #[arg(long, default_value_t = 1)]
    pub steps: usize,

    /// Transmitter speed (m/s)
    #[arg(long, default_value_t = 0.0)]
    pub speed_mps: f64,

    /// Transmitter heading (degrees, 0 = north)
    #[arg(long, default_value_t = 0.0)]
    pub heading_deg: f64,

    /// Seconds between samples
    #[arg(long, default_value_t = 10.0)]
    pub interval_s: f64,

    /// Seed for reproducible noise
    #[arg(long)]
    pub seed: Option<u64>,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            path_loss: self.path_loss(),
            solver: SolverConfig {
                tolerance: self.tolerance,
                max_iterations: self.max_iterations,
            },
            ring_points: self.ring_points,
            estimate_altitude: self.estimate_altitude,
        }
    }

    pub fn path_loss(&self) -> PathLossModel {
        PathLossModel {
            reference_power_dbm: self.reference_power_dbm,
            exponent: self.path_loss_exponent,
            full_scale_dbm: self.full_scale_dbm,
        }
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            path_loss: self.path_loss(),
            ..SimulatorConfig::default()
        }
    }

    pub fn noise(&self) -> NoiseProfile {
        NoiseProfile {
            power_noise_db: self.power_noise_db,
            timing_jitter_s: self.timing_jitter_ns * 1e-9,
        }
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new(self.center_lat, self.center_lon)
    }

    pub fn trajectory(&self) -> Trajectory {
        Trajectory {
            start: GeoPoint::new(self.tx_lat, self.tx_lon),
            altitude: self.tx_alt,
            speed_mps: self.speed_mps,
            heading_deg: self.heading_deg,
            duration_s: self.interval_s * self.steps.saturating_sub(1) as f64,
            interval_s: self.interval_s,
        }
    }
}

/// Batch file for `--input`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchInput {
    #[serde(default)]
    pub receivers: Vec<Receiver>,
    #[serde(default)]
    pub measurements: Vec<Measurement>,
}

impl BatchInput {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::try_parse_from(["rf-geolocate"]).unwrap();
        assert_eq!(config.input, None);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.engine_config(), EngineConfig::default());
        assert_eq!(config.trajectory().duration_s, 0.0);
        assert_eq!(config.trajectory().steps(), 1);
    }

    #[test]
    fn test_negative_values_and_flags() {
        let config = Config::try_parse_from([
            "rf-geolocate",
            "--center-lon",
            "-3.7",
            "--full-scale-dbm",
            "-30",
            "--format",
            "csv",
            "--estimate-altitude",
            "--steps",
            "4",
            "--timing-jitter-ns",
            "2",
        ])
        .unwrap();

        assert_eq!(config.center().longitude, -3.7);
        assert_eq!(config.path_loss().full_scale_dbm, -30.0);
        assert_eq!(config.format, OutputFormat::Csv);
        assert!(config.engine_config().estimate_altitude);
        assert_eq!(config.trajectory().steps(), 4);
        assert!((config.noise().timing_jitter_s - 2e-9).abs() < 1e-20);
    }

    #[test]
    fn test_batch_input_parse() {
        let json = r#"{
            "receivers": [{"id": "R0", "latitude": 1.0, "longitude": 2.0}],
            "measurements": [{"receiver_id": "R0", "frequency_hz": 1e8, "power": 0.3, "timestamp": 0.5}]
        }"#;
        let input: BatchInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.receivers.len(), 1);
        assert_eq!(input.measurements[0].receiver_id, "R0");
    }
}
