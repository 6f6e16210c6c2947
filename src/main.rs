// RF Geolocation - Main Entry Point
// Copyright (C) 2024 - rf-geolocation
// Licensed under AGPL v3

use std::io::{self, BufWriter};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rf_geolocation::config::{BatchInput, Config, OutputFormat};
use rf_geolocation::engine::GeolocationEngine;
use rf_geolocation::measurement::{self, Measurement};
use rf_geolocation::output::{CsvOutput, JsonLinesOutput, OutputHandler};
use rf_geolocation::simulator::MeasurementSimulator;
use rf_geolocation::worker::SolveWorker;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    let engine = Arc::new(GeolocationEngine::new(config.engine_config()));

    let batches = match &config.input {
        Some(path) => {
            info!("Reading batch from {}", path);
            let input = BatchInput::load(path)?;
            for receiver in input.receivers {
                engine.add_receiver(receiver)?;
            }
            vec![input.measurements]
        }
        None => simulate(&config, &engine)?,
    };
    info!("{} receivers registered, {} batches to solve", engine.receiver_count(), batches.len());

    let worker = SolveWorker::new(engine, Duration::from_millis(config.deadline_ms));
    let mut output: Box<dyn OutputHandler> = match config.format {
        OutputFormat::Json => Box::new(JsonLinesOutput::new(BufWriter::new(io::stdout()))),
        OutputFormat::Csv => Box::new(CsvOutput::new(BufWriter::new(io::stdout()))),
    };

    let tolerance = config.frequency_tolerance_hz;
    let run = async {
        let mut located = 0usize;
        for (step, batch) in batches.into_iter().enumerate() {
            for group in measurement::group_by_frequency(&batch, tolerance) {
                let frequency_mhz = group.frequency_hz / 1e6;
                match worker.geolocate_hybrid(group.measurements).await {
                    Ok(result) => {
                        output.handle_result(&result)?;
                        located += 1;
                    }
                    Err(e) => warn!(step, frequency_mhz, error = %e, "Skipping frequency"),
                }
            }
        }
        output.flush()?;
        Ok::<usize, io::Error>(located)
    };

    // Stop early on Ctrl+C
    tokio::select! {
        located = run => {
            let located = located?;
            info!("Done. {} signals located", located);
        }
        _ = signal::ctrl_c() => info!("Received shutdown signal (Ctrl+C)"),
    }

    Ok(())
}

/// Register a simulated receiver circle and generate the requested samples
fn simulate(config: &Config, engine: &GeolocationEngine) -> Result<Vec<Vec<Measurement>>, Box<dyn std::error::Error>> {
    let mut simulator = match config.seed {
        Some(seed) => MeasurementSimulator::with_seed(config.simulator_config(), seed),
        None => MeasurementSimulator::new(config.simulator_config()),
    };

    let receivers = simulator.generate_receivers(config.center(), config.radius_km, config.receivers);
    for receiver in &receivers {
        engine.add_receiver(receiver.clone())?;
    }

    let trajectory = config.trajectory();
    let frequency_hz = config.frequency_mhz * 1e6;
    info!(
        "Simulating transmitter at ({:.5}, {:.5}) on {:.3} MHz, {} samples",
        trajectory.start.latitude,
        trajectory.start.longitude,
        config.frequency_mhz,
        trajectory.steps()
    );

    let batches = if config.steps <= 1 {
        vec![simulator.simulate_signal(trajectory.start, trajectory.altitude, frequency_hz, 1.0, &receivers, config.noise())]
    } else {
        simulator.simulate_moving_transmitter(&trajectory, frequency_hz, 1.0, &receivers, config.noise())
    };
    Ok(batches)
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    // Logs go to stderr; stdout carries results
    let subscriber = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
