// Deadline-bounded solves for async hosts
//
// Solves are synchronous and CPU-bound, so they run on tokio's blocking pool.
// A solve that overruns its deadline is abandoned: the caller gets an error
// immediately while the blocking task runs to completion in the background.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::{task, time};
use tracing::warn;

use crate::engine::{GeolocationEngine, GeolocationResult};
use crate::error::GeolocationError;
use crate::measurement::Measurement;

#[derive(Debug)]
pub enum WorkerError {
    Geolocation(GeolocationError),
    DeadlineExceeded(Duration),
    /// The blocking task panicked or was cancelled
    TaskFailed(String),
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Geolocation(e) => write!(f, "{}", e),
            WorkerError::DeadlineExceeded(d) => write!(f, "solve exceeded deadline of {} ms", d.as_millis()),
            WorkerError::TaskFailed(msg) => write!(f, "solve task failed: {}", msg),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WorkerError::Geolocation(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GeolocationError> for WorkerError {
    fn from(e: GeolocationError) -> Self {
        WorkerError::Geolocation(e)
    }
}

/// Runs engine solves off the async executor under a wall-clock deadline
#[derive(Clone)]
pub struct SolveWorker {
    engine: Arc<GeolocationEngine>,
    deadline: Duration,
}

impl SolveWorker {
    pub fn new(engine: Arc<GeolocationEngine>, deadline: Duration) -> Self {
        SolveWorker { engine, deadline }
    }

    /// Hybrid solve of one batch
    pub async fn geolocate_hybrid(&self, measurements: Vec<Measurement>) -> Result<GeolocationResult, WorkerError> {
        self.run(move |engine| engine.geolocate_hybrid(&measurements)).await
    }

    pub async fn geolocate_tdoa(&self, measurements: Vec<Measurement>) -> Result<GeolocationResult, WorkerError> {
        self.run(move |engine| engine.geolocate_tdoa(&measurements)).await
    }

    pub async fn geolocate_rssi(&self, measurements: Vec<Measurement>) -> Result<GeolocationResult, WorkerError> {
        self.run(move |engine| engine.geolocate_rssi(&measurements)).await
    }

    /// Run an arbitrary solve against the engine on the blocking pool
    pub async fn run<F>(&self, solve: F) -> Result<GeolocationResult, WorkerError>
    where
        F: FnOnce(&GeolocationEngine) -> Result<GeolocationResult, GeolocationError> + Send + 'static,
    {
        let engine = Arc::clone(&self.engine);
        let handle = task::spawn_blocking(move || solve(&engine));

        match time::timeout(self.deadline, handle).await {
            Ok(Ok(result)) => result.map_err(WorkerError::from),
            Ok(Err(e)) => Err(WorkerError::TaskFailed(e.to_string())),
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "Solve deadline exceeded");
                Err(WorkerError::DeadlineExceeded(self.deadline))
            }
        }
    }
}
