pub mod constants;
pub mod geodesy;
pub mod error;
pub mod receiver;
pub mod measurement;
pub mod solver;
pub mod tdoa;
pub mod rssi;
pub mod engine;
pub mod simulator;
pub mod output;
pub mod worker;
pub mod config;

pub use engine::{EngineConfig, GeolocationEngine, GeolocationMethod, GeolocationResult, RegistrySnapshot};
pub use error::GeolocationError;
pub use geodesy::GeoPoint;
pub use measurement::Measurement;
pub use receiver::Receiver;
