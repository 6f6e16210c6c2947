// Shared constants for the geolocation engine

/// Speed of light in vacuum (m/s). Propagation is treated as free space.
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Mean Earth radius for the spherical model (m)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

// --- Solver defaults ---

/// Relative residual-norm improvement below which the solve has converged
pub const SOLVER_TOLERANCE: f64 = 1e-6;

/// Iteration budget for one least-squares solve
pub const SOLVER_MAX_ITERATIONS: usize = 200;

/// Jacobian condition number above which the geometry is considered degenerate
pub const MAX_CONDITION_NUMBER: f64 = 1e8;

/// Minimum/maximum eigenvalue ratio of the receiver scatter matrix below which
/// the receivers are treated as collinear
pub const MIN_SPREAD_RATIO: f64 = 1e-6;

// --- Path-loss model defaults ---

/// Received power at 1 m from a nominal (power = 1.0) transmitter (dBm)
pub const PATH_LOSS_REFERENCE_DBM: f64 = 30.0;

/// Log-distance path-loss exponent
pub const PATH_LOSS_EXPONENT: f64 = 2.5;

/// Received power corresponding to a normalized power of 1.0 (dBm)
pub const FULL_SCALE_DBM: f64 = -20.0;

// --- Uncertainty radii (m) ---

/// Floor for TDoA uncertainty
pub const TDOA_MIN_UNCERTAINTY_M: f64 = 25.0;

/// Ceiling for TDoA uncertainty; always below the RSSI floor
pub const TDOA_MAX_UNCERTAINTY_M: f64 = 500.0;

/// Nominal arrival-time error of a receiver (s), scaled by the geometry's
/// dilution of precision into a TDoA accuracy term
pub const TDOA_TIMING_SIGMA_S: f64 = 10e-9;

/// Floor for RSSI uncertainty
pub const RSSI_MIN_UNCERTAINTY_M: f64 = 750.0;

/// Floor for the power-weighted centroid fallback
pub const CENTROID_MIN_UNCERTAINTY_M: f64 = 2000.0;

/// Default number of points on a single-receiver ring
pub const RING_POINTS: usize = 36;
