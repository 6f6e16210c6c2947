// Error taxonomy for geolocation solves

use std::fmt;

/// Reasons a geolocation request cannot produce an estimate
#[derive(Debug, Clone, PartialEq)]
pub enum GeolocationError {
    /// Fewer usable measurements than the method requires
    InsufficientReceivers { required: usize, available: usize },
    /// Receiver layout ill-conditions the solve (collinear or co-located receivers)
    DegenerateGeometry { condition_number: f64 },
    /// Iteration budget exhausted while the residual was still improving
    NoConvergence { iterations: usize, residual_norm: f64 },
    /// A measurement is malformed or lacks a field the method needs
    InvalidMeasurement { receiver_id: String, reason: String },
    /// A measurement references a receiver id the engine does not know
    UnknownReceiver(String),
    /// A receiver record failed validation on registration
    InvalidReceiver { id: String, reason: String },
}

impl GeolocationError {
    pub(crate) fn invalid_measurement(receiver_id: &str, reason: impl Into<String>) -> Self {
        GeolocationError::InvalidMeasurement {
            receiver_id: receiver_id.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures caused by the data or geometry rather than by the caller.
    /// The hybrid policy only falls back on these.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GeolocationError::InsufficientReceivers { .. }
                | GeolocationError::DegenerateGeometry { .. }
                | GeolocationError::NoConvergence { .. }
        )
    }
}

impl fmt::Display for GeolocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeolocationError::InsufficientReceivers { required, available } => write!(
                f,
                "insufficient receivers: need {}, have {}",
                required, available
            ),
            GeolocationError::DegenerateGeometry { condition_number } => write!(
                f,
                "degenerate receiver geometry (condition number {:.3e})",
                condition_number
            ),
            GeolocationError::NoConvergence { iterations, residual_norm } => write!(
                f,
                "solver did not converge after {} iterations (residual {:.3} m)",
                iterations, residual_norm
            ),
            GeolocationError::InvalidMeasurement { receiver_id, reason } => {
                write!(f, "invalid measurement from {}: {}", receiver_id, reason)
            }
            GeolocationError::UnknownReceiver(id) => write!(f, "unknown receiver {}", id),
            GeolocationError::InvalidReceiver { id, reason } => {
                write!(f, "invalid receiver {}: {}", id, reason)
            }
        }
    }
}

impl std::error::Error for GeolocationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(GeolocationError::InsufficientReceivers { required: 3, available: 1 }.is_recoverable());
        assert!(GeolocationError::DegenerateGeometry { condition_number: f64::INFINITY }.is_recoverable());
        assert!(GeolocationError::NoConvergence { iterations: 200, residual_norm: 1.0 }.is_recoverable());
        assert!(!GeolocationError::invalid_measurement("R1", "power is NaN").is_recoverable());
        assert!(!GeolocationError::UnknownReceiver("R9".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = GeolocationError::InsufficientReceivers { required: 3, available: 0 };
        assert_eq!(e.to_string(), "insufficient receivers: need 3, have 0");

        let e = GeolocationError::UnknownReceiver("kiwi-7".into());
        assert_eq!(e.to_string(), "unknown receiver kiwi-7");
    }
}
