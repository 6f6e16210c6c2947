// Receiver records - physical or virtual stations with known coordinates

use serde::{Deserialize, Serialize};

use crate::error::GeolocationError;
use crate::geodesy::GeoPoint;

/// A receiving station registered with the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receiver {
    pub id: String,
    pub latitude: f64,  // degrees
    pub longitude: f64, // degrees
    #[serde(default)]
    pub altitude: f64, // meters
    #[serde(default = "default_active")]
    pub active: bool,
    /// Last heartbeat, epoch seconds
    #[serde(default)]
    pub last_seen: f64,
}

fn default_active() -> bool {
    true
}

impl Receiver {
    /// Create an active receiver that has not yet sent a heartbeat
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Receiver {
            id: id.into(),
            latitude,
            longitude,
            altitude,
            active: true,
            last_seen: 0.0,
        }
    }

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    /// Check the record invariants: non-empty id, coordinates in range, finite values
    pub fn validate(&self) -> Result<(), GeolocationError> {
        let fail = |reason: &str| {
            Err(GeolocationError::InvalidReceiver {
                id: self.id.clone(),
                reason: reason.to_string(),
            })
        };

        if self.id.is_empty() {
            return fail("empty id");
        }
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return fail("latitude outside [-90, 90]");
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return fail("longitude outside [-180, 180]");
        }
        if !self.altitude.is_finite() {
            return fail("altitude is not finite");
        }
        if !self.last_seen.is_finite() {
            return fail("last_seen is not finite");
        }
        Ok(())
    }

    /// Record a heartbeat: the receiver is alive as of `now`
    pub fn heartbeat(&mut self, now: f64) {
        self.last_seen = now;
        self.active = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_receiver_defaults() {
        let r = Receiver::new("R0", 37.7749, -122.4194, 12.0);
        assert!(r.active);
        assert_eq!(r.last_seen, 0.0);
        assert!(r.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let bad_lat = Receiver::new("R1", 91.0, 0.0, 0.0);
        assert!(matches!(bad_lat.validate(), Err(GeolocationError::InvalidReceiver { .. })));

        let bad_lon = Receiver::new("R2", 0.0, -180.5, 0.0);
        assert!(bad_lon.validate().is_err());

        let nan_alt = Receiver::new("R3", 0.0, 0.0, f64::NAN);
        assert!(nan_alt.validate().is_err());

        let no_id = Receiver::new("", 0.0, 0.0, 0.0);
        assert!(no_id.validate().is_err());
    }

    #[test]
    fn test_heartbeat_reactivates() {
        let mut r = Receiver::new("R0", 0.0, 0.0, 0.0);
        r.active = false;
        r.heartbeat(1_700_000_000.5);
        assert!(r.active);
        assert_eq!(r.last_seen, 1_700_000_000.5);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"id": "kiwi-1", "latitude": 52.1, "longitude": 5.2}"#;
        let r: Receiver = serde_json::from_str(json).unwrap();
        assert_eq!(r.id, "kiwi-1");
        assert_eq!(r.altitude, 0.0);
        assert!(r.active);
    }
}
