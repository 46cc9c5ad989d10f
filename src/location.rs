//! Location interface consumed by the air-quality lookup.

use serde::{Deserialize, Serialize};

/// A WGS84 position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Returns `None` when either value is out of range.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let valid = (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude);
        valid.then_some(Self {
            latitude,
            longitude,
        })
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

impl std::str::FromStr for Coordinates {
    type Err = String;

    /// Parse `"lat,lon"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s
            .split_once(',')
            .ok_or_else(|| format!("expected 'lat,lon', got '{s}'"))?;
        let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude: {e}"))?;
        let lon: f64 = lon.trim().parse().map_err(|e| format!("bad longitude: {e}"))?;
        Coordinates::new(lat, lon).ok_or_else(|| format!("coordinates out of range: {s}"))
    }
}

/// Whether the user allowed location access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AuthorizationStatus {
    #[default]
    NotDetermined,
    Restricted,
    Denied,
    AuthorizedWhenInUse,
    AuthorizedAlways,
}

impl AuthorizationStatus {
    pub fn is_authorized(&self) -> bool {
        matches!(
            self,
            AuthorizationStatus::AuthorizedWhenInUse | AuthorizationStatus::AuthorizedAlways
        )
    }
}

/// Source of the current position.
pub trait LocationProvider: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Current position, or `None` when unknown or not authorized.
    fn current_location(&self) -> Option<Coordinates>;
}

/// A position given up front, e.g. on the command line.
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinates);

impl LocationProvider for FixedLocation {
    fn authorization_status(&self) -> AuthorizationStatus {
        AuthorizationStatus::AuthorizedAlways
    }

    fn current_location(&self) -> Option<Coordinates> {
        Some(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinates_validation() {
        assert!(Coordinates::new(51.5, -0.12).is_some());
        assert!(Coordinates::new(91.0, 0.0).is_none());
        assert!(Coordinates::new(0.0, 181.0).is_none());
    }

    #[test]
    fn test_coordinates_parse() {
        let c: Coordinates = "52.37, 4.89".parse().unwrap();
        assert_eq!(c, Coordinates::new(52.37, 4.89).unwrap());
        assert!("52.37".parse::<Coordinates>().is_err());
        assert!("abc,4".parse::<Coordinates>().is_err());
    }

    #[test]
    fn test_authorization() {
        assert!(AuthorizationStatus::AuthorizedWhenInUse.is_authorized());
        assert!(!AuthorizationStatus::Denied.is_authorized());
        assert!(!AuthorizationStatus::default().is_authorized());
    }
}
