//! Heart-rate sample types shared by the links, sessions and correlator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single decoded heart-rate reading.
///
/// Produced by a device link for every notification that decodes cleanly.
/// Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Beats per minute
    pub heart_rate: f64,
    /// Wall-clock time the notification was decoded
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    /// Create a sample stamped with the current time.
    pub fn now(heart_rate: f64) -> Self {
        Self::at(heart_rate, Utc::now())
    }

    pub fn at(heart_rate: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            heart_rate,
            timestamp,
        }
    }
}

/// Which of the two monitored subjects a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorIdentity {
    Human,
    Horse,
}

impl MonitorIdentity {
    /// Both identities, human first.
    pub const ALL: [MonitorIdentity; 2] = [MonitorIdentity::Human, MonitorIdentity::Horse];

    /// Lowercase label used in storage keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorIdentity::Human => "human",
            MonitorIdentity::Horse => "horse",
        }
    }
}

impl std::fmt::Display for MonitorIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorIdentity::Human => write!(f, "Human"),
            MonitorIdentity::Horse => write!(f, "Horse"),
        }
    }
}

impl std::str::FromStr for MonitorIdentity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "human" | "rider" => Ok(MonitorIdentity::Human),
            "horse" => Ok(MonitorIdentity::Horse),
            other => Err(format!("unknown monitor '{other}' (expected human or horse)")),
        }
    }
}

/// A captured sample as it is persisted at the end of a recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRatePoint {
    pub id: Uuid,
    pub heart_rate: f64,
    pub timestamp: DateTime<Utc>,
}

impl From<Sample> for HeartRatePoint {
    fn from(sample: Sample) -> Self {
        Self {
            id: Uuid::new_v4(),
            heart_rate: sample.heart_rate,
            timestamp: sample.timestamp,
        }
    }
}

/// The value shown for a monitor: the latest reading or an explicit
/// "no data" marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    NoData,
    Bpm(f64),
}

impl Reading {
    pub fn bpm(&self) -> Option<f64> {
        match self {
            Reading::NoData => None,
            Reading::Bpm(v) => Some(*v),
        }
    }
}

impl std::fmt::Display for Reading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reading::NoData => write!(f, "-- BPM"),
            Reading::Bpm(v) => write!(f, "{} BPM", *v as i64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_point_serializes_camel_case() {
        let sample = Sample::at(72.0, Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());
        let point = HeartRatePoint::from(sample);
        let json = serde_json::to_value(&point).unwrap();

        assert_eq!(json["heartRate"], 72.0);
        assert!(json.get("id").is_some());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_reading_display() {
        assert_eq!(Reading::NoData.to_string(), "-- BPM");
        assert_eq!(Reading::Bpm(71.0).to_string(), "71 BPM");
        assert_eq!(Reading::Bpm(64.0).bpm(), Some(64.0));
    }

    #[test]
    fn test_identity_parsing() {
        assert_eq!("Horse".parse::<MonitorIdentity>(), Ok(MonitorIdentity::Horse));
        assert_eq!("human".parse::<MonitorIdentity>(), Ok(MonitorIdentity::Human));
        assert!("dog".parse::<MonitorIdentity>().is_err());
        assert_eq!(MonitorIdentity::Horse.as_str(), "horse");
    }
}
