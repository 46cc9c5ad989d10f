//! Summary statistics for a captured heart-rate sequence.

use crate::core::sample::HeartRatePoint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// Descriptive statistics over one recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub count: usize,
    pub mean_bpm: f64,
    pub min_bpm: f64,
    pub max_bpm: f64,
    /// Sample standard deviation; `None` with fewer than two samples
    pub std_dev_bpm: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionSummary {
    /// Summarize a sequence of points. Returns `None` for an empty sequence.
    pub fn from_points(points: &[HeartRatePoint]) -> Option<Self> {
        let first = points.first()?;
        let last = points.last()?;
        let values: Vec<f64> = points.iter().map(|p| p.heart_rate).collect();

        let std_dev_bpm = if values.len() >= 2 {
            Some(values.iter().std_dev())
        } else {
            None
        };

        Some(Self {
            count: values.len(),
            mean_bpm: values.iter().mean(),
            min_bpm: Statistics::min(values.iter()),
            max_bpm: Statistics::max(values.iter()),
            std_dev_bpm,
            started_at: first.timestamp,
            ended_at: last.timestamp,
        })
    }

    /// Length of the recording in seconds.
    pub fn duration_secs(&self) -> i64 {
        (self.ended_at - self.started_at).num_seconds()
    }
}

impl std::fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} samples over {}s | mean {:.1} BPM, min {:.0}, max {:.0}",
            self.count,
            self.duration_secs(),
            self.mean_bpm,
            self.min_bpm,
            self.max_bpm
        )?;
        if let Some(sd) = self.std_dev_bpm {
            write!(f, ", sd {sd:.1}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::Sample;
    use chrono::{Duration, TimeZone};

    fn points(values: &[f64]) -> Vec<HeartRatePoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| HeartRatePoint::from(Sample::at(*v, t0 + Duration::seconds(i as i64))))
            .collect()
    }

    #[test]
    fn test_empty_sequence_has_no_summary() {
        assert!(SessionSummary::from_points(&[]).is_none());
    }

    #[test]
    fn test_summary_statistics() {
        let summary = SessionSummary::from_points(&points(&[60.0, 70.0, 80.0])).unwrap();

        assert_eq!(summary.count, 3);
        assert!((summary.mean_bpm - 70.0).abs() < 1e-9);
        assert_eq!(summary.min_bpm, 60.0);
        assert_eq!(summary.max_bpm, 80.0);
        assert!((summary.std_dev_bpm.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(summary.duration_secs(), 2);
    }

    #[test]
    fn test_single_sample_has_no_std_dev() {
        let summary = SessionSummary::from_points(&points(&[55.0])).unwrap();
        assert_eq!(summary.std_dev_bpm, None);
        assert!(summary.to_string().contains("1 samples"));
    }
}
