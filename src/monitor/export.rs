//! CSV export of a captured recording.
//!
//! ```text
//! Timestamp,Heart Rate (BPM)
//! 2024-01-01 10:00:00,60.0
//! 2024-01-01 10:00:01,61.0
//! ```
//!
//! Rows are joined with `\n` and the text has no trailing newline.

use crate::core::sample::HeartRatePoint;
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const CSV_HEADER: &str = "Timestamp,Heart Rate (BPM)";

const ROW_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILE_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Timezone used to render timestamps in exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportTimezone {
    /// The machine's local timezone
    #[default]
    Local,
    Named(Tz),
}

impl ExportTimezone {
    pub fn format(&self, timestamp: DateTime<Utc>, pattern: &str) -> String {
        match self {
            ExportTimezone::Local => timestamp.with_timezone(&Local).format(pattern).to_string(),
            ExportTimezone::Named(tz) => timestamp.with_timezone(tz).format(pattern).to_string(),
        }
    }
}

#[derive(Debug)]
pub enum ExportError {
    IoError(String),
    /// Every candidate filename was taken
    NameExhausted(PathBuf),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::IoError(e) => write!(f, "IO error: {e}"),
            ExportError::NameExhausted(p) => {
                write!(f, "No free export filename near {}", p.display())
            }
        }
    }
}

impl std::error::Error for ExportError {}

/// Render points as CSV text.
pub fn csv_string(points: &[HeartRatePoint], tz: ExportTimezone) -> String {
    std::iter::once(CSV_HEADER.to_string())
        .chain(points.iter().map(|p| {
            format!(
                "{},{}",
                tz.format(p.timestamp, ROW_TIME_FORMAT),
                format_bpm(p.heart_rate)
            )
        }))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Shortest decimal form that keeps at least one fractional digit.
fn format_bpm(value: f64) -> String {
    format!("{value:?}")
}

/// Write points to a new file in `dir` and return its path.
///
/// The name is `heart_rate_<yyyy-MM-dd_HH-mm-ss>.csv` for `now`; a `_N`
/// suffix is added when that name is already taken.
pub fn write_csv(
    points: &[HeartRatePoint],
    dir: &Path,
    tz: ExportTimezone,
    now: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    std::fs::create_dir_all(dir).map_err(|e| ExportError::IoError(e.to_string()))?;

    let stem = format!("heart_rate_{}", tz.format(now, FILE_TIME_FORMAT));
    let content = csv_string(points, tz);

    for n in 0..1000u32 {
        let name = if n == 0 {
            format!("{stem}.csv")
        } else {
            format!("{stem}_{n}.csv")
        };
        let path = dir.join(name);

        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(ExportError::IoError(e.to_string())),
        };
        file.write_all(content.as_bytes())
            .map_err(|e| ExportError::IoError(e.to_string()))?;
        return Ok(path);
    }

    Err(ExportError::NameExhausted(dir.join(format!("{stem}.csv"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sample::Sample;
    use chrono::TimeZone;

    fn utc() -> ExportTimezone {
        ExportTimezone::Named(chrono_tz::UTC)
    }

    fn points(values: &[f64]) -> Vec<HeartRatePoint> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                HeartRatePoint::from(Sample::at(*v, t0 + chrono::Duration::seconds(i as i64)))
            })
            .collect()
    }

    #[test]
    fn test_csv_format() {
        assert_eq!(
            csv_string(&points(&[60.0, 61.0]), utc()),
            "Timestamp,Heart Rate (BPM)\n2024-01-01 10:00:00,60.0\n2024-01-01 10:00:01,61.0"
        );
    }

    #[test]
    fn test_fractional_values_keep_their_digits() {
        assert_eq!(format_bpm(72.5), "72.5");
        assert_eq!(format_bpm(100.0), "100.0");
    }

    #[test]
    fn test_empty_recording_is_header_only() {
        assert_eq!(csv_string(&[], utc()), CSV_HEADER);
    }

    #[test]
    fn test_named_timezone_shifts_rows() {
        let tz = ExportTimezone::Named(chrono_tz::Europe::Berlin);
        let csv = csv_string(&points(&[60.0]), tz);
        assert!(csv.ends_with("2024-01-01 11:00:00,60.0"));
    }

    #[test]
    fn test_write_csv_picks_unique_names() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 7, 6).unwrap();
        let data = points(&[60.0]);

        let first = write_csv(&data, dir.path(), utc(), now).unwrap();
        let second = write_csv(&data, dir.path(), utc(), now).unwrap();

        assert_eq!(
            first.file_name().unwrap(),
            "heart_rate_2024-03-09_08-07-06.csv"
        );
        assert_eq!(
            second.file_name().unwrap(),
            "heart_rate_2024-03-09_08-07-06_1.csv"
        );
        assert_eq!(
            std::fs::read_to_string(first).unwrap(),
            "Timestamp,Heart Rate (BPM)\n2024-01-01 10:00:00,60.0"
        );
    }
}
