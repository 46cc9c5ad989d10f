//! Cumulative session statistics.
//!
//! Counts what the monitor did (samples received, payloads rejected,
//! reconnects, persisted sessions, exports) across runs. Counters are
//! lock-free so the link tasks and the sample callbacks can bump them
//! from any thread.

use crate::core::sample::MonitorIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for the current process, optionally backed by a JSON file.
#[derive(Debug)]
pub struct SessionStats {
    /// Samples received from the rider's sensor
    human_samples: AtomicU64,
    /// Samples received from the horse's sensor
    horse_samples: AtomicU64,
    /// Notification payloads that failed to decode
    decode_failures: AtomicU64,
    /// Reconnect attempts, automatic or requested
    reconnect_attempts: AtomicU64,
    /// Recordings written to the key-value store
    sessions_persisted: AtomicU64,
    /// CSV files written
    exports_written: AtomicU64,
    started_at: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl SessionStats {
    pub fn new() -> Self {
        Self {
            human_samples: AtomicU64::new(0),
            horse_samples: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
            sessions_persisted: AtomicU64::new(0),
            exports_written: AtomicU64::new(0),
            started_at: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a stats tracker that loads and saves `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut stats = Self::new();
        stats.persist_path = Some(path);

        if let Err(e) = stats.load() {
            tracing::warn!(error = %e, "could not load previous session stats");
        }

        stats
    }

    pub fn record_sample(&self, monitor: MonitorIdentity) {
        self.counter(monitor).fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_persisted(&self) {
        self.sessions_persisted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export(&self) {
        self.exports_written.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            human_samples: self.human_samples.load(Ordering::Relaxed),
            horse_samples: self.horse_samples.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            sessions_persisted: self.sessions_persisted.load(Ordering::Relaxed),
            exports_written: self.exports_written.load(Ordering::Relaxed),
            started_at: self.started_at,
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
        }
    }

    /// Human-readable summary.
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        format!(
            "Session Statistics:\n\
             - Rider samples received: {}\n\
             - Horse samples received: {}\n\
             - Payloads rejected: {}\n\
             - Reconnect attempts: {}\n\
             - Sessions saved: {}\n\
             - CSV exports: {}\n\
             - Uptime: {} seconds",
            s.human_samples,
            s.horse_samples,
            s.decode_failures,
            s.reconnect_attempts,
            s.sessions_persisted,
            s.exports_written,
            s.uptime_secs
        )
    }

    pub fn save(&self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let s = self.snapshot();
        let persisted = PersistedStats {
            human_samples: s.human_samples,
            horse_samples: s.horse_samples,
            decode_failures: s.decode_failures,
            reconnect_attempts: s.reconnect_attempts,
            sessions_persisted: s.sessions_persisted,
            exports_written: s.exports_written,
            last_updated: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        let content = std::fs::read_to_string(path)?;
        let persisted: PersistedStats =
            serde_json::from_str(&content).map_err(std::io::Error::other)?;

        self.human_samples
            .store(persisted.human_samples, Ordering::Relaxed);
        self.horse_samples
            .store(persisted.horse_samples, Ordering::Relaxed);
        self.decode_failures
            .store(persisted.decode_failures, Ordering::Relaxed);
        self.reconnect_attempts
            .store(persisted.reconnect_attempts, Ordering::Relaxed);
        self.sessions_persisted
            .store(persisted.sessions_persisted, Ordering::Relaxed);
        self.exports_written
            .store(persisted.exports_written, Ordering::Relaxed);
        Ok(())
    }

    fn counter(&self, monitor: MonitorIdentity) -> &AtomicU64 {
        match monitor {
            MonitorIdentity::Human => &self.human_samples,
            MonitorIdentity::Horse => &self.horse_samples,
        }
    }
}

impl Default for SessionStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of the counters at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub human_samples: u64,
    pub horse_samples: u64,
    pub decode_failures: u64,
    pub reconnect_attempts: u64,
    pub sessions_persisted: u64,
    pub exports_written: u64,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    human_samples: u64,
    horse_samples: u64,
    decode_failures: u64,
    reconnect_attempts: u64,
    sessions_persisted: u64,
    exports_written: u64,
    last_updated: DateTime<Utc>,
}

pub type SharedSessionStats = Arc<SessionStats>;

pub fn create_shared_stats() -> SharedSessionStats {
    Arc::new(SessionStats::new())
}

pub fn create_shared_stats_with_persistence(path: PathBuf) -> SharedSessionStats {
    Arc::new(SessionStats::with_persistence(path))
}
