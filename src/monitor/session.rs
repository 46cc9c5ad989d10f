//! One monitored subject: a device link plus its recording.
//!
//! A [`MonitorSession`] tags every sample from its link with a fixed
//! [`MonitorIdentity`], keeps the samples captured between
//! `start_measurement` and `stop_measurement`, and forwards every sample to
//! the shared [`DualCorrelator`]. When a recording stops it is saved under
//! `lastMeasurement.<monitor>` in the key-value store.

use crate::ble::link::{DeviceLink, LinkStatus};
use crate::ble::types::{ConnectionState, DeviceIdentity};
use crate::core::correlator::DualCorrelator;
use crate::core::sample::{HeartRatePoint, MonitorIdentity, Reading, Sample};
use crate::core::state::StateStore;
use crate::core::summary::SessionSummary;
use crate::monitor::export::{write_csv, ExportError, ExportTimezone};
use crate::stats::SharedSessionStats;
use crate::store::{KeyValueStore, SharedStore, StoreError};
use chrono::Utc;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Where and how recordings are exported.
#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub dir: PathBuf,
    pub timezone: ExportTimezone,
}

/// Consumer-facing state of one monitor.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorStatus {
    pub identity: MonitorIdentity,
    pub connection: ConnectionState,
    pub device: Option<DeviceIdentity>,
    pub is_measuring: bool,
    /// Samples captured in the current recording
    pub captured: usize,
    pub latest: Option<Sample>,
}

impl MonitorStatus {
    fn new(identity: MonitorIdentity) -> Self {
        Self {
            identity,
            connection: ConnectionState::Disconnected,
            device: None,
            is_measuring: false,
            captured: 0,
            latest: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Latest reading, or no data.
    pub fn reading(&self) -> Reading {
        self.latest
            .map(|s| Reading::Bpm(s.heart_rate))
            .unwrap_or(Reading::NoData)
    }
}

#[derive(Default)]
struct Capture {
    is_measuring: bool,
    points: Vec<HeartRatePoint>,
}

/// Storage key of the last recording for `identity`.
pub fn last_session_key(identity: MonitorIdentity) -> String {
    format!("lastMeasurement.{}", identity.as_str())
}

/// Read back the last saved recording for `identity`.
pub fn load_last_session(
    store: &dyn KeyValueStore,
    identity: MonitorIdentity,
) -> Result<Option<Vec<HeartRatePoint>>, StoreError> {
    let Some(bytes) = store.get(&last_session_key(identity))? else {
        return Ok(None);
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::ParseError(e.to_string()))
}

pub struct MonitorSession {
    identity: MonitorIdentity,
    link: DeviceLink,
    capture: Arc<Mutex<Capture>>,
    status: StateStore<MonitorStatus>,
    store: SharedStore,
    stats: SharedSessionStats,
    export: ExportSettings,
}

impl MonitorSession {
    /// Wrap `link` and start routing its samples.
    pub fn new(
        identity: MonitorIdentity,
        link: DeviceLink,
        correlator: Arc<DualCorrelator>,
        store: SharedStore,
        stats: SharedSessionStats,
        export: ExportSettings,
    ) -> Self {
        let capture = Arc::new(Mutex::new(Capture::default()));
        let status = StateStore::new(MonitorStatus::new(identity));

        {
            let status = status.clone();
            link.status_store().watch(move |link: &LinkStatus| {
                let link = link.clone();
                status.update(|s| {
                    s.connection = link.state;
                    s.device = link.device.or(link.last_connected);
                });
            });
        }

        {
            let capture = Arc::clone(&capture);
            let status = status.clone();
            let stats = Arc::clone(&stats);
            link.on_sample(move |sample| {
                debug!(monitor = %identity, bpm = sample.heart_rate, "sample");
                stats.record_sample(identity);

                let captured = {
                    let mut capture = capture.lock().unwrap_or_else(PoisonError::into_inner);
                    if capture.is_measuring {
                        capture.points.push(HeartRatePoint::from(sample));
                    }
                    capture.points.len()
                };

                // The correlator applies its own measuring gate.
                correlator.add_measurement(sample.heart_rate, identity);

                status.update(|s| {
                    s.latest = Some(sample);
                    s.captured = captured;
                });
            });
        }

        Self {
            identity,
            link,
            capture,
            status,
            store,
            stats,
            export,
        }
    }

    pub fn identity(&self) -> MonitorIdentity {
        self.identity
    }

    pub fn start_scanning(&self) -> bool {
        self.link.start_scanning()
    }

    pub fn stop_scanning(&self) {
        self.link.stop_scanning();
    }

    pub fn is_scanning(&self) -> bool {
        self.link.scanner().is_scanning()
    }

    /// Sensors found by the shared scanner.
    pub fn discovered(&self) -> Vec<DeviceIdentity> {
        self.link.scanner().discovered()
    }

    pub fn connect(&self, device: DeviceIdentity) {
        info!(monitor = %self.identity, device = %device, "connect requested");
        self.link.connect(device);
    }

    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    pub fn reconnect(&self) {
        self.link.reconnect();
    }

    /// Begin a new recording, discarding the previous one.
    pub fn start_measurement(&self) {
        {
            let mut capture = self.lock_capture();
            capture.points.clear();
            capture.is_measuring = true;
        }
        self.status.update(|s| {
            s.is_measuring = true;
            s.captured = 0;
        });
        self.link.start_measurement();
        info!(monitor = %self.identity, "recording started");
    }

    /// Finish the recording and save it.
    ///
    /// Saving is best effort: a failure is logged and the recording stays
    /// available in memory for export.
    pub fn stop_measurement(&self) {
        let points = {
            let mut capture = self.lock_capture();
            capture.is_measuring = false;
            capture.points.clone()
        };
        self.status.update(|s| s.is_measuring = false);
        self.link.stop_measurement();

        match self.persist(&points) {
            Ok(()) => {
                self.stats.record_session_persisted();
                info!(monitor = %self.identity, samples = points.len(), "recording saved");
            }
            Err(e) => {
                warn!(monitor = %self.identity, error = %e, "could not save recording");
            }
        }
    }

    pub fn is_measuring(&self) -> bool {
        self.lock_capture().is_measuring
    }

    /// Samples captured in the current or most recent recording.
    pub fn captured(&self) -> Vec<HeartRatePoint> {
        self.lock_capture().points.clone()
    }

    pub fn summary(&self) -> Option<SessionSummary> {
        SessionSummary::from_points(&self.lock_capture().points)
    }

    /// Write the captured samples to a new CSV file.
    pub fn export_csv(&self) -> Result<PathBuf, ExportError> {
        let points = self.captured();
        let path = write_csv(&points, &self.export.dir, self.export.timezone, Utc::now())?;
        self.stats.record_export();
        info!(monitor = %self.identity, path = %path.display(), "recording exported");
        Ok(path)
    }

    pub fn load_last_session(&self) -> Result<Option<Vec<HeartRatePoint>>, StoreError> {
        load_last_session(self.store.as_ref(), self.identity)
    }

    pub fn status(&self) -> MonitorStatus {
        self.status.get()
    }

    pub fn subscribe(&self) -> Receiver<MonitorStatus> {
        self.status.subscribe()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    fn persist(&self, points: &[HeartRatePoint]) -> Result<(), StoreError> {
        let json = serde_json::to_vec(points).map_err(|e| StoreError::ParseError(e.to_string()))?;
        self.store.set(&last_session_key(self.identity), &json)
    }

    fn lock_capture(&self) -> std::sync::MutexGuard<'_, Capture> {
        self.capture.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
