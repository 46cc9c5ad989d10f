//! The rider and horse sessions with their shared correlator.

use crate::ble::link::{DeviceLink, LinkConfig};
use crate::ble::radio::SharedRadio;
use crate::ble::scanner::DeviceScanner;
use crate::core::correlator::{CorrelatedSnapshot, DualCorrelator};
use crate::core::sample::MonitorIdentity;
use crate::monitor::export::ExportError;
use crate::monitor::session::{ExportSettings, MonitorSession};
use crate::stats::SharedSessionStats;
use crate::store::SharedStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Everything needed to wire up a dual session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub window_secs: u64,
    pub name_filter: String,
    pub link: LinkConfig,
    pub export: ExportSettings,
}

pub struct DualSession {
    scanner: Arc<DeviceScanner>,
    correlator: Arc<DualCorrelator>,
    human: MonitorSession,
    horse: MonitorSession,
}

impl DualSession {
    /// Build the scanner, both links and both sessions on one radio.
    ///
    /// Must be called inside a tokio runtime.
    pub fn spawn(
        radio: SharedRadio,
        options: &SessionOptions,
        store: SharedStore,
        stats: SharedSessionStats,
    ) -> Self {
        let scanner = DeviceScanner::spawn(Arc::clone(&radio), options.name_filter.clone());
        let correlator = DualCorrelator::shared(options.window_secs);

        let session = |identity| {
            let link = DeviceLink::spawn(
                Arc::clone(&radio),
                Arc::clone(&scanner),
                options.link.clone(),
                Arc::clone(&stats),
            );
            MonitorSession::new(
                identity,
                link,
                Arc::clone(&correlator),
                Arc::clone(&store),
                Arc::clone(&stats),
                options.export.clone(),
            )
        };
        let human = session(MonitorIdentity::Human);
        let horse = session(MonitorIdentity::Horse);

        Self {
            scanner,
            correlator,
            human,
            horse,
        }
    }

    pub fn session(&self, identity: MonitorIdentity) -> &MonitorSession {
        match identity {
            MonitorIdentity::Human => &self.human,
            MonitorIdentity::Horse => &self.horse,
        }
    }

    pub fn human(&self) -> &MonitorSession {
        &self.human
    }

    pub fn horse(&self) -> &MonitorSession {
        &self.horse
    }

    pub fn scanner(&self) -> &Arc<DeviceScanner> {
        &self.scanner
    }

    pub fn correlator(&self) -> &Arc<DualCorrelator> {
        &self.correlator
    }

    /// Clear the live windows and start recording on both monitors.
    pub fn start_measuring(&self) {
        self.correlator.start_measuring();
        self.human.start_measurement();
        self.horse.start_measurement();
        info!("dual recording started");
    }

    /// Stop and save both recordings. The live windows are kept.
    pub fn stop_measuring(&self) {
        self.human.stop_measurement();
        self.horse.stop_measurement();
        self.correlator.stop_measuring();
        info!("dual recording stopped");
    }

    pub fn is_measuring(&self) -> bool {
        self.correlator.is_measuring()
    }

    /// Export both recordings, one file per monitor.
    pub fn export_all(&self) -> Vec<(MonitorIdentity, Result<PathBuf, ExportError>)> {
        MonitorIdentity::ALL
            .iter()
            .map(|&identity| (identity, self.session(identity).export_csv()))
            .collect()
    }

    pub fn snapshot(&self) -> CorrelatedSnapshot {
        self.correlator.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{SimulatedRadio, DEMO_HORSE_ID, DEMO_HUMAN_ID};
    use crate::ble::types::{ConnectionState, DeviceIdentity, PeripheralId};
    use crate::core::sample::Reading;
    use crate::monitor::export::ExportTimezone;
    use crate::stats::create_shared_stats;
    use crate::store::MemoryStore;

    fn options(dir: &std::path::Path) -> SessionOptions {
        SessionOptions {
            window_secs: 30,
            name_filter: "Polar".into(),
            link: LinkConfig::default(),
            export: ExportSettings {
                dir: dir.to_path_buf(),
                timezone: ExportTimezone::Named(chrono_tz::UTC),
            },
        }
    }

    async fn wait_connected(dual: &DualSession) -> bool {
        for _ in 0..300 {
            if dual.human().status().is_connected() && dual.horse().status().is_connected() {
                return true;
            }
            tokio::task::yield_now().await;
        }
        false
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_samples_route_by_identity() {
        let dir = tempfile::tempdir().unwrap();
        let radio = Arc::new(SimulatedRadio::demo());
        let dual = DualSession::spawn(
            radio.clone(),
            &options(dir.path()),
            Arc::new(MemoryStore::new()),
            create_shared_stats(),
        );

        dual.human()
            .connect(DeviceIdentity::new(DEMO_HUMAN_ID, Some("Polar H10 A1B2C3D4")));
        dual.horse()
            .connect(DeviceIdentity::new(DEMO_HORSE_ID, Some("Polar H10 E5F6A7B8")));
        assert!(wait_connected(&dual).await);

        dual.start_measuring();
        settle().await;
        assert_eq!(dual.human().connection_state(), ConnectionState::Measuring);

        radio.notify_bpm(&PeripheralId::new(DEMO_HUMAN_ID), 88);
        radio.notify_bpm(&PeripheralId::new(DEMO_HORSE_ID), 44);
        settle().await;

        let snapshot = dual.snapshot();
        assert_eq!(snapshot.current(MonitorIdentity::Human), Reading::Bpm(88.0));
        assert_eq!(snapshot.current(MonitorIdentity::Horse), Reading::Bpm(44.0));

        dual.stop_measuring();
        assert!(!dual.is_measuring());
        assert_eq!(dual.snapshot().human.len(), 1);

        let exports = dual.export_all();
        assert_eq!(exports.len(), 2);
        assert!(exports.iter().all(|(_, r)| r.is_ok()));
    }
}
