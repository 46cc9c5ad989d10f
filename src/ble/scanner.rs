//! Heart-rate sensor discovery.
//!
//! One scanner sits on the shared radio underneath both device links. It
//! accepts advertisements that carry the heart-rate service and whose name
//! matches the configured vendor substring, and keeps them in first-seen
//! order without duplicates.

use crate::ble::heart_rate::HEART_RATE_SERVICE;
use crate::ble::radio::SharedRadio;
use crate::ble::types::{DeviceIdentity, RadioEvent};
use crate::core::state::StateStore;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Default advertised-name filter.
pub const DEFAULT_NAME_FILTER: &str = "Polar";

pub struct DeviceScanner {
    radio: SharedRadio,
    scanning: StateStore<bool>,
    discovered: StateStore<Vec<DeviceIdentity>>,
    task: JoinHandle<()>,
}

impl DeviceScanner {
    /// Start listening to `radio`. Must be called inside a tokio runtime.
    ///
    /// An empty `name_filter` accepts every heart-rate advertisement.
    pub fn spawn(radio: SharedRadio, name_filter: impl Into<String>) -> Arc<Self> {
        let scanning = StateStore::new(false);
        let discovered = StateStore::new(Vec::<DeviceIdentity>::new());
        let filter = AdvertisementFilter {
            name_contains: name_filter.into(),
        };

        let mut events = radio.subscribe();
        let task = {
            let scanning = scanning.clone();
            let discovered = discovered.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        RadioEvent::Discovered {
                            device, services, ..
                        } => {
                            if !scanning.get() || !filter.accepts(&device, &services) {
                                continue;
                            }
                            let added = discovered.update(|devices| {
                                if devices.iter().any(|d| d.id == device.id) {
                                    false
                                } else {
                                    devices.push(device.clone());
                                    true
                                }
                            });
                            if added {
                                info!(device = %device, "heart-rate sensor discovered");
                            }
                        }
                        RadioEvent::StateChanged(state) if !state.is_powered_on() => {
                            if scanning.set_if_changed(false) {
                                debug!(?state, "radio left powered-on state, scan stopped");
                            }
                        }
                        _ => {}
                    }
                }
            })
        };

        Arc::new(Self {
            radio,
            scanning,
            discovered,
            task,
        })
    }

    /// Clear previous results and scan for heart-rate sensors.
    ///
    /// Ignored unless the radio is powered on. Returns whether scanning
    /// started.
    pub fn start_scan(&self) -> bool {
        let state = self.radio.state();
        if !state.is_powered_on() {
            debug!(?state, "scan request ignored");
            return false;
        }

        self.discovered.set(Vec::new());
        self.scanning.set_if_changed(true);
        self.radio.start_scan(&[HEART_RATE_SERVICE]);
        info!("scanning for heart-rate sensors");
        true
    }

    pub fn stop_scan(&self) {
        self.radio.stop_scan();
        if self.scanning.set_if_changed(false) {
            info!("scan stopped");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.get()
    }

    /// Devices seen during the current scan, in first-seen order.
    pub fn discovered(&self) -> Vec<DeviceIdentity> {
        self.discovered.get()
    }

    /// Receive the full discovered list on every change.
    pub fn subscribe(&self) -> Receiver<Vec<DeviceIdentity>> {
        self.discovered.subscribe()
    }

    /// Observable scanning flag.
    pub fn scanning_state(&self) -> &StateStore<bool> {
        &self.scanning
    }
}

impl Drop for DeviceScanner {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct AdvertisementFilter {
    name_contains: String,
}

impl AdvertisementFilter {
    fn accepts(&self, device: &DeviceIdentity, services: &[Uuid]) -> bool {
        if !services.contains(&HEART_RATE_SERVICE) {
            return false;
        }
        if self.name_contains.is_empty() {
            return true;
        }
        device
            .name
            .as_deref()
            .is_some_and(|name| name.contains(&self.name_contains))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::simulated::{SimPeripheral, SimulatedRadio};
    use crate::ble::types::RadioState;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn radio_with_sensors() -> Arc<SimulatedRadio> {
        let radio = SimulatedRadio::new();
        radio.add_peripheral(SimPeripheral::heart_rate_sensor("a", "Polar H10 A"));
        radio.add_peripheral(SimPeripheral::heart_rate_sensor("b", "Garmin HRM"));
        radio.add_peripheral(SimPeripheral::heart_rate_sensor("c", "Polar OH1 C"));
        Arc::new(radio)
    }

    #[test]
    fn test_filter_requires_service_and_name() {
        let filter = AdvertisementFilter {
            name_contains: "Polar".into(),
        };
        let polar = DeviceIdentity::new("a", Some("Polar H10"));
        let anonymous = DeviceIdentity::new("b", None);

        assert!(filter.accepts(&polar, &[HEART_RATE_SERVICE]));
        assert!(!filter.accepts(&polar, &[]));
        assert!(!filter.accepts(&anonymous, &[HEART_RATE_SERVICE]));
    }

    #[tokio::test]
    async fn test_scan_filters_by_name_in_first_seen_order() {
        let radio = radio_with_sensors();
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");

        assert!(scanner.start_scan());
        settle().await;

        let ids: Vec<_> = scanner
            .discovered()
            .iter()
            .map(|d| d.id.to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_repeated_advertisements_are_deduplicated() {
        let radio = radio_with_sensors();
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");
        scanner.start_scan();

        let again = DeviceIdentity::new("a", Some("Polar H10 A"));
        radio.advertise(again.clone(), vec![HEART_RATE_SERVICE]);
        radio.advertise(again, vec![HEART_RATE_SERVICE]);
        settle().await;

        assert_eq!(scanner.discovered().len(), 2);
    }

    #[tokio::test]
    async fn test_scan_ignored_when_radio_off() {
        let radio = Arc::new(SimulatedRadio::with_state(RadioState::PoweredOff));
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");

        assert!(!scanner.start_scan());
        assert!(!scanner.is_scanning());
        assert!(!radio.is_scanning());
    }

    #[tokio::test]
    async fn test_power_loss_clears_scanning_flag() {
        let radio = radio_with_sensors();
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");
        scanner.start_scan();
        assert!(scanner.is_scanning());

        radio.set_radio_state(RadioState::PoweredOff);
        settle().await;

        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_restart_clears_previous_results() {
        let radio = radio_with_sensors();
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");
        scanner.start_scan();
        settle().await;
        scanner.stop_scan();

        let rx = scanner.subscribe();
        scanner.start_scan();
        assert_eq!(rx.recv().unwrap(), Vec::<DeviceIdentity>::new());
    }

    #[tokio::test]
    async fn test_advertisements_ignored_after_stop() {
        let radio = radio_with_sensors();
        let scanner = DeviceScanner::spawn(radio.clone(), "");
        scanner.start_scan();
        settle().await;
        scanner.stop_scan();

        radio.inject(RadioEvent::Discovered {
            device: DeviceIdentity::new("z", Some("Polar late")),
            services: vec![HEART_RATE_SERVICE],
            rssi: None,
        });
        settle().await;

        assert_eq!(scanner.discovered().len(), 3);
    }
}
