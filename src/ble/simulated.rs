//! In-process radio simulator.
//!
//! Behaves like a central radio with a fixed set of peripherals in range.
//! Used by the tests and by the `--simulate` mode of the CLI, so the whole
//! pipeline can run without Bluetooth hardware.

use crate::ble::heart_rate::{encode_measurement, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use crate::ble::radio::{EventHub, Radio};
use crate::ble::types::{DeviceIdentity, PeripheralId, RadioCommand, RadioEvent, RadioState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A peripheral the simulator can advertise and connect to.
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    pub device: DeviceIdentity,
    pub services: Vec<Uuid>,
    pub characteristics: Vec<Uuid>,
    pub rssi: Option<i16>,
    /// Whether connection requests succeed
    pub reachable: bool,
}

impl SimPeripheral {
    /// A standard heart-rate strap.
    pub fn heart_rate_sensor(id: &str, name: &str) -> Self {
        Self {
            device: DeviceIdentity::new(id, Some(name)),
            services: vec![HEART_RATE_SERVICE],
            characteristics: vec![HEART_RATE_MEASUREMENT],
            rssi: Some(-60),
            reachable: true,
        }
    }
}

#[derive(Default)]
struct SimState {
    radio_state: RadioState,
    scanning: bool,
    peripherals: Vec<SimPeripheral>,
    connected: HashSet<PeripheralId>,
    notifying: HashSet<(PeripheralId, Uuid)>,
    commands: Vec<RadioCommand>,
}

impl SimState {
    fn peripheral(&self, id: &PeripheralId) -> Option<&SimPeripheral> {
        self.peripherals.iter().find(|p| &p.device.id == id)
    }
}

/// Simulated central radio.
pub struct SimulatedRadio {
    hub: EventHub,
    state: Mutex<SimState>,
}

impl SimulatedRadio {
    /// A powered-on radio with no peripherals in range.
    pub fn new() -> Self {
        Self::with_state(RadioState::PoweredOn)
    }

    pub fn with_state(radio_state: RadioState) -> Self {
        Self {
            hub: EventHub::new(),
            state: Mutex::new(SimState {
                radio_state,
                ..SimState::default()
            }),
        }
    }

    /// Two straps for the rider and the horse, plus one unrelated sensor.
    pub fn demo() -> Self {
        let radio = Self::new();
        radio.add_peripheral(SimPeripheral::heart_rate_sensor(
            DEMO_HUMAN_ID,
            "Polar H10 A1B2C3D4",
        ));
        radio.add_peripheral(SimPeripheral::heart_rate_sensor(
            DEMO_HORSE_ID,
            "Polar H10 E5F6A7B8",
        ));
        radio.add_peripheral(SimPeripheral::heart_rate_sensor(
            "sim-hrm-03",
            "Garmin HRM-Dual",
        ));
        radio
    }

    pub fn add_peripheral(&self, peripheral: SimPeripheral) {
        self.lock().peripherals.push(peripheral);
    }

    /// Make connection attempts to `id` succeed or fail.
    pub fn set_reachable(&self, id: &PeripheralId, reachable: bool) {
        let mut state = self.lock();
        if let Some(p) = state.peripherals.iter_mut().find(|p| &p.device.id == id) {
            p.reachable = reachable;
        }
    }

    /// Change adapter state. Leaving `PoweredOn` stops scanning and drops
    /// every open link.
    pub fn set_radio_state(&self, radio_state: RadioState) {
        let dropped: Vec<PeripheralId> = {
            let mut state = self.lock();
            state.radio_state = radio_state;
            if radio_state.is_powered_on() {
                Vec::new()
            } else {
                state.scanning = false;
                state.notifying.clear();
                state.connected.drain().collect()
            }
        };

        self.hub.emit(RadioEvent::StateChanged(radio_state));
        for peripheral in dropped {
            self.hub.emit(RadioEvent::Disconnected {
                peripheral,
                error: Some("radio powered off".to_string()),
            });
        }
    }

    /// Deliver an arbitrary advertisement while scanning.
    pub fn advertise(&self, device: DeviceIdentity, services: Vec<Uuid>) -> bool {
        if !self.lock().scanning {
            return false;
        }
        self.hub.emit(RadioEvent::Discovered {
            device,
            services,
            rssi: Some(-70),
        });
        true
    }

    /// Send a raw notification on the heart-rate characteristic.
    ///
    /// Only delivered while the peripheral is connected and subscribed.
    pub fn notify(&self, id: &PeripheralId, value: Vec<u8>) -> bool {
        let subscribed = {
            let state = self.lock();
            state.connected.contains(id)
                && state
                    .notifying
                    .contains(&(id.clone(), HEART_RATE_MEASUREMENT))
        };
        if subscribed {
            self.hub.emit(RadioEvent::ValueUpdated {
                peripheral: id.clone(),
                characteristic: HEART_RATE_MEASUREMENT,
                value,
            });
        }
        subscribed
    }

    pub fn notify_bpm(&self, id: &PeripheralId, bpm: u16) -> bool {
        self.notify(id, encode_measurement(bpm))
    }

    /// Drop an open link as if the peripheral went out of range.
    pub fn drop_link(&self, id: &PeripheralId, error: &str) -> bool {
        let was_connected = {
            let mut state = self.lock();
            state.notifying.retain(|(p, _)| p != id);
            state.connected.remove(id)
        };
        if was_connected {
            self.hub.emit(RadioEvent::Disconnected {
                peripheral: id.clone(),
                error: Some(error.to_string()),
            });
        }
        was_connected
    }

    /// Deliver a raw event to all subscribers.
    pub fn inject(&self, event: RadioEvent) {
        self.hub.emit(event);
    }

    /// Every command received so far.
    pub fn commands(&self) -> Vec<RadioCommand> {
        self.lock().commands.clone()
    }

    /// Number of connection requests made for `id`.
    pub fn connect_attempts(&self, id: &PeripheralId) -> usize {
        self.lock()
            .commands
            .iter()
            .filter(|c| matches!(c, RadioCommand::Connect(p) if p == id))
            .count()
    }

    pub fn is_connected(&self, id: &PeripheralId) -> bool {
        self.lock().connected.contains(id)
    }

    pub fn is_notifying(&self, id: &PeripheralId) -> bool {
        self.lock()
            .notifying
            .contains(&(id.clone(), HEART_RATE_MEASUREMENT))
    }

    pub fn is_scanning(&self) -> bool {
        self.lock().scanning
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SimulatedRadio {
    fn state(&self) -> RadioState {
        self.lock().radio_state
    }

    fn subscribe(&self) -> UnboundedReceiver<RadioEvent> {
        self.hub.subscribe()
    }

    fn start_scan(&self, services: &[Uuid]) {
        let discovered: Vec<RadioEvent> = {
            let mut state = self.lock();
            state.commands.push(RadioCommand::StartScan(services.to_vec()));
            if !state.radio_state.is_powered_on() {
                return;
            }
            state.scanning = true;
            state
                .peripherals
                .iter()
                .filter(|p| services.is_empty() || p.services.iter().any(|s| services.contains(s)))
                .map(|p| RadioEvent::Discovered {
                    device: p.device.clone(),
                    services: p.services.clone(),
                    rssi: p.rssi,
                })
                .collect()
        };
        for event in discovered {
            self.hub.emit(event);
        }
    }

    fn stop_scan(&self) {
        let mut state = self.lock();
        state.commands.push(RadioCommand::StopScan);
        state.scanning = false;
    }

    fn connect(&self, peripheral: &PeripheralId) {
        let event = {
            let mut state = self.lock();
            state.commands.push(RadioCommand::Connect(peripheral.clone()));
            let reachable = state.peripheral(peripheral).map(|p| p.reachable);
            match (state.radio_state.is_powered_on(), reachable) {
                (true, Some(true)) => {
                    state.connected.insert(peripheral.clone());
                    RadioEvent::Connected(peripheral.clone())
                }
                (false, _) => RadioEvent::ConnectFailed {
                    peripheral: peripheral.clone(),
                    error: "radio not powered on".to_string(),
                },
                (true, _) => RadioEvent::ConnectFailed {
                    peripheral: peripheral.clone(),
                    error: "peripheral unreachable".to_string(),
                },
            }
        };
        self.hub.emit(event);
    }

    fn cancel_connection(&self, peripheral: &PeripheralId) {
        let was_connected = {
            let mut state = self.lock();
            state
                .commands
                .push(RadioCommand::CancelConnection(peripheral.clone()));
            state.notifying.retain(|(p, _)| p != peripheral);
            state.connected.remove(peripheral)
        };
        if was_connected {
            self.hub.emit(RadioEvent::Disconnected {
                peripheral: peripheral.clone(),
                error: None,
            });
        }
    }

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        let event = {
            let mut state = self.lock();
            state
                .commands
                .push(RadioCommand::DiscoverServices(peripheral.clone()));
            if !state.connected.contains(peripheral) {
                return;
            }
            let found = state
                .peripheral(peripheral)
                .map(|p| {
                    p.services
                        .iter()
                        .filter(|s| services.is_empty() || services.contains(s))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            RadioEvent::ServicesDiscovered {
                peripheral: peripheral.clone(),
                services: found,
            }
        };
        self.hub.emit(event);
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let event = {
            let mut state = self.lock();
            state
                .commands
                .push(RadioCommand::DiscoverCharacteristics(peripheral.clone(), service));
            if !state.connected.contains(peripheral) {
                return;
            }
            let found = state
                .peripheral(peripheral)
                .filter(|p| p.services.contains(&service))
                .map(|p| {
                    p.characteristics
                        .iter()
                        .filter(|c| characteristics.is_empty() || characteristics.contains(c))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            RadioEvent::CharacteristicsDiscovered {
                peripheral: peripheral.clone(),
                service,
                characteristics: found,
            }
        };
        self.hub.emit(event);
    }

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: Uuid, enabled: bool) {
        let mut state = self.lock();
        state.commands.push(RadioCommand::SetNotify(
            peripheral.clone(),
            characteristic,
            enabled,
        ));
        if !state.connected.contains(peripheral) {
            return;
        }
        let key = (peripheral.clone(), characteristic);
        if enabled {
            state.notifying.insert(key);
        } else {
            state.notifying.remove(&key);
        }
    }
}

/// Identifier of the simulated rider strap.
pub const DEMO_HUMAN_ID: &str = "sim-hrm-01";
/// Identifier of the simulated horse strap.
pub const DEMO_HORSE_ID: &str = "sim-hrm-02";

/// Shape of a synthetic heart-rate trace.
#[derive(Debug, Clone, Copy)]
pub struct HeartProfile {
    pub baseline_bpm: f64,
    pub amplitude_bpm: f64,
    pub period_secs: f64,
}

impl HeartProfile {
    pub const RIDER: HeartProfile = HeartProfile {
        baseline_bpm: 92.0,
        amplitude_bpm: 18.0,
        period_secs: 47.0,
    };

    pub const HORSE: HeartProfile = HeartProfile {
        baseline_bpm: 48.0,
        amplitude_bpm: 14.0,
        period_secs: 61.0,
    };

    /// BPM at `elapsed` seconds, with a small deterministic wobble.
    pub fn bpm_at(&self, elapsed: f64, tick: u64) -> u16 {
        let phase = 2.0 * std::f64::consts::PI * elapsed / self.period_secs;
        let wobble = ((tick.wrapping_mul(2_654_435_761) >> 7) % 5) as f64 - 2.0;
        (self.baseline_bpm + self.amplitude_bpm * phase.sin() + wobble)
            .round()
            .clamp(20.0, 250.0) as u16
    }
}

/// Push a synthetic trace for each peripheral once per `interval`.
///
/// Notifications only reach a link while it is connected and subscribed.
pub fn spawn_synthetic_feed(
    radio: Arc<SimulatedRadio>,
    feeds: Vec<(PeripheralId, HeartProfile)>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        let started = tokio::time::Instant::now();
        let mut tick: u64 = 0;
        loop {
            ticker.tick().await;
            let elapsed = started.elapsed().as_secs_f64();
            for (id, profile) in &feeds {
                radio.notify_bpm(id, profile.bpm_at(elapsed, tick));
            }
            tick += 1;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PeripheralId {
        PeripheralId::new(s)
    }

    #[test]
    fn test_scan_ignored_when_powered_off() {
        let radio = SimulatedRadio::with_state(RadioState::PoweredOff);
        radio.add_peripheral(SimPeripheral::heart_rate_sensor("a", "Polar H10"));
        let mut rx = radio.subscribe();

        radio.start_scan(&[HEART_RATE_SERVICE]);

        assert!(!radio.is_scanning());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_connect_and_discover_flow() {
        let radio = SimulatedRadio::demo();
        let mut rx = radio.subscribe();
        let p = id(DEMO_HUMAN_ID);

        radio.connect(&p);
        radio.discover_services(&p, &[HEART_RATE_SERVICE]);
        radio.discover_characteristics(&p, HEART_RATE_SERVICE, &[HEART_RATE_MEASUREMENT]);

        assert_eq!(rx.try_recv().unwrap(), RadioEvent::Connected(p.clone()));
        assert_eq!(
            rx.try_recv().unwrap(),
            RadioEvent::ServicesDiscovered {
                peripheral: p.clone(),
                services: vec![HEART_RATE_SERVICE],
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            RadioEvent::CharacteristicsDiscovered {
                peripheral: p.clone(),
                service: HEART_RATE_SERVICE,
                characteristics: vec![HEART_RATE_MEASUREMENT],
            }
        );
    }

    #[test]
    fn test_notifications_require_subscription() {
        let radio = SimulatedRadio::demo();
        let p = id(DEMO_HORSE_ID);
        radio.connect(&p);

        assert!(!radio.notify_bpm(&p, 40));
        radio.set_notify(&p, HEART_RATE_MEASUREMENT, true);
        assert!(radio.notify_bpm(&p, 40));
    }

    #[test]
    fn test_unreachable_peripheral_fails_to_connect() {
        let radio = SimulatedRadio::demo();
        let p = id(DEMO_HUMAN_ID);
        radio.set_reachable(&p, false);
        let mut rx = radio.subscribe();

        radio.connect(&p);

        assert!(matches!(
            rx.try_recv().unwrap(),
            RadioEvent::ConnectFailed { .. }
        ));
        assert_eq!(radio.connect_attempts(&p), 1);
    }

    #[test]
    fn test_power_off_drops_links() {
        let radio = SimulatedRadio::demo();
        let p = id(DEMO_HUMAN_ID);
        radio.connect(&p);
        let mut rx = radio.subscribe();

        radio.set_radio_state(RadioState::PoweredOff);

        assert_eq!(
            rx.try_recv().unwrap(),
            RadioEvent::StateChanged(RadioState::PoweredOff)
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            RadioEvent::Disconnected { error: Some(_), .. }
        ));
        assert!(!radio.is_connected(&p));
    }

    #[test]
    fn test_profile_stays_in_range() {
        for tick in 0..200 {
            let bpm = HeartProfile::HORSE.bpm_at(tick as f64 * 0.5, tick);
            assert!((30..=70).contains(&bpm), "horse bpm {bpm}");
        }
    }
}
