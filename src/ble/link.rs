//! One heart-rate sensor connection.
//!
//! A [`DeviceLink`] is a handle to an actor task that owns the peripheral
//! connection. Commands go into the actor's inbox and return immediately;
//! radio events arrive on a second inbox. The actor drives the state
//! machine
//!
//! ```text
//! Disconnected -> Connecting -> Discovering -> Connected <-> Measuring
//!       ^                                          |
//!       +------------------------------------------+
//! ```
//!
//! and publishes every transition through a [`StateStore`].
//!
//! Losing an established link schedules a single delayed reconnect. The
//! reconnect is armed again only after a connection succeeds, so a sensor
//! that stays out of range is tried once and then left alone.

use crate::ble::heart_rate::{decode_measurement, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE};
use crate::ble::radio::SharedRadio;
use crate::ble::scanner::DeviceScanner;
use crate::ble::types::{ConnectionState, DeviceIdentity, PeripheralId, RadioEvent};
use crate::core::sample::Sample;
use crate::core::state::StateStore;
use crate::stats::SharedSessionStats;
use crossbeam_channel::Receiver;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc::{
    unbounded_channel, UnboundedReceiver, UnboundedSender, WeakUnboundedSender,
};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default delay before reconnecting after link loss.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Callback receiving every decoded sample.
pub type SampleHandler = Box<dyn Fn(Sample) + Send + Sync>;

type SharedHandler = Arc<RwLock<Option<SampleHandler>>>;

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Wait before the automatic reconnect after link loss
    pub reconnect_delay: Duration,
    /// Subscribe to measurements as soon as the characteristic is found
    pub subscribe_on_connect: bool,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            subscribe_on_connect: true,
        }
    }
}

/// Published view of a link.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    /// Peripheral the link is connected or connecting to
    pub device: Option<DeviceIdentity>,
    /// Most recent peripheral the link was connected to
    pub last_connected: Option<DeviceIdentity>,
}

enum LinkMessage {
    Connect(DeviceIdentity),
    Disconnect,
    Reconnect,
    StartMeasurement,
    StopMeasurement,
    ScanningChanged(bool),
    ReconnectDue(u64),
}

/// Handle to a running link actor. Dropping it stops the actor.
pub struct DeviceLink {
    inbox: UnboundedSender<LinkMessage>,
    scanner: Arc<DeviceScanner>,
    status: StateStore<LinkStatus>,
    latest: StateStore<Option<Sample>>,
    handler: SharedHandler,
    task: JoinHandle<()>,
}

impl DeviceLink {
    /// Spawn the link actor. Must be called inside a tokio runtime.
    pub fn spawn(
        radio: SharedRadio,
        scanner: Arc<DeviceScanner>,
        config: LinkConfig,
        stats: SharedSessionStats,
    ) -> Self {
        let (tx, rx) = unbounded_channel();
        let radio_events = radio.subscribe();

        let initial = if scanner.is_scanning() {
            ConnectionState::Scanning
        } else {
            ConnectionState::Disconnected
        };
        let status = StateStore::new(LinkStatus {
            state: initial,
            ..LinkStatus::default()
        });
        let latest = StateStore::new(None);
        let handler: SharedHandler = Arc::new(RwLock::new(None));

        let weak = tx.downgrade();
        scanner.scanning_state().watch(move |scanning| {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(LinkMessage::ScanningChanged(*scanning));
            }
        });

        let actor = LinkActor {
            radio,
            scanner: Arc::clone(&scanner),
            config,
            stats,
            status: status.clone(),
            latest: latest.clone(),
            handler: Arc::clone(&handler),
            self_tx: tx.downgrade(),
            state: initial,
            target: None,
            last_connected: None,
            characteristic: None,
            armed: false,
            generation: 0,
        };
        let task = tokio::spawn(actor.run(rx, radio_events));

        Self {
            inbox: tx,
            scanner,
            status,
            latest,
            handler,
            task,
        }
    }

    /// Register the sample callback, replacing any previous one.
    pub fn on_sample(&self, handler: impl Fn(Sample) + Send + Sync + 'static) {
        *self
            .handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(handler));
    }

    pub fn start_scanning(&self) -> bool {
        self.scanner.start_scan()
    }

    pub fn stop_scanning(&self) {
        self.scanner.stop_scan();
    }

    pub fn connect(&self, device: DeviceIdentity) {
        self.send(LinkMessage::Connect(device));
    }

    pub fn disconnect(&self) {
        self.send(LinkMessage::Disconnect);
    }

    /// Connect to the last connected device, if any.
    pub fn reconnect(&self) {
        self.send(LinkMessage::Reconnect);
    }

    pub fn start_measurement(&self) {
        self.send(LinkMessage::StartMeasurement);
    }

    pub fn stop_measurement(&self) {
        self.send(LinkMessage::StopMeasurement);
    }

    pub fn state(&self) -> ConnectionState {
        self.status.get().state
    }

    pub fn status(&self) -> LinkStatus {
        self.status.get()
    }

    /// Receive every status transition.
    pub fn subscribe(&self) -> Receiver<LinkStatus> {
        self.status.subscribe()
    }

    pub fn status_store(&self) -> &StateStore<LinkStatus> {
        &self.status
    }

    /// Most recent decoded sample.
    pub fn latest(&self) -> Option<Sample> {
        self.latest.get()
    }

    pub fn scanner(&self) -> &Arc<DeviceScanner> {
        &self.scanner
    }

    fn send(&self, message: LinkMessage) {
        if self.inbox.send(message).is_err() {
            warn!("device link task has stopped; command dropped");
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct LinkActor {
    radio: SharedRadio,
    scanner: Arc<DeviceScanner>,
    config: LinkConfig,
    stats: SharedSessionStats,
    status: StateStore<LinkStatus>,
    latest: StateStore<Option<Sample>>,
    handler: SharedHandler,
    self_tx: WeakUnboundedSender<LinkMessage>,

    state: ConnectionState,
    target: Option<DeviceIdentity>,
    last_connected: Option<DeviceIdentity>,
    characteristic: Option<Uuid>,
    /// Set by a successful connection, consumed by the first link loss
    armed: bool,
    /// Bumped by explicit commands; stale reconnect timers compare against it
    generation: u64,
}

impl LinkActor {
    async fn run(
        mut self,
        mut inbox: UnboundedReceiver<LinkMessage>,
        mut radio_events: UnboundedReceiver<RadioEvent>,
    ) {
        loop {
            tokio::select! {
                message = inbox.recv() => match message {
                    Some(message) => self.handle_message(message),
                    None => break,
                },
                event = radio_events.recv() => match event {
                    Some(event) => self.handle_radio_event(event),
                    None => break,
                },
            }
            self.publish();
        }
        debug!("device link task finished");
    }

    fn handle_message(&mut self, message: LinkMessage) {
        match message {
            LinkMessage::Connect(device) => {
                self.generation += 1;
                self.connect(device);
            }
            LinkMessage::Disconnect => self.disconnect(),
            LinkMessage::Reconnect => {
                self.generation += 1;
                self.reconnect();
            }
            LinkMessage::StartMeasurement => self.start_measurement(),
            LinkMessage::StopMeasurement => self.stop_measurement(),
            LinkMessage::ScanningChanged(scanning) => {
                if self.state.is_idle() {
                    self.state = if scanning {
                        ConnectionState::Scanning
                    } else {
                        ConnectionState::Disconnected
                    };
                }
            }
            LinkMessage::ReconnectDue(generation) => {
                if generation == self.generation {
                    self.reconnect();
                } else {
                    debug!("stale reconnect timer ignored");
                }
            }
        }
    }

    fn connect(&mut self, device: DeviceIdentity) {
        if !self.state.is_idle() {
            debug!(state = %self.state, device = %device, "connect ignored, link busy");
            return;
        }
        info!(device = %device, "connecting");
        self.state = ConnectionState::Connecting;
        self.characteristic = None;
        self.radio.connect(&device.id);
        self.target = Some(device);
    }

    fn disconnect(&mut self) {
        self.generation += 1;
        self.armed = false;
        self.characteristic = None;

        if let Some(device) = self.target.take() {
            info!(device = %device, "disconnecting");
            if !self.state.is_idle() {
                self.radio.cancel_connection(&device.id);
            }
            self.last_connected = Some(device);
        }
        self.state = self.idle_state();
    }

    fn reconnect(&mut self) {
        if !self.state.is_idle() {
            debug!(state = %self.state, "reconnect ignored, link busy");
            return;
        }
        let Some(device) = self.last_connected.clone() else {
            debug!("reconnect ignored, no previous device");
            return;
        };
        self.stats.record_reconnect_attempt();
        self.connect(device);
    }

    fn start_measurement(&mut self) {
        match (self.state, self.target_id(), self.characteristic) {
            (ConnectionState::Connected, Some(id), Some(characteristic)) => {
                self.radio.set_notify(&id, characteristic, true);
                self.state = ConnectionState::Measuring;
                info!(peripheral = %id, "measurement started");
            }
            _ => debug!(state = %self.state, "start_measurement ignored"),
        }
    }

    fn stop_measurement(&mut self) {
        match (self.state, self.target_id(), self.characteristic) {
            (ConnectionState::Measuring, Some(id), Some(characteristic)) => {
                self.radio.set_notify(&id, characteristic, false);
                self.state = ConnectionState::Connected;
                info!(peripheral = %id, "measurement stopped");
            }
            _ => debug!(state = %self.state, "stop_measurement ignored"),
        }
    }

    fn handle_radio_event(&mut self, event: RadioEvent) {
        if let RadioEvent::StateChanged(radio_state) = event {
            if radio_state.is_powered_on() {
                if self.state.is_idle() && self.last_connected.is_some() {
                    info!("radio powered on, restoring previous connection");
                    self.reconnect();
                }
            } else if !self.state.is_idle() {
                warn!(?radio_state, "radio unavailable, link lost");
                self.armed = false;
                self.characteristic = None;
                self.state = ConnectionState::Disconnected;
            }
            return;
        }

        let Some(target) = self.target_id() else {
            return;
        };
        if event.peripheral() != Some(&target) {
            return;
        }

        match event {
            RadioEvent::Connected(_) => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                self.armed = true;
                self.last_connected = self.target.clone();
                self.state = ConnectionState::Discovering;
                debug!(peripheral = %target, "connected, discovering services");
                self.radio.discover_services(&target, &[HEART_RATE_SERVICE]);
            }
            RadioEvent::ConnectFailed { error, .. } => {
                if self.state != ConnectionState::Connecting {
                    return;
                }
                warn!(peripheral = %target, %error, "connection failed");
                self.state = self.idle_state();
            }
            RadioEvent::Disconnected { error, .. } => {
                if self.state.is_idle() {
                    return;
                }
                self.characteristic = None;
                self.state = self.idle_state();
                match error {
                    Some(error) => {
                        warn!(peripheral = %target, %error, "link lost");
                        if std::mem::take(&mut self.armed) {
                            self.schedule_reconnect();
                        }
                    }
                    None => info!(peripheral = %target, "disconnected"),
                }
            }
            RadioEvent::ServicesDiscovered { services, .. } => {
                if self.state != ConnectionState::Discovering {
                    return;
                }
                if services.contains(&HEART_RATE_SERVICE) {
                    self.radio.discover_characteristics(
                        &target,
                        HEART_RATE_SERVICE,
                        &[HEART_RATE_MEASUREMENT],
                    );
                } else {
                    self.abandon(&target, "heart-rate service not found");
                }
            }
            RadioEvent::CharacteristicsDiscovered {
                service,
                characteristics,
                ..
            } => {
                if self.state != ConnectionState::Discovering || service != HEART_RATE_SERVICE {
                    return;
                }
                if characteristics.contains(&HEART_RATE_MEASUREMENT) {
                    self.characteristic = Some(HEART_RATE_MEASUREMENT);
                    self.state = ConnectionState::Connected;
                    info!(peripheral = %target, "heart-rate sensor ready");
                    if self.config.subscribe_on_connect {
                        self.radio
                            .set_notify(&target, HEART_RATE_MEASUREMENT, true);
                    }
                } else {
                    self.abandon(&target, "heart-rate measurement characteristic not found");
                }
            }
            RadioEvent::ValueUpdated {
                characteristic,
                value,
                ..
            } => {
                if characteristic == HEART_RATE_MEASUREMENT && self.state.is_connected() {
                    self.deliver(&target, &value);
                }
            }
            RadioEvent::StateChanged(_) | RadioEvent::Discovered { .. } => {}
        }
    }

    fn deliver(&mut self, peripheral: &PeripheralId, payload: &[u8]) {
        let bpm = match decode_measurement(payload) {
            Ok(bpm) => bpm,
            Err(e) => {
                debug!(%peripheral, error = %e, "dropping undecodable measurement");
                self.stats.record_decode_failure();
                return;
            }
        };

        let sample = Sample::now(f64::from(bpm));
        self.latest.set(Some(sample));
        if let Some(handler) = self
            .handler
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            handler(sample);
        }
    }

    /// Give up on a peripheral that lacks the heart-rate profile.
    fn abandon(&mut self, peripheral: &PeripheralId, reason: &str) {
        warn!(%peripheral, reason, "disconnecting");
        self.armed = false;
        self.characteristic = None;
        self.radio.cancel_connection(peripheral);
        self.state = self.idle_state();
    }

    fn schedule_reconnect(&self) {
        let Some(tx) = self.self_tx.upgrade() else {
            return;
        };
        let generation = self.generation;
        let delay = self.config.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        // Hold only a weak sender while sleeping so a dropped link can exit.
        let tx = tx.downgrade();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(LinkMessage::ReconnectDue(generation));
            }
        });
    }

    fn idle_state(&self) -> ConnectionState {
        if self.scanner.is_scanning() {
            ConnectionState::Scanning
        } else {
            ConnectionState::Disconnected
        }
    }

    fn target_id(&self) -> Option<PeripheralId> {
        self.target.as_ref().map(|d| d.id.clone())
    }

    fn publish(&self) {
        self.status.set_if_changed(LinkStatus {
            state: self.state,
            device: self.target.clone(),
            last_connected: self.last_connected.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::heart_rate::encode_measurement;
    use crate::ble::simulated::{SimPeripheral, SimulatedRadio};
    use crate::ble::types::{RadioCommand, RadioState};
    use crate::stats::create_shared_stats;
    use std::sync::Mutex;

    struct Fixture {
        radio: Arc<SimulatedRadio>,
        link: DeviceLink,
        samples: Arc<Mutex<Vec<f64>>>,
        device: DeviceIdentity,
        stats: SharedSessionStats,
    }

    fn fixture() -> Fixture {
        let radio = Arc::new(SimulatedRadio::new());
        radio.add_peripheral(SimPeripheral::heart_rate_sensor("hrm-1", "Polar H10 1"));
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");
        let stats = create_shared_stats();
        let link = DeviceLink::spawn(
            radio.clone(),
            scanner,
            LinkConfig::default(),
            stats.clone(),
        );
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = samples.clone();
        link.on_sample(move |s| sink.lock().unwrap().push(s.heart_rate));

        Fixture {
            radio,
            link,
            samples,
            device: DeviceIdentity::new("hrm-1", Some("Polar H10 1")),
            stats,
        }
    }

    async fn wait_for(link: &DeviceLink, state: ConnectionState) -> bool {
        for _ in 0..200 {
            if link.state() == state {
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
    async fn test_connect_walks_through_discovery() {
        let f = fixture();
        let rx = f.link.subscribe();

        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        let states: Vec<_> = rx.try_iter().map(|s| s.state).collect();
        assert_eq!(
            states,
            vec![
                ConnectionState::Connecting,
                ConnectionState::Discovering,
                ConnectionState::Connected
            ]
        );
        assert_eq!(f.link.status().last_connected, Some(f.device.clone()));
    }

    #[tokio::test]
    async fn test_measurement_toggles_notifications() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.link.start_measurement();
        assert!(wait_for(&f.link, ConnectionState::Measuring).await);
        assert!(f.radio.is_notifying(&f.device.id));

        f.link.stop_measurement();
        assert!(wait_for(&f.link, ConnectionState::Connected).await);
        assert!(!f.radio.is_notifying(&f.device.id));
    }

    #[tokio::test]
    async fn test_start_measurement_requires_connection() {
        let f = fixture();
        f.link.start_measurement();
        settle().await;
        assert_eq!(f.link.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_samples_reach_callback_and_latest() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.notify_bpm(&f.device.id, 72);
        f.radio.notify(&f.device.id, vec![0x01, 0x2C, 0x01]);
        settle().await;

        assert_eq!(*f.samples.lock().unwrap(), vec![72.0, 300.0]);
        assert_eq!(f.link.latest().map(|s| s.heart_rate), Some(300.0));
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_dropped() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.notify(&f.device.id, vec![0x01, 0x48]);
        f.radio.notify(&f.device.id, encode_measurement(65));
        settle().await;

        assert_eq!(*f.samples.lock().unwrap(), vec![65.0]);
        assert_eq!(f.stats.snapshot().decode_failures, 1);
        assert_eq!(f.link.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_events_for_other_peripherals_are_ignored() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.inject(RadioEvent::ValueUpdated {
            peripheral: PeripheralId::new("someone-else"),
            characteristic: HEART_RATE_MEASUREMENT,
            value: encode_measurement(99),
        });
        f.radio.inject(RadioEvent::Disconnected {
            peripheral: PeripheralId::new("someone-else"),
            error: Some("gone".into()),
        });
        settle().await;

        assert!(f.samples.lock().unwrap().is_empty());
        assert_eq!(f.link.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_disconnect_remembers_device() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.link.disconnect();
        assert!(wait_for(&f.link, ConnectionState::Disconnected).await);
        assert!(!f.radio.is_connected(&f.device.id));
        assert_eq!(f.link.status().device, None);
        assert_eq!(f.link.status().last_connected, Some(f.device.clone()));

        f.link.reconnect();
        assert!(wait_for(&f.link, ConnectionState::Connected).await);
        assert_eq!(f.radio.connect_attempts(&f.device.id), 2);
    }

    #[tokio::test]
    async fn test_missing_service_abandons_connection() {
        let radio = Arc::new(SimulatedRadio::new());
        radio.add_peripheral(SimPeripheral {
            services: vec![],
            ..SimPeripheral::heart_rate_sensor("x", "Polar fake")
        });
        let scanner = DeviceScanner::spawn(radio.clone(), "Polar");
        let link = DeviceLink::spawn(
            radio.clone(),
            scanner,
            LinkConfig::default(),
            create_shared_stats(),
        );

        link.connect(DeviceIdentity::new("x", Some("Polar fake")));
        settle().await;

        assert_eq!(link.state(), ConnectionState::Disconnected);
        assert!(radio
            .commands()
            .contains(&RadioCommand::CancelConnection(PeripheralId::new("x"))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_reconnects_once() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.drop_link(&f.device.id, "supervision timeout");
        assert!(wait_for(&f.link, ConnectionState::Disconnected).await);
        assert_eq!(f.radio.connect_attempts(&f.device.id), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(wait_for(&f.link, ConnectionState::Connected).await);
        assert_eq!(f.radio.connect_attempts(&f.device.id), 2);
        assert_eq!(f.stats.snapshot().reconnect_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_is_not_retried() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.set_reachable(&f.device.id, false);
        f.radio.drop_link(&f.device.id, "out of range");
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(f.link.state(), ConnectionState::Disconnected);
        assert_eq!(f.radio.connect_attempts(&f.device.id), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_link_loss_schedules_one_reconnect() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        for _ in 0..2 {
            f.radio.inject(RadioEvent::Disconnected {
                peripheral: f.device.id.clone(),
                error: Some("supervision timeout".to_string()),
            });
        }
        settle().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;

        assert_eq!(f.radio.connect_attempts(&f.device.id), 2);
        assert_eq!(f.link.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.drop_link(&f.device.id, "out of range");
        settle().await;
        f.link.disconnect();
        tokio::time::sleep(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(f.link.state(), ConnectionState::Disconnected);
        assert_eq!(f.radio.connect_attempts(&f.device.id), 1);
    }

    #[tokio::test]
    async fn test_power_cycle_restores_connection() {
        let f = fixture();
        f.link.connect(f.device.clone());
        assert!(wait_for(&f.link, ConnectionState::Connected).await);

        f.radio.set_radio_state(RadioState::PoweredOff);
        assert!(wait_for(&f.link, ConnectionState::Disconnected).await);

        f.radio.set_radio_state(RadioState::PoweredOn);
        assert!(wait_for(&f.link, ConnectionState::Connected).await);
    }

    #[tokio::test]
    async fn test_idle_link_mirrors_scanning() {
        let f = fixture();
        f.link.start_scanning();
        assert!(wait_for(&f.link, ConnectionState::Scanning).await);

        f.link.stop_scanning();
        assert!(wait_for(&f.link, ConnectionState::Disconnected).await);
    }
}
