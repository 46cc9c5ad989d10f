//! The central radio abstraction shared by the scanner and every link.
//!
//! Commands are fire-and-forget: they return immediately and their outcome
//! arrives later as a [`RadioEvent`] on every subscriber's inbox. Each
//! subscriber receives events in the order the radio produced them.

use crate::ble::types::{PeripheralId, RadioEvent, RadioState};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// One BLE central radio, multiplexing any number of peripheral links.
pub trait Radio: Send + Sync {
    /// Current adapter state.
    fn state(&self) -> RadioState;

    /// Open a new inbox receiving every event produced from now on.
    fn subscribe(&self) -> UnboundedReceiver<RadioEvent>;

    /// Start scanning for peripherals advertising any of `services`.
    fn start_scan(&self, services: &[Uuid]);

    fn stop_scan(&self);

    /// Request a connection. Completion is reported with
    /// [`RadioEvent::Connected`] or [`RadioEvent::ConnectFailed`].
    fn connect(&self, peripheral: &PeripheralId);

    /// Cancel a pending or active connection.
    fn cancel_connection(&self, peripheral: &PeripheralId);

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]);

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    );

    /// Enable or disable value notifications for a characteristic.
    fn set_notify(&self, peripheral: &PeripheralId, characteristic: Uuid, enabled: bool);
}

/// Shared handle to the process-wide radio.
pub type SharedRadio = Arc<dyn Radio>;

/// Fan-out of radio events to subscriber inboxes.
///
/// Backends push every event through [`EventHub::emit`]; closed inboxes are
/// dropped on the next emit.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<UnboundedSender<RadioEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> UnboundedReceiver<RadioEvent> {
        let (tx, rx) = unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn emit(&self, event: RadioEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<RadioEvent>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Peripherals whose next disconnect was asked for locally.
///
/// Backends that only learn about disconnects from the adapter use this to
/// tell a requested disconnect from a link loss. A mark must not outlive
/// the request: abort it when the request fails, and clear it when the
/// peripheral connects again.
#[derive(Default)]
pub struct DisconnectRequests {
    pending: Mutex<HashSet<PeripheralId>>,
}

impl DisconnectRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, id: &PeripheralId) {
        self.lock().insert(id.clone());
    }

    /// Drop the mark for a request that did not go through.
    pub fn abort(&self, id: &PeripheralId) {
        self.lock().remove(id);
    }

    /// Consume the mark for an adapter-reported disconnect.
    ///
    /// Returns whether the disconnect was requested.
    pub fn settle(&self, id: &PeripheralId) -> bool {
        self.lock().remove(id)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PeripheralId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_fans_out_in_order() {
        let hub = EventHub::new();
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(RadioEvent::StateChanged(RadioState::PoweredOff));
        hub.emit(RadioEvent::StateChanged(RadioState::PoweredOn));

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                RadioEvent::StateChanged(RadioState::PoweredOff)
            );
            assert_eq!(
                rx.try_recv().unwrap(),
                RadioEvent::StateChanged(RadioState::PoweredOn)
            );
        }
    }

    #[test]
    fn test_hub_drops_closed_inboxes() {
        let hub = EventHub::new();
        let rx = hub.subscribe();
        drop(rx);

        hub.emit(RadioEvent::StateChanged(RadioState::Unknown));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_requested_disconnect_is_consumed_once() {
        let requests = DisconnectRequests::new();
        let id = PeripheralId::new("hrm");

        requests.begin(&id);
        assert!(requests.settle(&id));
        assert!(!requests.settle(&id));
    }

    #[test]
    fn test_failed_request_leaves_later_loss_visible() {
        let requests = DisconnectRequests::new();
        let id = PeripheralId::new("hrm");

        requests.begin(&id);
        requests.abort(&id);

        // A later disconnect is a real link loss.
        assert!(!requests.settle(&id));
    }
}
