//! Hardware radio backed by `btleplug`.
//!
//! Every trait command spawns a short task on the runtime that performs the
//! async btleplug call and reports the outcome through the event hub, so
//! callers never block on the adapter.

use crate::ble::radio::{DisconnectRequests, EventHub, Radio};
use crate::ble::types::{DeviceIdentity, PeripheralId, RadioEvent, RadioState};
use anyhow::{anyhow, Context, Result};
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};
use uuid::Uuid;

const STATE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

struct Inner {
    adapter: Adapter,
    hub: EventHub,
    state: RwLock<RadioState>,
    /// Platform ids of every peripheral seen, keyed by their string form
    known: Mutex<HashMap<String, btleplug::platform::PeripheralId>>,
    /// Peripherals we asked to disconnect
    cancelling: DisconnectRequests,
}

/// The first Bluetooth adapter on this machine.
pub struct BtleplugRadio {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl BtleplugRadio {
    /// Open the first adapter and start pumping its events.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn new() -> Result<Arc<Self>> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        info!(adapter = %adapter.adapter_info().await.unwrap_or_default(), "using Bluetooth adapter");

        let state = map_state(adapter.adapter_state().await.ok());
        let events = adapter
            .events()
            .await
            .context("could not subscribe to adapter events")?;

        let inner = Arc::new(Inner {
            adapter,
            hub: EventHub::new(),
            state: RwLock::new(state),
            known: Mutex::new(HashMap::new()),
            cancelling: DisconnectRequests::new(),
        });
        let runtime = Handle::current();

        runtime.spawn(pump_central_events(Arc::clone(&inner), events));
        runtime.spawn(poll_adapter_state(Arc::clone(&inner)));

        Ok(Arc::new(Self { inner, runtime }))
    }

    fn spawn<F, Fut>(&self, what: &'static str, f: F)
    where
        F: FnOnce(Arc<Inner>) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let fut = f(Arc::clone(&self.inner));
        self.runtime.spawn(async move {
            if let Err(e) = fut.await {
                warn!(operation = what, error = %e, "radio operation failed");
            }
        });
    }
}

impl Radio for BtleplugRadio {
    fn state(&self) -> RadioState {
        *self
            .inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(&self) -> UnboundedReceiver<RadioEvent> {
        self.inner.hub.subscribe()
    }

    fn start_scan(&self, services: &[Uuid]) {
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        self.spawn("start_scan", |inner| async move {
            inner.adapter.start_scan(filter).await?;
            Ok(())
        });
    }

    fn stop_scan(&self) {
        self.spawn("stop_scan", |inner| async move {
            inner.adapter.stop_scan().await?;
            Ok(())
        });
    }

    fn connect(&self, peripheral: &PeripheralId) {
        let id = peripheral.clone();
        self.spawn("connect", |inner| async move {
            let outcome = async {
                let p = inner.peripheral(&id).await?;
                tokio::time::timeout(CONNECT_TIMEOUT, p.connect())
                    .await
                    .map_err(|_| anyhow!("connect timed out after {CONNECT_TIMEOUT:?}"))??;
                Ok::<_, anyhow::Error>(p)
            }
            .await;

            match outcome {
                Ok(p) => {
                    inner.cancelling.abort(&id);
                    tokio::spawn(pump_notifications(Arc::clone(&inner), id.clone(), p));
                    inner.hub.emit(RadioEvent::Connected(id));
                }
                Err(e) => inner.hub.emit(RadioEvent::ConnectFailed {
                    peripheral: id,
                    error: e.to_string(),
                }),
            }
            Ok(())
        });
    }

    fn cancel_connection(&self, peripheral: &PeripheralId) {
        let id = peripheral.clone();
        self.spawn("cancel_connection", |inner| async move {
            inner.cancelling.begin(&id);
            let outcome = async {
                let p = inner.peripheral(&id).await?;
                p.disconnect().await?;
                Ok::<_, anyhow::Error>(())
            }
            .await;
            if let Err(e) = outcome {
                inner.cancelling.abort(&id);
                return Err(e);
            }
            inner.hub.emit(RadioEvent::Disconnected {
                peripheral: id,
                error: None,
            });
            Ok(())
        });
    }

    fn discover_services(&self, peripheral: &PeripheralId, services: &[Uuid]) {
        let id = peripheral.clone();
        let wanted = services.to_vec();
        self.spawn("discover_services", |inner| async move {
            let p = inner.peripheral(&id).await?;
            p.discover_services().await?;
            let found = p
                .services()
                .into_iter()
                .map(|s| s.uuid)
                .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                .collect();
            inner.hub.emit(RadioEvent::ServicesDiscovered {
                peripheral: id,
                services: found,
            });
            Ok(())
        });
    }

    fn discover_characteristics(
        &self,
        peripheral: &PeripheralId,
        service: Uuid,
        characteristics: &[Uuid],
    ) {
        let id = peripheral.clone();
        let wanted = characteristics.to_vec();
        self.spawn("discover_characteristics", |inner| async move {
            let p = inner.peripheral(&id).await?;
            // btleplug resolves characteristics together with services.
            let found = p
                .services()
                .into_iter()
                .filter(|s| s.uuid == service)
                .flat_map(|s| s.characteristics.into_iter().map(|c| c.uuid))
                .filter(|uuid| wanted.is_empty() || wanted.contains(uuid))
                .collect();
            inner.hub.emit(RadioEvent::CharacteristicsDiscovered {
                peripheral: id,
                service,
                characteristics: found,
            });
            Ok(())
        });
    }

    fn set_notify(&self, peripheral: &PeripheralId, characteristic: Uuid, enabled: bool) {
        let id = peripheral.clone();
        self.spawn("set_notify", |inner| async move {
            let p = inner.peripheral(&id).await?;
            let c = p
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == characteristic)
                .ok_or_else(|| anyhow!("characteristic {characteristic} not found"))?;
            if enabled {
                p.subscribe(&c).await?;
            } else {
                p.unsubscribe(&c).await?;
            }
            debug!(peripheral = %id, enabled, "notification state changed");
            Ok(())
        });
    }
}

impl Inner {
    async fn peripheral(&self, id: &PeripheralId) -> Result<Peripheral> {
        let platform_id = self
            .known
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("unknown peripheral {id}"))?;
        Ok(self.adapter.peripheral(&platform_id).await?)
    }

    fn set_state(&self, state: RadioState) {
        let changed = {
            let mut current = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let changed = *current != state;
            *current = state;
            changed
        };
        if changed {
            info!(?state, "radio state changed");
            self.hub.emit(RadioEvent::StateChanged(state));
        }
    }
}

async fn pump_central_events(
    inner: Arc<Inner>,
    mut events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
) {
    while let Some(event) = events.next().await {
        match event {
            CentralEvent::DeviceDiscovered(platform_id) | CentralEvent::DeviceUpdated(platform_id) => {
                let Ok(p) = inner.adapter.peripheral(&platform_id).await else {
                    continue;
                };
                let Ok(Some(props)) = p.properties().await else {
                    continue;
                };
                let key = platform_id.to_string();
                inner
                    .known
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.clone(), platform_id);
                inner.hub.emit(RadioEvent::Discovered {
                    device: DeviceIdentity::new(key, props.local_name.as_deref()),
                    services: props.services,
                    rssi: props.rssi,
                });
            }
            CentralEvent::DeviceDisconnected(platform_id) => {
                let id = PeripheralId::new(platform_id.to_string());
                if !inner.cancelling.settle(&id) {
                    inner.hub.emit(RadioEvent::Disconnected {
                        peripheral: id,
                        error: Some("connection lost".to_string()),
                    });
                }
            }
            _ => {}
        }
    }
    debug!("adapter event stream closed");
}

async fn pump_notifications(inner: Arc<Inner>, id: PeripheralId, p: Peripheral) {
    let mut notifications = match p.notifications().await {
        Ok(n) => n,
        Err(e) => {
            warn!(peripheral = %id, error = %e, "could not open notification stream");
            return;
        }
    };
    while let Some(n) = notifications.next().await {
        inner.hub.emit(RadioEvent::ValueUpdated {
            peripheral: id.clone(),
            characteristic: n.uuid,
            value: n.value,
        });
    }
    debug!(peripheral = %id, "notification stream closed");
}

async fn poll_adapter_state(inner: Arc<Inner>) {
    let mut ticker = tokio::time::interval(STATE_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let state = map_state(inner.adapter.adapter_state().await.ok());
        inner.set_state(state);
    }
}

fn map_state(state: Option<CentralState>) -> RadioState {
    match state {
        Some(CentralState::PoweredOn) => RadioState::PoweredOn,
        Some(CentralState::PoweredOff) => RadioState::PoweredOff,
        _ => RadioState::Unknown,
    }
}
