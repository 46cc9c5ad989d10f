//! Radio-level types: peripheral identities, adapter state and the events
//! the radio delivers to its subscribers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, stable identifier of a peripheral (MAC address or platform UUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeripheralId(String);

impl PeripheralId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A discovered peripheral: identifier plus its advertised name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub id: PeripheralId,
    pub name: Option<String>,
}

impl DeviceIdentity {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: PeripheralId::new(id),
            name: name.map(str::to_string),
        }
    }

    /// Name for display, falling back to the identifier.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Power and authorization state of the central radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RadioState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    pub fn is_powered_on(&self) -> bool {
        matches!(self, RadioState::PoweredOn)
    }
}

/// Connection state of one device link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    Discovering,
    Connected,
    Measuring,
}

impl ConnectionState {
    /// Connected with the heart-rate characteristic resolved.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Measuring)
    }

    /// No connection and no connection attempt in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self, ConnectionState::Disconnected | ConnectionState::Scanning)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Discovering => "discovering",
            ConnectionState::Connected => "connected",
            ConnectionState::Measuring => "measuring",
        };
        f.write_str(s)
    }
}

/// Asynchronous results reported by the radio, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    /// Adapter power/authorization changed
    StateChanged(RadioState),
    /// An advertisement was received while scanning
    Discovered {
        device: DeviceIdentity,
        services: Vec<Uuid>,
        rssi: Option<i16>,
    },
    /// A connection request completed
    Connected(PeripheralId),
    /// A connection request failed before the link came up
    ConnectFailed {
        peripheral: PeripheralId,
        error: String,
    },
    /// The link went down; `error` is `None` for a requested disconnect
    Disconnected {
        peripheral: PeripheralId,
        error: Option<String>,
    },
    /// Service discovery finished
    ServicesDiscovered {
        peripheral: PeripheralId,
        services: Vec<Uuid>,
    },
    /// Characteristic discovery for one service finished
    CharacteristicsDiscovered {
        peripheral: PeripheralId,
        service: Uuid,
        characteristics: Vec<Uuid>,
    },
    /// A characteristic value notification
    ValueUpdated {
        peripheral: PeripheralId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

impl RadioEvent {
    /// Peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<&PeripheralId> {
        match self {
            RadioEvent::StateChanged(_) => None,
            RadioEvent::Discovered { device, .. } => Some(&device.id),
            RadioEvent::Connected(id) => Some(id),
            RadioEvent::ConnectFailed { peripheral, .. }
            | RadioEvent::Disconnected { peripheral, .. }
            | RadioEvent::ServicesDiscovered { peripheral, .. }
            | RadioEvent::CharacteristicsDiscovered { peripheral, .. }
            | RadioEvent::ValueUpdated { peripheral, .. } => Some(peripheral),
        }
    }
}

/// Commands issued to the radio. Backends that record their traffic
/// (the simulator) expose them for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(PeripheralId),
    CancelConnection(PeripheralId),
    DiscoverServices(PeripheralId),
    DiscoverCharacteristics(PeripheralId, Uuid),
    SetNotify(PeripheralId, Uuid, bool),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_identity_label() {
        let named = DeviceIdentity::new("AA:BB", Some("Polar H10 1234"));
        assert_eq!(named.label(), "Polar H10 1234");
        assert_eq!(named.to_string(), "Polar H10 1234 (AA:BB)");

        let anonymous = DeviceIdentity::new("AA:BB", None);
        assert_eq!(anonymous.label(), "AA:BB");
    }

    #[test]
    fn test_connection_state_predicates() {
        assert!(ConnectionState::Measuring.is_connected());
        assert!(!ConnectionState::Discovering.is_connected());
        assert!(ConnectionState::Scanning.is_idle());
        assert!(!ConnectionState::Connecting.is_idle());
    }

    #[test]
    fn test_event_peripheral() {
        let id = PeripheralId::new("p1");
        assert_eq!(RadioEvent::Connected(id.clone()).peripheral(), Some(&id));
        assert_eq!(RadioEvent::StateChanged(RadioState::PoweredOn).peripheral(), None);
    }
}
