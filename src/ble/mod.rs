//! Bluetooth Low Energy layer: the radio seam, its backends, discovery and
//! per-sensor links.

#[cfg(feature = "ble-central")]
pub mod central;
pub mod heart_rate;
pub mod link;
pub mod radio;
pub mod scanner;
pub mod simulated;
pub mod types;

#[cfg(feature = "ble-central")]
pub use central::BtleplugRadio;
pub use heart_rate::{
    decode_measurement, DecodeError, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE,
};
pub use link::{DeviceLink, LinkConfig, LinkStatus, SampleHandler};
pub use radio::{DisconnectRequests, EventHub, Radio, SharedRadio};
pub use scanner::DeviceScanner;
pub use simulated::{HeartProfile, SimPeripheral, SimulatedRadio};
pub use types::{
    ConnectionState, DeviceIdentity, PeripheralId, RadioCommand, RadioEvent, RadioState,
};
