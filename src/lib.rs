//! Tandem HR - dual Bluetooth heart-rate monitor for a rider and a horse.
//!
//! Two heart-rate straps are connected at the same time over one BLE
//! central radio. Each sample is tagged with the subject it came from and
//! fed into a shared correlator that keeps the last 30 seconds of both
//! streams, aligned by wall-clock time, for live display and export.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          Tandem HR                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────┐   ┌────────────┐   ┌────────────────┐           │
//! │  │ Scanner │──▶│ DeviceLink │──▶│ MonitorSession │ human     │
//! │  └─────────┘   └────────────┘   └────────────────┘           │
//! │       │        ┌────────────┐   ┌────────────────┐           │
//! │       └───────▶│ DeviceLink │──▶│ MonitorSession │ horse     │
//! │                └────────────┘   └────────────────┘           │
//! │                                         │                    │
//! │   Radio: simulated or btleplug          ▼                    │
//! │                                 ┌────────────────┐           │
//! │                                 │ DualCorrelator │           │
//! │                                 └────────────────┘           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tandem_hr::{ble::SimulatedRadio, config::Config, monitor::DualSession};
//! use tandem_hr::{stats::create_shared_stats, store::MemoryStore};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let radio = Arc::new(SimulatedRadio::demo());
//! let dual = DualSession::spawn(
//!     radio,
//!     &config.session_options()?,
//!     Arc::new(MemoryStore::new()),
//!     create_shared_stats(),
//! );
//!
//! dual.scanner().start_scan();
//! dual.start_measuring();
//! # Ok(())
//! # }
//! ```

pub mod air_quality;
pub mod ble;
pub mod config;
pub mod core;
pub mod location;
pub mod monitor;
pub mod stats;
pub mod store;

// Re-export key types at crate root for convenience
pub use ble::{ConnectionState, DeviceIdentity, DeviceLink, DeviceScanner, Radio, RadioState};
pub use config::{Config, ConfigError};
pub use core::{CorrelatedSnapshot, DualCorrelator, MonitorIdentity, Reading, Sample};
pub use monitor::{DualSession, MonitorSession};
pub use stats::{SessionStats, SharedSessionStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
