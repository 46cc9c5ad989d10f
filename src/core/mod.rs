//! Core functionality for the dual heart-rate monitor.
//!
//! This module contains:
//! - Sample and identity types shared across the crate
//! - The observable state store used for published state
//! - Rolling windows and the dual correlator
//! - Summary statistics for captured recordings

pub mod correlator;
pub mod sample;
pub mod state;
pub mod summary;
pub mod windowing;

// Re-export commonly used types
pub use correlator::{AlignedPoint, CorrelatedSnapshot, DualCorrelator};
pub use sample::{HeartRatePoint, MonitorIdentity, Reading, Sample};
pub use state::StateStore;
pub use summary::SessionSummary;
pub use windowing::{RollingWindow, DEFAULT_WINDOW_SECS};
