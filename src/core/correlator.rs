//! Dual correlator: one rolling window per monitored subject.
//!
//! Both monitor sessions push tagged readings into a single shared
//! [`DualCorrelator`]. A global measuring flag gates every insertion; the
//! two windows are kept under one lock so readers always observe both
//! sides of the same instant.

use crate::core::sample::{MonitorIdentity, Reading, Sample};
use crate::core::state::StateStore;
use crate::core::windowing::RollingWindow;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::Receiver;
use std::sync::{Arc, Mutex, PoisonError};

/// Consistent, read-only view of both windows.
#[derive(Debug, Clone, Default)]
pub struct CorrelatedSnapshot {
    pub is_measuring: bool,
    pub human: Vec<Sample>,
    pub horse: Vec<Sample>,
}

impl CorrelatedSnapshot {
    pub fn window(&self, identity: MonitorIdentity) -> &[Sample] {
        match identity {
            MonitorIdentity::Human => &self.human,
            MonitorIdentity::Horse => &self.horse,
        }
    }

    /// Latest reading for a monitor, or [`Reading::NoData`] when its window is empty.
    pub fn current(&self, identity: MonitorIdentity) -> Reading {
        self.window(identity)
            .last()
            .map(|s| Reading::Bpm(s.heart_rate))
            .unwrap_or(Reading::NoData)
    }

    /// Pair every human sample with the nearest horse sample within `max_skew`.
    pub fn aligned(&self, max_skew: Duration) -> Vec<AlignedPoint> {
        let mut horse = RollingWindow::with_span(Duration::days(1));
        for sample in &self.horse {
            horse.push(*sample);
        }

        self.human
            .iter()
            .filter_map(|human| {
                horse
                    .nearest(human.timestamp, max_skew)
                    .map(|horse| AlignedPoint {
                        timestamp: human.timestamp,
                        human: human.heart_rate,
                        horse: horse.heart_rate,
                        skew: horse.timestamp - human.timestamp,
                    })
            })
            .collect()
    }
}

/// One human reading matched with the closest horse reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPoint {
    /// Timestamp of the human sample
    pub timestamp: DateTime<Utc>,
    pub human: f64,
    pub horse: f64,
    /// Horse timestamp minus human timestamp
    pub skew: Duration,
}

struct Windows {
    is_measuring: bool,
    human: RollingWindow,
    horse: RollingWindow,
}

impl Windows {
    fn window_mut(&mut self, identity: MonitorIdentity) -> &mut RollingWindow {
        match identity {
            MonitorIdentity::Human => &mut self.human,
            MonitorIdentity::Horse => &mut self.horse,
        }
    }

    fn snapshot(&self) -> CorrelatedSnapshot {
        CorrelatedSnapshot {
            is_measuring: self.is_measuring,
            human: self.human.to_vec(),
            horse: self.horse.to_vec(),
        }
    }
}

/// Shared correlator for the human and horse streams.
///
/// Constructed once and handed to both monitor sessions as an
/// `Arc<DualCorrelator>`; tests build isolated instances.
pub struct DualCorrelator {
    windows: Mutex<Windows>,
    published: StateStore<CorrelatedSnapshot>,
}

impl DualCorrelator {
    /// Create a correlator whose windows span `window_secs` seconds.
    pub fn new(window_secs: u64) -> Self {
        Self {
            windows: Mutex::new(Windows {
                is_measuring: false,
                human: RollingWindow::new(window_secs),
                horse: RollingWindow::new(window_secs),
            }),
            published: StateStore::default(),
        }
    }

    /// Create a correlator ready to be shared between sessions.
    pub fn shared(window_secs: u64) -> Arc<Self> {
        Arc::new(Self::new(window_secs))
    }

    /// Clear both windows and open the measuring gate.
    pub fn start_measuring(&self) {
        self.mutate(|w| {
            w.human.clear();
            w.horse.clear();
            w.is_measuring = true;
        });
        tracing::info!("correlator measuring started");
    }

    /// Close the gate. Window contents are kept until the next start.
    pub fn stop_measuring(&self) {
        self.mutate(|w| w.is_measuring = false);
        tracing::info!("correlator measuring stopped");
    }

    pub fn is_measuring(&self) -> bool {
        self.lock().is_measuring
    }

    /// Record a reading for `identity` at the current time.
    ///
    /// Dropped entirely while the correlator is not measuring.
    pub fn add_measurement(&self, heart_rate: f64, identity: MonitorIdentity) -> bool {
        self.add_measurement_at(heart_rate, identity, Utc::now())
    }

    /// Record a reading with an explicit insertion instant.
    ///
    /// The window is pruned relative to `at`. Returns whether the reading
    /// was accepted.
    pub fn add_measurement_at(
        &self,
        heart_rate: f64,
        identity: MonitorIdentity,
        at: DateTime<Utc>,
    ) -> bool {
        let mut windows = self.lock();
        if !windows.is_measuring {
            return false;
        }
        windows
            .window_mut(identity)
            .push(Sample::at(heart_rate, at));
        self.published.set(windows.snapshot());
        true
    }

    /// Consistent copy of both windows.
    pub fn snapshot(&self) -> CorrelatedSnapshot {
        self.lock().snapshot()
    }

    /// Latest reading for one monitor.
    pub fn current(&self, identity: MonitorIdentity) -> Reading {
        let windows = self.lock();
        let window = match identity {
            MonitorIdentity::Human => &windows.human,
            MonitorIdentity::Horse => &windows.horse,
        };
        window
            .latest()
            .map(|s| Reading::Bpm(s.heart_rate))
            .unwrap_or(Reading::NoData)
    }

    /// Receive a snapshot after every change.
    pub fn subscribe(&self) -> Receiver<CorrelatedSnapshot> {
        self.published.subscribe()
    }

    fn mutate(&self, f: impl FnOnce(&mut Windows)) {
        let mut windows = self.lock();
        f(&mut windows);
        self.published.set(windows.snapshot());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for DualCorrelator {
    fn default() -> Self {
        Self::new(crate::core::windowing::DEFAULT_WINDOW_SECS)
    }
}
