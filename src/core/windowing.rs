//! Rolling time windows for correlating heart-rate streams.
//!
//! Each monitored subject keeps the samples of the most recent window span
//! (30 seconds by default). The window is pruned on every insertion,
//! relative to the timestamp of the sample being inserted.

use crate::core::sample::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Default window span in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 30;

/// A time-bounded, time-ordered sequence of samples for one monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingWindow {
    /// How far back from the newest insertion samples are kept
    span: Duration,
    samples: VecDeque<Sample>,
}

impl RollingWindow {
    /// Create an empty window covering `span_secs` seconds.
    pub fn new(span_secs: u64) -> Self {
        Self::with_span(Duration::seconds(span_secs as i64))
    }

    pub fn with_span(span: Duration) -> Self {
        Self {
            span,
            samples: VecDeque::new(),
        }
    }

    /// Check whether a timestamp is still inside the window as seen from `now`.
    ///
    /// The boundary is inclusive: a sample exactly one span old is kept.
    pub fn covers(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        timestamp >= now - self.span
    }

    /// Append a sample and drop everything older than one span before it.
    pub fn push(&mut self, sample: Sample) {
        let now = sample.timestamp;
        self.samples.push_back(sample);
        self.prune(now);
    }

    /// Remove all samples that fall outside the window as seen from `now`.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        // Insertion order is time order, so expired samples sit at the front.
        while let Some(front) = self.samples.front() {
            if self.covers(front.timestamp, now) {
                break;
            }
            self.samples.pop_front();
        }
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Window span in seconds.
    pub fn span_secs(&self) -> f64 {
        self.span.num_milliseconds() as f64 / 1000.0
    }

    /// Sample closest in time to `timestamp`, if one lies within `max_skew`.
    pub fn nearest(&self, timestamp: DateTime<Utc>, max_skew: Duration) -> Option<&Sample> {
        self.samples
            .iter()
            .map(|s| {
                let delta = s.timestamp - timestamp;
                (s, if delta < Duration::zero() { -delta } else { delta })
            })
            .filter(|(_, skew)| *skew <= max_skew)
            .min_by_key(|(_, skew)| *skew)
            .map(|(s, _)| s)
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SECS)
    }
}
