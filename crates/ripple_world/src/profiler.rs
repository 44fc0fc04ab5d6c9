//! Opt-in flush profiling.
//!
//! While enabled, every flush produces a [`FlushProfile`] (one
//! [`SystemProfile`] per system per wave in which it was invoked) and feeds
//! lifetime [`SystemStats`] keyed by system name. While disabled the flush
//! engine never reads the clock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};

fn as_micros<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

/// Time one system spent in one wave.
#[derive(Debug, Clone, Serialize)]
pub struct SystemProfile {
    pub system: String,
    pub wave: usize,
    #[serde(rename = "duration_us", serialize_with = "as_micros")]
    pub duration: Duration,
    /// Entities handed to the system's handlers in this wave.
    pub entity_count: usize,
}

/// Timing of one whole flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushProfile {
    /// Sequence number, starting at 1 for the first profiled flush.
    pub id: u64,
    #[serde(rename = "total_us", serialize_with = "as_micros")]
    pub total: Duration,
    pub waves: usize,
    pub mutation_count: usize,
    pub systems: Vec<SystemProfile>,
}

/// Lifetime aggregate for one system name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SystemStats {
    pub calls: u64,
    #[serde(rename = "total_us", serialize_with = "as_micros")]
    pub total: Duration,
    #[serde(rename = "max_us", serialize_with = "as_micros")]
    pub max: Duration,
}

impl SystemStats {
    fn record(&mut self, duration: Duration) {
        self.calls += 1;
        self.total += duration;
        self.max = self.max.max(duration);
    }

    /// Mean duration per call; zero before the first call.
    #[must_use]
    pub fn avg(&self) -> Duration {
        u32::try_from(self.calls)
            .ok()
            .filter(|calls| *calls > 0)
            .map_or(Duration::ZERO, |calls| self.total / calls)
    }
}

/// Accumulates one flush while it runs.
#[derive(Debug)]
pub(crate) struct FlushRecorder {
    id: u64,
    started: Instant,
    waves: usize,
    mutation_count: usize,
    systems: Vec<SystemProfile>,
}

impl FlushRecorder {
    pub(crate) fn wave(&mut self, mutation_count: usize) {
        self.waves += 1;
        self.mutation_count += mutation_count;
    }

    pub(crate) fn system(&mut self, system: &str, wave: usize, duration: Duration, entity_count: usize) {
        self.systems.push(SystemProfile {
            system: system.to_string(),
            wave,
            duration,
            entity_count,
        });
    }

    fn finish(self) -> FlushProfile {
        FlushProfile {
            id: self.id,
            total: self.started.elapsed(),
            waves: self.waves,
            mutation_count: self.mutation_count,
            systems: self.systems,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Profiler {
    enabled: bool,
    flushes: u64,
    last: Option<FlushProfile>,
    stats: BTreeMap<String, SystemStats>,
}

impl Profiler {
    pub(crate) fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// A recorder for a new flush, or `None` while disabled.
    pub(crate) fn begin(&mut self) -> Option<FlushRecorder> {
        if !self.enabled {
            return None;
        }
        self.flushes += 1;
        Some(FlushRecorder {
            id: self.flushes,
            started: Instant::now(),
            waves: 0,
            mutation_count: 0,
            systems: Vec::new(),
        })
    }

    pub(crate) fn finish(&mut self, recorder: FlushRecorder) {
        let profile = recorder.finish();
        for entry in &profile.systems {
            self.stats
                .entry(entry.system.clone())
                .or_default()
                .record(entry.duration);
        }
        self.last = Some(profile);
    }

    pub(crate) fn last_flush(&self) -> Option<&FlushProfile> {
        self.last.as_ref()
    }

    pub(crate) fn stats(&self) -> &BTreeMap<String, SystemStats> {
        &self.stats
    }

    pub(crate) fn reset_stats(&mut self) {
        self.stats.clear();
    }
}
