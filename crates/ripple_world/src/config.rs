//! World configuration.
//!
//! A [`WorldConfig`] can be built in code, parsed from JSON, or taken from
//! the environment:
//!
//! | Variable                 | Values                                        |
//! |--------------------------|-----------------------------------------------|
//! | `RIPPLE_SCHEDULER`       | `immediate`, `microtask`, `frame`, `frame:<ms>` |
//! | `RIPPLE_MAX_FLUSH_WAVES` | positive integer                              |
//! | `RIPPLE_PROFILE`         | `1`/`true`/`on` or `0`/`false`/`off`          |

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::scheduler::{
    DEFAULT_FRAME_INTERVAL, FrameScheduler, ImmediateScheduler, MicrotaskScheduler, Scheduler,
};

/// The environment variable selecting the scheduler.
pub const SCHEDULER_ENV: &str = "RIPPLE_SCHEDULER";
/// The environment variable overriding the wave cap.
pub const MAX_FLUSH_WAVES_ENV: &str = "RIPPLE_MAX_FLUSH_WAVES";
/// The environment variable turning profiling on at construction.
pub const PROFILE_ENV: &str = "RIPPLE_PROFILE";

/// Default wave cap of a single flush.
pub const DEFAULT_MAX_FLUSH_WAVES: usize = 1000;

/// Errors from reading a [`WorldConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid world config JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: &'static str,
    },
}

/// Built-in scheduler choices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    Immediate,
    Microtask,
    Frame {
        /// Timer interval used when the host supplies no frame hook.
        interval_ms: u64,
    },
}

impl SchedulerKind {
    /// A frame scheduler at the default interval.
    #[must_use]
    pub fn frame() -> Self {
        SchedulerKind::Frame {
            interval_ms: u64::try_from(DEFAULT_FRAME_INTERVAL.as_millis()).unwrap_or(16),
        }
    }

    /// Instantiate the scheduler.
    #[must_use]
    pub fn build(self) -> Box<dyn Scheduler> {
        match self {
            SchedulerKind::Immediate => Box::new(ImmediateScheduler::new()),
            SchedulerKind::Microtask => Box::new(MicrotaskScheduler::new()),
            SchedulerKind::Frame { interval_ms } => {
                Box::new(FrameScheduler::new(Duration::from_millis(interval_ms)))
            }
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerKind::Immediate => f.write_str("immediate"),
            SchedulerKind::Microtask => f.write_str("microtask"),
            SchedulerKind::Frame { interval_ms } => write!(f, "frame:{interval_ms}"),
        }
    }
}

impl FromStr for SchedulerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidValue {
            name: SCHEDULER_ENV,
            value: s.to_string(),
            reason,
        };
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" | "sync" => Ok(SchedulerKind::Immediate),
            "microtask" => Ok(SchedulerKind::Microtask),
            "frame" => Ok(SchedulerKind::frame()),
            other => {
                let Some(ms) = other.strip_prefix("frame:") else {
                    return Err(invalid("expected immediate, microtask, frame or frame:<ms>"));
                };
                let interval_ms = ms
                    .parse()
                    .map_err(|_| invalid("frame interval must be whole milliseconds"))?;
                Ok(SchedulerKind::Frame { interval_ms })
            }
        }
    }
}

/// Construction-time settings of a [`World`](crate::World).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub scheduler: SchedulerKind,
    /// Waves a single flush may run before failing with
    /// [`WorldError::UnboundedFlush`](crate::WorldError::UnboundedFlush).
    pub max_flush_waves: usize,
    /// Start with the profiler enabled.
    pub profiling: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerKind::default(),
            max_flush_waves: DEFAULT_MAX_FLUSH_WAVES,
            profiling: false,
        }
    }
}

impl WorldConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed input and
    /// [`ConfigError::InvalidValue`] for a zero wave cap.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()
    }

    /// Defaults overridden by the `RIPPLE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Apply the `RIPPLE_*` environment variables on top of `self`.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(value) = lookup(SCHEDULER_ENV) {
            self.scheduler = value.parse()?;
        }
        if let Some(value) = lookup(MAX_FLUSH_WAVES_ENV) {
            self.max_flush_waves = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                name: MAX_FLUSH_WAVES_ENV,
                value: value.clone(),
                reason: "expected a positive integer",
            })?;
        }
        if let Some(value) = lookup(PROFILE_ENV) {
            self.profiling = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => true,
                "0" | "false" | "off" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        name: PROFILE_ENV,
                        value,
                        reason: "expected true or false",
                    });
                }
            };
        }
        self.validate()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.max_flush_waves == 0 {
            return Err(ConfigError::InvalidValue {
                name: MAX_FLUSH_WAVES_ENV,
                value: "0".to_string(),
                reason: "a flush needs at least one wave",
            });
        }
        Ok(self)
    }
}
