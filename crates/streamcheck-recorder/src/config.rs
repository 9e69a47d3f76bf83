/// Timeout configuration: how long to wait for signals and for silence.
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_TIMEOUT_MILLIS_ENV: &str = "DEFAULT_TIMEOUT_MILLIS";
pub const DEFAULT_NO_SIGNALS_TIMEOUT_MILLIS_ENV: &str = "DEFAULT_NO_SIGNALS_TIMEOUT_MILLIS";
pub const DEFAULT_POLL_TIMEOUT_MILLIS_ENV: &str = "DEFAULT_POLL_TIMEOUT_MILLIS";
pub const PUBLISHER_REFERENCE_GC_TIMEOUT_MILLIS_ENV: &str = "PUBLISHER_REFERENCE_GC_TIMEOUT_MILLIS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a number of milliseconds: {source}")]
    InvalidMillis {
        var: &'static str,
        value: String,
        source: std::num::ParseIntError,
    },
}

/// Timeouts used by every expectation of a test case.
///
/// Resolved once (explicit overrides, then environment, then defaults) and
/// copied into each case; never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long to block expecting a signal (default: 100 ms).
    pub default_timeout: Duration,
    /// How long to wait before concluding a signal will not arrive.
    /// Falls back to `default_timeout`.
    pub no_signal_timeout: Duration,
    /// Sleep between polls of a condition that cannot be waited on.
    pub poll_interval: Duration,
    /// How long a dropped subscriber may stay reachable (default: 300 ms).
    pub reclamation_timeout: Duration,
}

/// Explicitly constructed values; each one beats its environment variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutOverrides {
    pub default_timeout: Option<Duration>,
    pub no_signal_timeout: Option<Duration>,
    pub poll_interval: Option<Duration>,
    pub reclamation_timeout: Option<Duration>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let default_timeout = Duration::from_millis(100);
        Self {
            default_timeout,
            no_signal_timeout: default_timeout,
            poll_interval: Duration::from_millis(10),
            reclamation_timeout: Duration::from_millis(300),
        }
    }
}

impl TimeoutConfig {
    /// Resolve from the process environment with no explicit overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(&TimeoutOverrides::default(), |var| std::env::var(var).ok())
    }

    /// Resolve each value from `overrides`, then `lookup(var)`, then the
    /// built-in default.
    pub fn resolve(
        overrides: &TimeoutOverrides,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let read = |explicit: Option<Duration>, var: &'static str| -> Result<Option<Duration>, ConfigError> {
            if explicit.is_some() {
                return Ok(explicit);
            }
            lookup(var).map(|value| parse_millis(var, value)).transpose()
        };

        let default_timeout =
            read(overrides.default_timeout, DEFAULT_TIMEOUT_MILLIS_ENV)?.unwrap_or(defaults.default_timeout);
        let no_signal_timeout = read(overrides.no_signal_timeout, DEFAULT_NO_SIGNALS_TIMEOUT_MILLIS_ENV)?
            .unwrap_or(default_timeout);
        let poll_interval =
            read(overrides.poll_interval, DEFAULT_POLL_TIMEOUT_MILLIS_ENV)?.unwrap_or(defaults.poll_interval);
        let reclamation_timeout = read(
            overrides.reclamation_timeout,
            PUBLISHER_REFERENCE_GC_TIMEOUT_MILLIS_ENV,
        )?
        .unwrap_or(defaults.reclamation_timeout);

        Ok(Self {
            default_timeout,
            no_signal_timeout,
            poll_interval,
            reclamation_timeout,
        })
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_no_signal_timeout(mut self, timeout: Duration) -> Self {
        self.no_signal_timeout = timeout;
        self
    }

    pub fn with_reclamation_timeout(mut self, timeout: Duration) -> Self {
        self.reclamation_timeout = timeout;
        self
    }
}

fn parse_millis(var: &'static str, value: String) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(ms) => Ok(Duration::from_millis(ms)),
        Err(source) => Err(ConfigError::InvalidMillis { var, value, source }),
    }
}
