//! Controller tuning.
//!
//! Values come from [`ControllerConfig::default`] or from the process
//! environment (optionally seeded from a `.env` file):
//!
//! | variable                     | meaning                                      |
//! |------------------------------|----------------------------------------------|
//! | `NXT_BUSY_THRESHOLD`         | encoder ticks still considered "arrived"     |
//! | `NXT_CACHE_FRESHNESS_MS`     | cache lifetime, `0` = never expires          |
//! | `NXT_MODE_SWITCH_TIMEOUT_MS` | give up waiting on a mode switch, `0` = never|
//! | `NXT_POLL_INTERVAL_US`       | sleep between polls, `0` = yield             |

use std::time::Duration;

use crate::last_known::DEFAULT_FRESHNESS;
use crate::{BUSY_THRESHOLD, Error};

const ENV_BUSY_THRESHOLD: &str = "NXT_BUSY_THRESHOLD";
const ENV_CACHE_FRESHNESS_MS: &str = "NXT_CACHE_FRESHNESS_MS";
const ENV_MODE_SWITCH_TIMEOUT_MS: &str = "NXT_MODE_SWITCH_TIMEOUT_MS";
const ENV_POLL_INTERVAL_US: &str = "NXT_POLL_INTERVAL_US";

/// Tuning shared by the motor and servo controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerConfig {
    /// `is_busy` reports true while the encoder is further than this from target.
    pub busy_threshold: i32,
    /// Lifetime of cached register values; `None` never expires them.
    pub cache_freshness: Option<Duration>,
    /// Abandon a mode-switch wait after this long; `None` waits until disarmed.
    pub mode_switch_timeout: Option<Duration>,
    /// Sleep between polls; `None` yields the thread instead.
    pub poll_interval: Option<Duration>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            busy_threshold: BUSY_THRESHOLD,
            cache_freshness: Some(DEFAULT_FRESHNESS),
            mode_switch_timeout: None,
            poll_interval: None,
        }
    }
}

impl ControllerConfig {
    /// Reads the configuration from the environment, loading `.env` first if present.
    ///
    /// # Errors
    /// Returns `Error::Config` if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults.
    ///
    /// # Errors
    /// Returns `Error::Config` if a value cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(threshold) = parse::<i32>(&lookup, ENV_BUSY_THRESHOLD)? {
            config.busy_threshold = threshold;
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_CACHE_FRESHNESS_MS)? {
            config.cache_freshness = non_zero(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_MODE_SWITCH_TIMEOUT_MS)? {
            config.mode_switch_timeout = non_zero(Duration::from_millis(ms));
        }
        if let Some(us) = parse::<u64>(&lookup, ENV_POLL_INTERVAL_US)? {
            config.poll_interval = non_zero(Duration::from_micros(us));
        }
        Ok(config)
    }

    /// Returns a copy with the given mode-switch timeout.
    #[must_use]
    pub const fn with_mode_switch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.mode_switch_timeout = timeout;
        self
    }

    /// Returns a copy with the given poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns a copy with the given cache freshness.
    #[must_use]
    pub const fn with_cache_freshness(mut self, freshness: Option<Duration>) -> Self {
        self.cache_freshness = freshness;
        self
    }
}

fn parse<T: core::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, Error> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config { var, value }),
    }
}

fn non_zero(duration: Duration) -> Option<Duration> {
    if duration.is_zero() { None } else { Some(duration) }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ControllerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.busy_threshold, 5);
        assert_eq!(config.cache_freshness, Some(Duration::from_millis(500)));
        assert_eq!(config.mode_switch_timeout, None);
    }

    #[test]
    fn test_overrides() {
        let config = ControllerConfig::from_lookup(lookup(&[
            ("NXT_BUSY_THRESHOLD", "10"),
            ("NXT_CACHE_FRESHNESS_MS", "0"),
            ("NXT_MODE_SWITCH_TIMEOUT_MS", "250"),
            ("NXT_POLL_INTERVAL_US", " 500 "),
        ]))
        .unwrap();
        assert_eq!(config.busy_threshold, 10);
        assert_eq!(config.cache_freshness, None);
        assert_eq!(config.mode_switch_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.poll_interval, Some(Duration::from_micros(500)));
    }

    #[test]
    fn test_bad_value() {
        let err = ControllerConfig::from_lookup(lookup(&[("NXT_POLL_INTERVAL_US", "fast")]))
            .unwrap_err();
        assert_eq!(
            err,
            Error::Config {
                var: "NXT_POLL_INTERVAL_US",
                value: "fast".to_string()
            }
        );
    }
}
