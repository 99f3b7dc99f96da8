//! Controller configuration.
//!
//! Loaded once at startup from environment variables.

use crate::constants::{DEFAULT_ROLLOUT_POLL_INTERVAL, DEFAULT_ROLLOUT_TIMEOUT};
use crate::error::ControllerError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Address of the probe and metrics server.
pub const METRICS_ADDR_ENV: &str = "EASYLB_METRICS_ADDR";
/// Seconds between rollout readiness checks.
pub const ROLLOUT_POLL_ENV: &str = "EASYLB_ROLLOUT_POLL_SECONDS";
/// Seconds before a rollout wait gives up.
pub const ROLLOUT_TIMEOUT_ENV: &str = "EASYLB_ROLLOUT_TIMEOUT_SECONDS";
/// Concurrent reconciliations per controller.
pub const CONCURRENCY_ENV: &str = "EASYLB_CONCURRENCY";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub metrics_addr: SocketAddr,
    pub rollout_poll_interval: Duration,
    pub rollout_timeout: Duration,
    pub concurrency: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            rollout_poll_interval: DEFAULT_ROLLOUT_POLL_INTERVAL,
            rollout_timeout: DEFAULT_ROLLOUT_TIMEOUT,
            concurrency: 3,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            metrics_addr: parse(&lookup, METRICS_ADDR_ENV)?.unwrap_or(defaults.metrics_addr),
            rollout_poll_interval: parse::<u64, _>(&lookup, ROLLOUT_POLL_ENV)?
                .map_or(defaults.rollout_poll_interval, Duration::from_secs),
            rollout_timeout: parse::<u64, _>(&lookup, ROLLOUT_TIMEOUT_ENV)?
                .map_or(defaults.rollout_timeout, Duration::from_secs),
            concurrency: parse(&lookup, CONCURRENCY_ENV)?.unwrap_or(defaults.concurrency),
        };

        if config.rollout_poll_interval.is_zero() {
            return Err(ControllerError::InvalidConfig(format!("{ROLLOUT_POLL_ENV} must be greater than zero")));
        }
        if config.rollout_timeout < config.rollout_poll_interval {
            return Err(ControllerError::InvalidConfig(format!(
                "{ROLLOUT_TIMEOUT_ENV} must not be shorter than {ROLLOUT_POLL_ENV}"
            )));
        }
        if config.concurrency == 0 {
            return Err(ControllerError::InvalidConfig(format!("{CONCURRENCY_ENV} must be greater than zero")));
        }
        Ok(config)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| ControllerError::InvalidConfig(format!("{key}={raw}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.rollout_poll_interval, Duration::from_secs(5));
        assert_eq!(config.rollout_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            (METRICS_ADDR_ENV, "127.0.0.1:9090"),
            (ROLLOUT_POLL_ENV, "2"),
            (ROLLOUT_TIMEOUT_ENV, "60"),
            (CONCURRENCY_ENV, "8"),
        ]))
        .expect("valid overrides");
        assert_eq!(config.metrics_addr, SocketAddr::from(([127, 0, 0, 1], 9090)));
        assert_eq!(config.rollout_poll_interval, Duration::from_secs(2));
        assert_eq!(config.rollout_timeout, Duration::from_secs(60));
        assert_eq!(config.concurrency, 8);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for vars in [
            vec![(ROLLOUT_POLL_ENV, "soon")],
            vec![(ROLLOUT_POLL_ENV, "0")],
            vec![(ROLLOUT_POLL_ENV, "10"), (ROLLOUT_TIMEOUT_ENV, "5")],
            vec![(CONCURRENCY_ENV, "0")],
            vec![(METRICS_ADDR_ENV, "not-an-addr")],
        ] {
            let err = Config::from_lookup(lookup(&vars)).expect_err("invalid config");
            assert!(matches!(err, ControllerError::InvalidConfig(_)), "{err}");
        }
    }
}
