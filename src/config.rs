use std::{path::PathBuf, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::{Error, Result};

pub const DURATION_ENV: &str = "MQPROBE_DURATION";
pub const TICK_ENV: &str = "MQPROBE_TICK_MS";
pub const POWER_ENV: &str = "MQPROBE_POWER";
pub const BACKEND_ENV: &str = "MQPROBE_BACKEND";
pub const WORKER_ENV: &str = "MQPROBE_WORKER";

/// Settings for a capacity probe run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
pub struct Config {
    /// How long each concurrency level is sampled
    #[builder(default = Duration::from_secs(10))]
    pub duration: Duration,
    /// Countdown granularity while sampling
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,
    /// The probe starts at `2^power` workers
    #[builder(default = 0)]
    pub power: u32,
    /// Backend name handed to each worker process
    #[builder(default = "null".to_string(), setter(into))]
    pub backend: String,
    /// Worker executable
    #[builder(default = PathBuf::from("mqprobe-worker"), setter(into))]
    pub worker_program: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Config {
    /// Defaults overridden by whatever `MQPROBE_*` variables are set.
    ///
    /// - `MQPROBE_DURATION`: seconds per sample
    /// - `MQPROBE_TICK_MS`: countdown tick in milliseconds
    /// - `MQPROBE_POWER`: starting power
    /// - `MQPROBE_BACKEND`: backend name
    /// - `MQPROBE_WORKER`: worker executable
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(secs) = parse::<u64>(&lookup, DURATION_ENV)? {
            config.duration = Duration::from_secs(secs);
        }
        if let Some(ms) = parse::<u64>(&lookup, TICK_ENV)? {
            config.tick = Duration::from_millis(ms);
        }
        if let Some(power) = parse(&lookup, POWER_ENV)? {
            config.power = power;
        }
        if let Some(backend) = lookup(BACKEND_ENV) {
            config.backend = backend;
        }
        if let Some(worker) = lookup(WORKER_ENV) {
            config.worker_program = worker.into();
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(Error::Config {
                message: format!("{TICK_ENV} must be positive"),
            });
        }
        if 1usize.checked_shl(self.power).is_none() {
            return Err(Error::InvalidPower(self.power));
        }
        if self.backend.is_empty() {
            return Err(Error::Config {
                message: format!("{BACKEND_ENV} must not be empty"),
            });
        }
        Ok(())
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| Error::Config {
            message: format!("invalid value for {key}: {raw:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.duration, Duration::from_secs(10));
        assert_eq!(config.power, 0);
        assert_eq!(config.backend, "null");
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            (DURATION_ENV, "3"),
            (TICK_ENV, "250"),
            (POWER_ENV, "2"),
            (BACKEND_ENV, "delay:50"),
            (WORKER_ENV, "/opt/mq/worker"),
        ]))
        .unwrap();

        assert_eq!(config.duration, Duration::from_secs(3));
        assert_eq!(config.tick, Duration::from_millis(250));
        assert_eq!(config.power, 2);
        assert_eq!(config.backend, "delay:50");
        assert_eq!(config.worker_program, PathBuf::from("/opt/mq/worker"));
    }

    #[test]
    fn rejects_bad_values() {
        let err = Config::from_lookup(lookup(&[(DURATION_ENV, "ten")])).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains(DURATION_ENV));

        let err = Config::from_lookup(lookup(&[(POWER_ENV, "200")])).unwrap_err();
        assert!(matches!(err, Error::InvalidPower(200)));

        let err = Config::from_lookup(lookup(&[(TICK_ENV, "0")])).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
