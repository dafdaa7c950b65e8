//! Configuration management for the runtime.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use strata_engine::DELETION_RETENTION_SECS;

/// Default interval between reaper sweeps.
pub const DEFAULT_REAP_INTERVAL_SECS: u64 = 60;

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// JSON file describing the model
    pub model_path: PathBuf,
    /// Store file; `None` keeps the store in memory
    pub store_path: Option<PathBuf>,
    /// Age after which soft-deleted rows are removed
    pub deletion_retention: Duration,
    /// Interval between reaper sweeps
    pub reap_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_path = lookup("STRATA_MODEL_PATH")
            .map(PathBuf::from)
            .ok_or(ConfigError::MissingModelPath)?;

        let store_path = lookup("STRATA_STORE_PATH")
            .filter(|path| !path.is_empty())
            .map(PathBuf::from);

        let deletion_retention = seconds(
            &lookup,
            "STRATA_DELETION_RETENTION_SECS",
            DELETION_RETENTION_SECS,
        )?;

        let reap_interval = seconds(
            &lookup,
            "STRATA_REAP_INTERVAL_SECS",
            DEFAULT_REAP_INTERVAL_SECS,
        )?;
        if reap_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("STRATA_REAP_INTERVAL_SECS"));
        }

        Ok(Self {
            model_path,
            store_path,
            deletion_retention,
            reap_interval,
        })
    }
}

fn seconds<F>(lookup: &F, key: &'static str, default: u64) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidDuration(key))?,
        None => default,
    };

    Ok(Duration::from_secs(secs))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("STRATA_MODEL_PATH environment variable is required")]
    MissingModelPath,

    #[error("Invalid {0} value")]
    InvalidDuration(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("STRATA_MODEL_PATH", "model.json")]).unwrap();

        assert_eq!(config.model_path, PathBuf::from("model.json"));
        assert!(config.store_path.is_none());
        assert_eq!(config.deletion_retention, Duration::from_secs(120));
        assert_eq!(config.reap_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STRATA_MODEL_PATH", "model.json"),
            ("STRATA_STORE_PATH", "/tmp/strata.json"),
            ("STRATA_DELETION_RETENTION_SECS", "300"),
            ("STRATA_REAP_INTERVAL_SECS", " 5 "),
        ])
        .unwrap();

        assert_eq!(config.store_path, Some(PathBuf::from("/tmp/strata.json")));
        assert_eq!(config.deletion_retention, Duration::from_secs(300));
        assert_eq!(config.reap_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_model_path() {
        assert!(matches!(load(&[]), Err(ConfigError::MissingModelPath)));
    }

    #[test]
    fn test_invalid_numbers() {
        let result = load(&[
            ("STRATA_MODEL_PATH", "model.json"),
            ("STRATA_DELETION_RETENTION_SECS", "two minutes"),
        ]);
        assert!(matches!(
            result,
            Err(ConfigError::InvalidDuration("STRATA_DELETION_RETENTION_SECS"))
        ));

        let result = load(&[
            ("STRATA_MODEL_PATH", "model.json"),
            ("STRATA_REAP_INTERVAL_SECS", "0"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvalidDuration(_))));
    }
}
