//! Connection configuration.
//!
//! Selects the backend kind used when signals, devices and collectors
//! connect, and how long a connection may take.
//!
//! ## Schema
//!
//! ```toml
//! backend = "sim"   # or "real"
//! timeout = "10s"   # humantime duration
//! ```
//!
//! ## Layering
//!
//! [`ConnectConfig::load_from`] merges, later layers winning:
//!
//! 1. built-in defaults (`sim`, 10 s)
//! 2. the TOML file, if it exists
//! 3. environment variables prefixed `DAQ_SIM_` (`DAQ_SIM_BACKEND=real`,
//!    `DAQ_SIM_TIMEOUT=250ms`)

use crate::backend::BackendKind;
use crate::error::{DaqError, DaqResult};
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for connection settings.
pub const ENV_PREFIX: &str = "DAQ_SIM_";

/// Backend selection and connection timeout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectConfig {
    /// Backend kind to connect.
    pub backend: BackendKind,

    /// Upper bound for one connection attempt.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Sim,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectConfig {
    /// Simulated backends, default timeout.
    pub fn sim() -> Self {
        Self::default()
    }

    /// Real backends, default timeout.
    pub fn real() -> Self {
        Self {
            backend: BackendKind::Real,
            ..Self::default()
        }
    }

    /// Replace the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> DaqResult<()> {
        if self.timeout.is_zero() {
            return Err(DaqError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load defaults, then `path` (if it exists), then `DAQ_SIM_*` variables.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            debug!("Loading connection config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        } else {
            debug!(
                "Connection config {} not found, using defaults",
                path.display()
            );
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: Self = figment
            .extract()
            .with_context(|| format!("Failed to parse connection config: {}", path.display()))?;
        config
            .validate()
            .context("Connection config validation failed")?;
        Ok(config)
    }

    /// Defaults overridden by `DAQ_SIM_*` variables only.
    pub fn from_env() -> Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to read connection config from environment")?;
        config
            .validate()
            .context("Connection config validation failed")?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConnectConfig::default();
        assert_eq!(config.backend, BackendKind::Sim);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(ConnectConfig::real().backend, BackendKind::Real);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = ConnectConfig::sim().with_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = \"real\"\ntimeout = \"250ms\"").unwrap();

        let config = ConnectConfig::load_from(file.path()).unwrap();
        assert_eq!(config.backend, BackendKind::Real);
        assert_eq!(config.timeout, Duration::from_millis(250));
    }

    #[test]
    #[serial]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConnectConfig::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ConnectConfig::default());
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = \"real\"").unwrap();

        std::env::set_var("DAQ_SIM_BACKEND", "sim");
        std::env::set_var("DAQ_SIM_TIMEOUT", "2s");
        let config = ConnectConfig::load_from(file.path());
        std::env::remove_var("DAQ_SIM_BACKEND");
        std::env::remove_var("DAQ_SIM_TIMEOUT");

        let config = config.unwrap();
        assert_eq!(config.backend, BackendKind::Sim);
        assert_eq!(config.timeout, Duration::from_secs(2));
    }

    #[test]
    #[serial]
    fn test_from_env_only() {
        std::env::set_var("DAQ_SIM_BACKEND", "real");
        std::env::set_var("DAQ_SIM_TIMEOUT", "500ms");
        let config = ConnectConfig::from_env();
        std::env::set_var("DAQ_SIM_TIMEOUT", "0s");
        let zero = ConnectConfig::from_env();
        std::env::remove_var("DAQ_SIM_BACKEND");
        std::env::remove_var("DAQ_SIM_TIMEOUT");

        let config = config.unwrap();
        assert_eq!(config.backend, BackendKind::Real);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert!(zero.is_err());
        assert_eq!(ConnectConfig::from_env().unwrap(), ConnectConfig::default());
    }

    #[test]
    #[serial]
    fn test_invalid_backend_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backend = \"epics\"").unwrap();
        assert!(ConnectConfig::load_from(file.path()).is_err());
    }
}
