//! Configuration surface
//!
//! Two plain numeric settings with sane defaults: the per-lock timeout and
//! the sweeper interval. Values come from the process configuration with
//! `WAYBILL__`-prefixed environment overrides.

use std::time::Duration;

/// Default per-lock timeout in seconds
pub const DEFAULT_LOCK_TIMEOUT_SECS: i64 = 300;

/// Default sweeper interval in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 60;

/// Lock subsystem configuration wrapper.
///
/// Provides defaulted access to the lock settings without imposing a
/// schema on the surrounding application's configuration.
#[derive(Clone, Debug)]
pub struct LockSettings {
    config: config::Config,
}

impl LockSettings {
    /// Wrap an already-built configuration
    pub fn from_config(config: config::Config) -> Self {
        Self { config }
    }

    /// Build from environment variables only
    /// (`WAYBILL__LOCK__TIMEOUT_SECONDS`, `WAYBILL__LOCK__SWEEP_INTERVAL_SECONDS`)
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WAYBILL").separator("__"))
            .build()?;
        Ok(Self { config })
    }

    /// How long a granted lock stays valid without renewal (default: 300s)
    pub fn lock_timeout(&self) -> Duration {
        let secs = self
            .config
            .get_int("lock.timeout_seconds")
            .unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS)
            .max(1);
        Duration::from_secs(secs as u64)
    }

    /// How often the expiry sweeper runs (default: 60s)
    pub fn sweep_interval(&self) -> Duration {
        let secs = self
            .config
            .get_int("lock.sweep_interval_seconds")
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS)
            .max(1);
        Duration::from_secs(secs as u64)
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            config: config::Config::default(),
        }
    }
}
