//! Runtime configuration, read from the environment (and `.env` via dotenv).

use crate::error::PoolError;
use std::time::Duration;

pub const ENV_LOCK_TIMEOUT_MS: &str = "STORAGE_POOL_LOCK_TIMEOUT_MS";
pub const ENV_TOPOLOGY: &str = "STORAGE_POOL_TOPOLOGY";
pub const ENV_OWNER: &str = "STORAGE_POOL_OWNER";

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;
const DEFAULT_TOPOLOGY: &str = "topology.json";
const DEFAULT_OWNER: &str = "storage-ip-pool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// How long to wait for a range or pod lock before giving up.
    pub lock_timeout: Duration,
    pub topology_file: String,
    /// Owner recorded on addresses the binary claims.
    pub owner: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            topology_file: DEFAULT_TOPOLOGY.to_string(),
            owner: DEFAULT_OWNER.to_string(),
        }
    }
}

impl PoolConfig {
    /// Load `.env` if present, then read the `STORAGE_POOL_*` variables.
    pub fn from_env() -> Result<PoolConfig, PoolError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup; unset keys keep their default.
    pub fn from_lookup<F>(lookup: F) -> Result<PoolConfig, PoolError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = PoolConfig::default();

        if let Some(value) = lookup(ENV_LOCK_TIMEOUT_MS) {
            let millis: u64 = value.trim().parse().map_err(|_| {
                PoolError::InvalidInput(format!(
                    "{ENV_LOCK_TIMEOUT_MS} must be a number of milliseconds, got {value:?}"
                ))
            })?;
            if millis == 0 {
                return Err(PoolError::InvalidInput(format!(
                    "{ENV_LOCK_TIMEOUT_MS} must be greater than zero"
                )));
            }
            config.lock_timeout = Duration::from_millis(millis);
        }
        if let Some(value) = lookup(ENV_TOPOLOGY) {
            if value.trim().is_empty() {
                return Err(PoolError::InvalidInput(format!("{ENV_TOPOLOGY} is empty")));
            }
            config.topology_file = value;
        }
        if let Some(value) = lookup(ENV_OWNER) {
            if value.trim().is_empty() {
                return Err(PoolError::InvalidInput(format!("{ENV_OWNER} is empty")));
            }
            config.owner = value;
        }

        log::debug!("Pool config: {config:?}");
        Ok(config)
    }
}
