// Fleet configuration
//
// FleetConfig carries the values the core consumes (limits, pool sizing,
// batching thresholds). Mechanism-specific settings (database URL, vault
// key, source endpoints) stay with the components that use them.

use std::time::Duration;

use crate::error::{FleetError, Result};

const DEFAULT_MAX_ACTIVE_WORKERS: usize = 50;
const DEFAULT_MAX_CONNECTIONS: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_BATCH_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ADMISSION_LIMIT: usize = 100;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_STOP_GRACE_MS: u64 = 10_000;

/// Configuration for the fleet runtime
#[derive(Debug, Clone)]
pub struct FleetConfig {
    /// Maximum number of concurrently registered workers
    pub max_active_workers: usize,

    /// Maximum live connections the pool may hold
    pub max_connections: usize,

    /// Events per flush before the size trigger fires
    pub batch_size: usize,

    /// Maximum staleness of a buffered event before the time trigger fires
    pub batch_timeout: Duration,

    /// System-wide cap on in-flight event submissions (backpressure)
    pub admission_limit: usize,

    /// How long one pool-acquire attempt may wait for a free connection
    pub acquire_timeout: Duration,

    /// Validation/connect attempts before acquire gives up
    pub retry_attempts: u32,

    /// How long `stop` waits for a worker task to observe cancellation
    pub stop_grace: Duration,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            max_active_workers: DEFAULT_MAX_ACTIVE_WORKERS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MS),
            admission_limit: DEFAULT_ADMISSION_LIMIT,
            acquire_timeout: Duration::from_millis(DEFAULT_ACQUIRE_TIMEOUT_MS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            stop_grace: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
        }
    }
}

impl FleetConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            max_active_workers: env_usize("FLEET_MAX_WORKERS", DEFAULT_MAX_ACTIVE_WORKERS)?,
            max_connections: env_usize("DB_POOL_SIZE", DEFAULT_MAX_CONNECTIONS)?,
            batch_size: env_usize("BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            batch_timeout: Duration::from_millis(env_u64(
                "BATCH_TIMEOUT_MS",
                DEFAULT_BATCH_TIMEOUT_MS,
            )?),
            admission_limit: env_usize("ADMISSION_LIMIT", DEFAULT_ADMISSION_LIMIT)?,
            acquire_timeout: Duration::from_millis(env_u64(
                "DB_ACQUIRE_TIMEOUT_MS",
                DEFAULT_ACQUIRE_TIMEOUT_MS,
            )?),
            retry_attempts: env_u64("DB_RETRY_ATTEMPTS", DEFAULT_RETRY_ATTEMPTS as u64)? as u32,
            stop_grace: Duration::from_millis(env_u64("STOP_GRACE_MS", DEFAULT_STOP_GRACE_MS)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Range-check the limits. Invalid limits are fatal, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.max_active_workers == 0 || self.max_active_workers > 1_000 {
            return Err(FleetError::config(format!(
                "max_active_workers must be in 1..=1000, got {}",
                self.max_active_workers
            )));
        }
        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(FleetError::config(format!(
                "max_connections must be in 1..=100, got {}",
                self.max_connections
            )));
        }
        if self.batch_size == 0 || self.batch_size > 10_000 {
            return Err(FleetError::config(format!(
                "batch_size must be in 1..=10000, got {}",
                self.batch_size
            )));
        }
        if self.batch_timeout.is_zero() {
            return Err(FleetError::config("batch_timeout must be non-zero"));
        }
        if self.admission_limit == 0 {
            return Err(FleetError::config("admission_limit must be non-zero"));
        }
        if self.retry_attempts == 0 {
            return Err(FleetError::config("retry_attempts must be non-zero"));
        }
        Ok(())
    }

    /// Set the worker capacity limit
    pub fn with_max_active_workers(mut self, limit: usize) -> Self {
        self.max_active_workers = limit;
        self
    }

    /// Set the pool size
    pub fn with_max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit;
        self
    }

    /// Set the batch size trigger
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the batch time trigger
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Set the admission limit
    pub fn with_admission_limit(mut self, limit: usize) -> Self {
        self.admission_limit = limit;
        self
    }

    /// Set the pool acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the stop grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| FleetError::config(format!("{name} must be an integer, got '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn env_usize(name: &str, default: usize) -> Result<usize> {
    Ok(env_u64(name, default as u64)? as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FleetConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_workers() {
        let config = FleetConfig::default().with_max_active_workers(0);
        assert!(matches!(
            config.validate(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_oversized_pool() {
        let config = FleetConfig::default().with_max_connections(101);
        assert!(matches!(
            config.validate(),
            Err(FleetError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_zero_batch_timeout() {
        let config = FleetConfig::default().with_batch_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(FleetError::Configuration(_))
        ));
    }
}
