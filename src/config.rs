//! Configuration for the vault persistence engine.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default idle window before an untouched cache entry expires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default interval between auto-save sweeps.
pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(300);

/// Default bound on a quit-save before ownership shifts to auto-save.
pub const DEFAULT_QUIT_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default overall bound on the shutdown drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Natural slot block size; display sizes round up to a multiple of this.
pub const DEFAULT_SLOT_BLOCK: usize = 9;

/// Default sanity cap on decoded slot counts.
pub const DEFAULT_MAX_SLOTS: usize = 256;

/// Main configuration for the persistence engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Evict cache entries untouched for this long. Safe only because
    /// auto-save persists idle entries before they age out.
    pub idle_timeout: Duration,

    /// Maximum number of cached vaults.
    pub max_cached: u64,

    /// Interval between auto-save sweeps; `None` disables the sweep.
    pub auto_save_interval: Option<Duration>,

    /// How long a quit-save may run before the engine stops waiting.
    pub quit_save_timeout: Duration,

    /// Overall bound on the shutdown drain across all entries.
    pub shutdown_timeout: Duration,

    /// Natural block size for display sizing.
    pub slot_block: usize,

    /// Upper bound on slot counts accepted from decode.
    pub max_slots: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_cached: 10_000,
            auto_save_interval: Some(DEFAULT_AUTO_SAVE_INTERVAL),
            quit_save_timeout: DEFAULT_QUIT_SAVE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            slot_block: DEFAULT_SLOT_BLOCK,
            max_slots: DEFAULT_MAX_SLOTS,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle expiry window.
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }

    /// Set the maximum number of cached vaults.
    pub fn with_max_cached(mut self, max: u64) -> Self {
        self.max_cached = max;
        self
    }

    /// Set the auto-save interval.
    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = Some(interval);
        self
    }

    /// Disable the periodic auto-save sweep.
    pub fn without_auto_save(mut self) -> Self {
        self.auto_save_interval = None;
        self
    }

    /// Set the quit-save timeout.
    pub fn with_quit_save_timeout(mut self, timeout: Duration) -> Self {
        self.quit_save_timeout = timeout;
        self
    }

    /// Set the overall shutdown-drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the slot block size.
    pub fn with_slot_block(mut self, block: usize) -> Self {
        self.slot_block = block;
        self
    }

    /// Set the decode sanity cap on slot counts.
    pub fn with_max_slots(mut self, max: usize) -> Self {
        self.max_slots = max;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.slot_block == 0 {
            return Err(Error::Config("slot_block must be positive".into()));
        }
        if self.max_slots < self.slot_block {
            return Err(Error::Config(format!(
                "max_slots ({}) must be at least slot_block ({})",
                self.max_slots, self.slot_block
            )));
        }
        if self.quit_save_timeout.is_zero() || self.shutdown_timeout.is_zero() {
            return Err(Error::Config("timeouts must be nonzero".into()));
        }
        if let Some(interval) = self.auto_save_interval {
            if interval.is_zero() {
                return Err(Error::Config(
                    "auto_save_interval must be nonzero; use without_auto_save() to disable".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.slot_block, 9);
        assert_eq!(config.auto_save_interval, Some(Duration::from_secs(300)));
    }

    #[test]
    fn builder_chain() {
        let config = EngineConfig::new()
            .with_idle_timeout(Duration::from_secs(60))
            .with_quit_save_timeout(Duration::from_secs(2))
            .without_auto_save();

        assert_eq!(config.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.quit_save_timeout, Duration::from_secs(2));
        assert!(config.auto_save_interval.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_block() {
        assert!(EngineConfig::new().with_slot_block(0).validate().is_err());
        assert!(EngineConfig::new()
            .with_slot_block(9)
            .with_max_slots(4)
            .validate()
            .is_err());
    }

    #[test]
    fn rejects_zero_interval() {
        let config = EngineConfig::new().with_auto_save_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
