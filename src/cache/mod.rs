//! Resource Cache Module
//!
//! Concurrent TTL cache for backend query results. Entries become invisible
//! as soon as they expire; a background sweep removes them physically.

mod key;
mod store;

pub use key::{resource_key, scope_prefix};
pub use store::ResourceCache;

use std::time::Duration;

use crate::error::{Error, Result};

/// Runtime cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime used when `set` is called without an explicit TTL
    pub default_ttl: Duration,
    /// Period of the background sweep
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(600),
        }
    }
}

impl CacheConfig {
    /// Reject non-positive timings
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(Error::Config("cache default TTL must be positive".into()));
        }
        if self.sweep_interval.is_zero() {
            return Err(Error::Config("cache sweep interval must be positive".into()));
        }
        Ok(())
    }
}
