//! WolfKube Configuration
//!
//! This module provides configuration structures for the leader-aware
//! cluster client: cache timings, lease-based election and logging.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::election::ElectionConfig;

/// Main WolfKube configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfKubeConfig {
    /// Backend client configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Resource cache configuration
    #[serde(default)]
    pub cache: CacheSection,

    /// Leader election configuration
    #[serde(default)]
    pub election: ElectionSection,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backend client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound for any single backend call, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Resource cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
    /// Lifetime of a cached entry in seconds
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// How often expired entries are physically removed, in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

/// Leader election configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionSection {
    /// Participate in leader election
    #[serde(default)]
    pub enabled: bool,

    /// Name of the shared lease record
    #[serde(default)]
    pub name: String,

    /// Namespace holding the lease record
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Identity written into the lease (defaults to POD_NAME, HOSTNAME, or a random id)
    #[serde(default)]
    pub holder_identity: Option<String>,

    /// How long a lease stays valid without renewal
    #[serde(default = "default_lease_duration_secs")]
    pub lease_duration_secs: u64,

    /// How long the leader keeps retrying renewal before stepping down
    #[serde(default = "default_renew_deadline_secs")]
    pub renew_deadline_secs: u64,

    /// Interval between acquire/renew attempts
    #[serde(default = "default_retry_period_secs")]
    pub retry_period_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_request_timeout_secs() -> u64 {
    30
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    600
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_lease_duration_secs() -> u64 {
    15
}

fn default_renew_deadline_secs() -> u64 {
    10
}

fn default_retry_period_secs() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl Default for ElectionSection {
    fn default() -> Self {
        Self {
            enabled: false,
            name: String::new(),
            namespace: default_namespace(),
            holder_identity: None,
            lease_duration_secs: default_lease_duration_secs(),
            renew_deadline_secs: default_renew_deadline_secs(),
            retry_period_secs: default_retry_period_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfKubeConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfKubeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.client.request_timeout_secs == 0 {
            return Err(crate::Error::Config(
                "client.request_timeout_secs must be positive".into(),
            ));
        }

        self.cache_config().validate()?;

        if self.election.enabled {
            self.election_config().validate()?;
        }

        Ok(())
    }

    /// Get the backend request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.client.request_timeout_secs)
    }

    /// Runtime cache configuration
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            default_ttl: Duration::from_secs(self.cache.default_ttl_secs),
            sweep_interval: Duration::from_secs(self.cache.sweep_interval_secs),
        }
    }

    /// Runtime election configuration
    pub fn election_config(&self) -> ElectionConfig {
        ElectionConfig {
            name: self.election.name.clone(),
            namespace: self.election.namespace.clone(),
            holder_identity: self.holder_identity(),
            lease_duration: Duration::from_secs(self.election.lease_duration_secs),
            renew_deadline: Duration::from_secs(self.election.renew_deadline_secs),
            retry_period: Duration::from_secs(self.election.retry_period_secs),
        }
    }

    /// Resolve the identity this process writes into the lease
    pub fn holder_identity(&self) -> String {
        if let Some(identity) = self.election.holder_identity.as_deref() {
            if !identity.is_empty() {
                return identity.to_string();
            }
        }

        ["POD_NAME", "HOSTNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .unwrap_or_else(|| format!("wolfkube-{}", uuid::Uuid::new_v4()))
    }
}
