//! WolfKube - Leader-Aware Cached Cluster Client
//!
//! A resilience layer for cluster-management clients. It gives callers a
//! cached view of cluster resources without re-fetching on every call, and
//! makes sure only one replica of a client process performs writes.
//!
//! # Architecture
//!
//! The client facade composes two components over an abstract cluster
//! backend: a concurrent TTL cache with a background sweep, and a
//! lease-based leader elector. Reads are served from the cache; writes
//! require leadership and carry a fencing token the backend checks.
//!
//! # Features
//!
//! - TTL cache with logical expiry and periodic physical eviction
//! - Single-winner leader election on a renewable lease
//! - Fencing tokens on every mutating call
//! - Best-effort metrics enrichment of list results
//! - Background watch dispatch with deterministic teardown

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod election;
pub mod error;
pub mod resource;

pub use client::ClusterClient;
pub use config::WolfKubeConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{ClusterBackend, InMemoryBackend, ResourceWatch};
    pub use crate::cache::ResourceCache;
    pub use crate::client::ClusterClient;
    pub use crate::config::WolfKubeConfig;
    pub use crate::election::{FencingToken, LeaderElector, LeadershipHooks, LeadershipState};
    pub use crate::error::{Error, Result};
    pub use crate::resource::{LabelSelector, MetricSample, Resource, WatchEvent, WatchEventType};
}
