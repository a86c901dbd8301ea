//! Cluster Backend Module
//!
//! The capability the cache, elector and client facade consume. Real
//! deployments plug in an API-server client; `InMemoryBackend` serves tests
//! and the demo binary.

mod memory;

pub use memory::InMemoryBackend;

use tokio::sync::mpsc;

use crate::election::{Fence, LeaseOutcome, LeaseRequest};
use crate::error::Result;
use crate::resource::{MetricSample, Resource, ResourceQuery, WatchEvent};

/// Operations provided by the cluster backend
///
/// Retries and backoff for network calls are the implementation's concern.
/// Lease calls must be atomic compare-and-write on the lease record; mutating
/// calls must reject a `Fence` older than the newest token issued.
#[async_trait::async_trait]
pub trait ClusterBackend: Send + Sync {
    /// List resources matching `query`
    async fn list(&self, query: &ResourceQuery) -> Result<Vec<Resource>>;

    /// Open a watch over `kind` in `namespace`
    async fn watch(&self, kind: &str, namespace: &str) -> Result<ResourceWatch>;

    /// Usage samples for resources matching `query`
    async fn fetch_metrics(&self, query: &ResourceQuery) -> Result<Vec<MetricSample>>;

    /// Acquire the lease if free or expired, renew it if already held by the caller
    async fn acquire_or_renew_lease(&self, request: &LeaseRequest) -> Result<LeaseOutcome>;

    /// Give up the lease if `holder_identity` holds it
    async fn release_lease(&self, name: &str, namespace: &str, holder_identity: &str) -> Result<()>;

    /// Create a resource
    async fn create(&self, resource: Resource, fence: &Fence) -> Result<Resource>;

    /// Replace an existing resource
    async fn update(&self, resource: Resource, fence: &Fence) -> Result<Resource>;

    /// Delete a resource
    async fn delete(&self, kind: &str, namespace: &str, name: &str, fence: &Fence) -> Result<()>;
}

/// Stream of events from an open backend watch
///
/// Dropping or stopping the watch closes it on the backend side.
pub struct ResourceWatch {
    events: mpsc::Receiver<WatchEvent>,
}

impl ResourceWatch {
    /// Wrap a receiving channel
    pub fn new(events: mpsc::Receiver<WatchEvent>) -> Self {
        Self { events }
    }

    /// Next event, or `None` once the backend closed the watch
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.events.recv().await
    }

    /// Close the watch; buffered events are discarded
    pub fn stop(&mut self) {
        self.events.close();
    }
}
