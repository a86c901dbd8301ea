//! In-memory cluster backend
//!
//! A complete backend held in process memory. Lease records follow the
//! same compare-and-write rules a real coordination API enforces, so several
//! electors sharing one instance behave like replicas racing on a cluster.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use super::{ClusterBackend, ResourceWatch};
use crate::election::{Fence, FencingToken, LeaseGrant, LeaseOutcome, LeaseRequest};
use crate::error::{Error, Result};
use crate::resource::{MetricSample, Resource, ResourceQuery, WatchEvent, WatchEventType};

/// Buffered events per watch before new ones are dropped
const WATCH_BUFFER: usize = 64;

/// (kind, namespace, name)
type ObjectKey = (String, String, String);
/// (namespace, name)
type LeaseKey = (String, String);

/// Shared lease record
#[derive(Debug, Clone)]
struct LeaseRecord {
    holder: Option<String>,
    renewed_at: Instant,
    lease_duration: Duration,
    fencing_token: FencingToken,
    transitions: u32,
}

impl LeaseRecord {
    fn is_live(&self, now: Instant) -> bool {
        self.holder.is_some() && now < self.renewed_at + self.lease_duration
    }

    fn grant(&self) -> LeaseOutcome {
        LeaseOutcome::Granted(LeaseGrant {
            fencing_token: self.fencing_token,
            lease_transitions: self.transitions,
        })
    }
}

/// Open watch subscription
struct Subscriber {
    kind: String,
    namespace: String,
    tx: mpsc::Sender<WatchEvent>,
}

/// In-memory cluster backend
#[derive(Default)]
pub struct InMemoryBackend {
    /// Stored objects
    objects: Mutex<BTreeMap<ObjectKey, Resource>>,
    /// Metric samples returned by `fetch_metrics`
    metrics: Mutex<Vec<MetricSample>>,
    /// Lease records by (namespace, name); always locked before `objects`
    leases: Mutex<HashMap<LeaseKey, LeaseRecord>>,
    /// Open watches
    subscribers: Mutex<Vec<Subscriber>>,
    /// Holders whose lease calls fail as if partitioned
    partitioned: Mutex<HashSet<String>>,
    /// Delay between taking a list snapshot and returning it
    list_latency: Mutex<Option<Duration>>,
    /// Last assigned resource version
    version: AtomicU64,
    list_calls: AtomicUsize,
    metrics_calls: AtomicUsize,
    fail_list: AtomicBool,
    fail_metrics: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object directly, bypassing fencing (for seeding)
    pub async fn insert(&self, mut resource: Resource) {
        resource.resource_version = self.next_version();
        let key = object_key(&resource.kind, &resource.namespace, &resource.name);
        self.objects.lock().await.insert(key, resource);
    }

    /// Replace the metric samples
    pub async fn set_metrics(&self, samples: Vec<MetricSample>) {
        *self.metrics.lock().await = samples;
    }

    /// Make `list` fail with `BackendUnavailable`
    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    /// Make `fetch_metrics` fail with `BackendUnavailable`
    pub fn set_fail_metrics(&self, fail: bool) {
        self.fail_metrics.store(fail, Ordering::SeqCst);
    }

    /// Delay every `list` call after its snapshot is taken
    pub async fn set_list_latency(&self, latency: Option<Duration>) {
        *self.list_latency.lock().await = latency;
    }

    /// Fail all lease calls made by `holder`
    pub async fn partition(&self, holder: &str) {
        self.partitioned.lock().await.insert(holder.to_string());
    }

    /// Undo `partition`
    pub async fn heal(&self, holder: &str) {
        self.partitioned.lock().await.remove(holder);
    }

    /// Number of `list` calls served
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch_metrics` calls served
    pub fn metrics_calls(&self) -> usize {
        self.metrics_calls.load(Ordering::SeqCst)
    }

    /// Live holder of a lease, if any
    pub async fn lease_holder(&self, name: &str, namespace: &str) -> Option<String> {
        let now = Instant::now();
        let leases = self.leases.lock().await;
        leases
            .get(&lease_key(name, namespace))
            .filter(|record| record.is_live(now))
            .and_then(|record| record.holder.clone())
    }

    /// Number of watches still open
    pub async fn open_watches(&self) -> usize {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());
        subscribers.len()
    }

    /// Close every open watch from the backend side
    pub async fn close_watches(&self) {
        self.subscribers.lock().await.clear();
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn notify(&self, event_type: WatchEventType, object: &Resource) {
        let mut subscribers = self.subscribers.lock().await;
        subscribers.retain(|s| !s.tx.is_closed());

        for subscriber in subscribers.iter() {
            if subscriber.kind != object.kind || subscriber.namespace != object.namespace {
                continue;
            }
            let event = WatchEvent {
                event_type,
                object: object.clone(),
            };
            if subscriber.tx.try_send(event).is_err() {
                tracing::warn!("Watch buffer full, dropping {} event for {}", event_type, object.id());
            }
        }
    }
}

#[async_trait::async_trait]
impl ClusterBackend for InMemoryBackend {
    async fn list(&self, query: &ResourceQuery) -> Result<Vec<Resource>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable(format!("list {} failed", query.kind)));
        }

        let snapshot: Vec<Resource> = self
            .objects
            .lock()
            .await
            .values()
            .filter(|resource| query.matches(resource))
            .cloned()
            .collect();

        let latency = *self.list_latency.lock().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        Ok(snapshot)
    }

    async fn watch(&self, kind: &str, namespace: &str) -> Result<ResourceWatch> {
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        self.subscribers.lock().await.push(Subscriber {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            tx,
        });
        Ok(ResourceWatch::new(rx))
    }

    async fn fetch_metrics(&self, query: &ResourceQuery) -> Result<Vec<MetricSample>> {
        self.metrics_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable("metrics API unavailable".into()));
        }

        let objects = self.objects.lock().await;
        let metrics = self.metrics.lock().await;
        Ok(metrics
            .iter()
            .filter(|sample| {
                objects
                    .values()
                    .any(|resource| query.matches(resource) && sample.matches(resource))
            })
            .cloned()
            .collect())
    }

    async fn acquire_or_renew_lease(&self, request: &LeaseRequest) -> Result<LeaseOutcome> {
        if self.partitioned.lock().await.contains(&request.holder_identity) {
            return Err(Error::BackendUnavailable(format!(
                "{} cannot reach the lease API",
                request.holder_identity
            )));
        }

        let now = Instant::now();
        let mut leases = self.leases.lock().await;
        let key = lease_key(&request.name, &request.namespace);

        let outcome = match leases.get_mut(&key) {
            Some(record) if record.is_live(now) => {
                if record.holder.as_deref() == Some(request.holder_identity.as_str()) {
                    record.renewed_at = now;
                    record.lease_duration = request.lease_duration;
                    record.grant()
                } else {
                    LeaseOutcome::Held {
                        holder: record.holder.clone().unwrap_or_default(),
                    }
                }
            }
            Some(record) => {
                record.holder = Some(request.holder_identity.clone());
                record.renewed_at = now;
                record.lease_duration = request.lease_duration;
                record.fencing_token = record.fencing_token.next();
                record.transitions += 1;
                record.grant()
            }
            None => {
                let record = LeaseRecord {
                    holder: Some(request.holder_identity.clone()),
                    renewed_at: now,
                    lease_duration: request.lease_duration,
                    fencing_token: FencingToken(1),
                    transitions: 0,
                };
                let outcome = record.grant();
                leases.insert(key, record);
                outcome
            }
        };

        Ok(outcome)
    }

    async fn release_lease(&self, name: &str, namespace: &str, holder_identity: &str) -> Result<()> {
        if self.partitioned.lock().await.contains(holder_identity) {
            return Err(Error::BackendUnavailable(format!(
                "{} cannot reach the lease API",
                holder_identity
            )));
        }

        let mut leases = self.leases.lock().await;
        if let Some(record) = leases.get_mut(&lease_key(name, namespace)) {
            if record.holder.as_deref() == Some(holder_identity) {
                record.holder = None;
            }
        }
        Ok(())
    }

    async fn create(&self, mut resource: Resource, fence: &Fence) -> Result<Resource> {
        let key = object_key(&resource.kind, &resource.namespace, &resource.name);
        {
            let leases = self.leases.lock().await;
            check_fence(&leases, fence)?;

            let mut objects = self.objects.lock().await;
            if objects.contains_key(&key) {
                return Err(Error::AlreadyExists(resource.id()));
            }
            resource.resource_version = self.next_version();
            resource.created_at = chrono::Utc::now();
            objects.insert(key, resource.clone());
        }

        self.notify(WatchEventType::Added, &resource).await;
        Ok(resource)
    }

    async fn update(&self, mut resource: Resource, fence: &Fence) -> Result<Resource> {
        let key = object_key(&resource.kind, &resource.namespace, &resource.name);
        {
            let leases = self.leases.lock().await;
            check_fence(&leases, fence)?;

            let mut objects = self.objects.lock().await;
            let existing = objects
                .get(&key)
                .ok_or_else(|| Error::NotFound(resource.id()))?;
            resource.created_at = existing.created_at;
            resource.resource_version = self.next_version();
            objects.insert(key, resource.clone());
        }

        self.notify(WatchEventType::Modified, &resource).await;
        Ok(resource)
    }

    async fn delete(&self, kind: &str, namespace: &str, name: &str, fence: &Fence) -> Result<()> {
        let removed = {
            let leases = self.leases.lock().await;
            check_fence(&leases, fence)?;

            self.objects
                .lock()
                .await
                .remove(&object_key(kind, namespace, name))
                .ok_or_else(|| Error::NotFound(format!("{}/{}", namespace, name)))?
        };

        self.notify(WatchEventType::Deleted, &removed).await;
        Ok(())
    }
}

/// Reject a write whose token is older than the newest one issued
///
/// Callers keep the `leases` guard until their write lands, so no new
/// holder can be granted in between.
fn check_fence(leases: &HashMap<LeaseKey, LeaseRecord>, fence: &Fence) -> Result<()> {
    let current = leases
        .get(&lease_key(&fence.election, &fence.namespace))
        .map(|record| record.fencing_token)
        .ok_or(Error::NotLeader)?;

    if fence.token < current {
        return Err(Error::StaleFencingToken {
            presented: fence.token.value(),
            current: current.value(),
        });
    }
    Ok(())
}

fn object_key(kind: &str, namespace: &str, name: &str) -> ObjectKey {
    (kind.to_string(), namespace.to_string(), name.to_string())
}

fn lease_key(name: &str, namespace: &str) -> LeaseKey {
    (namespace.to_string(), name.to_string())
}
