//! Cluster Client
//!
//! Leader-aware facade over a cluster backend. Reads go through the TTL
//! cache and never wait on leadership; writes require leadership, carry the
//! current fencing token and invalidate every cached query they can affect.

mod watch;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::ClusterBackend;
use crate::cache::{resource_key, scope_prefix, ResourceCache};
use crate::config::WolfKubeConfig;
use crate::election::{Fence, LeaderElector, LeadershipHooks, LeadershipState, NoopHooks};
use crate::error::{Error, Result};
use crate::resource::{LabelSelector, Resource, ResourceQuery, WatchEventType};

/// Leader-aware, cached cluster client
pub struct ClusterClient {
    /// Backend capability
    backend: Arc<dyn ClusterBackend>,
    /// Cached list results keyed by kind/namespace/selector
    cache: ResourceCache<Vec<Resource>>,
    /// Elector, present when election is enabled
    elector: Option<Arc<LeaderElector>>,
    /// Upper bound for a single backend call
    request_timeout: Duration,
    /// Client-wide shutdown signal
    shutdown: CancellationToken,
    /// Watch dispatch tasks
    watchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterClient {
    /// Create a client; fails fast on invalid configuration
    ///
    /// Must be called inside a Tokio runtime (the cache sweep starts here).
    pub fn new(config: WolfKubeConfig, backend: Arc<dyn ClusterBackend>) -> Result<Self> {
        Self::with_hooks(config, backend, Arc::new(NoopHooks))
    }

    /// Create a client whose elector reports transitions to `hooks`
    pub fn with_hooks(
        config: WolfKubeConfig,
        backend: Arc<dyn ClusterBackend>,
        hooks: Arc<dyn LeadershipHooks>,
    ) -> Result<Self> {
        config.validate()?;

        let elector = if config.election.enabled {
            let elector = LeaderElector::new(config.election_config(), Arc::clone(&backend))?
                .with_hooks(hooks);
            Some(Arc::new(elector))
        } else {
            None
        };

        let cache = ResourceCache::new(config.cache_config())?;

        tracing::info!(
            "Cluster client ready (cache ttl {:?}, election {})",
            cache.default_ttl(),
            if elector.is_some() { "enabled" } else { "disabled" }
        );

        Ok(Self {
            backend,
            cache,
            elector,
            request_timeout: config.request_timeout(),
            shutdown: CancellationToken::new(),
            watchers: Mutex::new(Vec::new()),
        })
    }

    /// Start participating in leader election
    pub async fn start_leader_election(&self) -> Result<()> {
        self.ensure_running()?;
        let elector = self.elector.as_ref().ok_or(Error::LeaderElectionNotConfigured)?;
        elector.start().await
    }

    /// Check if this instance currently leads; never blocks
    pub fn is_leader(&self) -> bool {
        self.elector.as_ref().map(|e| e.is_leader()).unwrap_or(false)
    }

    /// Current role, if election is enabled
    pub fn leadership(&self) -> Option<LeadershipState> {
        self.elector.as_ref().map(|e| e.state())
    }

    /// The elector, if election is enabled
    pub fn elector(&self) -> Option<&Arc<LeaderElector>> {
        self.elector.as_ref()
    }

    /// List resources, serving from cache when possible
    ///
    /// With `include_metrics`, resources are annotated with usage samples.
    /// A metrics failure is logged and the unenriched list is returned.
    pub async fn get_resource_enhanced(
        &self,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
        include_metrics: bool,
    ) -> Result<Vec<Resource>> {
        self.ensure_running()?;

        let key = resource_key(kind, namespace, selector);
        self.cache
            .get_or_compute(&key, None, || self.fetch(kind, namespace, selector, include_metrics))
            .await
    }

    /// List from the backend and optionally enrich; the result is not cached here
    async fn fetch(
        &self,
        kind: &str,
        namespace: &str,
        selector: &LabelSelector,
        include_metrics: bool,
    ) -> Result<Vec<Resource>> {
        let query = ResourceQuery::new(kind, namespace, selector.clone());
        let mut resources = self
            .call(format!("list {}/{}/{}", kind, namespace, selector), self.backend.list(&query))
            .await?;

        if include_metrics {
            match self.enrich(&query, &mut resources).await {
                Ok(enriched) => {
                    tracing::debug!("Enriched {}/{} {} with metrics", enriched, resources.len(), kind);
                }
                Err(e) => {
                    tracing::warn!("{}; returning {} {} without metrics", e, resources.len(), kind);
                }
            }
        }

        Ok(resources)
    }

    /// Open a watch and dispatch its events to `handler` on a background task
    ///
    /// The task ends when `cancel` fires, the client stops, or the backend
    /// closes the watch. Backend closure is logged and not retried.
    pub async fn watch_resource<H>(
        &self,
        kind: &str,
        namespace: &str,
        cancel: CancellationToken,
        handler: H,
    ) -> Result<()>
    where
        H: Fn(WatchEventType, &Resource) + Send + Sync + 'static,
    {
        self.ensure_running()?;

        let scope = format!("{}/{}", kind, namespace);
        let watch = self
            .call(format!("watch {}", scope), self.backend.watch(kind, namespace))
            .await
            .map_err(|e| match e {
                Error::Timeout(_) | Error::Watch(_) => e,
                other => Error::Watch(format!("failed to watch {}: {}", scope, other)),
            })?;

        let task = tokio::spawn(watch::dispatch(
            watch,
            scope,
            cancel,
            self.shutdown.clone(),
            handler,
        ));

        let mut watchers = self.watchers.lock().await;
        watchers.retain(|handle| !handle.is_finished());
        watchers.push(task);
        Ok(())
    }

    /// Create a resource; requires leadership
    pub async fn create(&self, resource: Resource) -> Result<Resource> {
        self.ensure_running()?;
        let fence = self.fence()?;
        let scope = scope_prefix(&resource.kind, &resource.namespace);

        self.cache.invalidate_prefix(&scope).await;
        let result = self
            .call(format!("create {}", resource.id()), self.backend.create(resource, &fence))
            .await;
        self.after_mutation(&scope, &fence).await;
        result
    }

    /// Replace a resource; requires leadership
    pub async fn update(&self, resource: Resource) -> Result<Resource> {
        self.ensure_running()?;
        let fence = self.fence()?;
        let scope = scope_prefix(&resource.kind, &resource.namespace);

        self.cache.invalidate_prefix(&scope).await;
        let result = self
            .call(format!("update {}", resource.id()), self.backend.update(resource, &fence))
            .await;
        self.after_mutation(&scope, &fence).await;
        result
    }

    /// Delete a resource; requires leadership
    pub async fn delete(&self, kind: &str, namespace: &str, name: &str) -> Result<()> {
        self.ensure_running()?;
        let fence = self.fence()?;
        let scope = scope_prefix(kind, namespace);

        self.cache.invalidate_prefix(&scope).await;
        let result = self
            .call(
                format!("delete {}/{}", namespace, name),
                self.backend.delete(kind, namespace, name, &fence),
            )
            .await;
        self.after_mutation(&scope, &fence).await;
        result
    }

    /// Drop every cached query over `kind` in `namespace`
    pub async fn invalidate(&self, kind: &str, namespace: &str) -> usize {
        self.cache.invalidate_prefix(&scope_prefix(kind, namespace)).await
    }

    /// Stop watches, the election (releasing the lease) and the cache sweep
    ///
    /// Safe to call repeatedly and concurrently.
    pub async fn stop(&self) {
        let first = !self.shutdown.is_cancelled();
        self.shutdown.cancel();

        let watchers: Vec<JoinHandle<()>> = self.watchers.lock().await.drain(..).collect();
        for result in futures::future::join_all(watchers).await {
            if let Err(e) = result {
                tracing::warn!("Watch task ended abnormally: {}", e);
            }
        }

        if let Some(elector) = &self.elector {
            elector.stop().await;
        }
        self.cache.stop().await;

        if first {
            tracing::info!("Cluster client stopped");
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }
        Ok(())
    }

    /// Current leadership proof, or why there is none
    fn fence(&self) -> Result<Fence> {
        let elector = self.elector.as_ref().ok_or(Error::LeaderElectionNotConfigured)?;
        let token = elector.fencing_token().ok_or(Error::NotLeader)?;
        let config = elector.config();

        Ok(Fence {
            election: config.name.clone(),
            namespace: config.namespace.clone(),
            token,
        })
    }

    async fn after_mutation(&self, scope: &str, fence: &Fence) {
        self.cache.invalidate_prefix(scope).await;

        let still_leading = self
            .elector
            .as_ref()
            .and_then(|e| e.fencing_token())
            .map(|token| token == fence.token)
            .unwrap_or(false);
        if !still_leading {
            tracing::warn!(
                "Leadership changed during write under token {}; do not build on its outcome",
                fence.token
            );
        }
    }

    async fn enrich(&self, query: &ResourceQuery, resources: &mut [Resource]) -> Result<usize> {
        let samples = self
            .call(format!("metrics {}/{}", query.kind, query.namespace), self.backend.fetch_metrics(query))
            .await
            .map_err(|e| Error::EnrichmentFailed(e.to_string()))?;

        let mut enriched = 0;
        for resource in resources.iter_mut() {
            if let Some(sample) = samples.iter().find(|s| s.matches(resource)) {
                resource.apply_metrics(sample);
                enriched += 1;
            }
        }
        Ok(enriched)
    }

    /// Bound a backend call by the request timeout
    async fn call<T, F>(&self, what: String, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| Error::Timeout(what))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::resource::MetricSample;
    use std::sync::Mutex as StdMutex;

    fn config(election: bool) -> WolfKubeConfig {
        let mut config = WolfKubeConfig::default();
        config.client.request_timeout_secs = 5;
        config.cache.default_ttl_secs = 60;
        config.cache.sweep_interval_secs = 120;
        if election {
            config.election.enabled = true;
            config.election.name = "wolfkube-leader".into();
            config.election.holder_identity = Some("pod-a".into());
            config.election.lease_duration_secs = 3;
            config.election.renew_deadline_secs = 2;
            config.election.retry_period_secs = 1;
        }
        config
    }

    async fn seeded_backend() -> Arc<InMemoryBackend> {
        let backend = Arc::new(InMemoryBackend::new());
        backend.insert(Resource::new("pods", "default", "web-0").with_label("app", "web")).await;
        backend.insert(Resource::new("pods", "default", "web-1").with_label("app", "web")).await;
        backend
    }

    async fn leading_client(backend: &Arc<InMemoryBackend>) -> ClusterClient {
        let client = ClusterClient::new(config(true), backend.clone()).unwrap();
        client.start_leader_election().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.is_leader());
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_read_served_from_cache() {
        let backend = seeded_backend().await;
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();
        let everything = LabelSelector::everything();

        let first = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        let second = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(backend.list_calls(), 1);

        // Expired entries are fetched again
        tokio::time::sleep(Duration::from_secs(61)).await;
        client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        assert_eq!(backend.list_calls(), 2);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrichment_failure_returns_base_list() {
        let backend = seeded_backend().await;
        backend.set_fail_metrics(true);
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();

        let pods = client
            .get_resource_enhanced("pods", "default", &LabelSelector::everything(), true)
            .await
            .unwrap();

        assert_eq!(pods.len(), 2);
        assert!(pods.iter().all(|pod| !pod.has_metrics()));
        assert_eq!(backend.metrics_calls(), 1);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrichment_annotates_matching_resources() {
        let backend = seeded_backend().await;
        backend
            .set_metrics(vec![MetricSample {
                namespace: "default".into(),
                name: "web-0".into(),
                cpu: "120m".into(),
                memory: "48Mi".into(),
            }])
            .await;
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();

        let pods = client
            .get_resource_enhanced("pods", "default", &LabelSelector::parse("app=web").unwrap(), true)
            .await
            .unwrap();

        let web0 = pods.iter().find(|p| p.name == "web-0").unwrap();
        let web1 = pods.iter().find(|p| p.name == "web-1").unwrap();
        assert_eq!(web0.annotations.get("metrics/cpu").map(String::as_str), Some("120m"));
        assert!(!web1.has_metrics());
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_is_surfaced_and_not_cached() {
        let backend = seeded_backend().await;
        backend.set_fail_list(true);
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();
        let everything = LabelSelector::everything();

        let err = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));

        backend.set_fail_list(false);
        let pods = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(backend.list_calls(), 2);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_backend_times_out_without_caching() {
        let backend = seeded_backend().await;
        backend.set_list_latency(Some(Duration::from_secs(10))).await;
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();
        let everything = LabelSelector::everything();

        let err = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        backend.set_list_latency(None).await;
        client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        assert_eq!(backend.list_calls(), 2);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_requires_leadership() {
        let backend = seeded_backend().await;

        let no_election = ClusterClient::new(config(false), backend.clone()).unwrap();
        let err = no_election.create(Resource::new("pods", "default", "web-2")).await.unwrap_err();
        assert!(matches!(err, Error::LeaderElectionNotConfigured));
        assert!(matches!(
            no_election.start_leader_election().await,
            Err(Error::LeaderElectionNotConfigured)
        ));
        no_election.stop().await;

        // Election configured but not started: never leader
        let follower = ClusterClient::new(config(true), backend.clone()).unwrap();
        assert!(!follower.is_leader());
        let err = follower.delete("pods", "default", "web-0").await.unwrap_err();
        assert!(matches!(err, Error::NotLeader));
        follower.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_invalidates_cached_queries() {
        let backend = seeded_backend().await;
        let client = leading_client(&backend).await;
        let everything = LabelSelector::everything();
        let web = LabelSelector::parse("app=web").unwrap();

        client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        client.get_resource_enhanced("pods", "default", &web, false).await.unwrap();
        assert_eq!(backend.list_calls(), 2);

        let created = client
            .create(Resource::new("pods", "default", "web-2").with_label("app", "web"))
            .await
            .unwrap();
        assert!(created.resource_version > 0);

        let pods = client.get_resource_enhanced("pods", "default", &web, false).await.unwrap();
        assert_eq!(pods.len(), 3);
        assert_eq!(backend.list_calls(), 3);

        client.delete("pods", "default", "web-2").await.unwrap();
        let pods = client.get_resource_enhanced("pods", "default", &everything, false).await.unwrap();
        assert_eq!(pods.len(), 2);

        let err = client.update(Resource::new("pods", "default", "web-9")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_overlapping_write_is_not_cached() {
        let backend = seeded_backend().await;
        let client = Arc::new(leading_client(&backend).await);
        backend.set_list_latency(Some(Duration::from_millis(500))).await;

        // This read snapshots two pods, then returns after the create below
        let reader = Arc::clone(&client);
        let read = tokio::spawn(async move {
            reader
                .get_resource_enhanced("pods", "default", &LabelSelector::everything(), false)
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        client.create(Resource::new("pods", "default", "web-2")).await.unwrap();
        assert_eq!(read.await.unwrap().unwrap().len(), 2);

        backend.set_list_latency(None).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let pods = client
            .get_resource_enhanced("pods", "default", &LabelSelector::everything(), false)
            .await
            .unwrap();
        assert_eq!(pods.len(), 3, "list taken before the create must not stay cached");
        assert_eq!(backend.list_calls(), 2);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_dispatches_events_until_cancelled() {
        let backend = seeded_backend().await;
        let client = leading_client(&backend).await;
        let seen: Arc<StdMutex<Vec<(WatchEventType, String)>>> = Arc::new(StdMutex::new(Vec::new()));

        let cancel = CancellationToken::new();
        let sink = Arc::clone(&seen);
        client
            .watch_resource("pods", "default", cancel.clone(), move |event_type, resource: &Resource| {
                sink.lock().unwrap().push((event_type, resource.name.clone()));
            })
            .await
            .unwrap();

        client.create(Resource::new("pods", "default", "web-2")).await.unwrap();
        client.delete("pods", "default", "web-2").await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (WatchEventType::Added, "web-2".to_string()),
                (WatchEventType::Deleted, "web-2".to_string()),
            ]
        );

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(backend.open_watches().await, 0);

        client.create(Resource::new("pods", "default", "web-3")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ends_when_backend_closes() {
        let backend = seeded_backend().await;
        let client = ClusterClient::new(config(false), backend.clone()).unwrap();

        client
            .watch_resource("pods", "default", CancellationToken::new(), |_, _: &Resource| {})
            .await
            .unwrap();
        assert_eq!(backend.open_watches().await, 1);

        backend.close_watches().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        let watchers = client.watchers.lock().await;
        assert!(watchers.iter().all(|handle| handle.is_finished()));
        drop(watchers);
        client.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tears_everything_down() {
        let backend = seeded_backend().await;
        let client = leading_client(&backend).await;
        client
            .watch_resource("pods", "default", CancellationToken::new(), |_, _: &Resource| {})
            .await
            .unwrap();

        tokio::join!(client.stop(), client.stop());
        client.stop().await;

        assert!(!client.is_leader());
        assert_eq!(backend.open_watches().await, 0);
        assert_eq!(backend.lease_holder("wolfkube-leader", "default").await, None);
        assert!(matches!(
            client.get_resource_enhanced("pods", "default", &LabelSelector::everything(), false).await,
            Err(Error::ShuttingDown)
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_fails_fast() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut bad = config(true);
        bad.election.name.clear();
        assert!(matches!(ClusterClient::new(bad, backend.clone()), Err(Error::Config(_))));

        let mut bad = config(false);
        bad.cache.default_ttl_secs = 0;
        assert!(matches!(ClusterClient::new(bad, backend), Err(Error::Config(_))));
    }
}
