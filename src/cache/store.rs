//! Expiring key/value store with a background sweep

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::CacheConfig;
use crate::error::Result;

type EntryMap<V> = HashMap<String, CacheEntry<V>>;

/// A cached value and the instant it stops being visible
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Concurrent TTL cache keyed by string
///
/// Readers never mutate the map; expired entries stay in memory until the
/// sweep task removes them. The sweep is started by [`ResourceCache::new`],
/// so construction must happen inside a Tokio runtime.
pub struct ResourceCache<V> {
    /// Entries, shared with the sweep task
    entries: Arc<RwLock<EntryMap<V>>>,
    /// Bumped by every invalidation, under the entries write lock
    generation: AtomicU64,
    /// Cache configuration
    config: CacheConfig,
    /// Shutdown signal for the sweep task
    shutdown: CancellationToken,
    /// Sweep task handle, taken by the first `stop`
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> ResourceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache and start its sweep task
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let entries: Arc<RwLock<EntryMap<V>>> = Arc::new(RwLock::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let sweeper = tokio::spawn(Self::sweep_loop(
            Arc::clone(&entries),
            config.sweep_interval,
            shutdown.clone(),
        ));

        tracing::debug!(
            "Resource cache started (ttl {:?}, sweep every {:?})",
            config.default_ttl,
            config.sweep_interval
        );

        Ok(Self {
            entries,
            generation: AtomicU64::new(0),
            config,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        })
    }

    /// Default TTL applied by `set(.., None)`
    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Store a value, replacing any previous entry under `key`
    ///
    /// A missing or zero `ttl` falls back to the default TTL.
    pub async fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + self.effective_ttl(ttl),
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => self.config.default_ttl,
        }
    }

    /// Get a value if present and not yet expired
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Return the cached value, or compute, store and return it
    ///
    /// Errors from `compute` are returned as-is and nothing is stored. A
    /// value computed while an invalidation ran is returned but not stored,
    /// since it may predate the write that caused the invalidation.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, ttl: Option<Duration>, compute: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let value = compute().await?;

        let mut entries = self.entries.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + self.effective_ttl(ttl),
                },
            );
        } else {
            tracing::debug!("Not caching '{}': invalidated while computing", key);
        }
        Ok(value)
    }

    /// Remove a single entry; returns whether one was present
    pub async fn invalidate(&self, key: &str) -> bool {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        entries.remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        before - entries.len()
    }

    /// Number of physically stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if nothing is physically stored
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Run one sweep pass now; returns the number of entries removed
    pub async fn sweep_expired(&self) -> usize {
        remove_expired(&self.entries).await
    }

    /// Check if `stop` has been requested
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stop the sweep task and wait for it to exit
    ///
    /// Safe to call repeatedly and concurrently.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.sweeper.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Cache sweep task ended abnormally: {}", e);
            }
            tracing::debug!("Resource cache stopped");
        }
    }

    /// Background sweep loop
    async fn sweep_loop(
        entries: Arc<RwLock<EntryMap<V>>>,
        period: Duration,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = remove_expired(&entries).await;
                    if removed > 0 {
                        tracing::debug!("Cache sweep removed {} expired entries", removed);
                    }
                }
            }
        }
    }
}

impl<V> Drop for ResourceCache<V> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Remove every entry with `expires_at <= now`
async fn remove_expired<V>(entries: &RwLock<EntryMap<V>>) -> usize {
    let now = Instant::now();
    let mut entries = entries.write().await;
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}
