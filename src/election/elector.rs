//! Lease-based leader elector
//!
//! Drives Follower -> Candidate -> Leader -> Follower transitions on top of
//! the backend's acquire-or-renew call. Only the backend arbitrates between
//! processes; the local role is published through a watch channel so any
//! number of readers can check it without blocking the election loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{
    ElectionConfig, FencingToken, LeadershipHooks, LeadershipState, LeaseOutcome, NoopHooks,
};
use crate::backend::ClusterBackend;
use crate::error::{Error, Result};

/// Why a leadership term ended
enum TermEnd {
    /// Renewal did not succeed within the renew deadline
    Lost,
    /// Stop was requested while leading
    Shutdown,
}

/// Participant in a named leader election
pub struct LeaderElector {
    /// Election configuration
    config: ElectionConfig,
    /// Backend holding the lease record
    backend: Arc<dyn ClusterBackend>,
    /// Transition hooks
    hooks: Arc<dyn LeadershipHooks>,
    /// Current role
    state: watch::Sender<LeadershipState>,
    /// Last observed lease holder
    observed_leader: watch::Sender<Option<String>>,
    /// Set while the election loop runs
    running: AtomicBool,
    /// Stop signal for the election loop
    shutdown: CancellationToken,
    /// Election task spawned by `start`
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    /// Create an elector; nothing runs until `start` or `run`
    pub fn new(config: ElectionConfig, backend: Arc<dyn ClusterBackend>) -> Result<Self> {
        config.validate()?;

        let (state, _) = watch::channel(LeadershipState::Follower);
        let (observed_leader, _) = watch::channel(None);

        Ok(Self {
            config,
            backend,
            hooks: Arc::new(NoopHooks),
            state,
            observed_leader,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Install transition hooks
    pub fn with_hooks(mut self, hooks: Arc<dyn LeadershipHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Identity written into the lease
    pub fn identity(&self) -> &str {
        &self.config.holder_identity
    }

    /// Election configuration
    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Current role
    pub fn state(&self) -> LeadershipState {
        *self.state.borrow()
    }

    /// Check if this process currently leads; never blocks
    pub fn is_leader(&self) -> bool {
        self.state.borrow().is_leader()
    }

    /// Token for the current term, if leading
    pub fn fencing_token(&self) -> Option<FencingToken> {
        self.state.borrow().fencing_token()
    }

    /// Holder identity last seen on the lease record
    pub fn current_leader(&self) -> Option<String> {
        self.observed_leader.borrow().clone()
    }

    /// Receive every role change
    pub fn subscribe(&self) -> watch::Receiver<LeadershipState> {
        self.state.subscribe()
    }

    /// Spawn the election loop on the runtime; repeated calls are no-ops
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let mut task = self.task.lock().await;
        if task.is_some() {
            return Ok(());
        }

        let elector = Arc::clone(self);
        *task = Some(tokio::spawn(async move { elector.run().await }));
        Ok(())
    }

    /// Run the election loop until `stop` is called
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Election '{}' is already running", self.config.name);
            return;
        }

        tracing::info!(
            "Joining leader election '{}' as {}",
            self.config.name,
            self.config.holder_identity
        );

        while !self.shutdown.is_cancelled() {
            self.publish(LeadershipState::Candidate);

            let sent_at = Instant::now();
            match self.try_acquire_or_renew().await {
                Ok(LeaseOutcome::Granted(grant)) => {
                    self.observe_leader(&self.config.holder_identity);
                    self.become_leader(grant.fencing_token);

                    let end = self.hold_leadership(grant.fencing_token, sent_at).await;
                    // Step down before releasing: a peer can be granted the lease as soon as it is free
                    self.step_down();
                    if let TermEnd::Shutdown = end {
                        self.release().await;
                        break;
                    }
                }
                Ok(LeaseOutcome::Held { holder }) => {
                    self.observe_leader(&holder);
                    self.publish(LeadershipState::Follower);
                }
                Err(e) => {
                    tracing::debug!("Lease acquisition for '{}' failed: {}", self.config.name, e);
                    self.publish(LeadershipState::Follower);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.jittered_retry_period()) => {}
            }
        }

        self.publish(LeadershipState::Follower);
        tracing::info!("Left leader election '{}'", self.config.name);
    }

    /// Stop the election, releasing the lease if held
    ///
    /// Safe to call repeatedly and concurrently.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!("Election task ended abnormally: {}", e);
            }
        }
    }

    /// Renew on every retry period until the renew deadline is missed or stop is requested
    ///
    /// `acquired_at` is when the granting request was sent. The deadline is
    /// measured from the send time of the last successful request, which is
    /// never later than the backend's own renewal timestamp.
    async fn hold_leadership(&self, mut token: FencingToken, acquired_at: Instant) -> TermEnd {
        let period = self.config.retry_period;
        let deadline = self.config.renew_deadline;
        let mut last_renewed = acquired_at;
        let mut ticker = tokio::time::interval_at(acquired_at + period, period);

        loop {
            let renew_by = last_renewed + deadline;
            tokio::select! {
                _ = self.shutdown.cancelled() => return TermEnd::Shutdown,
                _ = tokio::time::sleep_until(renew_by) => break,
                _ = ticker.tick() => {}
            }

            let remaining = renew_by.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let attempt = Instant::now();
            match tokio::time::timeout(remaining, self.backend.acquire_or_renew_lease(&self.config.lease_request())).await {
                Ok(Ok(LeaseOutcome::Granted(grant))) => {
                    last_renewed = attempt;
                    if grant.fencing_token != token {
                        token = grant.fencing_token;
                        self.publish(LeadershipState::Leader { fencing_token: token });
                    }
                    tracing::trace!("Renewed lease '{}' (token {})", self.config.name, token);
                }
                Ok(Ok(LeaseOutcome::Held { holder })) => {
                    tracing::warn!("Lease '{}' is held by {} during renewal", self.config.name, holder);
                    self.observe_leader(&holder);
                }
                Ok(Err(e)) => {
                    tracing::warn!("Failed to renew lease '{}': {}", self.config.name, e);
                }
                Err(_) => {
                    tracing::warn!("Renewal of lease '{}' timed out", self.config.name);
                }
            }

            if Instant::now() >= last_renewed + deadline {
                break;
            }
        }

        tracing::warn!(
            "Renew deadline of {:?} exceeded for lease '{}'",
            deadline,
            self.config.name
        );
        TermEnd::Lost
    }

    async fn try_acquire_or_renew(&self) -> Result<LeaseOutcome> {
        let request = self.config.lease_request();
        tokio::time::timeout(
            self.config.renew_deadline,
            self.backend.acquire_or_renew_lease(&request),
        )
        .await
        .map_err(|_| Error::Timeout(format!("acquire lease '{}'", self.config.name)))?
    }

    async fn release(&self) {
        let result = tokio::time::timeout(
            self.config.renew_deadline,
            self.backend.release_lease(
                &self.config.name,
                &self.config.namespace,
                &self.config.holder_identity,
            ),
        )
        .await;

        match result {
            Ok(Ok(())) => tracing::info!("Released lease '{}'", self.config.name),
            Ok(Err(e)) => tracing::warn!("Failed to release lease '{}': {}", self.config.name, e),
            Err(_) => tracing::warn!("Release of lease '{}' timed out", self.config.name),
        }
    }

    fn become_leader(&self, token: FencingToken) {
        tracing::info!(
            "{} is now LEADER of '{}' (token {})",
            self.config.holder_identity,
            self.config.name,
            token
        );
        self.hooks.on_started_leading(token);
        self.publish(LeadershipState::Leader { fencing_token: token });
    }

    fn step_down(&self) {
        tracing::info!(
            "{} is no longer leader of '{}'",
            self.config.holder_identity,
            self.config.name
        );
        self.hooks.on_stopped_leading();
        self.publish(LeadershipState::Follower);
    }

    fn publish(&self, state: LeadershipState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn observe_leader(&self, holder: &str) {
        let changed = self.observed_leader.send_if_modified(|current| {
            if current.as_deref() == Some(holder) {
                false
            } else {
                *current = Some(holder.to_string());
                true
            }
        });

        if changed {
            tracing::info!("Observed new leader '{}' for '{}'", holder, self.config.name);
            self.hooks.on_new_leader(holder);
        }
    }

    /// Retry period plus up to 20% jitter
    fn jittered_retry_period(&self) -> Duration {
        let base = self.config.retry_period;
        let max_jitter_ms = (base.as_millis() / 5) as u64;
        if max_jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
    }
}

impl Drop for LeaderElector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
