//! Leadership transition hooks

use super::FencingToken;

/// Callbacks invoked by the elector on role transitions
///
/// `on_started_leading` fires exactly once per acquisition, before
/// `is_leader()` starts returning true. `on_stopped_leading` fires exactly
/// once per loss, before `is_leader()` returns false again. Hooks run on the
/// election task and must not block.
pub trait LeadershipHooks: Send + Sync {
    /// This process acquired the lease
    fn on_started_leading(&self, _token: FencingToken) {}

    /// This process lost or released the lease
    fn on_stopped_leading(&self) {}

    /// A different holder was observed (including this process)
    fn on_new_leader(&self, _identity: &str) {}
}

/// Hooks that do nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LeadershipHooks for NoopHooks {}
