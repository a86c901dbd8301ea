//! Leader Election Module
//!
//! Lease-based, single-winner leader election. Arbitration between
//! processes happens in the backend's compare-and-write on the lease
//! record; this module only drives the local state machine on top of it.

mod elector;
mod hooks;
mod lease;

pub use elector::LeaderElector;
pub use hooks::{LeadershipHooks, NoopHooks};
pub use lease::{Fence, FencingToken, LeaseGrant, LeaseOutcome, LeaseRequest};

use std::time::Duration;

use crate::error::{Error, Result};

/// Runtime election configuration
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Name of the shared lease record
    pub name: String,
    /// Namespace holding the lease record
    pub namespace: String,
    /// Identity written as lease holder
    pub holder_identity: String,
    /// How long a lease stays valid without renewal
    pub lease_duration: Duration,
    /// How long the leader retries renewal before stepping down
    pub renew_deadline: Duration,
    /// Interval between acquire/renew attempts
    pub retry_period: Duration,
}

impl ElectionConfig {
    /// Create a configuration with the default 15s / 10s / 2s timings
    pub fn new(name: impl Into<String>, holder_identity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: "default".to_string(),
            holder_identity: holder_identity.into(),
            lease_duration: Duration::from_secs(15),
            renew_deadline: Duration::from_secs(10),
            retry_period: Duration::from_secs(2),
        }
    }

    /// Validate names and timing relationships
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Config("election name cannot be empty".into()));
        }
        if self.holder_identity.is_empty() {
            return Err(Error::Config("holder identity cannot be empty".into()));
        }
        if self.retry_period.is_zero() {
            return Err(Error::Config("retry period must be positive".into()));
        }
        if self.renew_deadline >= self.lease_duration {
            return Err(Error::Config(format!(
                "renew deadline ({:?}) must be shorter than lease duration ({:?})",
                self.renew_deadline, self.lease_duration
            )));
        }
        if self.retry_period >= self.renew_deadline {
            return Err(Error::Config(format!(
                "retry period ({:?}) must be shorter than renew deadline ({:?})",
                self.retry_period, self.renew_deadline
            )));
        }
        Ok(())
    }

    /// Build the backend request for this participant
    pub fn lease_request(&self) -> LeaseRequest {
        LeaseRequest {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
            holder_identity: self.holder_identity.clone(),
            lease_duration: self.lease_duration,
        }
    }
}

/// Current role of this process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipState {
    /// Not holding the lease
    Follower,
    /// Attempting to acquire the lease
    Candidate,
    /// Holding the lease under the given token
    Leader { fencing_token: FencingToken },
}

impl LeadershipState {
    /// Check if this is the leader state
    pub fn is_leader(&self) -> bool {
        matches!(self, LeadershipState::Leader { .. })
    }

    /// Token held while leader
    pub fn fencing_token(&self) -> Option<FencingToken> {
        match self {
            LeadershipState::Leader { fencing_token } => Some(*fencing_token),
            _ => None,
        }
    }
}

impl std::fmt::Display for LeadershipState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeadershipState::Follower => write!(f, "FOLLOWER"),
            LeadershipState::Candidate => write!(f, "CANDIDATE"),
            LeadershipState::Leader { .. } => write!(f, "LEADER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timings_are_valid() {
        assert!(ElectionConfig::new("leader", "pod-a").validate().is_ok());
    }

    #[test]
    fn test_timing_invariants() {
        let mut config = ElectionConfig::new("leader", "pod-a");
        config.renew_deadline = config.lease_duration;
        assert!(config.validate().is_err());

        let mut config = ElectionConfig::new("leader", "pod-a");
        config.retry_period = config.renew_deadline;
        assert!(config.validate().is_err());

        assert!(ElectionConfig::new("", "pod-a").validate().is_err());
        assert!(ElectionConfig::new("leader", "").validate().is_err());
    }

    #[test]
    fn test_state_accessors() {
        let leader = LeadershipState::Leader { fencing_token: FencingToken(3) };
        assert!(leader.is_leader());
        assert_eq!(leader.fencing_token(), Some(FencingToken(3)));
        assert!(!LeadershipState::Candidate.is_leader());
        assert_eq!(LeadershipState::Follower.fencing_token(), None);
    }
}
