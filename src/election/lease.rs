//! Lease and fencing types shared with the backend

use std::time::Duration;
use serde::{Deserialize, Serialize};

/// Monotonically increasing value attached to each lease acquisition
///
/// A new token is issued whenever the lease changes hands; renewals by the
/// same holder keep their token. Writers present it so the backend can
/// reject writes from a former leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FencingToken(pub u64);

impl FencingToken {
    /// Token value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// The token issued after this one
    pub fn next(&self) -> Self {
        FencingToken(self.0 + 1)
    }
}

impl std::fmt::Display for FencingToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Acquire-or-renew request for a named lease
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseRequest {
    /// Election name
    pub name: String,
    /// Namespace holding the lease record
    pub namespace: String,
    /// Identity written as holder
    pub holder_identity: String,
    /// Validity of the lease from this write
    pub lease_duration: Duration,
}

/// Successful acquisition or renewal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Token for this holder's current term
    pub fencing_token: FencingToken,
    /// Number of times the lease has changed hands
    pub lease_transitions: u32,
}

/// Result of an acquire-or-renew attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The caller holds the lease
    Granted(LeaseGrant),
    /// Another holder has a live lease
    Held { holder: String },
}

/// Proof of leadership attached to every mutating backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fence {
    /// Election name the token was issued for
    pub election: String,
    /// Namespace holding the lease record
    pub namespace: String,
    /// Token held by the writer
    pub token: FencingToken,
}
