//! # Core Types
//!
//! Fundamental types shared by every Vigil component: member identity and
//! state, the leader lease record, and the append-only failover audit event.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch.
///
/// All Vigil timestamps (heartbeats, lease expiries, audit events) use this
/// representation so that values round-trip through the coordination store
/// without precision loss.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Unique, operator-assigned identifier for a cluster member.
///
/// Member ids are ordinary strings (typically the node's hostname). Their
/// lexicographic ordering is load-bearing: candidate ranking breaks
/// log-position ties by smallest id so that every node computing the ranking
/// independently arrives at the same winner.
///
/// # Examples
///
/// ```rust
/// use vigil_core::MemberId;
///
/// let a = MemberId::new("pg-a");
/// let b = MemberId::new("pg-b");
/// assert!(a < b);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MemberId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Replication role of a cluster member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    /// The single writable node.
    Primary,
    /// A read-only node following the primary.
    Replica,
    /// A node currently contending for the leader lease.
    Candidate,
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRole::Primary => write!(f, "primary"),
            MemberRole::Replica => write!(f, "replica"),
            MemberRole::Candidate => write!(f, "candidate"),
        }
    }
}

/// Self-published liveness and replication state of one cluster member.
///
/// Each node writes its own record under `members/<id>` with a lease of
/// `lease_ttl`, refreshed every poll interval. A record that stops being
/// refreshed expires out of the store, which is how the rest of the cluster
/// learns the node is gone. A node whose local database is unreachable still
/// publishes its record with `healthy = false`, an explicit degraded state
/// distinguishable from "no data yet".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMember {
    pub id: MemberId,
    pub host: String,
    pub port: u16,
    pub role: MemberRole,
    /// Replicated write progress marker (LSN-like, monotonic).
    pub log_position: u64,
    /// Gap behind the known primary, in bytes.
    pub lag_bytes: u64,
    /// When this record was last refreshed, epoch milliseconds.
    pub last_heartbeat: u64,
    pub healthy: bool,
}

impl ClusterMember {
    /// Whether this member may stand for election under the given lag bound.
    ///
    /// Only healthy replicas within the lag threshold are candidates. Laggy
    /// replicas stay in the cluster as followers; they are excluded from
    /// candidacy only.
    pub fn is_eligible(&self, max_allowed_lag_bytes: u64) -> bool {
        self.healthy && self.role == MemberRole::Replica && self.lag_bytes <= max_allowed_lag_bytes
    }

    /// Connection address in `host:port` form, as handed to `demote`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The singleton leader lease record.
///
/// Mutated only through compare-and-swap on the coordination store. The term
/// increments strictly on every successful acquisition and never on renewal,
/// so two nodes can never both believe they hold the same term's lock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderLock {
    pub holder_id: MemberId,
    pub term: u64,
    /// Lease expiry, epoch milliseconds.
    pub lease_expiry: u64,
}

impl LeaderLock {
    pub fn is_expired(&self, now: u64) -> bool {
        self.lease_expiry <= now
    }
}

/// Why a leadership transition happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverReason {
    /// The previous leader's lease expired without renewal.
    LeaseExpired,
    /// The previous leader released the lock on graceful shutdown.
    VoluntaryResignation,
    /// An operator requested a switchover to a specific target.
    ManualSwitchover,
    /// The election winner's engine never converged to primary; the lock was
    /// released again.
    PromotionFailed,
}

impl fmt::Display for FailoverReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverReason::LeaseExpired => write!(f, "lease-expired"),
            FailoverReason::VoluntaryResignation => write!(f, "voluntary-resignation"),
            FailoverReason::ManualSwitchover => write!(f, "manual-switchover"),
            FailoverReason::PromotionFailed => write!(f, "promotion-failed"),
        }
    }
}

/// Append-only audit record of a leadership transition.
///
/// Written by whichever controller performed the transition; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailoverEvent {
    pub timestamp: u64,
    pub previous_leader: Option<MemberId>,
    pub new_leader: MemberId,
    pub reason: FailoverReason,
    pub term: u64,
}

/// Snapshot of the local database engine as reported by a health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub role: MemberRole,
    pub log_position: u64,
    pub lag_bytes: u64,
    /// Whether the engine is accepting connections and serving its role.
    pub ready: bool,
}
