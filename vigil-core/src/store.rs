//! Coordination store abstraction.
//!
//! Vigil does not implement consensus itself; it assumes an external
//! linearizable key-value store offering compare-and-swap with lease expiry
//! (etcd-style semantics). Every cross-node decision flows through this
//! trait; no node ever assumes another node's state except through it.

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

/// A value read from the store together with its write version.
///
/// Versions are assigned by the store from a single monotonically increasing
/// sequence, which is what makes compare-and-swap meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedValue {
    pub value: String,
    pub version: u64,
    /// Lease expiry in epoch milliseconds, if the entry carries a lease.
    pub expires_at: Option<u64>,
}

/// Outcome of a compare-and-swap attempt.
///
/// `Conflict` is an expected race result, not an error: another writer won,
/// and the caller decides what to do next. It is never retried implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The swap committed; the entry now has this version.
    Committed { version: u64 },
    /// The expected version did not match current state.
    Conflict,
}

impl CasOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, CasOutcome::Committed { .. })
    }
}

/// A change observed through a prefix watch.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Put { key: String, value: VersionedValue },
    Deleted { key: String },
    /// The entry's lease ran out without renewal.
    Expired { key: String },
}

/// Linearizable key-value store with CAS and lease-TTL semantics.
///
/// All operations are linearizable with respect to each other. Store
/// unavailability surfaces as [`crate::VigilError::StoreUnavailable`] and
/// means "unknown state"; implementations must never report it as absence.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Write a value unconditionally, returning its new version. A `lease`
    /// bounds the entry's lifetime; it expires unless rewritten in time.
    async fn put(&self, key: &str, value: &str, lease: Option<Duration>) -> Result<u64>;

    /// Read a single key. Expired entries read as absent.
    async fn get(&self, key: &str) -> Result<Option<VersionedValue>>;

    /// Read all live entries under a key prefix.
    async fn list(&self, prefix: &str) -> Result<Vec<(String, VersionedValue)>>;

    /// Atomically replace the value iff the current version matches
    /// `expected_version`. `None` means the key must be absent (or expired).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &str,
        lease: Option<Duration>,
    ) -> Result<CasOutcome>;

    /// Remove a key. Returns whether a live entry existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Subscribe to changes under a key prefix.
    async fn watch(&self, prefix: &str) -> Result<mpsc::UnboundedReceiver<StoreEvent>>;
}
