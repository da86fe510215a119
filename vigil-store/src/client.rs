//! Typed coordination-store client.
//!
//! `CoordClient` owns the cluster key schema and the JSON encoding of every
//! record Vigil keeps in the store. Higher layers never touch raw keys. The
//! client performs no implicit retries: a CAS conflict is returned to the
//! caller, who decides.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vigil_core::store::{CasOutcome, CoordinationStore, StoreEvent};
use vigil_core::{ClusterMember, FailoverEvent, FailoverReason, LeaderLock, MemberId, Result};

/// Key of the singleton leader lease record.
pub const LEADER_KEY: &str = "leader";
/// Prefix for self-published member records.
pub const MEMBER_PREFIX: &str = "members/";
/// Prefix for the append-only failover audit log, one entry per term.
pub const EVENT_PREFIX: &str = "events/";
/// Short-lived switchover bias, read by every elector.
pub const SWITCHOVER_HINT_KEY: &str = "hints/switchover";
/// Short-lived marker left by a resigning leader so the successor records
/// the right transition reason.
pub const RESIGNATION_HINT_KEY: &str = "hints/resignation";

fn member_key(id: &MemberId) -> String {
    format!("{MEMBER_PREFIX}{id}")
}

fn event_key(term: u64) -> String {
    // Zero-padded so key order equals term order.
    format!("{EVENT_PREFIX}{term:020}")
}

#[derive(Debug, Serialize, Deserialize)]
struct SwitchoverHint {
    target_id: MemberId,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResignationHint {
    reason: FailoverReason,
}

/// Typed wrapper over a [`CoordinationStore`].
#[derive(Clone)]
pub struct CoordClient {
    store: Arc<dyn CoordinationStore>,
}

impl CoordClient {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self { store }
    }

    /// Write this node's member record with the given lease.
    pub async fn publish_member(&self, member: &ClusterMember, lease: Duration) -> Result<()> {
        let payload = serde_json::to_string(member)?;
        self.store
            .put(&member_key(&member.id), &payload, Some(lease))
            .await?;
        Ok(())
    }

    /// Read one member record, if its lease is still live.
    pub async fn member(&self, id: &MemberId) -> Result<Option<ClusterMember>> {
        match self.store.get(&member_key(id)).await? {
            Some(v) => Ok(Some(serde_json::from_str(&v.value)?)),
            None => Ok(None),
        }
    }

    /// Read all live member records.
    pub async fn members(&self) -> Result<Vec<ClusterMember>> {
        let mut members = Vec::new();
        for (_, v) in self.store.list(MEMBER_PREFIX).await? {
            members.push(serde_json::from_str(&v.value)?);
        }
        Ok(members)
    }

    /// Subscribe to member record changes.
    pub async fn watch_members(&self) -> Result<mpsc::UnboundedReceiver<StoreEvent>> {
        self.store.watch(MEMBER_PREFIX).await
    }

    /// Read the leader lock and its store version, if present and unexpired.
    pub async fn leader_lock(&self) -> Result<Option<(LeaderLock, u64)>> {
        match self.store.get(LEADER_KEY).await? {
            Some(v) => {
                let lock: LeaderLock = serde_json::from_str(&v.value)?;
                Ok(Some((lock, v.version)))
            }
            None => Ok(None),
        }
    }

    /// Attempt to write the leader lock via CAS. Used for both acquisition
    /// (new term, `expected_version` of the observed entry or `None`) and
    /// renewal (same term, this holder's own version). Never retried here.
    pub async fn cas_leader_lock(
        &self,
        lock: &LeaderLock,
        expected_version: Option<u64>,
        lease: Duration,
    ) -> Result<CasOutcome> {
        let payload = serde_json::to_string(lock)?;
        self.store
            .compare_and_swap(LEADER_KEY, expected_version, &payload, Some(lease))
            .await
    }

    /// Explicitly release the leader lock. Best-effort: if the delete fails
    /// the lease still expires naturally within its TTL.
    pub async fn release_leader_lock(&self) -> Result<bool> {
        self.store.delete(LEADER_KEY).await
    }

    /// Append a failover audit record. Keyed by term, written with an
    /// expected-absent CAS so a second write for the same term surfaces as
    /// a conflict instead of silently overwriting history.
    pub async fn append_event(&self, event: &FailoverEvent) -> Result<CasOutcome> {
        let payload = serde_json::to_string(event)?;
        self.store
            .compare_and_swap(&event_key(event.term), None, &payload, None)
            .await
    }

    /// All failover events, ordered by term.
    pub async fn events(&self) -> Result<Vec<FailoverEvent>> {
        let mut events = Vec::new();
        for (_, v) in self.store.list(EVENT_PREFIX).await? {
            events.push(serde_json::from_str(&v.value)?);
        }
        events.sort_by_key(|e: &FailoverEvent| e.term);
        Ok(events)
    }

    /// Most recent failover event, if any. The term history survives lock
    /// expiry, so the next election derives its term from here when the
    /// lock entry itself is gone.
    pub async fn latest_event(&self) -> Result<Option<FailoverEvent>> {
        Ok(self.events().await?.into_iter().last())
    }

    /// Publish a switchover bias toward `target`, visible to every elector
    /// for one lease window.
    pub async fn publish_switchover_hint(
        &self,
        target: &MemberId,
        lease: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_string(&SwitchoverHint {
            target_id: target.clone(),
        })?;
        self.store
            .put(SWITCHOVER_HINT_KEY, &payload, Some(lease))
            .await?;
        Ok(())
    }

    pub async fn switchover_hint(&self) -> Result<Option<MemberId>> {
        match self.store.get(SWITCHOVER_HINT_KEY).await? {
            Some(v) => {
                let hint: SwitchoverHint = serde_json::from_str(&v.value)?;
                Ok(Some(hint.target_id))
            }
            None => Ok(None),
        }
    }

    pub async fn clear_switchover_hint(&self) -> Result<()> {
        self.store.delete(SWITCHOVER_HINT_KEY).await?;
        Ok(())
    }

    /// Leave a marker explaining a deliberate lock release, so the successor
    /// records `VoluntaryResignation`/`ManualSwitchover` instead of
    /// `LeaseExpired`.
    pub async fn publish_resignation_hint(
        &self,
        reason: FailoverReason,
        lease: Duration,
    ) -> Result<()> {
        let payload = serde_json::to_string(&ResignationHint { reason })?;
        self.store
            .put(RESIGNATION_HINT_KEY, &payload, Some(lease))
            .await?;
        Ok(())
    }

    pub async fn resignation_hint(&self) -> Result<Option<FailoverReason>> {
        match self.store.get(RESIGNATION_HINT_KEY).await? {
            Some(v) => {
                let hint: ResignationHint = serde_json::from_str(&v.value)?;
                Ok(Some(hint.reason))
            }
            None => Ok(None),
        }
    }

    pub async fn clear_resignation_hint(&self) -> Result<()> {
        self.store.delete(RESIGNATION_HINT_KEY).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use vigil_core::{now_ms, MemberRole};

    fn client() -> CoordClient {
        CoordClient::new(Arc::new(MemoryStore::new()))
    }

    fn member(id: &str, log_position: u64) -> ClusterMember {
        ClusterMember {
            id: MemberId::new(id),
            host: "localhost".to_string(),
            port: 5432,
            role: MemberRole::Replica,
            log_position,
            lag_bytes: 0,
            last_heartbeat: now_ms(),
            healthy: true,
        }
    }

    #[tokio::test]
    async fn test_member_publish_and_list() {
        let client = client();
        client
            .publish_member(&member("pg-b", 120), Duration::from_secs(10))
            .await
            .unwrap();
        client
            .publish_member(&member("pg-a", 100), Duration::from_secs(10))
            .await
            .unwrap();

        let members = client.members().await.unwrap();
        assert_eq!(members.len(), 2);
        // List order follows key order.
        assert_eq!(members[0].id, MemberId::new("pg-a"));

        let one = client.member(&MemberId::new("pg-b")).await.unwrap();
        assert_eq!(one.unwrap().log_position, 120);
    }

    #[tokio::test]
    async fn test_lock_acquire_then_renew_keeps_term() {
        let client = client();
        let lock = LeaderLock {
            holder_id: MemberId::new("pg-a"),
            term: 1,
            lease_expiry: now_ms() + 10_000,
        };
        let outcome = client
            .cas_leader_lock(&lock, None, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.is_committed());

        let (read, version) = client.leader_lock().await.unwrap().unwrap();
        assert_eq!(read.term, 1);

        // Renewal: same term, new expiry, CAS against our own version.
        let renewed = LeaderLock {
            lease_expiry: now_ms() + 10_000,
            ..lock
        };
        let outcome = client
            .cas_leader_lock(&renewed, Some(version), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(outcome.is_committed());
        let (read, _) = client.leader_lock().await.unwrap().unwrap();
        assert_eq!(read.term, 1);
    }

    #[tokio::test]
    async fn test_lock_contention_single_winner() {
        let client = client();
        let a = LeaderLock {
            holder_id: MemberId::new("pg-a"),
            term: 1,
            lease_expiry: now_ms() + 10_000,
        };
        let b = LeaderLock {
            holder_id: MemberId::new("pg-b"),
            term: 1,
            lease_expiry: now_ms() + 10_000,
        };

        let first = client
            .cas_leader_lock(&a, None, Duration::from_secs(10))
            .await
            .unwrap();
        let second = client
            .cas_leader_lock(&b, None, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(first.is_committed());
        assert_eq!(second, CasOutcome::Conflict);

        let (read, _) = client.leader_lock().await.unwrap().unwrap();
        assert_eq!(read.holder_id, MemberId::new("pg-a"));
    }

    #[tokio::test]
    async fn test_event_log_ordered_and_term_unique() {
        let client = client();
        let mk = |term: u64| FailoverEvent {
            timestamp: now_ms(),
            previous_leader: None,
            new_leader: MemberId::new("pg-a"),
            reason: FailoverReason::LeaseExpired,
            term,
        };

        assert!(client.append_event(&mk(2)).await.unwrap().is_committed());
        assert!(client.append_event(&mk(1)).await.unwrap().is_committed());
        // Same term again is a conflict, never an overwrite.
        assert_eq!(
            client.append_event(&mk(2)).await.unwrap(),
            CasOutcome::Conflict
        );

        let events = client.events().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].term, 1);
        assert_eq!(client.latest_event().await.unwrap().unwrap().term, 2);
    }

    #[tokio::test]
    async fn test_hints_roundtrip_and_clear() {
        let client = client();
        client
            .publish_switchover_hint(&MemberId::new("pg-a"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            client.switchover_hint().await.unwrap(),
            Some(MemberId::new("pg-a"))
        );
        client.clear_switchover_hint().await.unwrap();
        assert_eq!(client.switchover_hint().await.unwrap(), None);

        client
            .publish_resignation_hint(FailoverReason::VoluntaryResignation, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            client.resignation_hint().await.unwrap(),
            Some(FailoverReason::VoluntaryResignation)
        );
        client.clear_resignation_hint().await.unwrap();
        assert_eq!(client.resignation_hint().await.unwrap(), None);
    }
}
