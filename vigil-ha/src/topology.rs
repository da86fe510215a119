//! Cluster topology aggregation and failover candidate ranking.
//!
//! The topology manager turns the store's raw member records into a
//! consistent [`ClusterView`] and ranks replicas for promotion. Ranking is a
//! pure function so that every node computing it independently over the same
//! view reaches the same answer: eligible replicas ordered by highest log
//! position, ties broken by lexicographically smallest id.

use std::cmp::Reverse;
use vigil_core::{
    now_ms, ClusterConfig, ClusterMember, LeaderLock, MemberId, Result, VigilError,
};
use vigil_store::CoordClient;

/// A point-in-time aggregation of member records and the leader lock.
#[derive(Debug, Clone)]
pub struct ClusterView {
    pub members: Vec<ClusterMember>,
    pub lock: Option<LeaderLock>,
    pub lock_version: Option<u64>,
    /// When the view was assembled, epoch milliseconds.
    pub observed_at: u64,
}

impl ClusterView {
    pub fn member(&self, id: &MemberId) -> Option<&ClusterMember> {
        self.members.iter().find(|m| &m.id == id)
    }

    /// Members whose record is live and reports `healthy = true`.
    pub fn healthy_members(&self) -> Vec<&ClusterMember> {
        self.members.iter().filter(|m| m.healthy).collect()
    }

    /// Whether the leader lease is absent or ran out as of this view.
    pub fn lock_expired(&self) -> bool {
        match &self.lock {
            Some(lock) => lock.is_expired(self.observed_at),
            None => true,
        }
    }
}

/// Rank eligible failover candidates.
///
/// Eligible: healthy replicas with `lag_bytes` within the threshold.
/// Ordering: highest `log_position` first, then smallest id. Replicas over
/// the threshold are excluded from candidacy only; they remain followers of
/// whatever leader is chosen.
pub fn rank_candidates(members: &[ClusterMember], max_allowed_lag_bytes: u64) -> Vec<ClusterMember> {
    let mut candidates: Vec<ClusterMember> = members
        .iter()
        .filter(|m| m.is_eligible(max_allowed_lag_bytes))
        .cloned()
        .collect();
    candidates.sort_by_key(|m| (Reverse(m.log_position), m.id.clone()));
    candidates
}

/// Aggregates published health records into consistent views and answers
/// candidacy and quorum questions.
pub struct TopologyManager {
    client: CoordClient,
    config: ClusterConfig,
}

impl TopologyManager {
    pub fn new(client: CoordClient, config: ClusterConfig) -> Self {
        Self { client, config }
    }

    /// Assemble a fresh view from the store.
    pub async fn snapshot(&self) -> Result<ClusterView> {
        let members = self.client.members().await?;
        let lock = self.client.leader_lock().await?;
        let (lock, lock_version) = match lock {
            Some((lock, version)) => (Some(lock), Some(version)),
            None => (None, None),
        };
        Ok(ClusterView {
            members,
            lock,
            lock_version,
            observed_at: now_ms(),
        })
    }

    /// Eligible candidates for this view, best first.
    pub fn ranked(&self, view: &ClusterView) -> Vec<ClusterMember> {
        rank_candidates(&view.members, self.config.max_allowed_lag_bytes)
    }

    /// The member that should win the next election.
    ///
    /// An active switchover hint moves its target to the front, but only if
    /// the target is otherwise eligible: a hint can bias an election, never
    /// unlock an unsafe promotion. With no eligible candidate at all the
    /// result is `NoEligibleCandidate`: the caller must not fail over.
    pub async fn election_candidate(&self, view: &ClusterView) -> Result<ClusterMember> {
        let ranked = self.ranked(view);
        if ranked.is_empty() {
            return Err(VigilError::NoEligibleCandidate {
                reason: format!(
                    "{} members, none are healthy replicas within {} lag bytes",
                    view.members.len(),
                    self.config.max_allowed_lag_bytes
                ),
            });
        }
        if let Some(target) = self.client.switchover_hint().await? {
            if let Some(hinted) = ranked.iter().find(|m| m.id == target) {
                return Ok(hinted.clone());
            }
        }
        Ok(ranked[0].clone())
    }

    pub fn has_quorum(&self, view: &ClusterView) -> bool {
        view.healthy_members().len() >= self.config.quorum_size
    }

    /// Reject administrative decisions taken without quorum.
    pub fn require_quorum(&self, view: &ClusterView) -> Result<()> {
        let healthy = view.healthy_members().len();
        if healthy < self.config.quorum_size {
            return Err(VigilError::NoQuorum {
                healthy,
                required: self.config.quorum_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;
    use vigil_core::MemberRole;
    use vigil_store::MemoryStore;

    fn replica(id: &str, log_position: u64, lag_bytes: u64) -> ClusterMember {
        ClusterMember {
            id: MemberId::new(id),
            host: "localhost".to_string(),
            port: 5432,
            role: MemberRole::Replica,
            log_position,
            lag_bytes,
            last_heartbeat: now_ms(),
            healthy: true,
        }
    }

    fn manager() -> (TopologyManager, CoordClient) {
        let client = CoordClient::new(Arc::new(MemoryStore::new()));
        let config = ClusterConfig::default().with_max_allowed_lag_bytes(1_000);
        (TopologyManager::new(client.clone(), config), client)
    }

    #[test]
    fn test_ranking_prefers_highest_position() {
        let ranked = rank_candidates(&[replica("a", 100, 0), replica("b", 120, 0)], 1_000);
        assert_eq!(ranked[0].id, MemberId::new("b"));
        assert_eq!(ranked[1].id, MemberId::new("a"));
    }

    #[test]
    fn test_ranking_tie_breaks_on_smallest_id() {
        let ranked = rank_candidates(&[replica("b", 100, 0), replica("a", 100, 0)], 1_000);
        assert_eq!(ranked[0].id, MemberId::new("a"));
    }

    #[test]
    fn test_laggy_and_unhealthy_excluded() {
        let mut unhealthy = replica("c", 500, 0);
        unhealthy.healthy = false;
        let mut primary = replica("p", 900, 0);
        primary.role = MemberRole::Primary;

        let ranked = rank_candidates(
            &[replica("a", 100, 0), replica("b", 800, 5_000), unhealthy, primary],
            1_000,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, MemberId::new("a"));
    }

    #[tokio::test]
    async fn test_no_eligible_candidate() {
        let (manager, client) = manager();
        client
            .publish_member(&replica("a", 100, 50_000), Duration::from_secs(10))
            .await
            .unwrap();

        let view = manager.snapshot().await.unwrap();
        let err = manager.election_candidate(&view).await.unwrap_err();
        assert!(matches!(err, VigilError::NoEligibleCandidate { .. }));
    }

    #[tokio::test]
    async fn test_hint_biases_only_eligible_targets() {
        let (manager, client) = manager();
        client
            .publish_member(&replica("a", 100, 0), Duration::from_secs(10))
            .await
            .unwrap();
        client
            .publish_member(&replica("b", 120, 0), Duration::from_secs(10))
            .await
            .unwrap();

        let view = manager.snapshot().await.unwrap();
        assert_eq!(
            manager.election_candidate(&view).await.unwrap().id,
            MemberId::new("b")
        );

        // Hint toward the lower-positioned but eligible member wins.
        client
            .publish_switchover_hint(&MemberId::new("a"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            manager.election_candidate(&view).await.unwrap().id,
            MemberId::new("a")
        );

        // Hint toward an ineligible member is ignored.
        client
            .publish_switchover_hint(&MemberId::new("missing"), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(
            manager.election_candidate(&view).await.unwrap().id,
            MemberId::new("b")
        );
    }

    #[tokio::test]
    async fn test_quorum() {
        let (manager, client) = manager();
        client
            .publish_member(&replica("a", 100, 0), Duration::from_secs(10))
            .await
            .unwrap();

        let view = manager.snapshot().await.unwrap();
        assert!(!manager.has_quorum(&view));
        assert!(matches!(
            manager.require_quorum(&view),
            Err(VigilError::NoQuorum {
                healthy: 1,
                required: 2
            })
        ));

        client
            .publish_member(&replica("b", 100, 0), Duration::from_secs(10))
            .await
            .unwrap();
        let view = manager.snapshot().await.unwrap();
        assert!(manager.has_quorum(&view));
    }

    proptest! {
        // The promoted candidate always carries the maximum log position
        // among eligible members, and over-lag replicas never rank.
        #[test]
        fn prop_top_candidate_has_max_position(
            specs in proptest::collection::vec((0u64..10_000, 0u64..5_000), 0..12)
        ) {
            let max_lag = 1_000u64;
            let members: Vec<ClusterMember> = specs
                .iter()
                .enumerate()
                .map(|(i, (pos, lag))| replica(&format!("m{i:02}"), *pos, *lag))
                .collect();

            let ranked = rank_candidates(&members, max_lag);
            for candidate in &ranked {
                prop_assert!(candidate.lag_bytes <= max_lag);
            }
            if let Some(top) = ranked.first() {
                let best = members
                    .iter()
                    .filter(|m| m.is_eligible(max_lag))
                    .map(|m| m.log_position)
                    .max()
                    .unwrap();
                prop_assert_eq!(top.log_position, best);
            }
        }
    }
}
