//! The failover state machine.
//!
//! Each node runs one `FailoverController` that contends for the leader
//! lease, promotes the local engine on acquisition, renews while leading,
//! and fences itself the moment it can no longer prove it holds a valid
//! lease of the current term. Leadership is never represented by in-process
//! state alone: the coordination store's compare-and-swap is the only
//! arbiter, and the local [`ControllerState`] is a cache of the last proven
//! fact about it.
//!
//! The state machine itself is a closed enum with a pure
//! [`transition`] function of `(state, event)`; the async driver evaluates
//! events against the store and performs the side effects the transitions
//! call for.

use crate::notifications::NotificationBus;
use crate::topology::TopologyManager;
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vigil_core::engine::DatabaseEngine;
use vigil_core::store::CasOutcome;
use vigil_core::{
    now_ms, ClusterConfig, FailoverEvent, FailoverReason, LeaderLock, MemberId, MemberRole,
    Result, VigilError,
};
use vigil_store::CoordClient;

/// Election state of this node's controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Not holding the lease; watching it.
    Follower,
    /// Contending for the lease in the given term.
    Candidate { term: u64 },
    /// Holding a valid lease of the given term.
    Leader { term: u64 },
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Follower => write!(f, "follower"),
            ControllerState::Candidate { term } => write!(f, "candidate(term={term})"),
            ControllerState::Leader { term } => write!(f, "leader(term={term})"),
        }
    }
}

/// Facts the driver establishes by observing the store, the topology and
/// the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerEvent {
    /// Lock absent or expired, and this node is the top-ranked candidate.
    LeaseAvailable { next_term: u64 },
    /// A valid lock held by another node was observed.
    LeaderObserved,
    /// Our acquisition CAS committed.
    CasWon,
    /// Another node won the acquisition race.
    CasLost,
    /// The engine confirmed the primary role after promotion.
    PromotionConverged,
    /// The engine never converged within the verify window.
    PromotionFailed,
    /// A renewal CAS committed without changing the term.
    RenewalSucceeded,
    /// Renewal conflicted or the store stayed unreachable past the renewal
    /// deadline; the lease can no longer be proven.
    RenewalLost,
    /// Voluntary resignation (shutdown or switchover).
    ResignRequested,
}

/// Side effect a transition requires of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerAction {
    None,
    /// CAS the lock for the given term.
    AttemptAcquire { term: u64 },
    /// Promote the local engine and verify convergence.
    VerifyPromotion { term: u64 },
    /// Give back a lock we cannot honor (failed promotion).
    ReleaseLock,
    /// Demote the local engine before anything else becomes visible.
    Fence,
    /// Demote, record the reason, delete the lock.
    Resign,
}

/// Result of applying an event to a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: ControllerState,
    pub action: ControllerAction,
}

/// The pure election state machine.
///
/// Total over `(state, event)`; impossible combinations keep the current
/// state with no action, so a confused driver can never push the machine
/// somewhere unsafe.
pub fn transition(state: ControllerState, event: ControllerEvent) -> Transition {
    use ControllerAction as A;
    use ControllerEvent as E;
    use ControllerState as S;

    let stay = |state| Transition {
        next: state,
        action: A::None,
    };

    match (state, event) {
        (S::Follower, E::LeaseAvailable { next_term }) => Transition {
            next: S::Candidate { term: next_term },
            action: A::AttemptAcquire { term: next_term },
        },
        (S::Follower, _) => stay(S::Follower),

        (S::Candidate { term }, E::CasWon) => Transition {
            next: S::Leader { term },
            action: A::VerifyPromotion { term },
        },
        (S::Candidate { .. }, E::CasLost) | (S::Candidate { .. }, E::LeaderObserved) => {
            stay(S::Follower)
        }
        (S::Candidate { term }, _) => stay(S::Candidate { term }),

        (S::Leader { term }, E::RenewalSucceeded) | (S::Leader { term }, E::PromotionConverged) => {
            stay(S::Leader { term })
        }
        (S::Leader { .. }, E::PromotionFailed) => Transition {
            next: S::Follower,
            action: A::ReleaseLock,
        },
        (S::Leader { .. }, E::RenewalLost) => Transition {
            next: S::Follower,
            action: A::Fence,
        },
        (S::Leader { .. }, E::ResignRequested) => Transition {
            next: S::Follower,
            action: A::Resign,
        },
        (S::Leader { term }, _) => stay(S::Leader { term }),
    }
}

/// Per-node failover controller.
pub struct FailoverController {
    id: MemberId,
    client: CoordClient,
    topology: Arc<TopologyManager>,
    engine: Arc<dyn DatabaseEngine>,
    config: ClusterConfig,
    notifications: Arc<NotificationBus>,
    state: RwLock<ControllerState>,
    /// Store version of our own lock entry while leading; renewal CAS
    /// targets exactly this version so any interleaved writer is detected.
    lock_version: RwLock<Option<u64>>,
}

impl FailoverController {
    pub fn new(
        id: MemberId,
        client: CoordClient,
        topology: Arc<TopologyManager>,
        engine: Arc<dyn DatabaseEngine>,
        config: ClusterConfig,
        notifications: Arc<NotificationBus>,
    ) -> Self {
        Self {
            id,
            client,
            topology,
            engine,
            config,
            notifications,
            state: RwLock::new(ControllerState::Follower),
            lock_version: RwLock::new(None),
        }
    }

    pub fn member_id(&self) -> &MemberId {
        &self.id
    }

    pub async fn state(&self) -> ControllerState {
        *self.state.read().await
    }

    pub async fn is_leader(&self) -> bool {
        matches!(self.state().await, ControllerState::Leader { .. })
    }

    async fn apply(&self, event: ControllerEvent) -> Transition {
        let mut state = self.state.write().await;
        let t = transition(*state, event);
        if t.next != *state {
            debug!(from = %*state, to = %t.next, ?event, "state transition");
        }
        *state = t.next;
        t
    }

    /// One evaluation step. Called by the driver loop every poll interval
    /// and directly by `forceFailover`.
    pub async fn tick(&self) {
        match self.state().await {
            ControllerState::Leader { term } => self.leader_tick(term).await,
            _ => self.follower_tick().await,
        }
    }

    async fn follower_tick(&self) {
        let observed = match tokio::time::timeout(
            self.config.lease_renew_timeout,
            self.client.leader_lock(),
        )
        .await
        {
            Ok(Ok(observed)) => observed,
            Ok(Err(e)) => {
                // Unknown state, not absence: do nothing until the store answers.
                warn!(error = %e, "could not read leader lock");
                return;
            }
            Err(_) => {
                warn!("leader lock read timed out");
                return;
            }
        };

        let now = now_ms();
        if let Some((lock, version)) = &observed {
            if !lock.is_expired(now) {
                if lock.holder_id == self.id {
                    // Our own lease survived a restart; resume leadership
                    // and renew on the next tick.
                    info!(term = lock.term, "resuming live leader lease");
                    *self.state.write().await = ControllerState::Leader { term: lock.term };
                    *self.lock_version.write().await = Some(*version);
                } else {
                    self.apply(ControllerEvent::LeaderObserved).await;
                    self.ensure_following(lock).await;
                }
                return;
            }
        }

        // Lease absent or expired. The term history lives in the lock if it
        // is still readable, otherwise in the append-only event log.
        let (current_term, previous_leader) = match &observed {
            Some((lock, _)) => (lock.term, Some(lock.holder_id.clone())),
            None => match self.client.latest_event().await {
                Ok(Some(event)) => (event.term, Some(event.new_leader)),
                Ok(None) => (0, None),
                Err(e) => {
                    warn!(error = %e, "could not read failover history");
                    return;
                }
            },
        };

        let view = match self.topology.snapshot().await {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, "could not snapshot topology");
                return;
            }
        };
        let candidate = match self.topology.election_candidate(&view).await {
            Ok(candidate) => candidate,
            Err(VigilError::NoEligibleCandidate { reason }) => {
                // Fail-safe: a broken-but-known primary beats an
                // uncontrolled promotion.
                warn!(reason = %reason, "failover halted: no eligible candidate");
                return;
            }
            Err(e) => {
                warn!(error = %e, "candidate selection failed");
                return;
            }
        };
        if candidate.id != self.id {
            debug!(top_candidate = %candidate.id, "not the top-ranked candidate");
            return;
        }

        let next_term = current_term + 1;
        let t = self
            .apply(ControllerEvent::LeaseAvailable { next_term })
            .await;
        if let ControllerAction::AttemptAcquire { term } = t.action {
            let expected_version = observed.map(|(_, version)| version);
            self.attempt_acquire(term, expected_version, previous_leader)
                .await;
        }
    }

    /// A local engine still reporting the primary role while another node
    /// holds a valid lease is a stale primary (a restart that skipped
    /// fencing, or restored old state); re-point it at the leader.
    async fn ensure_following(&self, lock: &LeaderLock) {
        let is_primary = match self.engine.status().await {
            Ok(status) => status.role == MemberRole::Primary,
            Err(_) => false,
        };
        if !is_primary {
            return;
        }
        warn!(leader = %lock.holder_id, "local engine is primary without the lease; demoting");
        let address = match self.client.member(&lock.holder_id).await {
            Ok(Some(member)) => Some(member.address()),
            _ => None,
        };
        if let Err(e) = self.engine.demote(address.as_deref()).await {
            error!(error = %e, "demotion of stale primary failed");
        }
    }

    async fn attempt_acquire(
        &self,
        term: u64,
        expected_version: Option<u64>,
        previous_leader: Option<MemberId>,
    ) {
        let lock = LeaderLock {
            holder_id: self.id.clone(),
            term,
            lease_expiry: now_ms() + self.config.lease_ttl.as_millis() as u64,
        };
        let outcome = tokio::time::timeout(
            self.config.lease_renew_timeout,
            self.client
                .cas_leader_lock(&lock, expected_version, self.config.lease_ttl),
        )
        .await;

        match outcome {
            Ok(Ok(CasOutcome::Committed { version })) => {
                info!(term, "acquired leader lease");
                let t = self.apply(ControllerEvent::CasWon).await;
                *self.lock_version.write().await = Some(version);
                if matches!(t.action, ControllerAction::VerifyPromotion { .. }) {
                    self.complete_promotion(term, previous_leader).await;
                }
            }
            Ok(Ok(CasOutcome::Conflict)) => {
                debug!(term, "lost the acquisition race");
                self.apply(ControllerEvent::CasLost).await;
            }
            Ok(Err(e)) => {
                warn!(term, error = %e, "lease acquisition failed");
                self.apply(ControllerEvent::CasLost).await;
            }
            Err(_) => {
                warn!(term, "lease acquisition timed out");
                self.apply(ControllerEvent::CasLost).await;
            }
        }
    }

    /// Promote the engine after winning term `term`, verify convergence and
    /// write the audit record; on failure, fence and give the lease back.
    async fn complete_promotion(&self, term: u64, previous_leader: Option<MemberId>) {
        let reason = self.transition_reason().await;
        match self.promote_and_verify().await {
            Ok(()) => {
                self.apply(ControllerEvent::PromotionConverged).await;
                let event = FailoverEvent {
                    timestamp: now_ms(),
                    previous_leader,
                    new_leader: self.id.clone(),
                    reason,
                    term,
                };
                match self.client.append_event(&event).await {
                    Ok(outcome) if !outcome.is_committed() => {
                        // Should be unreachable while CAS guards the lock.
                        error!(term, "audit record for this term already exists");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "could not append failover event"),
                }
                info!(term, reason = %reason, "promoted to primary");
                self.notifications.notify_elected(self.id.clone(), term, reason);
            }
            Err(e) => {
                error!(term, error = %e, "promotion did not converge; releasing lease");
                // We won a lock we cannot honor. Make sure the engine is not
                // serving writes, then give the lease back so a healthier
                // candidate can take it.
                if let Err(demote_err) = self.engine.demote(None).await {
                    warn!(error = %demote_err, "defensive demotion failed");
                }
                let t = self.apply(ControllerEvent::PromotionFailed).await;
                if matches!(t.action, ControllerAction::ReleaseLock) {
                    if let Err(release_err) = self.client.release_leader_lock().await {
                        // The lease still expires within its TTL.
                        warn!(error = %release_err, "lease release failed after failed promotion");
                    }
                }
                *self.lock_version.write().await = None;
                let event = FailoverEvent {
                    timestamp: now_ms(),
                    previous_leader,
                    new_leader: self.id.clone(),
                    reason: FailoverReason::PromotionFailed,
                    term,
                };
                if let Err(append_err) = self.client.append_event(&event).await {
                    warn!(error = %append_err, "could not record failed promotion");
                }
                self.notifications
                    .notify_stepped_down(self.id.clone(), term, "promotion failed");
            }
        }
    }

    /// Reason for the transition we are completing, derived from hints the
    /// previous leader (or an operator) left in the store.
    async fn transition_reason(&self) -> FailoverReason {
        if let Ok(Some(target)) = self.client.switchover_hint().await {
            if target == self.id {
                let _ = self.client.clear_switchover_hint().await;
                let _ = self.client.clear_resignation_hint().await;
                return FailoverReason::ManualSwitchover;
            }
        }
        match self.client.resignation_hint().await {
            Ok(Some(reason)) => {
                let _ = self.client.clear_resignation_hint().await;
                reason
            }
            _ => FailoverReason::LeaseExpired,
        }
    }

    async fn promote_and_verify(&self) -> Result<()> {
        self.engine.promote().await?;
        let started = now_ms();
        let deadline = tokio::time::Instant::now() + self.config.lease_renew_timeout;
        loop {
            match self.engine.status().await {
                Ok(status) if status.role == MemberRole::Primary && status.ready => return Ok(()),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "status poll during promotion failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(VigilError::PromotionFailed {
                    member_id: self.id.to_string(),
                    waited_ms: now_ms() - started,
                });
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn leader_tick(&self, term: u64) {
        // An operator switchover away from this node trumps renewal.
        match self.client.switchover_hint().await {
            Ok(Some(target)) if target != self.id => {
                info!(%target, "switchover requested; resigning");
                if let Err(e) = self.resign(FailoverReason::ManualSwitchover).await {
                    warn!(error = %e, "switchover resignation failed");
                }
                return;
            }
            Ok(Some(_)) => {
                // A hint naming the current leader is stale; drop it.
                warn!("clearing switchover hint targeting the current leader");
                let _ = self.client.clear_switchover_hint().await;
            }
            _ => {}
        }
        self.renew(term).await;
    }

    /// Refresh the lease before `lease_renew_timeout` elapses. The term
    /// never changes on renewal. Transient store outages are retried with
    /// jittered backoff inside the deadline; once the deadline passes the
    /// lease can no longer be proven and the node fences itself.
    async fn renew(&self, term: u64) {
        let Some(version) = *self.lock_version.read().await else {
            self.fence(term, "no recorded lease version").await;
            return;
        };

        let attempt = tokio::time::timeout(self.config.lease_renew_timeout, async {
            let mut backoff = Duration::from_millis(25);
            loop {
                // The expiry must reflect the attempt that commits, not the
                // first one; a retried renewal with a stale expiry would let
                // electors deem the lease dead while the store holds it live.
                let lock = LeaderLock {
                    holder_id: self.id.clone(),
                    term,
                    lease_expiry: now_ms() + self.config.lease_ttl.as_millis() as u64,
                };
                match self
                    .client
                    .cas_leader_lock(&lock, Some(version), self.config.lease_ttl)
                    .await
                {
                    Ok(outcome) => return Ok(outcome),
                    Err(e) if e.is_retryable() => {
                        warn!(error = %e, "renewal attempt failed; retrying");
                        let jitter = rand::thread_rng().gen_range(0..25u64);
                        tokio::time::sleep(backoff + Duration::from_millis(jitter)).await;
                        backoff = (backoff * 2).min(Duration::from_millis(250));
                    }
                    Err(e) => return Err(e),
                }
            }
        })
        .await;

        match attempt {
            Ok(Ok(CasOutcome::Committed { version })) => {
                *self.lock_version.write().await = Some(version);
                self.apply(ControllerEvent::RenewalSucceeded).await;
                debug!(term, "lease renewed");
            }
            Ok(Ok(CasOutcome::Conflict)) => {
                self.fence(term, "renewal conflict: the lock has another writer")
                    .await;
            }
            Ok(Err(e)) => {
                self.fence(term, &format!("renewal failed: {e}")).await;
            }
            Err(_) => {
                self.fence(term, "store unreachable past the renewal deadline")
                    .await;
            }
        }
    }

    /// Self-imposed loss of leadership: demote the local engine before any
    /// other externally visible effect, then fall back to follower. The
    /// lock is not touched, since we can no longer prove anything about it.
    async fn fence(&self, term: u64, why: &str) {
        warn!(term, why, "fencing");
        if let Err(e) = self.engine.demote(None).await {
            error!(error = %e, "defensive demotion failed; engine may still accept writes");
        }
        self.apply(ControllerEvent::RenewalLost).await;
        *self.lock_version.write().await = None;
        self.notifications
            .notify_stepped_down(self.id.clone(), term, why);
    }

    /// Voluntary resignation: demote, record the reason, delete the lock so
    /// a successor can take over faster than the full lease window.
    pub async fn resign(&self, reason: FailoverReason) -> Result<()> {
        let ControllerState::Leader { term } = self.state().await else {
            return Err(VigilError::internal("resignation requested while not leader"));
        };

        // Writes must stop before the lock is given away; if the engine
        // refuses we keep the lease rather than risk two writers.
        self.engine.demote(None).await?;

        if let Err(e) = self
            .client
            .publish_resignation_hint(reason, self.config.lease_ttl)
            .await
        {
            warn!(error = %e, "could not record resignation reason");
        }
        match self.client.release_leader_lock().await {
            Ok(_) => info!(term, reason = %reason, "released leader lease"),
            Err(e) => {
                // Best effort: the lease expires within its TTL anyway.
                warn!(error = %e, "lease release failed; it will expire naturally");
            }
        }

        self.apply(ControllerEvent::ResignRequested).await;
        *self.lock_version.write().await = None;
        self.notifications
            .notify_stepped_down(self.id.clone(), term, reason.to_string());
        Ok(())
    }

    /// Operator switchover to `target`.
    ///
    /// Valid only for a currently eligible target and with quorum. The bias
    /// is a store hint visible to every elector; if this node is the leader
    /// it resigns immediately, otherwise the leader observes the hint on
    /// its next tick.
    pub async fn switchover(&self, target: &MemberId) -> Result<()> {
        let view = self.topology.snapshot().await?;
        self.topology.require_quorum(&view)?;
        let Some(member) = view.member(target) else {
            return Err(VigilError::InvalidTarget {
                target: target.to_string(),
                reason: "unknown member".to_string(),
            });
        };
        if !member.is_eligible(self.config.max_allowed_lag_bytes) {
            return Err(VigilError::InvalidTarget {
                target: target.to_string(),
                reason: "not an eligible candidate".to_string(),
            });
        }

        self.client
            .publish_switchover_hint(target, self.config.lease_ttl)
            .await?;
        if self.is_leader().await {
            self.resign(FailoverReason::ManualSwitchover).await?;
        }
        Ok(())
    }

    /// Operator failover, for when the leader is unreachable and its lease
    /// has already run out. Runs the normal election path without bias and
    /// never bypasses CAS.
    pub async fn force_failover(&self) -> Result<()> {
        let view = self.topology.snapshot().await?;
        self.topology.require_quorum(&view)?;
        if let Some(lock) = &view.lock {
            if !lock.is_expired(view.observed_at) {
                return Err(VigilError::InvalidTarget {
                    target: lock.holder_id.to_string(),
                    reason: "leader lease is still valid; use switchover".to_string(),
                });
            }
        }
        // Surface the fail-safe instead of silently declining.
        self.topology.election_candidate(&view).await?;
        self.tick().await;
        Ok(())
    }

    /// Run the evaluation loop until shutdown; a leader resigns on the way
    /// out.
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Startup jitter desynchronizes elections when several nodes
            // restart at once.
            let max_jitter = (self.config.poll_interval.as_millis() as u64 / 4).max(1);
            let jitter = rand::thread_rng().gen_range(0..max_jitter);
            tokio::time::sleep(Duration::from_millis(jitter)).await;

            let mut interval = tokio::time::interval(self.config.poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => self.tick().await,
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            if self.is_leader().await {
                                if let Err(e) = self.resign(FailoverReason::VoluntaryResignation).await {
                                    warn!(error = %e, "resignation on shutdown failed");
                                }
                            }
                            break;
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follower_stands_only_on_available_lease() {
        let t = transition(
            ControllerState::Follower,
            ControllerEvent::LeaseAvailable { next_term: 6 },
        );
        assert_eq!(t.next, ControllerState::Candidate { term: 6 });
        assert_eq!(t.action, ControllerAction::AttemptAcquire { term: 6 });

        let t = transition(ControllerState::Follower, ControllerEvent::LeaderObserved);
        assert_eq!(t.next, ControllerState::Follower);
        assert_eq!(t.action, ControllerAction::None);
    }

    #[test]
    fn test_candidate_resolution() {
        let won = transition(ControllerState::Candidate { term: 6 }, ControllerEvent::CasWon);
        assert_eq!(won.next, ControllerState::Leader { term: 6 });
        assert_eq!(won.action, ControllerAction::VerifyPromotion { term: 6 });

        let lost = transition(ControllerState::Candidate { term: 6 }, ControllerEvent::CasLost);
        assert_eq!(lost.next, ControllerState::Follower);
        assert_eq!(lost.action, ControllerAction::None);
    }

    #[test]
    fn test_renewal_keeps_term() {
        let t = transition(
            ControllerState::Leader { term: 6 },
            ControllerEvent::RenewalSucceeded,
        );
        assert_eq!(t.next, ControllerState::Leader { term: 6 });
        assert_eq!(t.action, ControllerAction::None);
    }

    #[test]
    fn test_leader_loss_paths() {
        let fenced = transition(
            ControllerState::Leader { term: 6 },
            ControllerEvent::RenewalLost,
        );
        assert_eq!(fenced.next, ControllerState::Follower);
        assert_eq!(fenced.action, ControllerAction::Fence);

        let resigned = transition(
            ControllerState::Leader { term: 6 },
            ControllerEvent::ResignRequested,
        );
        assert_eq!(resigned.next, ControllerState::Follower);
        assert_eq!(resigned.action, ControllerAction::Resign);

        let failed = transition(
            ControllerState::Leader { term: 6 },
            ControllerEvent::PromotionFailed,
        );
        assert_eq!(failed.next, ControllerState::Follower);
        assert_eq!(failed.action, ControllerAction::ReleaseLock);
    }

    #[test]
    fn test_impossible_combinations_are_inert() {
        let t = transition(
            ControllerState::Leader { term: 6 },
            ControllerEvent::LeaseAvailable { next_term: 9 },
        );
        assert_eq!(t.next, ControllerState::Leader { term: 6 });
        assert_eq!(t.action, ControllerAction::None);

        let t = transition(ControllerState::Follower, ControllerEvent::CasWon);
        assert_eq!(t.next, ControllerState::Follower);
        assert_eq!(t.action, ControllerAction::None);
    }
}
