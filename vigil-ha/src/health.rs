//! Per-node health publication.
//!
//! Every member runs one `HealthMonitor` loop that probes the local database
//! and publishes the node's [`ClusterMember`] record with a short-lived
//! lease. The monitor makes no decisions: a probe failure or timeout is
//! published as `healthy = false`, and failover is left entirely to the
//! controller. The loop is a separate task from lease renewal, so a hung
//! probe can never delay the election path.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vigil_core::engine::{DatabaseEngine, HealthCheck};
use vigil_core::{
    now_ms, ClusterConfig, ClusterMember, EngineStatus, MemberId, MemberRole, Result,
};
use vigil_store::CoordClient;

use async_trait::async_trait;

/// Probe variant that queries the local engine through the
/// [`DatabaseEngine`] trait.
pub struct EngineQuery {
    engine: Arc<dyn DatabaseEngine>,
}

impl EngineQuery {
    pub fn new(engine: Arc<dyn DatabaseEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl HealthCheck for EngineQuery {
    async fn probe(&self) -> Result<EngineStatus> {
        self.engine.status().await
    }
}

/// Identity of the local node as published in its member record.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub id: MemberId,
    pub host: String,
    pub port: u16,
}

/// Publishes this node's liveness and replication state every poll interval.
pub struct HealthMonitor {
    identity: NodeIdentity,
    probe: Arc<dyn HealthCheck>,
    client: CoordClient,
    config: ClusterConfig,
    // Role and positions survive probe failures so a degraded record still
    // describes the node's last known place in the topology.
    last_known: parking_lot::Mutex<(MemberRole, u64, u64)>,
}

impl HealthMonitor {
    pub fn new(
        identity: NodeIdentity,
        probe: Arc<dyn HealthCheck>,
        client: CoordClient,
        config: ClusterConfig,
    ) -> Self {
        Self {
            identity,
            probe,
            client,
            config,
            last_known: parking_lot::Mutex::new((MemberRole::Replica, 0, 0)),
        }
    }

    /// Probe once and publish the resulting member record.
    ///
    /// The probe is bounded by the poll interval; a timeout or probe error
    /// publishes `healthy = false` rather than omitting the record, keeping
    /// "degraded" distinguishable from "no data yet".
    pub async fn publish_once(&self) -> Result<ClusterMember> {
        let probed = tokio::time::timeout(self.config.poll_interval, self.probe.probe()).await;

        let member = match probed {
            Ok(Ok(status)) => {
                *self.last_known.lock() = (status.role, status.log_position, status.lag_bytes);
                self.record(status.role, status.log_position, status.lag_bytes, status.ready)
            }
            Ok(Err(e)) => {
                warn!(member_id = %self.identity.id, error = %e, "health probe failed");
                let (role, pos, lag) = *self.last_known.lock();
                self.record(role, pos, lag, false)
            }
            Err(_) => {
                warn!(member_id = %self.identity.id, "health probe timed out");
                let (role, pos, lag) = *self.last_known.lock();
                self.record(role, pos, lag, false)
            }
        };

        self.client
            .publish_member(&member, self.config.lease_ttl)
            .await?;
        debug!(
            member_id = %member.id,
            role = %member.role,
            healthy = member.healthy,
            log_position = member.log_position,
            "published member record"
        );
        Ok(member)
    }

    fn record(&self, role: MemberRole, log_position: u64, lag_bytes: u64, healthy: bool) -> ClusterMember {
        ClusterMember {
            id: self.identity.id.clone(),
            host: self.identity.host.clone(),
            port: self.identity.port,
            role,
            log_position,
            lag_bytes,
            last_heartbeat: now_ms(),
            healthy,
        }
    }

    /// Run the publication loop until shutdown is signaled.
    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.publish_once().await {
                            // The record simply expires if this keeps failing,
                            // which is the correct degraded signal.
                            warn!(member_id = %self.identity.id, error = %e, "failed to publish member record");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
