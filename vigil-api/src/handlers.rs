//! Control-plane request handlers.

use crate::error::ApiResult;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use vigil_core::{ClusterMember, FailoverEvent, MemberId};

#[derive(Debug, Serialize)]
pub struct LeaderSummary {
    pub holder_id: MemberId,
    pub term: u64,
    pub lease_expiry: u64,
    pub expired: bool,
}

#[derive(Debug, Serialize)]
pub struct LocalSummary {
    pub member_id: MemberId,
    pub state: String,
}

#[derive(Debug, Serialize)]
pub struct ClusterStatusResponse {
    pub members: Vec<ClusterMember>,
    pub leader: Option<LeaderSummary>,
    pub quorum: bool,
    pub local: LocalSummary,
}

/// Full cluster view: every live member record, the leader lease and
/// whether administrative operations currently have quorum.
pub async fn get_cluster(State(state): State<AppState>) -> ApiResult<Json<ClusterStatusResponse>> {
    let view = state.topology.snapshot().await?;
    let leader = view.lock.as_ref().map(|lock| LeaderSummary {
        holder_id: lock.holder_id.clone(),
        term: lock.term,
        lease_expiry: lock.lease_expiry,
        expired: lock.is_expired(view.observed_at),
    });
    let quorum = state.topology.has_quorum(&view);
    let local = LocalSummary {
        member_id: state.controller.member_id().clone(),
        state: state.controller.state().await.to_string(),
    };
    Ok(Json(ClusterStatusResponse {
        members: view.members,
        leader,
        quorum,
        local,
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub member_id: MemberId,
    pub state: String,
}

/// Liveness of this controller. Answers 503 when the coordination store is
/// unreachable, which is what deployment probes should key on.
pub async fn get_health(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    // Any store read doubles as the reachability probe.
    state.client.leader_lock().await?;
    Ok(Json(HealthResponse {
        member_id: state.controller.member_id().clone(),
        state: state.controller.state().await.to_string(),
    }))
}

/// The append-only failover audit log, ordered by term.
pub async fn get_events(State(state): State<AppState>) -> ApiResult<Json<Vec<FailoverEvent>>> {
    Ok(Json(state.client.events().await?))
}

#[derive(Debug, Deserialize)]
pub struct SwitchoverRequest {
    pub target_id: MemberId,
}

#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub status: &'static str,
}

/// Planned leadership handover to a specific eligible target.
pub async fn post_switchover(
    State(state): State<AppState>,
    Json(request): Json<SwitchoverRequest>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    info!(target = %request.target_id, "switchover requested");
    state.controller.switchover(&request.target_id).await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { status: "accepted" })))
}

/// Operator failover for a dead leader whose lease already ran out.
pub async fn post_failover(
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<AcceptedResponse>)> {
    info!("failover requested");
    state.controller.force_failover().await?;
    Ok((StatusCode::ACCEPTED, Json(AcceptedResponse { status: "accepted" })))
}
