//! HTTP control plane.
//!
//! A small axum application exposing cluster observation and the two
//! administrative operations. Mutating endpoints return 409 when the
//! request conflicts with cluster state (no quorum, invalid target, valid
//! lease) and 503 when the coordination store cannot be reached; they never
//! bypass the controller's safety checks.

pub mod error;
pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use vigil_ha::{FailoverController, TopologyManager};
use vigil_store::CoordClient;

pub use error::{ApiError, ApiResult};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<FailoverController>,
    pub topology: Arc<TopologyManager>,
    pub client: CoordClient,
}

/// Build the control-plane router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cluster", get(handlers::get_cluster))
        .route("/cluster/events", get(handlers::get_events))
        .route("/health", get(handlers::get_health))
        .route("/switchover", post(handlers::post_switchover))
        .route("/failover", post(handlers::post_failover))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;
    use vigil_core::store::CoordinationStore;
    use vigil_core::{
        now_ms, ClusterConfig, ClusterMember, MemberId, MemberRole,
    };
    use vigil_ha::testing::MockEngine;
    use vigil_ha::NotificationBus;
    use vigil_store::MemoryStore;

    fn test_config() -> ClusterConfig {
        ClusterConfig::default()
            .with_quorum_size(2)
            .with_lease_ttl(Duration::from_millis(400))
            .with_poll_interval(Duration::from_millis(50))
            .with_lease_renew_timeout(Duration::from_millis(150))
            .with_max_allowed_lag_bytes(1_000)
    }

    fn app(store: Arc<MemoryStore>) -> (Router, CoordClient) {
        let client = CoordClient::new(store as Arc<dyn CoordinationStore>);
        let topology = Arc::new(TopologyManager::new(client.clone(), test_config()));
        let controller = Arc::new(FailoverController::new(
            MemberId::new("pg-a"),
            client.clone(),
            topology.clone(),
            Arc::new(MockEngine::replica(100, 0)),
            test_config(),
            Arc::new(NotificationBus::new()),
        ));
        let router = router(AppState {
            controller,
            topology,
            client: client.clone(),
        });
        (router, client)
    }

    async fn publish_replica(client: &CoordClient, id: &str, log_position: u64) {
        client
            .publish_member(
                &ClusterMember {
                    id: MemberId::new(id),
                    host: "localhost".to_string(),
                    port: 5432,
                    role: MemberRole::Replica,
                    log_position,
                    lag_bytes: 0,
                    last_heartbeat: now_ms(),
                    healthy: true,
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_cluster_status() {
        let store = Arc::new(MemoryStore::new());
        let (app, client) = app(store);
        publish_replica(&client, "pg-a", 100).await;
        publish_replica(&client, "pg-b", 120).await;

        let response = app
            .oneshot(Request::get("/cluster").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["members"].as_array().unwrap().len(), 2);
        assert!(body["leader"].is_null());
        assert_eq!(body["quorum"], true);
        assert_eq!(body["local"]["member_id"], "pg-a");
        assert_eq!(body["local"]["state"], "follower");
    }

    #[tokio::test]
    async fn test_health_reports_store_outage() {
        let store = Arc::new(MemoryStore::new());
        let (app, _client) = app(store.clone());

        let response = app
            .clone()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        store.set_unavailable(true);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_switchover_without_quorum_is_conflict() {
        let store = Arc::new(MemoryStore::new());
        let (app, client) = app(store);
        publish_replica(&client, "pg-a", 100).await;

        let response = app
            .oneshot(
                Request::post("/switchover")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"target_id":"pg-a"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(response).await;
        assert!(body["error"].as_str().unwrap().contains("quorum"));
    }

    #[tokio::test]
    async fn test_switchover_accepted_for_eligible_target() {
        let store = Arc::new(MemoryStore::new());
        let (app, client) = app(store);
        publish_replica(&client, "pg-a", 100).await;
        publish_replica(&client, "pg-b", 120).await;

        let response = app
            .oneshot(
                Request::post("/switchover")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"target_id":"pg-b"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The bias is durably published for electors to observe.
        assert_eq!(
            client.switchover_hint().await.unwrap(),
            Some(MemberId::new("pg-b"))
        );
    }

    #[tokio::test]
    async fn test_failover_and_event_log() {
        let store = Arc::new(MemoryStore::new());
        let (app, client) = app(store);
        // The local node is the top candidate, so the forced election
        // completes within the request.
        publish_replica(&client, "pg-a", 120).await;
        publish_replica(&client, "pg-b", 100).await;

        let response = app
            .clone()
            .oneshot(Request::post("/failover").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = app
            .oneshot(Request::get("/cluster/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let events = body.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["term"], 1);
    }
}
