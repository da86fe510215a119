//! Database engine and health probe interfaces.
//!
//! The database engine is an external collaborator; Vigil drives it through
//! this narrow surface and never reaches into its storage or WAL internals.
//! Promotion and demotion are fire-and-verify: the controller issues the
//! command, then polls `status` until the engine reports the expected role
//! or a bounded window elapses.

use crate::{EngineStatus, Result};
use async_trait::async_trait;

/// Control surface of the local database engine.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Query the engine's current role and replication progress.
    async fn status(&self) -> Result<EngineStatus>;

    /// Ask the engine to become the writable primary.
    async fn promote(&self) -> Result<()>;

    /// Ask the engine to demote itself to a replica. When the new primary is
    /// already known its `host:port` address is passed along so the engine
    /// can re-point replication; during fencing it is not yet known.
    async fn demote(&self, new_primary: Option<&str>) -> Result<()>;
}

/// Polymorphic health-check capability.
///
/// The health monitor depends on this trait rather than a specific probing
/// mechanism, so "query the local engine" and "run an external probe
/// command" are interchangeable variants. A probe error or timeout is
/// reported as `healthy = false`, never as a missing record.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn probe(&self) -> Result<EngineStatus>;
}
