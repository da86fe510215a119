//! High-availability machinery for Vigil clusters.
//!
//! Three cooperating pieces run on every node:
//!
//! - [`health::HealthMonitor`] probes the local database and publishes the
//!   node's member record with a short-lived lease.
//! - [`topology::TopologyManager`] aggregates everyone's records into a
//!   consistent view and ranks failover candidates deterministically.
//! - [`controller::FailoverController`] contends for the leader lease,
//!   promotes on acquisition, renews while leading and fences itself when
//!   it can no longer prove it holds the lease.
//!
//! The coordination store is the single source of truth; nothing here trusts
//! in-process state over a compare-and-swap outcome.

pub mod controller;
pub mod exec;
pub mod health;
pub mod notifications;
pub mod testing;
pub mod topology;

pub use controller::{
    transition, ControllerAction, ControllerEvent, ControllerState, FailoverController, Transition,
};
pub use exec::{CommandEngine, CommandProbe, CommandSpec};
pub use health::{EngineQuery, HealthMonitor, NodeIdentity};
pub use notifications::{
    spawn_topology_forwarder, LeadershipChange, Notification, NotificationBus, NotificationFilter,
    SubscriptionId, TopologyChange,
};
pub use topology::{rank_candidates, ClusterView, TopologyManager};
