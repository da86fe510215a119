//! # Vigil Store
//!
//! Coordination-store plumbing for the Vigil HA controller:
//!
//! - [`CoordClient`]: the typed client owning the cluster key schema
//!   (member records, leader lock, failover events, election hints)
//! - [`MemoryStore`]: an in-process linearizable backend with versioned
//!   CAS, lease expiry and prefix watches, also serving as the
//!   deterministic test double
//!
//! The raw store contract lives in `vigil_core::store`; any backend with
//! linearizable CAS + lease semantics can stand behind the client.

pub mod client;
pub mod memory;

pub use client::{
    CoordClient, EVENT_PREFIX, LEADER_KEY, MEMBER_PREFIX, RESIGNATION_HINT_KEY,
    SWITCHOVER_HINT_KEY,
};
pub use memory::MemoryStore;
