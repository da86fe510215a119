//! # Vigil Core
//!
//! Shared foundations for the Vigil cluster HA controller.
//!
//! This crate provides the building blocks the control plane is assembled
//! from:
//!
//! - **Data model**: [`ClusterMember`], [`LeaderLock`], [`FailoverEvent`]
//!   and the identifiers and roles they carry
//! - **Configuration**: [`ClusterConfig`], immutable per run, fatal to load
//!   incorrectly
//! - **Error handling**: [`VigilError`] and the workspace [`Result`] alias
//! - **Collaborator traits**: [`store::CoordinationStore`] (linearizable
//!   CAS + lease KV), [`engine::DatabaseEngine`] (promote/demote/status)
//!   and [`engine::HealthCheck`] (polymorphic probing)
//!
//! The crate is deliberately free of control logic: everything that decides
//! lives in `vigil-ha`, everything that talks to the store in `vigil-store`.

pub mod config;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

// Re-export commonly used types for convenience
pub use config::ClusterConfig;
pub use error::{Result, VigilError};
pub use types::{
    now_ms, ClusterMember, EngineStatus, FailoverEvent, FailoverReason, LeaderLock, MemberId,
    MemberRole,
};
