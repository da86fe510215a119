//! # Error Types
//!
//! The error taxonomy for the HA controller.
//!
//! Two things deliberately do not appear here: a CAS conflict, which is an
//! expected race outcome modeled as [`crate::store::CasOutcome::Conflict`],
//! and any fatal variant other than `Config`: configuration load failure at
//! startup is the only condition allowed to terminate the process.

use thiserror::Error;

/// Errors surfaced by Vigil components.
#[derive(Error, Debug)]
pub enum VigilError {
    /// The coordination store could not be reached or timed out.
    ///
    /// Callers must treat this as "unknown state", never as "absent". A
    /// leader that sees this persist past its renewal deadline fences itself.
    #[error("coordination store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// No replica satisfies the candidacy requirements.
    ///
    /// Fail-safe: the controller keeps a broken-but-known primary rather
    /// than performing an uncontrolled promotion.
    #[error("no eligible failover candidate: {reason}")]
    NoEligibleCandidate { reason: String },

    /// The engine did not report the primary role within the verify window
    /// after winning an election.
    #[error("promotion of {member_id} did not converge within {waited_ms}ms")]
    PromotionFailed { member_id: String, waited_ms: u64 },

    /// An administrative request named an invalid or ineligible target.
    #[error("invalid target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },

    /// Too few healthy members for an administrative cluster decision.
    #[error("quorum not available: {healthy}/{required} healthy members")]
    NoQuorum { healthy: usize, required: usize },

    /// Local database engine command or status query failed.
    #[error("engine error: {message}")]
    Engine { message: String },

    /// Invalid or missing configuration. Fatal at startup by design.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// JSON encoding/decoding of a store payload failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results across the Vigil workspace.
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the operation may succeed.
    ///
    /// Only transient store outages are retryable; everything else either
    /// reflects a decision (`NoEligibleCandidate`, `NoQuorum`) or a state
    /// the caller must handle explicitly.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(VigilError::store_unavailable("timeout").is_retryable());
        assert!(!VigilError::NoQuorum {
            healthy: 1,
            required: 2
        }
        .is_retryable());
        assert!(!VigilError::engine("refused").is_retryable());
    }

    #[test]
    fn test_display_includes_context() {
        let err = VigilError::PromotionFailed {
            member_id: "pg-b".to_string(),
            waited_ms: 5000,
        };
        let text = err.to_string();
        assert!(text.contains("pg-b"));
        assert!(text.contains("5000"));
    }
}
