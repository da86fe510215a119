//! Cluster configuration, loaded once at process start and never mutated.

use crate::{Result, VigilError};
use std::time::Duration;

/// Tunables governing lease timing, candidacy and quorum.
///
/// Loaded from the environment at startup; a missing or unparseable value is
/// fatal, since running with an ambiguous safety threshold is worse than not
/// running at all.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Minimum healthy members required for administrative cluster decisions.
    pub quorum_size: usize,

    /// Lifetime of the leader lease and of member records.
    pub lease_ttl: Duration,

    /// Interval between health publications and lock evaluations.
    pub poll_interval: Duration,

    /// Deadline for lease renewal round trips. A renewal that cannot
    /// complete within this bound causes self-fencing.
    pub lease_renew_timeout: Duration,

    /// Replicas lagging more than this many bytes are ineligible for
    /// promotion (but remain cluster followers).
    pub max_allowed_lag_bytes: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            quorum_size: 2,
            lease_ttl: Duration::from_millis(10_000),
            poll_interval: Duration::from_millis(2_000),
            lease_renew_timeout: Duration::from_millis(5_000),
            max_allowed_lag_bytes: 16 * 1024 * 1024,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quorum_size(mut self, size: usize) -> Self {
        self.quorum_size = size;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_lease_renew_timeout(mut self, timeout: Duration) -> Self {
        self.lease_renew_timeout = timeout;
        self
    }

    pub fn with_max_allowed_lag_bytes(mut self, bytes: u64) -> Self {
        self.max_allowed_lag_bytes = bytes;
        self
    }

    /// Load configuration from `VIGIL_*` environment variables.
    ///
    /// Unset variables fall back to defaults; set-but-invalid values are
    /// errors. Call [`validate`](Self::validate) afterwards.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = read_env("VIGIL_QUORUM_SIZE")? {
            config.quorum_size = v as usize;
        }
        if let Some(v) = read_env("VIGIL_LEASE_TTL_MS")? {
            config.lease_ttl = Duration::from_millis(v);
        }
        if let Some(v) = read_env("VIGIL_POLL_INTERVAL_MS")? {
            config.poll_interval = Duration::from_millis(v);
        }
        if let Some(v) = read_env("VIGIL_LEASE_RENEW_TIMEOUT_MS")? {
            config.lease_renew_timeout = Duration::from_millis(v);
        }
        if let Some(v) = read_env("VIGIL_MAX_ALLOWED_LAG_BYTES")? {
            config.max_allowed_lag_bytes = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations whose timing relationships break the safety
    /// argument: renewal must be able to complete and the lock must be
    /// re-evaluated at least once within every lease window.
    pub fn validate(&self) -> Result<()> {
        if self.quorum_size == 0 {
            return Err(VigilError::config("quorum_size must be at least 1"));
        }
        if self.lease_ttl.is_zero() || self.poll_interval.is_zero() {
            return Err(VigilError::config(
                "lease_ttl and poll_interval must be non-zero",
            ));
        }
        if self.lease_renew_timeout >= self.lease_ttl {
            return Err(VigilError::config(format!(
                "lease_renew_timeout ({:?}) must be shorter than lease_ttl ({:?})",
                self.lease_renew_timeout, self.lease_ttl
            )));
        }
        if self.poll_interval >= self.lease_ttl {
            return Err(VigilError::config(format!(
                "poll_interval ({:?}) must be shorter than lease_ttl ({:?})",
                self.poll_interval, self.lease_ttl
            )));
        }
        // A renewal starts up to one poll interval into the lease window and
        // must still finish before the lease runs out.
        if self.poll_interval + self.lease_renew_timeout >= self.lease_ttl {
            return Err(VigilError::config(format!(
                "poll_interval ({:?}) plus lease_renew_timeout ({:?}) must fit within lease_ttl ({:?})",
                self.poll_interval, self.lease_renew_timeout, self.lease_ttl
            )));
        }
        Ok(())
    }
}

fn read_env(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| VigilError::config(format!("{name}={raw}: {e}"))),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(VigilError::config(format!("{name}: {e}"))),
    }
}
