//! In-process engine double for unit and scenario tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use vigil_core::engine::DatabaseEngine;
use vigil_core::{EngineStatus, MemberRole, Result, VigilError};

#[derive(Debug, Clone)]
struct MockState {
    role: MemberRole,
    log_position: u64,
    lag_bytes: u64,
    ready: bool,
    unreachable: bool,
    fail_promotions: bool,
    promotions: u64,
    demotions: u64,
}

/// A scriptable [`DatabaseEngine`] whose role transitions are instant.
///
/// `fail_promotions` makes `promote` succeed as a command while the engine
/// never converges to primary, which is how a real engine most often fails.
pub struct MockEngine {
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn replica(log_position: u64, lag_bytes: u64) -> Self {
        Self {
            state: Mutex::new(MockState {
                role: MemberRole::Replica,
                log_position,
                lag_bytes,
                ready: true,
                unreachable: false,
                fail_promotions: false,
                promotions: 0,
                demotions: 0,
            }),
        }
    }

    pub fn primary(log_position: u64) -> Self {
        let engine = Self::replica(log_position, 0);
        engine.state.lock().role = MemberRole::Primary;
        engine
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().ready = ready;
    }

    pub fn set_position(&self, log_position: u64, lag_bytes: u64) {
        let mut state = self.state.lock();
        state.log_position = log_position;
        state.lag_bytes = lag_bytes;
    }

    pub fn fail_promotions(&self, fail: bool) {
        self.state.lock().fail_promotions = fail;
    }

    pub fn role(&self) -> MemberRole {
        self.state.lock().role
    }

    pub fn promotions(&self) -> u64 {
        self.state.lock().promotions
    }

    pub fn demotions(&self) -> u64 {
        self.state.lock().demotions
    }
}

#[async_trait]
impl DatabaseEngine for MockEngine {
    async fn status(&self) -> Result<EngineStatus> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(VigilError::engine("mock engine unreachable"));
        }
        Ok(EngineStatus {
            role: state.role,
            log_position: state.log_position,
            lag_bytes: state.lag_bytes,
            ready: state.ready,
        })
    }

    async fn promote(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(VigilError::engine("mock engine unreachable"));
        }
        state.promotions += 1;
        if !state.fail_promotions {
            state.role = MemberRole::Primary;
            state.lag_bytes = 0;
            state.ready = true;
        }
        Ok(())
    }

    async fn demote(&self, _new_primary: Option<&str>) -> Result<()> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(VigilError::engine("mock engine unreachable"));
        }
        state.demotions += 1;
        state.role = MemberRole::Replica;
        Ok(())
    }
}
