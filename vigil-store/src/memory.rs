//! In-process coordination store backend.
//!
//! A single-mutex implementation of [`CoordinationStore`]: every operation
//! takes the same lock, which is what makes the history linearizable. Leases
//! are evaluated lazily: expired entries are swept at the start of each
//! operation, so a watch may observe an `Expired` event only when the next
//! operation touches the store. The controller's polling cadence bounds that
//! delay by one poll interval.
//!
//! Suitable for single-process deployments and as the deterministic test
//! double for the control plane; multi-host clusters point the same traits
//! at an external store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_core::store::{CasOutcome, CoordinationStore, StoreEvent, VersionedValue};
use vigil_core::{now_ms, Result, VigilError};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    version: u64,
    expires_at: Option<u64>,
}

struct Watcher {
    prefix: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_version: u64,
    watchers: Vec<Watcher>,
}

impl Inner {
    /// Remove entries whose lease ran out and notify watchers. Must run
    /// before any read or conditional write so that expiry is observed
    /// consistently with the operation's linearization point.
    fn sweep(&mut self, now: u64) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            self.entries.remove(&key);
            debug!(key = %key, "lease expired");
            self.notify(StoreEvent::Expired { key });
        }
    }

    fn notify(&mut self, event: StoreEvent) {
        let key = match &event {
            StoreEvent::Put { key, .. } => key,
            StoreEvent::Deleted { key } => key,
            StoreEvent::Expired { key } => key,
        }
        .clone();
        self.watchers
            .retain(|w| !key.starts_with(&w.prefix) || w.tx.send(event.clone()).is_ok());
    }

    fn bump_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// In-memory [`CoordinationStore`] with versioned CAS, lease expiry and
/// prefix watches.
///
/// [`set_unavailable`](Self::set_unavailable) lets tests force
/// `StoreUnavailable` episodes to exercise defensive fencing.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Simulate a store outage. While set, every operation fails with
    /// `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(VigilError::store_unavailable("injected outage"))
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, lease: Option<Duration>) -> Result<u64> {
        self.check_available()?;
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let version = inner.bump_version();
        let entry = Entry {
            value: value.to_string(),
            version,
            expires_at: lease.map(|ttl| now + ttl.as_millis() as u64),
        };
        inner.entries.insert(key.to_string(), entry.clone());
        inner.notify(StoreEvent::Put {
            key: key.to_string(),
            value: VersionedValue {
                value: entry.value,
                version,
                expires_at: entry.expires_at,
            },
        });
        Ok(version)
    }

    async fn get(&self, key: &str) -> Result<Option<VersionedValue>> {
        self.check_available()?;
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        Ok(inner.entries.get(key).map(|e| VersionedValue {
            value: e.value.clone(),
            version: e.version,
            expires_at: e.expires_at,
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<(String, VersionedValue)>> {
        self.check_available()?;
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let mut entries: Vec<(String, VersionedValue)> = inner
            .entries
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| {
                (
                    k.clone(),
                    VersionedValue {
                        value: e.value.clone(),
                        version: e.version,
                        expires_at: e.expires_at,
                    },
                )
            })
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: &str,
        lease: Option<Duration>,
    ) -> Result<CasOutcome> {
        self.check_available()?;
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.sweep(now);

        let current = inner.entries.get(key).map(|e| e.version);
        if current != expected_version {
            return Ok(CasOutcome::Conflict);
        }

        let version = inner.bump_version();
        let entry = Entry {
            value: value.to_string(),
            version,
            expires_at: lease.map(|ttl| now + ttl.as_millis() as u64),
        };
        inner.entries.insert(key.to_string(), entry.clone());
        inner.notify(StoreEvent::Put {
            key: key.to_string(),
            value: VersionedValue {
                value: entry.value,
                version,
                expires_at: entry.expires_at,
            },
        });
        Ok(CasOutcome::Committed { version })
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check_available()?;
        let now = now_ms();
        let mut inner = self.inner.lock();
        inner.sweep(now);
        let existed = inner.entries.remove(key).is_some();
        if existed {
            inner.notify(StoreEvent::Deleted {
                key: key.to_string(),
            });
        }
        Ok(existed)
    }

    async fn watch(&self, prefix: &str) -> Result<mpsc::UnboundedReceiver<StoreEvent>> {
        self.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().watchers.push(Watcher {
            prefix: prefix.to_string(),
            tx,
        });
        Ok(rx)
    }
}
