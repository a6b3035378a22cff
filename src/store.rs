//! Abstract storage interface for quota state.
//!
//! Any store offering a single-key atomic read-modify-write with expiry is
//! pluggable: the adapter loads the current state for a key, runs the
//! supplied pure operation, persists the new state with a TTL, and returns
//! the decision, all as one indivisible unit with respect to other
//! concurrent updates of the same key. That unit is the system's sole
//! serialization point; in Redis terms it is one Lua script invocation.

use crate::clock::{Clock, SystemClock};
use crate::engine::Decision;
use crate::key::RateLimitKey;
use crate::strategy::QuotaState;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Pure state transition run inside the store's atomic unit.
pub type AtomicOp<'a> = dyn Fn(Option<QuotaState>) -> (QuotaState, Decision) + Send + Sync + 'a;

/// Errors surfaced by store adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Network-level failure talking to the store.
    #[error("store transport error: {0}")]
    Transport(String),
    /// The store answered, but not with anything usable.
    #[error("store protocol error: {0}")]
    Protocol(String),
}

/// Key-value store with per-key expiry and single-key atomic updates.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the state for `key` (or absence), apply `op`, persist the new
    /// state with `ttl`, and return the operation's decision. The whole
    /// sequence is atomic with respect to concurrent updates of `key`.
    async fn atomic_update(
        &self,
        key: &RateLimitKey,
        ttl: Duration,
        op: &AtomicOp<'_>,
    ) -> Result<Decision, StoreError>;

    /// Liveness probe, surfaced on health endpoints.
    async fn health_check(&self) -> bool;
}

#[derive(Debug, Clone)]
struct Entry {
    state: QuotaState,
    expires_at_millis: u64,
}

/// In-process store, the reference implementation of [`StateStore`].
///
/// A mutex around the whole map gives the per-key atomicity the trait
/// requires. Suitable for single-process deployments and tests; distributed
/// deployments plug in an adapter over Redis or a comparable store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Build a store on a caller-supplied clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self { entries: Arc::new(Mutex::new(HashMap::new())), clock: Arc::new(clock) }
    }

    /// Number of live (non-expired) entries.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        let guard = self.entries.lock().unwrap();
        guard.values().filter(|e| e.expires_at_millis > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn atomic_update(
        &self,
        key: &RateLimitKey,
        ttl: Duration,
        op: &AtomicOp<'_>,
    ) -> Result<Decision, StoreError> {
        let now = self.clock.now_millis();
        let storage_key = key.storage_key();
        let mut guard = self.entries.lock().unwrap();

        // Expiry doubles as garbage collection: stale keys would otherwise
        // accumulate for every client/endpoint pair ever seen.
        guard.retain(|_, e| e.expires_at_millis > now);

        let current = guard.get(&storage_key).map(|e| e.state.clone());

        let (next, decision) = op(current);
        let expires_at_millis = now + ttl.as_millis() as u64;
        guard.insert(storage_key, Entry { state: next, expires_at_millis });

        Ok(decision)
    }

    async fn health_check(&self) -> bool {
        true
    }
}
