//! The rate decision engine: key resolution, guarded store round-trip,
//! fallback policy.

use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::events::{DecisionEvent, EventStream};
use crate::key::RateLimitKey;
use crate::policy::{FallbackMode, QuotaPolicy, Strategy};
use crate::store::StateStore;
use crate::strategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The outcome of one rate limit check.
///
/// Produced once per request and never mutated; the HTTP layer maps it onto
/// `X-RateLimit-*` headers and a 200/429 status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    /// Requests left before denial, always within `[0, limit]`.
    pub remaining: u32,
    /// Epoch millis after which capacity is guaranteed to recover.
    pub reset_at_millis: u64,
    pub strategy: Strategy,
    /// True when the store was not consulted (degraded mode).
    pub fallback: bool,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Suggested `Retry-After` for a denied request.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.reset_at_millis.saturating_sub(now_millis))
    }
}

/// Rate decision engine shared by all request workers.
///
/// Holds no per-key locks: cross-request serialization for a key happens
/// entirely inside the store's atomic unit, so clones of the gate (it is
/// cheap to clone) can be handed to any number of concurrent workers.
#[derive(Debug)]
pub struct RateGate<S> {
    store: Arc<S>,
    breaker: CircuitBreaker,
    clock: Arc<dyn Clock>,
    fallback: FallbackMode,
    store_timeout: Duration,
    events: EventStream,
}

// Manual impl: clones share the store, breaker, and event stream without
// requiring `S: Clone`.
impl<S> Clone for RateGate<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            breaker: self.breaker.clone(),
            clock: Arc::clone(&self.clock),
            fallback: self.fallback,
            store_timeout: self.store_timeout,
            events: self.events.clone(),
        }
    }
}

/// Builder for [`RateGate`].
#[derive(Debug)]
pub struct RateGateBuilder<S> {
    store: Arc<S>,
    breaker: Option<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    fallback: FallbackMode,
    store_timeout: Duration,
    events_capacity: usize,
}

impl<S: StateStore> RateGate<S> {
    /// Start building a gate over `store` with default breaker (5 failures,
    /// 60s cooldown), fail-open fallback, and a 2s store timeout.
    pub fn builder(store: S) -> RateGateBuilder<S> {
        RateGateBuilder {
            store: Arc::new(store),
            breaker: None,
            clock: Arc::new(SystemClock),
            fallback: FallbackMode::default(),
            store_timeout: Duration::from_secs(2),
            events_capacity: 1024,
        }
    }

    /// Decide whether this request is admitted under `policy`.
    ///
    /// Never fails: quota exhaustion is a normal denied decision, and store
    /// unavailability degrades into the configured fallback decision. The
    /// only error surface is policy construction, which happens before any
    /// request is served.
    pub async fn check(&self, client_id: &str, endpoint: &str, policy: &QuotaPolicy) -> Decision {
        let key = RateLimitKey::new(client_id, endpoint, policy.strategy());
        let now = self.clock.now_millis();
        let op = move |state| strategy::evaluate(policy, state, now);

        let result = self
            .breaker
            .execute(|| async {
                let started = Instant::now();
                match tokio::time::timeout(
                    self.store_timeout,
                    self.store.atomic_update(&key, policy.window(), &op),
                )
                .await
                {
                    Ok(Ok(decision)) => Ok(decision),
                    Ok(Err(e)) => Err(EngineError::Store(e)),
                    Err(_) => Err(EngineError::Timeout {
                        elapsed: started.elapsed(),
                        timeout: self.store_timeout,
                    }),
                }
            })
            .await;

        let decision = match result {
            Ok(decision) => {
                tracing::debug!(key = %key, allowed = decision.allowed, remaining = decision.remaining, "rate decision");
                decision
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, mode = ?self.fallback, "store unavailable, fallback applied");
                self.fallback_decision(policy, now)
            }
        };

        self.events.publish(DecisionEvent {
            client_id: client_id.to_string(),
            endpoint: endpoint.to_string(),
            allowed: decision.allowed,
            strategy: decision.strategy,
            limit: decision.limit,
            remaining: decision.remaining,
            timestamp_millis: now,
            fallback: decision.fallback,
        });

        decision
    }

    fn fallback_decision(&self, policy: &QuotaPolicy, now: u64) -> Decision {
        let allowed = matches!(self.fallback, FallbackMode::FailOpen);
        Decision {
            allowed,
            limit: policy.limit(),
            remaining: if allowed { policy.limit() } else { 0 },
            reset_at_millis: now + policy.window().as_millis() as u64,
            strategy: policy.strategy(),
            fallback: true,
        }
    }

    /// Subscribe to the per-decision analytics stream.
    pub fn events(&self) -> &EventStream {
        &self.events
    }

    /// Current circuit state toward the store.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Store liveness, for health endpoints. Reports degraded while the
    /// breaker is open without issuing a store round-trip.
    pub async fn healthy(&self) -> bool {
        if self.breaker.state() == CircuitState::Open {
            return false;
        }
        self.store.health_check().await
    }
}

impl<S: StateStore> RateGateBuilder<S> {
    /// Replace the default circuit breaker.
    pub fn breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Admission behavior while the store is unreachable.
    pub fn fallback(mut self, mode: FallbackMode) -> Self {
        self.fallback = mode;
        self
    }

    /// Per-call store timeout; a timeout counts as a breaker failure.
    pub fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Override the clock (deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Per-subscriber buffer size of the analytics stream.
    pub fn events_capacity(mut self, capacity: usize) -> Self {
        self.events_capacity = capacity;
        self
    }

    pub fn build(self) -> RateGate<S> {
        let breaker = self.breaker.unwrap_or_default();
        RateGate {
            store: self.store,
            breaker,
            clock: self.clock,
            fallback: self.fallback,
            store_timeout: self.store_timeout,
            events: EventStream::new(self.events_capacity),
        }
    }
}
