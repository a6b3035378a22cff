//! Circuit breaker guarding store round-trips, built on lock-free atomics.
//!
//! The breaker is process-local: each gateway instance judges the store's
//! health from its own observed failures, nothing is coordinated through the
//! store itself. A denied-but-valid decision is a success; only transport
//! errors and timeouts count as failures.

use crate::clock::{Clock, SystemClock};
use crate::error::EngineError;
use crate::policy::ConfigError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Current state of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operating mode, calls pass through.
    Closed,
    /// Short-circuits calls until the cooldown elapses.
    Open,
    /// Probe mode letting a bounded number of trial calls through.
    HalfOpen,
}

impl CircuitState {
    fn from_u8(v: u8) -> Self {
        match v {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

/// Circuit breaker around the store adapter.
///
/// Clones share the same underlying state via `Arc`, so every worker in the
/// process observes and affects the same circuit lifecycle.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    shared: Arc<Shared>,
    failure_threshold: usize,
    cooldown: Duration,
    half_open_max_calls: usize,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `failure_threshold` consecutive
    /// failures and probes recovery after `cooldown`. One trial call is
    /// allowed while half-open.
    ///
    /// # Examples
    /// ```
    /// use rategate::CircuitBreaker;
    /// use std::time::Duration;
    /// let breaker = CircuitBreaker::new(5, Duration::from_secs(60)).unwrap();
    /// ```
    pub fn new(failure_threshold: usize, cooldown: Duration) -> Result<Self, ConfigError> {
        if failure_threshold == 0 {
            return Err(ConfigError::InvalidFailureThreshold);
        }
        if cooldown.is_zero() {
            return Err(ConfigError::InvalidCooldown { provided: cooldown });
        }
        Ok(Self {
            shared: Self::fresh_shared(),
            failure_threshold,
            cooldown,
            half_open_max_calls: 1,
            clock: Arc::new(SystemClock),
        })
    }

    fn fresh_shared() -> Arc<Shared> {
        Arc::new(Shared {
            state: AtomicU8::new(STATE_CLOSED),
            consecutive_failures: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
        })
    }

    /// Override the clock (deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override the maximum number of half-open probe calls; must be > 0.
    pub fn with_half_open_limit(mut self, limit: usize) -> Result<Self, ConfigError> {
        if limit == 0 {
            return Err(ConfigError::InvalidProbeLimit);
        }
        self.half_open_max_calls = limit;
        Ok(self)
    }

    /// Current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Consecutive failures observed since the last success.
    pub fn consecutive_failures(&self) -> usize {
        self.shared.consecutive_failures.load(Ordering::Acquire)
    }

    /// Run `operation` under breaker protection.
    ///
    /// - **Closed**: executes normally; consecutive failures are counted.
    /// - **Open**: rejects with [`EngineError::CircuitOpen`] until the
    ///   cooldown elapses, with no store round-trip.
    /// - **HalfOpen**: lets up to `half_open_max_calls` probes through.
    ///   A probe success closes the circuit; a probe failure reopens it and
    ///   restarts the cooldown.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, EngineError>
    where
        T: Send,
        Fut: Future<Output = Result<T, EngineError>> + Send,
        Op: FnOnce() -> Fut + Send,
    {
        // Releases the probe slot even if the operation panics.
        struct ProbeGuard<'a> {
            shared: &'a Shared,
            held: bool,
        }
        impl Drop for ProbeGuard<'_> {
            fn drop(&mut self) {
                if self.held {
                    self.shared.half_open_calls.fetch_sub(1, Ordering::Release);
                }
            }
        }
        let mut guard: Option<ProbeGuard<'_>> = None;

        loop {
            match CircuitState::from_u8(self.shared.state.load(Ordering::Acquire)) {
                CircuitState::Closed => break,
                CircuitState::Open => {
                    let opened_at = self.shared.opened_at_millis.load(Ordering::Acquire);
                    let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                    if elapsed < self.cooldown.as_millis() as u64 {
                        return Err(EngineError::CircuitOpen {
                            failure_count: self.consecutive_failures(),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                    // Cooldown elapsed; race to become the half-open probe.
                    match self.shared.state.compare_exchange(
                        STATE_OPEN,
                        STATE_HALF_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            tracing::info!("circuit breaker: open -> half-open");
                            self.shared.half_open_calls.store(1, Ordering::Release);
                            guard = Some(ProbeGuard { shared: &self.shared, held: true });
                            break;
                        }
                        // Someone else moved first; re-read the state.
                        Err(_) => continue,
                    }
                }
                CircuitState::HalfOpen => {
                    let in_flight = self.shared.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if in_flight >= self.half_open_max_calls {
                        self.shared.half_open_calls.fetch_sub(1, Ordering::Release);
                        let opened_at = self.shared.opened_at_millis.load(Ordering::Acquire);
                        let elapsed = self.clock.now_millis().saturating_sub(opened_at);
                        return Err(EngineError::CircuitOpen {
                            failure_count: self.consecutive_failures(),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                    guard = Some(ProbeGuard { shared: &self.shared, held: true });
                    tracing::debug!(
                        in_flight = in_flight + 1,
                        max = self.half_open_max_calls,
                        "circuit breaker: half-open probe"
                    );
                    break;
                }
            }
        }

        let result = operation().await;
        drop(guard);

        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }

        result
    }

    fn on_success(&self) {
        match CircuitState::from_u8(self.shared.state.load(Ordering::Acquire)) {
            CircuitState::HalfOpen => {
                if self
                    .shared
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.shared.half_open_calls.store(0, Ordering::Release);
                    self.shared.consecutive_failures.store(0, Ordering::Release);
                    self.shared.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("circuit breaker: half-open -> closed");
                }
            }
            CircuitState::Closed => {
                // Only an unbroken failure streak trips the breaker.
                self.shared.consecutive_failures.store(0, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self) {
        let failures = self.shared.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        match CircuitState::from_u8(self.shared.state.load(Ordering::Acquire)) {
            CircuitState::HalfOpen => {
                if self
                    .shared
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.shared.half_open_calls.store(0, Ordering::Release);
                    self.shared.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "circuit breaker: probe failed, half-open -> open");
                }
            }
            CircuitState::Closed => {
                if failures >= self.failure_threshold
                    && self
                        .shared
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    self.shared.half_open_calls.store(0, Ordering::Release);
                    self.shared.opened_at_millis.store(self.clock.now_millis(), Ordering::Release);
                    tracing::error!(
                        failures,
                        threshold = self.failure_threshold,
                        "circuit breaker: closed -> open"
                    );
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// The stock production settings: opens after 5 consecutive failures,
/// probes recovery after a 60s cooldown, one trial call while half-open.
impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            shared: Self::fresh_shared(),
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            half_open_max_calls: 1,
            clock: Arc::new(SystemClock),
        }
    }
}
