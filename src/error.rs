//! Internal error taxonomy for store round-trips.
//!
//! None of these ever cross into the routing layer: the engine converts every
//! variant into a fallback [`Decision`](crate::Decision). They exist so the
//! circuit breaker can distinguish short-circuits from real store failures.

use crate::store::StoreError;
use std::fmt;
use std::time::Duration;

/// Failure modes of one guarded store round-trip.
#[derive(Debug)]
pub enum EngineError {
    /// The circuit breaker rejected the call without touching the store.
    CircuitOpen {
        /// Consecutive failures observed before opening.
        failure_count: usize,
        /// How long the circuit has been open.
        open_duration: Duration,
    },
    /// The store call exceeded the configured timeout.
    Timeout {
        /// Time spent waiting before giving up.
        elapsed: Duration,
        /// The configured limit.
        timeout: Duration,
    },
    /// The store reported a transport or protocol failure.
    Store(StoreError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitOpen { failure_count, open_duration } => {
                write!(
                    f,
                    "circuit breaker open ({} failures, open for {:?})",
                    failure_count, open_duration
                )
            }
            Self::Timeout { elapsed, timeout } => {
                write!(f, "store call timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Store(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl EngineError {
    /// Check if this error is a breaker short-circuit.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Check if this error is a store timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
