#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # rategate
//!
//! The rate-decision engine of an API gateway: per-client, per-endpoint
//! quotas enforced consistently across many stateless gateway processes that
//! share nothing but a state store.
//!
//! ## Features
//!
//! - **Token bucket** and **sliding window** quota strategies as pure
//!   state transitions
//! - A pluggable **atomic state store** seam ([`StateStore`]); all per-key
//!   serialization happens inside the store's atomic unit
//! - A lock-free **circuit breaker** around every store call, with
//!   **fail-open / fail-closed** fallback while the store is unreachable
//! - Fire-and-forget **analytics events**, one per decision
//!
//! ## Quick Start
//!
//! ```rust
//! use rategate::{FallbackMode, MemoryStore, QuotaPolicy, RateGate, Strategy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let policy = QuotaPolicy::new(100, Duration::from_secs(60), Strategy::TokenBucket)
//!         .expect("valid policy");
//!     let gate = RateGate::builder(MemoryStore::new())
//!         .fallback(FallbackMode::FailOpen)
//!         .build();
//!
//!     let decision = gate.check("client-42", "/api/search", &policy).await;
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod engine;
pub mod error;
pub mod events;
pub mod key;
pub mod policy;
pub mod store;
pub mod strategy;

// Re-exports
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use clock::{Clock, SystemClock};
pub use engine::{Decision, RateGate, RateGateBuilder};
pub use error::EngineError;
pub use events::{DecisionEvent, EventStream};
pub use key::RateLimitKey;
pub use policy::{ConfigError, FallbackMode, QuotaPolicy, Strategy};
pub use store::{AtomicOp, MemoryStore, StateStore, StoreError};
pub use strategy::{BucketState, QuotaState, WindowState};
