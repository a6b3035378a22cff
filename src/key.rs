//! Rate limit keys addressing one quota counter in the store.

use crate::policy::Strategy;
use std::fmt;

/// Composite key for one quota counter: client, endpoint, and strategy.
///
/// Immutable once built. `Display` renders the storage key, e.g.
/// `bucket:client-42:/api/search`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    client_id: String,
    endpoint: String,
    strategy: Strategy,
}

impl RateLimitKey {
    pub fn new(client_id: impl Into<String>, endpoint: impl Into<String>, strategy: Strategy) -> Self {
        Self { client_id: client_id.into(), endpoint: endpoint.into(), strategy }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// The string form under which the store keeps this counter's state.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.strategy.key_prefix(), self.client_id, self.endpoint)
    }
}
