//! Counter key generation.

use std::fmt;

use super::counter::Period;
use super::identity::ClientIdentity;
use super::rules::RateLimitRule;

/// A key that uniquely identifies one counter.
///
/// The key is composed of the client identity, the rule's endpoint pattern
/// and the rule's period. The period names the window; the store keeps the
/// bounds of the live window alongside the count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// The client this counter belongs to
    pub client: String,
    /// Canonical endpoint pattern of the rule
    pub endpoint: String,
    /// Window length of the rule
    pub period: Period,
}

impl CounterKey {
    /// Create the key for a client under a rule.
    pub fn new(client: &ClientIdentity, rule: &RateLimitRule) -> Self {
        Self {
            client: client.as_str().to_string(),
            endpoint: rule.endpoint().to_string(),
            period: rule.period(),
        }
    }

    /// Convert the counter key to a string representation.
    ///
    /// This is useful for logging and as the key of external stores.
    pub fn to_string_key(&self) -> String {
        format!("{}|{}|{}", self.client, self.endpoint, self.period)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}
