//! Core rate limiter implementation.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::clock::{Clock, Timestamp};
use super::counter::CounterEntry;
use super::identity::ClientIdentity;
use super::key::CounterKey;
use super::rules::{QuotaExceededResponse, RateLimitRule};
use super::store::CounterStore;
use crate::error::StoreError;

/// What to do with a request when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow the request
    #[default]
    FailOpen,
    /// Deny the request with the rule's quota-exceeded response
    FailClosed,
}

/// Quota state of one counter after an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window
    pub limit: u64,
    /// Requests counted in the current window
    pub count: u64,
    /// Requests still allowed in the current window
    pub remaining: u64,
    pub window_start: Timestamp,
    pub window_end: Timestamp,
    /// Time left until the window resets
    pub reset_after: Duration,
}

impl Quota {
    fn new(limit: u64, entry: &CounterEntry, now: Timestamp) -> Self {
        Self {
            limit,
            count: entry.count,
            remaining: limit.saturating_sub(entry.count),
            window_start: entry.window_start,
            window_end: entry.window_end,
            reset_after: entry.duration_until_reset(now),
        }
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed. `quota` is absent when nothing was counted.
    Allow { quota: Option<Quota> },
    /// The request is over its quota and must be answered with `response`.
    Deny {
        response: QuotaExceededResponse,
        quota: Option<Quota>,
    },
}

/// A decision plus whether it was made in degraded mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    /// Set when the counter store failed and the failure policy decided
    pub degraded: bool,
}

impl Evaluation {
    fn allow(quota: Option<Quota>) -> Self {
        Self {
            decision: Decision::Allow { quota },
            degraded: false,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.decision, Decision::Allow { .. })
    }

    pub fn quota(&self) -> Option<&Quota> {
        match &self.decision {
            Decision::Allow { quota } | Decision::Deny { quota, .. } => quota.as_ref(),
        }
    }
}

/// The rate limit evaluator.
///
/// Counts each request against its client's window for the matched rule and
/// decides whether it may proceed. Store failures are resolved here through
/// the failure policy and never reach the caller.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    failure_policy: FailurePolicy,
    /// Clients that are never limited
    whitelist: HashSet<ClientIdentity>,
}

impl RateLimiter {
    /// Create a fail-open rate limiter without whitelisted clients.
    pub fn new(store: Arc<dyn CounterStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            failure_policy: FailurePolicy::default(),
            whitelist: HashSet::new(),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_whitelist<I, S>(mut self, clients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.whitelist
            .extend(clients.into_iter().map(ClientIdentity::new));
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Count a request from `client` under `rule` and decide on it.
    ///
    /// Up to `rule.limit()` requests per window are allowed; the request that
    /// brings the count to `limit + 1` is the first one denied. Denied
    /// requests still count.
    pub async fn evaluate(&self, client: &ClientIdentity, rule: &RateLimitRule) -> Evaluation {
        if self.whitelist.contains(client) {
            trace!(client = %client, rule = %rule.endpoint(), "Client is whitelisted");
            return Evaluation::allow(None);
        }

        let key = CounterKey::new(client, rule);
        let now = self.clock.now();

        let entry = match self.store.increment(&key, rule.period().duration(), now).await {
            Ok(entry) => entry,
            Err(e) => return self.degraded(&key, rule, e),
        };

        let quota = Quota::new(rule.limit(), &entry, now);

        trace!(
            key = %key,
            count = entry.count,
            limit = rule.limit(),
            "Checked rate limit"
        );

        if entry.count <= rule.limit() {
            return Evaluation::allow(Some(quota));
        }

        debug!(
            client = %client,
            rule = %rule.endpoint(),
            count = entry.count,
            limit = rule.limit(),
            "Rate limit exceeded"
        );

        Evaluation {
            decision: Decision::Deny {
                response: rule.quota_exceeded_response().clone(),
                quota: Some(quota),
            },
            degraded: false,
        }
    }

    /// Get the current quota of `client` under `rule` without counting.
    ///
    /// Returns `None` when the client has no open window, i.e. the full
    /// limit is available.
    pub async fn quota(
        &self,
        client: &ClientIdentity,
        rule: &RateLimitRule,
    ) -> Result<Option<Quota>, StoreError> {
        let key = CounterKey::new(client, rule);
        let now = self.clock.now();

        let quota = self
            .store
            .peek(&key)
            .await?
            .filter(|entry| entry.is_live(now))
            .map(|entry| Quota::new(rule.limit(), &entry, now));
        Ok(quota)
    }

    fn degraded(&self, key: &CounterKey, rule: &RateLimitRule, error: StoreError) -> Evaluation {
        let decision = match self.failure_policy {
            FailurePolicy::FailOpen => {
                warn!(key = %key, error = %error, "Counter store failed, allowing request");
                Decision::Allow { quota: None }
            }
            FailurePolicy::FailClosed => {
                warn!(key = %key, error = %error, "Counter store failed, denying request");
                Decision::Deny {
                    response: rule.quota_exceeded_response().clone(),
                    quota: None,
                }
            }
        };

        Evaluation {
            decision,
            degraded: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::rules::RuleConfig;
    use crate::ratelimit::store::MemoryCounterStore;
    use async_trait::async_trait;
    use axum::http::StatusCode;

    /// A store whose backend is always unreachable.
    struct FailingStore;

    #[async_trait]
    impl CounterStore for FailingStore {
        async fn increment(
            &self,
            _key: &CounterKey,
            _window: Duration,
            _now: Timestamp,
        ) -> Result<CounterEntry, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn peek(&self, _key: &CounterKey) -> Result<Option<CounterEntry>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn contador_rule(limit: u64) -> RateLimitRule {
        RuleConfig::new("GET:/contador", "1m", limit)
            .with_quota_message("application/text", "Limite de requisicoes excedido")
            .compile(0, 429)
            .unwrap()
    }

    fn create_limiter() -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), clock.clone());
        (limiter, clock)
    }

    fn count_of(evaluation: &Evaluation) -> u64 {
        evaluation.quota().map(|q| q.count).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_counter_scenario() {
        let (limiter, clock) = create_limiter();
        let rule = contador_rule(3);
        let client = ClientIdentity::new("client-A");

        for expected in 1..=3 {
            let evaluation = limiter.evaluate(&client, &rule).await;
            assert!(evaluation.is_allowed(), "request {} should be allowed", expected);
            assert_eq!(count_of(&evaluation), expected);
            clock.advance(Duration::from_secs(1));
        }

        let evaluation = limiter.evaluate(&client, &rule).await;
        match evaluation.decision {
            Decision::Deny { response, quota } => {
                assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(response.body, "Limite de requisicoes excedido");
                assert_eq!(response.content_type, "application/text");
                assert_eq!(quota.map(|q| q.count), Some(4));
            }
            other => panic!("expected denial, got {:?}", other),
        }

        // 61 seconds after the first request
        clock.advance(Duration::from_secs(58));
        let evaluation = limiter.evaluate(&client, &rule).await;
        assert!(evaluation.is_allowed());
        assert_eq!(count_of(&evaluation), 1);
    }

    #[tokio::test]
    async fn test_exact_limit_boundary() {
        let (limiter, _clock) = create_limiter();
        let rule = contador_rule(10);
        let client = ClientIdentity::new("client-A");

        let mut allowed = 0;
        let mut first_denied = None;
        for n in 1..=15u64 {
            if limiter.evaluate(&client, &rule).await.is_allowed() {
                allowed += 1;
            } else if first_denied.is_none() {
                first_denied = Some(n);
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(first_denied, Some(11));
    }

    #[tokio::test]
    async fn test_remaining_and_reset() {
        let (limiter, clock) = create_limiter();
        let rule = contador_rule(3);
        let client = ClientIdentity::new("client-A");

        limiter.evaluate(&client, &rule).await;
        clock.advance(Duration::from_secs(20));
        let evaluation = limiter.evaluate(&client, &rule).await;

        let quota = evaluation.quota().unwrap();
        assert_eq!(quota.remaining, 1);
        assert_eq!(quota.window_end, Timestamp::from_secs(1_060));
        assert_eq!(quota.reset_after, Duration::from_secs(40));
    }

    #[tokio::test]
    async fn test_denied_requests_still_count() {
        let (limiter, _clock) = create_limiter();
        let rule = contador_rule(2);
        let client = ClientIdentity::new("client-A");

        for _ in 0..5 {
            limiter.evaluate(&client, &rule).await;
        }

        let quota = limiter.quota(&client, &rule).await.unwrap().unwrap();
        assert_eq!(quota.count, 5);
        assert_eq!(quota.remaining, 0);
    }

    #[tokio::test]
    async fn test_clients_have_separate_counters() {
        let (limiter, _clock) = create_limiter();
        let rule = contador_rule(2);
        let a = ClientIdentity::new("client-A");
        let b = ClientIdentity::new("client-B");

        limiter.evaluate(&a, &rule).await;
        limiter.evaluate(&a, &rule).await;
        assert!(!limiter.evaluate(&a, &rule).await.is_allowed());

        let evaluation = limiter.evaluate(&b, &rule).await;
        assert!(evaluation.is_allowed());
        assert_eq!(count_of(&evaluation), 1);
    }

    #[tokio::test]
    async fn test_rules_have_separate_counters() {
        let (limiter, _clock) = create_limiter();
        let contador = contador_rule(1);
        let everything = RuleConfig::new("*:/*", "1m", 1).compile(1, 429).unwrap();
        let client = ClientIdentity::new("client-A");

        assert!(limiter.evaluate(&client, &contador).await.is_allowed());
        assert!(limiter.evaluate(&client, &everything).await.is_allowed());
        assert!(!limiter.evaluate(&client, &contador).await.is_allowed());
    }

    #[tokio::test]
    async fn test_quota_without_window() {
        let (limiter, clock) = create_limiter();
        let rule = contador_rule(3);
        let client = ClientIdentity::new("client-A");

        assert_eq!(limiter.quota(&client, &rule).await.unwrap(), None);

        limiter.evaluate(&client, &rule).await;
        assert!(limiter.quota(&client, &rule).await.unwrap().is_some());

        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.quota(&client, &rule).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_whitelisted_client_is_not_counted() {
        let (limiter, _clock) = create_limiter();
        let limiter = limiter.with_whitelist(["internal"]);
        let rule = contador_rule(1);
        let client = ClientIdentity::new("internal");

        for _ in 0..5 {
            let evaluation = limiter.evaluate(&client, &rule).await;
            assert!(evaluation.is_allowed());
            assert!(evaluation.quota().is_none());
        }
        assert_eq!(limiter.quota(&client, &rule).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_store_failure_fail_open() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(Arc::new(FailingStore), clock);

        let evaluation = limiter
            .evaluate(&ClientIdentity::new("client-A"), &contador_rule(3))
            .await;

        assert_eq!(evaluation.decision, Decision::Allow { quota: None });
        assert!(evaluation.degraded);
    }

    #[tokio::test]
    async fn test_store_failure_fail_closed() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(Arc::new(FailingStore), clock)
            .with_failure_policy(FailurePolicy::FailClosed);
        let rule = contador_rule(3);

        let evaluation = limiter.evaluate(&ClientIdentity::new("client-A"), &rule).await;

        assert!(evaluation.degraded);
        assert_eq!(
            evaluation.decision,
            Decision::Deny {
                response: rule.quota_exceeded_response().clone(),
                quota: None,
            }
        );
    }

    #[tokio::test]
    async fn test_quota_surfaces_store_failure() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), Arc::new(ManualClock::default()));
        let result = limiter
            .quota(&ClientIdentity::new("client-A"), &contador_rule(3))
            .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_failure_policy_deserialize() {
        let policy: FailurePolicy = serde_yaml::from_str("fail_closed").unwrap();
        assert_eq!(policy, FailurePolicy::FailClosed);
        assert_eq!(FailurePolicy::default(), FailurePolicy::FailOpen);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_requests_allow_exactly_limit() {
        let (limiter, _clock) = create_limiter();
        let limiter = Arc::new(limiter);
        let rule = Arc::new(contador_rule(10));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let rule = rule.clone();
                tokio::spawn(async move {
                    limiter
                        .evaluate(&ClientIdentity::new("hammer"), &rule)
                        .await
                        .is_allowed()
                })
            })
            .collect();

        let results = futures::future::join_all(tasks).await;
        let allowed = results.iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(allowed, 10);
        assert_eq!(results.len() - allowed, 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_requests_after_window_expiry_allow_exactly_limit() {
        let (limiter, clock) = create_limiter();
        let limiter = Arc::new(limiter);
        let rule = Arc::new(contador_rule(10));
        let client = ClientIdentity::new("hammer");

        for _ in 0..15 {
            limiter.evaluate(&client, &rule).await;
        }
        assert!(!limiter.evaluate(&client, &rule).await.is_allowed());

        clock.advance(Duration::from_secs(60));

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let limiter = limiter.clone();
                let rule = rule.clone();
                let client = client.clone();
                tokio::spawn(async move { limiter.evaluate(&client, &rule).await })
            })
            .collect();

        let evaluations: Vec<Evaluation> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|evaluation| evaluation.unwrap())
            .collect();
        let allowed = evaluations.iter().filter(|e| e.is_allowed()).count();

        assert_eq!(allowed, 10);
        assert!(evaluations
            .iter()
            .all(|e| e.quota().map(|q| q.window_start) == Some(Timestamp::from_secs(1_060))));

        let quota = limiter.quota(&client, &rule).await.unwrap().unwrap();
        assert_eq!(quota.count, 50);
    }
}
