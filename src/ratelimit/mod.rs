//! Rate limiting logic and state management.

mod clock;
mod counter;
mod identity;
mod key;
mod limiter;
mod rules;
mod store;

pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use counter::{CounterEntry, Period, TimeUnit};
pub use identity::{ClientIdentity, ClientResolver};
pub use key::CounterKey;
pub use limiter::{Decision, Evaluation, FailurePolicy, Quota, RateLimiter};
pub use rules::{
    EndpointPattern, QuotaExceededConfig, QuotaExceededResponse, RateLimitRule, RuleConfig,
    RuleMatcher, RulesFile,
};
pub use store::{spawn_sweeper, CounterStore, MemoryCounterStore};
