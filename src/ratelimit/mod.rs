//! Rate limiting policy and route classification.

mod key;
mod limiter;
mod rules;

pub use key::{RateLimitKey, Subject};
pub use limiter::{Decision, RateLimitPolicy, RateLimitVerdict, VerdictStatus};
pub use rules::{FailMode, KeyStrategy, RateLimitRules, RouteRule};
