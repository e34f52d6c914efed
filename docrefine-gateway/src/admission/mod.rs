//! Admission control ahead of the completion dependency.
//!
//! Three independent gates run before any upstream call:
//! - **Rate limiting**: sliding-window request and token-rate ceilings per
//!   caller identity
//! - **Token budgets**: calendar-period (daily/monthly) spend ceilings
//! - **Bulkhead**: a cap on concurrent in-flight calls with a bounded queue

pub mod budget;
pub mod bulkhead;
pub mod rate_limit;

pub use budget::{BudgetDecision, BudgetUsage, TokenBudgetTracker};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadStats};
pub use rate_limit::{RateLimitDecision, RateLimiterConfig, RateLimiterStats, SlidingWindowLimiter};
