//! Billing enforcement: server limits and period costs.

mod cost;
mod limit;

pub use cost::{CostEvaluator, RateCostEvaluator};
pub use limit::{LimitGuard, StoreLimitGuard};
