//! Period cost of a server request.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::types::{BillingPeriod, Game, Resources, ServerForm};

/// Computes what a server costs for one billing period.
pub trait CostEvaluator: Send + Sync {
    /// Cost of the requested resources for the form's billing period.
    fn cost_per_period(&self, game: &Game, form: &ServerForm) -> Decimal;
}

/// Prices resources with the game's daily rates.
///
/// The daily price is `cpu / 100 * cpu_rate + memory * memory_rate +
/// disk * disk_rate + databases * database_rate`, scaled to the period and
/// rounded to cents with midpoints away from zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateCostEvaluator;

impl RateCostEvaluator {
    /// Unrounded price of one day.
    #[must_use]
    pub fn daily(game: &Game, resources: &Resources) -> Decimal {
        let rates = &game.rates;
        Decimal::from(resources.cpu) / dec!(100) * rates.cpu
            + Decimal::from(resources.memory) * rates.memory
            + Decimal::from(resources.disk) * rates.disk
            + Decimal::from(resources.databases) * rates.database
    }

    /// Rounded price of one period.
    #[must_use]
    pub fn for_period(game: &Game, resources: &Resources, period: BillingPeriod) -> Decimal {
        (Self::daily(game, resources) * period.days())
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }
}

impl CostEvaluator for RateCostEvaluator {
    fn cost_per_period(&self, game: &Game, form: &ServerForm) -> Decimal {
        Self::for_period(game, &form.resources, form.billing_period)
    }
}
