//! Pure sizing and pricing math. No I/O here, so every rule is unit-testable
//! without an exchange.

use ladder_core::config::PlannerConfig;
use ladder_core::{Direction, StrategyType};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::error::{ExecutionError, Result};

/// Contract-count split for a new position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSizes {
    pub strategy: StrategyType,
    pub qty: i64,
    pub tier1: i64,
    pub tier2: i64,
    /// Remainder after the tier floors; absorbs all rounding loss.
    pub runner: i64,
}

/// Computes the contract quantity and tier split for a requested notional.
///
/// Quantity is `floor(notional / (price * multiplier))` with a minimum of 1.
/// A multi-tier request below `min_multi_tier_qty` contracts is demoted to a
/// single-tier plan: too few units to split meaningfully.
///
/// # Errors
///
/// Returns [`ExecutionError::Plan`] if notional, price, or multiplier is not
/// positive.
pub fn plan_sizes(
    notional: Decimal,
    price: Decimal,
    multiplier: Decimal,
    config: &PlannerConfig,
) -> Result<TierSizes> {
    if notional <= Decimal::ZERO {
        return Err(ExecutionError::Plan(format!(
            "notional must be positive, got {notional}"
        )));
    }
    if price <= Decimal::ZERO || multiplier <= Decimal::ZERO {
        return Err(ExecutionError::Plan(format!(
            "price ({price}) and multiplier ({multiplier}) must be positive"
        )));
    }

    let raw = notional / (price * multiplier);
    let qty = raw.floor().to_i64().ok_or_else(|| {
        ExecutionError::Plan(format!("quantity {raw} out of range"))
    })?;
    let qty = qty.max(1);

    if qty < config.min_multi_tier_qty {
        return Ok(TierSizes {
            strategy: StrategyType::Single,
            qty,
            tier1: qty,
            tier2: 0,
            runner: 0,
        });
    }

    let qty_dec = Decimal::from(qty);
    let tier1 = (qty_dec * config.tier1_fraction)
        .floor()
        .to_i64()
        .unwrap_or(0);
    let tier2 = (qty_dec * config.tier2_fraction)
        .floor()
        .to_i64()
        .unwrap_or(0);
    let runner = qty - tier1 - tier2;

    Ok(TierSizes {
        strategy: StrategyType::MultiTier,
        qty,
        tier1,
        tier2,
        runner,
    })
}

/// Take-profit tier prices for a filled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPrices {
    pub tier1: Decimal,
    pub tier2: Decimal,
}

/// Tier prices offset from entry in the profit direction, rounded to the
/// contract tick. The stop price is not derived here: it comes verbatim from
/// the recommendation.
#[must_use]
pub fn plan_prices(
    entry: Decimal,
    direction: Direction,
    tick: Decimal,
    config: &PlannerConfig,
) -> TierPrices {
    let sign = direction.sign();
    TierPrices {
        tier1: round_to_tick(entry * (Decimal::ONE + sign * config.tier1_offset), tick),
        tier2: round_to_tick(entry * (Decimal::ONE + sign * config.tier2_offset), tick),
    }
}

/// Rounds a price to the nearest multiple of the contract tick.
#[must_use]
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).round() * tick
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> PlannerConfig {
        PlannerConfig::default()
    }

    #[test]
    fn worked_example_from_sizing_rules() {
        // $1000 at $50000 with 0.0001 multiplier: 1000 / 5 = 200 contracts.
        let sizes = plan_sizes(dec!(1000), dec!(50000), dec!(0.0001), &config()).unwrap();
        assert_eq!(sizes.strategy, StrategyType::MultiTier);
        assert_eq!(sizes.qty, 200);
        assert_eq!(sizes.tier1, 100);
        assert_eq!(sizes.tier2, 60);
        assert_eq!(sizes.runner, 40);
    }

    #[test]
    fn tiers_always_sum_to_quantity() {
        // Quantities that do not divide evenly; the runner absorbs the slack.
        for qty_notional in [5, 7, 11, 13, 99, 101, 997] {
            let sizes = plan_sizes(
                Decimal::from(qty_notional),
                dec!(1),
                dec!(1),
                &config(),
            )
            .unwrap();
            assert_eq!(
                sizes.tier1 + sizes.tier2 + sizes.runner,
                sizes.qty,
                "lost contracts at qty {qty_notional}"
            );
        }
    }

    #[test]
    fn small_quantity_demotes_to_single_tier() {
        let sizes = plan_sizes(dec!(3), dec!(1), dec!(1), &config()).unwrap();
        assert_eq!(sizes.strategy, StrategyType::Single);
        assert_eq!(sizes.qty, 3);
        assert_eq!(sizes.tier1, 3);
        assert_eq!(sizes.tier2, 0);
        assert_eq!(sizes.runner, 0);
    }

    #[test]
    fn quantity_has_a_floor_of_one() {
        // Notional too small for even one contract still trades one.
        let sizes = plan_sizes(dec!(1), dec!(50000), dec!(0.0001), &config()).unwrap();
        assert_eq!(sizes.qty, 1);
        assert_eq!(sizes.strategy, StrategyType::Single);
    }

    #[test]
    fn boundary_quantity_five_stays_multi_tier() {
        let sizes = plan_sizes(dec!(5), dec!(1), dec!(1), &config()).unwrap();
        assert_eq!(sizes.strategy, StrategyType::MultiTier);
        assert_eq!(sizes.tier1, 2); // floor(2.5)
        assert_eq!(sizes.tier2, 1); // floor(1.5)
        assert_eq!(sizes.runner, 2);
    }

    #[test]
    fn rejects_nonpositive_inputs() {
        assert!(plan_sizes(dec!(0), dec!(1), dec!(1), &config()).is_err());
        assert!(plan_sizes(dec!(100), dec!(0), dec!(1), &config()).is_err());
        assert!(plan_sizes(dec!(100), dec!(1), dec!(-1), &config()).is_err());
    }

    #[test]
    fn long_tier_prices_sit_above_entry() {
        let prices = plan_prices(dec!(50000), Direction::Long, dec!(0.1), &config());
        assert_eq!(prices.tier1, dec!(50750.0)); // +1.5%
        assert_eq!(prices.tier2, dec!(51250.0)); // +2.5%
    }

    #[test]
    fn short_tier_prices_sit_below_entry() {
        let prices = plan_prices(dec!(50000), Direction::Short, dec!(0.1), &config());
        assert_eq!(prices.tier1, dec!(49250.0));
        assert_eq!(prices.tier2, dec!(48750.0));
    }

    #[test]
    fn prices_snap_to_tick() {
        let prices = plan_prices(dec!(3333), Direction::Long, dec!(0.5), &config());
        // 3333 * 1.015 = 3382.995 -> 3383.0
        assert_eq!(prices.tier1, dec!(3383.0));
        assert_eq!(prices.tier1 % dec!(0.5), Decimal::ZERO);
    }
}
