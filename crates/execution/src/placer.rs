//! Failure-safe order placement.
//!
//! Sequencing is strict: leverage, then the market entry (conditional orders
//! need an existing position), then tier 1, tier 2, and the stop, one at a
//! time. A conditional failure rolls back every conditional already placed
//! and falls back to a single emergency stop at the recommendation's stop
//! price. Only when that emergency placement also fails does the position
//! remain unprotected, and that surfaces as [`ExecutionError::Critical`].

use std::sync::Arc;

use chrono::Utc;
use ladder_core::config::PlannerConfig;
use ladder_core::{
    ActionAudit, AuditAction, Direction, PositionPhase, PositionState, StrategyType,
    TradeRecommendation,
};
use ladder_exchange_gate::{
    ExchangeError, FuturesExchange, MarketOrderRequest, TriggerOrderRequest, TriggerRule,
};
use ladder_store::PositionStore;
use rust_decimal::Decimal;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{CancelOutcome, ExecutionError, Result};
use crate::plan::{self, round_to_tick, TierPrices, TierSizes};

/// Everything a caller needs to reference the orders just placed.
#[derive(Debug, Clone)]
pub struct PlacementOutcome {
    pub position_id: Uuid,
    pub strategy: StrategyType,
    pub entry_order_id: String,
    pub tier_order_ids: Vec<String>,
    pub stop_order_id: String,
}

pub struct PositionPlacer {
    exchange: Arc<dyn FuturesExchange>,
    store: PositionStore,
    config: PlannerConfig,
}

impl PositionPlacer {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: PositionStore,
        config: PlannerConfig,
    ) -> Self {
        Self {
            exchange,
            store,
            config,
        }
    }

    /// Opens a position from a recommendation: entry plus all conditional
    /// exit orders, then persists the position record.
    ///
    /// # Errors
    ///
    /// - [`ExecutionError::Entry`] if the market entry fails (nothing open).
    /// - [`ExecutionError::ConditionalFailed`] if a conditional leg fails
    ///   but the emergency stop went in (position protected).
    /// - [`ExecutionError::Critical`] if the position is left unprotected.
    pub async fn place_multi_tier_position(
        &self,
        rec: &TradeRecommendation,
    ) -> Result<PlacementOutcome> {
        let position_id = Uuid::new_v4();
        let scope = &rec.scope;

        let spec = self
            .exchange
            .get_contract_spec(scope, &rec.contract)
            .await?;
        let sizes = plan::plan_sizes(
            rec.notional,
            spec.last_price,
            spec.quanto_multiplier,
            &self.config,
        )?;

        if sizes.strategy == StrategyType::Single {
            info!(
                contract = rec.contract,
                qty = sizes.qty,
                "quantity too small to split, demoting to single-tier"
            );
        }

        self.exchange
            .update_leverage(scope, &rec.contract, rec.leverage)
            .await?;

        // Entry must succeed before anything conditional.
        let entry_size = match rec.direction {
            Direction::Long => sizes.qty,
            Direction::Short => -sizes.qty,
        };
        let receipt = self
            .exchange
            .place_market_order(
                scope,
                &MarketOrderRequest {
                    contract: rec.contract.clone(),
                    size: entry_size,
                    reduce_only: false,
                },
            )
            .await
            .map_err(|source| ExecutionError::Entry {
                contract: rec.contract.clone(),
                source,
            })?;

        let entry_price = if receipt.fill_price > Decimal::ZERO {
            receipt.fill_price
        } else {
            spec.last_price
        };
        info!(
            position_id = %position_id,
            contract = rec.contract,
            direction = %rec.direction,
            qty = sizes.qty,
            entry_price = %entry_price,
            "entry filled"
        );

        let prices = plan::plan_prices(entry_price, rec.direction, spec.order_price_round, &self.config);
        let tp_prices = match sizes.strategy {
            StrategyType::MultiTier => prices,
            StrategyType::Single => TierPrices {
                tier1: round_to_tick(rec.take_profit_price, spec.order_price_round),
                tier2: Decimal::ZERO,
            },
        };

        let (tier_ids, stop_id) = self
            .place_conditionals(rec, position_id, &sizes, &tp_prices)
            .await?;

        let now = Utc::now();
        let position = PositionState {
            id: position_id,
            contract: rec.contract.clone(),
            direction: rec.direction,
            strategy: sizes.strategy,
            total_size: sizes.qty,
            entry_price,
            entry_order_id: receipt.order_id.clone(),
            multiplier: spec.quanto_multiplier,
            tier1_size: sizes.tier1,
            tier2_size: sizes.tier2,
            runner_size: sizes.runner,
            tier1_order_id: tier_ids.first().cloned(),
            tier2_order_id: tier_ids.get(1).cloned(),
            stop_order_id: Some(stop_id.clone()),
            phase: PositionPhase::Initial,
            remaining_size: sizes.qty,
            realized_pnl: Decimal::ZERO,
            original_stop_price: rec.stop_price,
            current_stop_price: rec.stop_price,
            tier1_price: tp_prices.tier1,
            tier2_price: tp_prices.tier2,
            leverage: rec.leverage,
            credential_ref: scope.credential_ref.clone(),
            settle: scope.settle,
            created_at: now,
            updated_at: now,
        };

        // Exchange-side protection is already in place; a persistence failure
        // here is logged but not escalated.
        if let Err(e) = self.store.create_position(&position).await {
            error!(
                position_id = %position_id,
                contract = rec.contract,
                error = %e,
                "position placed on exchange but could not be persisted"
            );
        }

        Ok(PlacementOutcome {
            position_id,
            strategy: sizes.strategy,
            entry_order_id: receipt.order_id,
            tier_order_ids: tier_ids,
            stop_order_id: stop_id,
        })
    }

    /// Places the take-profit tier(s) and the stop, in order. On failure:
    /// rollback, emergency stop, escalate.
    async fn place_conditionals(
        &self,
        rec: &TradeRecommendation,
        position_id: Uuid,
        sizes: &TierSizes,
        prices: &TierPrices,
    ) -> Result<(Vec<String>, String)> {
        let mut placed: Vec<String> = Vec::with_capacity(3);

        let legs: Vec<(&str, i64, Decimal, TriggerRule)> = match sizes.strategy {
            StrategyType::MultiTier => vec![
                ("tier1", sizes.tier1, prices.tier1, tp_rule(rec.direction)),
                ("tier2", sizes.tier2, prices.tier2, tp_rule(rec.direction)),
                ("stop", sizes.qty, rec.stop_price, stop_rule(rec.direction)),
            ],
            StrategyType::Single => vec![
                ("tier1", sizes.tier1, prices.tier1, tp_rule(rec.direction)),
                ("stop", sizes.qty, rec.stop_price, stop_rule(rec.direction)),
            ],
        };

        for (stage, size, trigger_price, rule) in legs {
            let request = TriggerOrderRequest {
                contract: rec.contract.clone(),
                size: close_size(rec.direction, size),
                trigger_price,
                rule,
                reduce_only: true,
            };
            match self.exchange.place_trigger_order(&rec.scope, &request).await {
                Ok(order_id) => {
                    self.audit_best_effort(ActionAudit::ok(
                        position_id,
                        AuditAction::OrderPlaced,
                        format!("{stage} trigger {order_id} @ {trigger_price} x{size}"),
                    ))
                    .await;
                    placed.push(order_id);
                }
                Err(source) => {
                    return Err(self
                        .unwind_after_failure(rec, position_id, sizes, stage, source, placed)
                        .await);
                }
            }
        }

        // The stop is always the last leg placed.
        let stop_id = placed.pop().unwrap_or_default();
        Ok((placed, stop_id))
    }

    /// Cancels everything placed so far, then tries one emergency stop at
    /// the original stop price. Returns the error the caller must propagate.
    async fn unwind_after_failure(
        &self,
        rec: &TradeRecommendation,
        position_id: Uuid,
        sizes: &TierSizes,
        stage: &str,
        source: ExchangeError,
        placed: Vec<String>,
    ) -> ExecutionError {
        warn!(
            position_id = %position_id,
            contract = rec.contract,
            stage,
            error = %source,
            placed = placed.len(),
            "conditional placement failed, rolling back"
        );

        let mut rollback = Vec::with_capacity(placed.len());
        for order_id in &placed {
            match self
                .exchange
                .cancel_trigger_order(&rec.scope, order_id)
                .await
            {
                Ok(()) => {
                    self.audit_best_effort(ActionAudit::ok(
                        position_id,
                        AuditAction::RollbackCancel,
                        format!("cancelled {order_id}"),
                    ))
                    .await;
                    rollback.push(CancelOutcome {
                        order_id: order_id.clone(),
                        cancelled: true,
                        error: None,
                    });
                }
                Err(e) => {
                    self.audit_best_effort(ActionAudit::failed(
                        position_id,
                        AuditAction::RollbackCancel,
                        format!("cancel {order_id}"),
                        e.to_string(),
                    ))
                    .await;
                    rollback.push(CancelOutcome {
                        order_id: order_id.clone(),
                        cancelled: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let emergency = TriggerOrderRequest {
            contract: rec.contract.clone(),
            size: close_size(rec.direction, sizes.qty),
            trigger_price: rec.stop_price,
            rule: stop_rule(rec.direction),
            reduce_only: true,
        };
        match self.exchange.place_trigger_order(&rec.scope, &emergency).await {
            Ok(emergency_id) => {
                warn!(
                    position_id = %position_id,
                    contract = rec.contract,
                    emergency_stop = emergency_id,
                    "emergency stop placed after rollback"
                );
                self.audit_best_effort(ActionAudit::ok(
                    position_id,
                    AuditAction::EmergencyStop,
                    format!("emergency stop {emergency_id} @ {}", rec.stop_price),
                ))
                .await;
                ExecutionError::ConditionalFailed {
                    contract: rec.contract.clone(),
                    stage: stage.to_string(),
                    source,
                    rollback,
                    emergency_stop_order_id: emergency_id,
                }
            }
            Err(emergency_err) => {
                error!(
                    position_id = %position_id,
                    contract = rec.contract,
                    error = %emergency_err,
                    "CRITICAL: emergency stop failed, position unprotected"
                );
                self.audit_best_effort(ActionAudit::failed(
                    position_id,
                    AuditAction::EmergencyStop,
                    format!("emergency stop @ {}", rec.stop_price),
                    emergency_err.to_string(),
                ))
                .await;
                ExecutionError::Critical {
                    contract: rec.contract.clone(),
                    details: format!(
                        "{stage} placement failed ({source}); emergency stop also failed ({emergency_err})"
                    ),
                    rollback,
                }
            }
        }
    }

    async fn audit_best_effort(&self, audit: ActionAudit) {
        if let Err(e) = self.store.append_audit(&audit).await {
            warn!(error = %e, "failed to append audit entry");
        }
    }
}

/// Close orders trade against the position direction.
const fn close_size(direction: Direction, size: i64) -> i64 {
    match direction {
        Direction::Long => -size,
        Direction::Short => size,
    }
}

/// A take-profit triggers when price moves in the profit direction.
const fn tp_rule(direction: Direction) -> TriggerRule {
    match direction {
        Direction::Long => TriggerRule::PriceGte,
        Direction::Short => TriggerRule::PriceLte,
    }
}

/// A stop triggers when price moves against the position.
const fn stop_rule(direction: Direction) -> TriggerRule {
    match direction {
        Direction::Long => TriggerRule::PriceLte,
        Direction::Short => TriggerRule::PriceGte,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ladder_core::{AccountScope, SettleCurrency};
    use ladder_exchange_gate::{ContractSpec, PaperExchange};
    use rust_decimal_macros::dec;

    fn scope() -> AccountScope {
        AccountScope {
            credential_ref: "main".to_string(),
            settle: SettleCurrency::Usdt,
        }
    }

    fn btc_spec() -> ContractSpec {
        ContractSpec {
            name: "BTC_USDT".to_string(),
            last_price: dec!(50000),
            quanto_multiplier: dec!(0.0001),
            order_price_round: dec!(0.1),
            leverage_max: dec!(100),
        }
    }

    fn recommendation() -> TradeRecommendation {
        TradeRecommendation {
            contract: "BTC_USDT".to_string(),
            direction: Direction::Long,
            stop_price: dec!(49000),
            take_profit_price: dec!(52000),
            notional: dec!(1000),
            leverage: 10,
            scope: scope(),
        }
    }

    async fn placer_with(paper: Arc<PaperExchange>) -> (PositionPlacer, PositionStore) {
        let store = PositionStore::new_in_memory().await.unwrap();
        let placer = PositionPlacer::new(paper, store.clone(), PlannerConfig::default());
        (placer, store)
    }

    #[tokio::test]
    async fn multi_tier_happy_path_places_entry_and_three_conditionals() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        let (placer, store) = placer_with(paper.clone()).await;

        let outcome = placer
            .place_multi_tier_position(&recommendation())
            .await
            .unwrap();

        assert_eq!(outcome.strategy, StrategyType::MultiTier);
        assert_eq!(outcome.tier_order_ids.len(), 2);
        assert_eq!(paper.leverage_updates(), vec![("BTC_USDT".to_string(), 10)]);
        assert_eq!(paper.market_orders().len(), 1);
        assert_eq!(paper.market_orders()[0].0.size, 200);

        let open = paper.open_trigger_orders();
        assert_eq!(open.len(), 3);
        // All conditionals close against the long.
        assert!(open.iter().all(|o| o.initial.size < 0 && o.initial.reduce_only));

        let pos = store
            .get_position(outcome.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.phase, PositionPhase::Initial);
        assert_eq!(pos.total_size, 200);
        assert_eq!(pos.tier1_size, 100);
        assert_eq!(pos.tier2_size, 60);
        assert_eq!(pos.runner_size, 40);
        assert_eq!(pos.remaining_size, 200);
        assert_eq!(pos.tier1_price, dec!(50750));
        assert_eq!(pos.tier2_price, dec!(51250));
        assert_eq!(pos.current_stop_price, dec!(49000));
        assert_eq!(pos.stop_order_id.as_deref(), Some(outcome.stop_order_id.as_str()));
    }

    #[tokio::test]
    async fn small_notional_demotes_to_single_tier() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(ContractSpec {
            last_price: dec!(50000),
            // One contract is worth $500; $1000 buys 2 contracts.
            quanto_multiplier: dec!(0.01),
            ..btc_spec()
        });
        let (placer, store) = placer_with(paper.clone()).await;

        let outcome = placer
            .place_multi_tier_position(&recommendation())
            .await
            .unwrap();

        assert_eq!(outcome.strategy, StrategyType::Single);
        assert_eq!(outcome.tier_order_ids.len(), 1);
        // One take-profit plus one stop.
        assert_eq!(paper.open_trigger_orders().len(), 2);

        let pos = store
            .get_position(outcome.position_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.strategy, StrategyType::Single);
        assert_eq!(pos.tier1_size, 2);
        assert_eq!(pos.tier2_size, 0);
        assert_eq!(pos.runner_size, 0);
        // Single-tier take-profit comes from the recommendation.
        assert_eq!(pos.tier1_price, dec!(52000));
    }

    #[tokio::test]
    async fn entry_failure_propagates_with_nothing_to_unwind() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        paper.fail_next("place_market_order", 1);
        let (placer, _store) = placer_with(paper.clone()).await;

        let err = placer
            .place_multi_tier_position(&recommendation())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Entry { .. }));
        assert!(paper.open_trigger_orders().is_empty());
    }

    #[tokio::test]
    async fn second_conditional_failure_rolls_back_and_places_emergency_stop() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        // tier1 succeeds, tier2 fails, emergency stop succeeds.
        paper.fail_on_call("place_trigger_order", 2);
        let (placer, _store) = placer_with(paper.clone()).await;

        let err = placer
            .place_multi_tier_position(&recommendation())
            .await
            .unwrap_err();

        let ExecutionError::ConditionalFailed {
            stage,
            rollback,
            emergency_stop_order_id,
            ..
        } = err
        else {
            panic!("expected ConditionalFailed, got {err:?}");
        };
        assert_eq!(stage, "tier2");
        assert_eq!(rollback.len(), 1);
        assert!(rollback[0].cancelled);
        assert_eq!(paper.cancelled_orders().len(), 1);

        // Only the emergency stop remains, at the original stop price.
        let open = paper.open_trigger_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id_str(), emergency_stop_order_id);
        assert_eq!(open[0].trigger.price, dec!(49000));
        assert_eq!(open[0].initial.size, -200);
    }

    #[tokio::test]
    async fn emergency_stop_failure_escalates_to_critical() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        // tier2 fails, then the emergency stop fails too.
        paper.fail_on_call("place_trigger_order", 2);
        paper.fail_on_call("place_trigger_order", 3);
        let (placer, _store) = placer_with(paper.clone()).await;

        let err = placer
            .place_multi_tier_position(&recommendation())
            .await
            .unwrap_err();
        assert!(err.is_critical());
        let ExecutionError::Critical { rollback, .. } = err else {
            panic!("expected Critical");
        };
        assert_eq!(rollback.len(), 1);
        // Nothing protective is left resting.
        assert!(paper.open_trigger_orders().is_empty());
    }

    #[tokio::test]
    async fn short_direction_flips_trigger_rules_and_sizes() {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        let (placer, store) = placer_with(paper.clone()).await;

        let mut rec = recommendation();
        rec.direction = Direction::Short;
        rec.stop_price = dec!(51000);
        let outcome = placer.place_multi_tier_position(&rec).await.unwrap();

        assert_eq!(paper.market_orders()[0].0.size, -200);
        let open = paper.open_trigger_orders();
        // Closes buy back the short.
        assert!(open.iter().all(|o| o.initial.size > 0));

        let pos = store
            .get_position(outcome.position_id)
            .await
            .unwrap()
            .unwrap();
        // Short tiers sit below entry.
        assert!(pos.tier1_price < pos.entry_price);
        assert!(pos.tier2_price < pos.tier1_price);
    }
}
