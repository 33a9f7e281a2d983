//! Dynamic stop-loss management.
//!
//! Consumes the fill journal oldest-first and relocates the protective stop
//! as a position climbs the profit ladder: breakeven after tier 1, trailing
//! after tier 2, terminal when the stop fires or the position closes out of
//! band. All phase, stop-id, and remaining-size changes for one fill land in
//! a single store transaction.

use std::sync::Arc;
use std::time::Duration;

use ladder_core::config::ManagerConfig;
use ladder_core::{
    ActionAudit, AuditAction, Direction, FillType, OrderFillEvent, PositionPhase, PositionState,
};
use ladder_exchange_gate::{ExchangeError, FuturesExchange, TriggerOrderRequest, TriggerRule};
use ladder_execution::round_to_tick;
use ladder_store::PositionStore;
use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::errors::{ErrorBuffer, ManagerError, Result};

const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(500);

pub struct StopLossManager {
    exchange: Arc<dyn FuturesExchange>,
    store: PositionStore,
    config: ManagerConfig,
    errors: Arc<ErrorBuffer>,
}

impl StopLossManager {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: PositionStore,
        config: ManagerConfig,
        errors: Arc<ErrorBuffer>,
    ) -> Self {
        Self {
            exchange,
            store,
            config,
            errors,
        }
    }

    /// Applies every unprocessed fill event, oldest first. Returns how many
    /// were applied.
    ///
    /// Recoverable failures leave the fill unprocessed (the next cycle
    /// retries it) and are buffered as warnings.
    ///
    /// # Errors
    ///
    /// A critical failure (stop-replacement retries exhausted) is buffered
    /// at critical severity and returned so the caller cannot miss it.
    pub async fn process_pending_fills(&self) -> Result<usize> {
        let fills = self.store.unprocessed_fills().await?;
        let mut applied = 0;
        for fill in &fills {
            match self.apply_fill(fill).await {
                Ok(()) => applied += 1,
                Err(e) if e.is_critical() => {
                    error!(
                        position_id = %fill.position_id,
                        contract = fill.contract,
                        error = %e,
                        "critical failure while managing stop"
                    );
                    self.errors
                        .critical(format!("stop management {}", fill.contract), e.to_string());
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        position_id = %fill.position_id,
                        order_id = fill.order_id,
                        error = %e,
                        "fill left unprocessed, will retry next cycle"
                    );
                    self.errors
                        .warn(format!("stop management {}", fill.contract), e.to_string());
                }
            }
        }
        Ok(applied)
    }

    async fn apply_fill(&self, fill: &OrderFillEvent) -> Result<()> {
        let Some(pos) = self.store.get_position(fill.position_id).await? else {
            warn!(order_id = fill.order_id, position_id = %fill.position_id,
                "fill references an unknown position, discarding");
            self.store.mark_fill_processed(&fill.order_id).await?;
            return Ok(());
        };
        if pos.is_terminal() {
            self.store.mark_fill_processed(&fill.order_id).await?;
            return Ok(());
        }

        match fill.fill_type {
            FillType::Tier1 => self.on_tier1_fill(pos, fill).await,
            FillType::Tier2 => self.on_tier2_fill(pos, fill).await,
            FillType::StopLoss => self.on_stop_fill(pos, fill).await,
            FillType::Manual => self.on_manual_close(pos, fill).await,
        }
    }

    /// Tier 1 filled: move the stop to breakeven on the safe side of entry
    /// (above for longs, below for shorts).
    async fn on_tier1_fill(&self, mut pos: PositionState, fill: &OrderFillEvent) -> Result<()> {
        if pos.phase != PositionPhase::Initial {
            debug!(position_id = %pos.id, phase = %pos.phase, "tier1 fill already reflected");
            self.store.mark_fill_processed(&fill.order_id).await?;
            return Ok(());
        }

        pos.realized_pnl += realized_delta(&pos, fill.price, fill.size);
        pos.remaining_size -= fill.size;
        pos.tier1_order_id = None;

        if pos.remaining_size == 0 {
            // Single-tier position fully closed by its one take-profit. The
            // phase machine has no initial -> completed edge, so this steps
            // through tp1_filled in the same pass.
            self.cancel_resting(&pos, pos.stop_order_id.as_deref()).await;
            pos.stop_order_id = None;
            pos.phase = PositionPhase::Tp1Filled;
            let advanced = ActionAudit::ok(
                pos.id,
                AuditAction::PhaseAdvanced,
                "take-profit filled in full".to_string(),
            );
            self.store
                .update_position(&pos, Some(&fill.order_id), &advanced)
                .await?;

            pos.phase = PositionPhase::Completed;
            let closed = ActionAudit::ok(
                pos.id,
                AuditAction::PositionClosed,
                format!("take-profit filled in full, pnl {}", pos.realized_pnl),
            );
            self.store.update_position(&pos, None, &closed).await?;
            info!(position_id = %pos.id, contract = pos.contract, pnl = %pos.realized_pnl,
                "position completed at take-profit");
            return Ok(());
        }

        let breakeven =
            pos.entry_price * (Decimal::ONE + pos.direction.sign() * self.config.breakeven_buffer);
        let (stop_id, stop_price) = self
            .replace_stop(&pos, breakeven, pos.remaining_size)
            .await?;

        pos.phase = PositionPhase::Tp1Filled;
        pos.stop_order_id = Some(stop_id.clone());
        pos.current_stop_price = stop_price;
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::PhaseAdvanced,
            format!("tier1 filled, breakeven stop {stop_id} @ {stop_price}"),
        );
        self.store
            .update_position(&pos, Some(&fill.order_id), &audit)
            .await?;
        info!(position_id = %pos.id, contract = pos.contract, stop_price = %stop_price,
            remaining = pos.remaining_size, "stop moved to breakeven");
        Ok(())
    }

    /// Tier 2 filled: trail the stop behind the tier-2 fill price, leaving
    /// only the runner open.
    async fn on_tier2_fill(&self, mut pos: PositionState, fill: &OrderFillEvent) -> Result<()> {
        if pos.phase != PositionPhase::Tp1Filled {
            debug!(position_id = %pos.id, phase = %pos.phase, "tier2 fill already reflected");
            self.store.mark_fill_processed(&fill.order_id).await?;
            return Ok(());
        }

        pos.realized_pnl += realized_delta(&pos, fill.price, fill.size);
        pos.remaining_size -= fill.size;
        pos.tier2_order_id = None;

        let trailing =
            fill.price * (Decimal::ONE - pos.direction.sign() * self.config.trailing_distance);
        let (stop_id, stop_price) = self
            .replace_stop(&pos, trailing, pos.remaining_size)
            .await?;

        pos.phase = PositionPhase::Tp2Filled;
        pos.stop_order_id = Some(stop_id.clone());
        pos.current_stop_price = stop_price;
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::PhaseAdvanced,
            format!("tier2 filled, trailing stop {stop_id} @ {stop_price}"),
        );
        self.store
            .update_position(&pos, Some(&fill.order_id), &audit)
            .await?;
        info!(position_id = %pos.id, contract = pos.contract, stop_price = %stop_price,
            remaining = pos.remaining_size, "stop trailing behind tier2 fill");
        Ok(())
    }

    /// The protective stop fired. It always covers the full remaining size,
    /// so this is terminal from any phase.
    async fn on_stop_fill(&self, mut pos: PositionState, fill: &OrderFillEvent) -> Result<()> {
        self.cancel_resting(&pos, pos.tier1_order_id.as_deref()).await;
        self.cancel_resting(&pos, pos.tier2_order_id.as_deref()).await;
        // A stop relocated after this fill was journaled has a different id
        // than the one that filled and is still resting on the exchange.
        if pos.stop_order_id.as_deref() != Some(fill.order_id.as_str()) {
            self.cancel_resting(&pos, pos.stop_order_id.as_deref()).await;
        }

        pos.realized_pnl += realized_delta(&pos, fill.price, pos.remaining_size);
        pos.remaining_size = 0;
        pos.tier1_order_id = None;
        pos.tier2_order_id = None;
        pos.stop_order_id = None;
        pos.phase = PositionPhase::StoppedOut;
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::PositionClosed,
            format!("stop filled @ {}, pnl {}", fill.price, pos.realized_pnl),
        );
        self.store
            .update_position(&pos, Some(&fill.order_id), &audit)
            .await?;
        info!(position_id = %pos.id, contract = pos.contract, pnl = %pos.realized_pnl,
            "position stopped out");
        Ok(())
    }

    /// The position vanished from the exchange without any tracked order
    /// firing. Retire it and cancel whatever is still resting.
    ///
    /// Closed in profit phase it counts as completed; closed from `initial`
    /// there is no way to tell why, so it records as stopped out. The fill
    /// price is unknown, so realized pnl is left as accumulated.
    async fn on_manual_close(&self, mut pos: PositionState, fill: &OrderFillEvent) -> Result<()> {
        for order_id in [
            pos.tier1_order_id.clone(),
            pos.tier2_order_id.clone(),
            pos.stop_order_id.clone(),
        ] {
            self.cancel_resting(&pos, order_id.as_deref()).await;
        }

        pos.phase = match pos.phase {
            PositionPhase::Tp1Filled | PositionPhase::Tp2Filled => PositionPhase::Completed,
            _ => {
                warn!(position_id = %pos.id, contract = pos.contract,
                    "position closed out of band before any tier filled");
                PositionPhase::StoppedOut
            }
        };
        pos.remaining_size = 0;
        pos.tier1_order_id = None;
        pos.tier2_order_id = None;
        pos.stop_order_id = None;
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::PositionClosed,
            format!("closed out of band as {}", pos.phase),
        );
        self.store
            .update_position(&pos, Some(&fill.order_id), &audit)
            .await?;
        info!(position_id = %pos.id, contract = pos.contract, phase = %pos.phase,
            "out-of-band close retired");
        Ok(())
    }

    /// Cancel-then-place stop relocation.
    ///
    /// The cancel tolerates an already-gone order. Placement retries with
    /// exponential backoff; once retries are exhausted the position has no
    /// stop, which is the one failure mode this crate treats as critical.
    async fn replace_stop(
        &self,
        pos: &PositionState,
        target_price: Decimal,
        size: i64,
    ) -> Result<(String, Decimal)> {
        let scope = pos.scope();
        let spec = self.exchange.get_contract_spec(&scope, &pos.contract).await?;
        let price = round_to_tick(target_price, spec.order_price_round);

        if let Some(old_id) = pos.stop_order_id.as_deref() {
            match self.exchange.cancel_trigger_order(&scope, old_id).await {
                Ok(()) => {}
                Err(ExchangeError::OrderNotFound { .. }) => {
                    debug!(order_id = old_id, "old stop already gone");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let request = TriggerOrderRequest {
            contract: pos.contract.clone(),
            size: close_size(pos.direction, size),
            trigger_price: price,
            rule: stop_rule(pos.direction),
            reduce_only: true,
        };
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.exchange.place_trigger_order(&scope, &request).await {
                Ok(order_id) => {
                    if attempt > 1 {
                        info!(position_id = %pos.id, attempt, "stop placement succeeded after retry");
                    }
                    self.audit_best_effort(ActionAudit::ok(
                        pos.id,
                        AuditAction::StopReplaced,
                        format!("stop {order_id} @ {price} x{size}"),
                    ))
                    .await;
                    return Ok((order_id, price));
                }
                Err(e) if attempt <= self.config.max_retries => {
                    warn!(position_id = %pos.id, attempt, error = %e,
                        "stop placement failed, backing off");
                    sleep(RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1)).await;
                }
                Err(e) => {
                    return Err(ManagerError::StopReplacement {
                        position_id: pos.id,
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    /// Best-effort cancel of a resting order during position retirement.
    async fn cancel_resting(&self, pos: &PositionState, order_id: Option<&str>) {
        let Some(order_id) = order_id else { return };
        match self.exchange.cancel_trigger_order(&pos.scope(), order_id).await {
            Ok(()) | Err(ExchangeError::OrderNotFound { .. }) => {}
            Err(e) => {
                warn!(position_id = %pos.id, order_id, error = %e,
                    "failed to cancel resting order during retirement");
                self.errors
                    .warn(format!("cancel resting order {order_id}"), e.to_string());
            }
        }
    }

    async fn audit_best_effort(&self, audit: ActionAudit) {
        if let Err(e) = self.store.append_audit(&audit).await {
            warn!(error = %e, "failed to append audit entry");
        }
    }
}

/// Realized pnl of closing `size` contracts at `price`.
fn realized_delta(pos: &PositionState, price: Decimal, size: i64) -> Decimal {
    pos.direction.sign() * (price - pos.entry_price) * Decimal::from(size) * pos.multiplier
}

const fn close_size(direction: Direction, size: i64) -> i64 {
    match direction {
        Direction::Long => -size,
        Direction::Short => size,
    }
}

const fn stop_rule(direction: Direction) -> TriggerRule {
    match direction {
        Direction::Long => TriggerRule::PriceLte,
        Direction::Short => TriggerRule::PriceGte,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ladder_core::{SettleCurrency, StrategyType};
    use ladder_exchange_gate::{ContractSpec, PaperExchange};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn btc_spec() -> ContractSpec {
        ContractSpec {
            name: "BTC_USDT".to_string(),
            last_price: dec!(50000),
            quanto_multiplier: dec!(0.0001),
            order_price_round: dec!(0.1),
            leverage_max: dec!(100),
        }
    }

    fn multi_tier_position() -> PositionState {
        PositionState {
            id: Uuid::new_v4(),
            contract: "BTC_USDT".to_string(),
            direction: Direction::Long,
            strategy: StrategyType::MultiTier,
            total_size: 200,
            entry_price: dec!(50000),
            entry_order_id: "e-1".to_string(),
            multiplier: dec!(0.0001),
            tier1_size: 100,
            tier2_size: 60,
            runner_size: 40,
            tier1_order_id: Some("1001".to_string()),
            tier2_order_id: Some("1002".to_string()),
            stop_order_id: Some("1003".to_string()),
            phase: PositionPhase::Initial,
            remaining_size: 200,
            realized_pnl: Decimal::ZERO,
            original_stop_price: dec!(49000),
            current_stop_price: dec!(49000),
            tier1_price: dec!(50750),
            tier2_price: dec!(51250),
            leverage: 10,
            credential_ref: "main".to_string(),
            settle: SettleCurrency::Usdt,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fill(pos: &PositionState, order_id: &str, fill_type: FillType, size: i64, price: Decimal) -> OrderFillEvent {
        OrderFillEvent {
            order_id: order_id.to_string(),
            position_id: pos.id,
            contract: pos.contract.clone(),
            fill_type,
            size,
            price,
            filled_at: Utc::now(),
            processed_at: None,
        }
    }

    async fn setup(pos: &PositionState) -> (Arc<PaperExchange>, PositionStore, StopLossManager, Arc<ErrorBuffer>) {
        let paper = Arc::new(PaperExchange::new());
        paper.set_contract_spec(btc_spec());
        let store = PositionStore::new_in_memory().await.unwrap();
        store.create_position(pos).await.unwrap();
        let errors = Arc::new(ErrorBuffer::new(100));
        let manager = StopLossManager::new(
            Arc::clone(&paper) as Arc<dyn FuturesExchange>,
            store.clone(),
            ManagerConfig::default(),
            Arc::clone(&errors),
        );
        (paper, store, manager, errors)
    }

    async fn journal(store: &PositionStore, event: &OrderFillEvent) {
        let audit = ActionAudit::ok(event.position_id, AuditAction::FillDetected, "test fill");
        assert!(store.record_fill(event, &audit).await.unwrap());
    }

    #[tokio::test]
    async fn tier1_fill_moves_stop_to_breakeven() {
        let pos = multi_tier_position();
        let (paper, store, manager, _) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(50750))).await;

        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Tp1Filled);
        assert_eq!(updated.remaining_size, 100);
        assert!(updated.tier1_order_id.is_none());
        // Entry 50000 + 0.05% = 50025, on the safe side for a long.
        assert_eq!(updated.current_stop_price, dec!(50025.0));
        assert!(updated.current_stop_price >= updated.entry_price);
        // (50750 - 50000) * 100 * 0.0001 = 7.5
        assert_eq!(updated.realized_pnl, dec!(7.50000));

        let open = paper.open_trigger_orders();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].trigger.price, dec!(50025.0));
        assert_eq!(open[0].initial.size, -100);
        assert_eq!(updated.stop_order_id.as_deref(), Some(open[0].id_str().as_str()));

        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn short_breakeven_sits_below_entry() {
        let mut pos = multi_tier_position();
        pos.direction = Direction::Short;
        pos.original_stop_price = dec!(51000);
        pos.current_stop_price = dec!(51000);
        let (paper, store, manager, _) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(49250))).await;

        manager.process_pending_fills().await.unwrap();

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert!(updated.current_stop_price <= updated.entry_price);
        assert_eq!(updated.current_stop_price, dec!(49975.0));
        // Closing a short buys back.
        assert_eq!(paper.open_trigger_orders()[0].initial.size, 100);
    }

    #[tokio::test]
    async fn tier2_fill_trails_the_stop() {
        let mut pos = multi_tier_position();
        pos.phase = PositionPhase::Tp1Filled;
        pos.remaining_size = 100;
        pos.tier1_order_id = None;
        let (paper, store, manager, _) = setup(&pos).await;
        journal(&store, &fill(&pos, "1002", FillType::Tier2, 60, dec!(51250))).await;

        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Tp2Filled);
        assert_eq!(updated.remaining_size, 40);
        // 51250 * 0.99 = 50737.5
        assert_eq!(updated.current_stop_price, dec!(50737.5));
        assert_eq!(paper.open_trigger_orders()[0].initial.size, -40);
    }

    #[tokio::test]
    async fn stop_fill_is_terminal_with_realized_loss() {
        let pos = multi_tier_position();
        let (_paper, store, manager, _) = setup(&pos).await;
        journal(&store, &fill(&pos, "1003", FillType::StopLoss, 200, dec!(49000))).await;

        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::StoppedOut);
        assert_eq!(updated.remaining_size, 0);
        assert!(updated.stop_order_id.is_none());
        // (49000 - 50000) * 200 * 0.0001 = -20
        assert_eq!(updated.realized_pnl, dec!(-20.0000));
    }

    #[tokio::test]
    async fn reversal_within_one_cycle_cancels_the_relocated_stop() {
        let pos = multi_tier_position();
        let (paper, store, manager, _) = setup(&pos).await;
        // Tier1 and the original stop both fired between polls, so one cycle
        // applies the tier1 fill (placing a fresh breakeven stop) and then
        // the stop fill against the position it just updated.
        let mut tier1 = fill(&pos, "1001", FillType::Tier1, 100, dec!(50750));
        tier1.filled_at = Utc::now() - chrono::Duration::seconds(30);
        journal(&store, &tier1).await;
        journal(&store, &fill(&pos, "1003", FillType::StopLoss, 100, dec!(50025))).await;

        assert_eq!(manager.process_pending_fills().await.unwrap(), 2);

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::StoppedOut);
        assert!(updated.stop_order_id.is_none());
        // 7.5 from tier1 plus (50025 - 50000) * 100 * 0.0001.
        assert_eq!(updated.realized_pnl, dec!(7.75));
        // The breakeven stop must not outlive the position.
        assert!(paper.open_trigger_orders().is_empty());
        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replayed_fill_is_a_noop() {
        let mut pos = multi_tier_position();
        pos.phase = PositionPhase::Tp1Filled;
        pos.remaining_size = 100;
        pos.tier1_order_id = None;
        let (paper, store, manager, _) = setup(&pos).await;
        // A tier1 fill arriving again after the phase already advanced.
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(50750))).await;

        manager.process_pending_fills().await.unwrap();

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Tp1Filled);
        assert_eq!(updated.remaining_size, 100);
        assert!(paper.open_trigger_orders().is_empty());
        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn single_tier_take_profit_completes_the_position() {
        let mut pos = multi_tier_position();
        pos.strategy = StrategyType::Single;
        pos.tier1_size = 200;
        pos.tier2_size = 0;
        pos.runner_size = 0;
        pos.tier2_order_id = None;
        let (paper, store, manager, _) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 200, dec!(52000))).await;

        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Completed);
        assert_eq!(updated.remaining_size, 0);
        assert!(updated.stop_order_id.is_none());
        assert!(paper.open_trigger_orders().is_empty());
    }

    #[tokio::test]
    async fn manual_close_in_profit_phase_completes() {
        let mut pos = multi_tier_position();
        pos.phase = PositionPhase::Tp2Filled;
        pos.remaining_size = 40;
        pos.tier1_order_id = None;
        pos.tier2_order_id = None;
        let (_paper, store, manager, _) = setup(&pos).await;
        journal(
            &store,
            &fill(&pos, &format!("manual-{}", pos.id), FillType::Manual, 40, Decimal::ZERO),
        )
        .await;

        manager.process_pending_fills().await.unwrap();

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Completed);
        assert_eq!(updated.remaining_size, 0);
    }

    #[tokio::test]
    async fn manual_close_before_any_tier_records_stopped_out() {
        let pos = multi_tier_position();
        let (_paper, store, manager, _) = setup(&pos).await;
        journal(
            &store,
            &fill(&pos, &format!("manual-{}", pos.id), FillType::Manual, 200, Decimal::ZERO),
        )
        .await;

        manager.process_pending_fills().await.unwrap();

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::StoppedOut);
    }

    // Real clock: sqlite queries run on a plain OS thread, and a paused
    // tokio clock auto-advances past the pool's acquire timeout before
    // that thread can respond. The retry backoffs here total ~1.5s.
    #[tokio::test]
    async fn stop_replacement_retries_then_succeeds() {
        let pos = multi_tier_position();
        let (paper, store, manager, errors) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(50750))).await;

        // Two failures, success on the third attempt: no critical escalation.
        paper.fail_next("place_trigger_order", 2);

        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);
        assert!(errors.recent().iter().all(|e| e.severity != crate::errors::Severity::Critical));

        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Tp1Filled);
        assert_eq!(paper.open_trigger_orders().len(), 1);
    }

    // Real clock for the same reason as above; backoffs total ~3.5s.
    #[tokio::test]
    async fn exhausted_retries_escalate_to_critical() {
        let pos = multi_tier_position();
        let (paper, store, manager, errors) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(50750))).await;

        // Initial attempt plus three retries all fail.
        paper.fail_next("place_trigger_order", 4);

        let err = manager.process_pending_fills().await.unwrap_err();
        assert!(err.is_critical());
        let ManagerError::StopReplacement { attempts, .. } = err else {
            panic!("expected StopReplacement");
        };
        assert_eq!(attempts, 4);
        assert!(errors
            .recent()
            .iter()
            .any(|e| e.severity == crate::errors::Severity::Critical));

        // The fill stays unprocessed; the position phase did not advance.
        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 1);
        let updated = store.get_position(pos.id).await.unwrap().unwrap();
        assert_eq!(updated.phase, PositionPhase::Initial);
    }

    #[tokio::test]
    async fn recoverable_spec_fetch_failure_leaves_fill_for_next_cycle() {
        let pos = multi_tier_position();
        let (paper, store, manager, errors) = setup(&pos).await;
        journal(&store, &fill(&pos, "1001", FillType::Tier1, 100, dec!(50750))).await;

        paper.fail_next("get_contract_spec", 1);

        assert_eq!(manager.process_pending_fills().await.unwrap(), 0);
        assert_eq!(errors.len(), 1);
        assert_eq!(store.unprocessed_fill_count().await.unwrap(), 1);

        // Next cycle succeeds.
        assert_eq!(manager.process_pending_fills().await.unwrap(), 1);
    }
}
