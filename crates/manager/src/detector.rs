//! Order fill detection.
//!
//! Polls the exchange for finished trigger orders and converts each one into
//! exactly one journaled fill event. The journal (keyed by exchange order id)
//! is the idempotency boundary: replaying the same finished-order list across
//! cycles never produces a second event.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use ladder_core::{AccountScope, ActionAudit, AuditAction, FillType, OrderFillEvent, PositionState};
use ladder_exchange_gate::{FuturesExchange, TriggerOrder, TriggerStatus};
use ladder_store::PositionStore;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::errors::{ErrorBuffer, Result};

pub struct FillDetector {
    exchange: Arc<dyn FuturesExchange>,
    store: PositionStore,
    errors: Arc<ErrorBuffer>,
}

impl FillDetector {
    #[must_use]
    pub fn new(
        exchange: Arc<dyn FuturesExchange>,
        store: PositionStore,
        errors: Arc<ErrorBuffer>,
    ) -> Self {
        Self {
            exchange,
            store,
            errors,
        }
    }

    /// Runs one detection cycle over all non-terminal positions and returns
    /// how many new fill events were journaled.
    ///
    /// Exchange calls are batched per (credential, settle) scope. A fetch
    /// failure for one scope is buffered and the remaining scopes still run.
    ///
    /// # Errors
    ///
    /// Only store failures propagate; the loop above catches them.
    pub async fn detect_fills(&self) -> Result<usize> {
        let positions = self.store.active_positions().await?;
        if positions.is_empty() {
            debug!("no active positions to check");
            return Ok(0);
        }

        let mut groups: HashMap<AccountScope, Vec<&PositionState>> = HashMap::new();
        for pos in &positions {
            groups.entry(pos.scope()).or_default().push(pos);
        }

        let mut detected = 0;
        for (scope, group) in groups {
            detected += self.detect_for_scope(&scope, &group).await;
        }
        Ok(detected)
    }

    /// One fetch of finished orders and exchange positions, matched against
    /// every tracked position in the scope.
    async fn detect_for_scope(&self, scope: &AccountScope, group: &[&PositionState]) -> usize {
        let context = format!("fill detection {}/{}", scope.credential_ref, scope.settle);

        let finished = match self
            .exchange
            .list_trigger_orders(scope, TriggerStatus::Finished)
            .await
        {
            Ok(orders) => orders,
            Err(e) => {
                warn!(scope = %scope.settle, credential = scope.credential_ref, error = %e,
                    "finished-order fetch failed, skipping scope this cycle");
                self.errors.warn(context, e.to_string());
                return 0;
            }
        };
        let executed: HashMap<String, &TriggerOrder> = finished
            .iter()
            .filter(|o| o.executed())
            .map(|o| (o.id_str(), o))
            .collect();

        // Fetched once per scope so manual closes (exchange flat, no trigger
        // fired) are detectable without per-position calls.
        let open_contracts = match self.exchange.list_positions(scope).await {
            Ok(live) => Some(
                live.into_iter()
                    .filter(|p| p.size != 0)
                    .map(|p| p.contract)
                    .collect::<Vec<_>>(),
            ),
            Err(e) => {
                warn!(scope = %scope.settle, error = %e, "position listing failed, manual-close detection skipped");
                self.errors.warn(context.clone(), e.to_string());
                None
            }
        };

        let mut detected = 0;
        for &pos in group {
            let mut any_trigger_fill = false;
            for (order_id, fill_type) in pos.watched_orders() {
                let Some(order) = executed.get(order_id) else {
                    continue;
                };
                any_trigger_fill = true;
                match self.journal_fill(pos, fill_type, order).await {
                    Ok(true) => detected += 1,
                    Ok(false) => debug!(order_id, "fill already journaled"),
                    Err(e) => {
                        warn!(position_id = %pos.id, order_id, error = %e, "failed to journal fill");
                        self.errors
                            .warn(format!("journal fill for {}", pos.contract), e.to_string());
                    }
                }
            }

            if !any_trigger_fill {
                if let Some(contracts) = &open_contracts {
                    if !contracts.iter().any(|c| c == &pos.contract) {
                        match self.journal_manual_close(pos).await {
                            Ok(true) => detected += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(position_id = %pos.id, error = %e, "failed to journal manual close");
                                self.errors.warn(
                                    format!("journal manual close for {}", pos.contract),
                                    e.to_string(),
                                );
                            }
                        }
                    }
                }
            }
        }
        detected
    }

    /// Journals one finished trigger order. Returns false when the journal
    /// already holds the order id.
    async fn journal_fill(
        &self,
        pos: &PositionState,
        fill_type: FillType,
        order: &TriggerOrder,
    ) -> Result<bool> {
        let order_id = order.id_str();
        if self.store.has_fill(&order_id).await? {
            return Ok(false);
        }

        let size = pos.reserved_size(fill_type);
        let price = order.execution_price();
        let event = OrderFillEvent {
            order_id: order_id.clone(),
            position_id: pos.id,
            contract: pos.contract.clone(),
            fill_type,
            size,
            price,
            filled_at: finish_timestamp(order),
            processed_at: None,
        };
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::FillDetected,
            format!("{fill_type} order {order_id} filled {size} @ {price}"),
        );

        let inserted = self.store.record_fill(&event, &audit).await?;
        if inserted {
            info!(
                position_id = %pos.id,
                contract = pos.contract,
                fill_type = %fill_type,
                order_id,
                size,
                price = %price,
                "fill detected"
            );
        }
        Ok(inserted)
    }

    /// The exchange shows no position for this contract and none of the
    /// tracked trigger orders executed: someone closed it out of band.
    ///
    /// The synthetic order id is stable per position, so repeated cycles
    /// land on the journal's idempotency check like any other fill.
    async fn journal_manual_close(&self, pos: &PositionState) -> Result<bool> {
        let order_id = format!("manual-{}", pos.id);
        if self.store.has_fill(&order_id).await? {
            return Ok(false);
        }
        // A trigger fill journaled in an earlier cycle but not yet applied
        // also leaves the exchange flat; that is not a manual close.
        for (watched_id, _) in pos.watched_orders() {
            if self.store.has_fill(watched_id).await? {
                return Ok(false);
            }
        }

        let event = OrderFillEvent {
            order_id: order_id.clone(),
            position_id: pos.id,
            contract: pos.contract.clone(),
            fill_type: FillType::Manual,
            size: pos.remaining_size,
            // Fill price is unknown for an out-of-band close.
            price: Decimal::ZERO,
            filled_at: Utc::now(),
            processed_at: None,
        };
        let audit = ActionAudit::ok(
            pos.id,
            AuditAction::FillDetected,
            format!(
                "manual close detected, {} no longer open on exchange ({} remaining)",
                pos.contract, pos.remaining_size
            ),
        );

        let inserted = self.store.record_fill(&event, &audit).await?;
        if inserted {
            info!(
                position_id = %pos.id,
                contract = pos.contract,
                remaining = pos.remaining_size,
                "manual close detected"
            );
        }
        Ok(inserted)
    }
}

fn finish_timestamp(order: &TriggerOrder) -> DateTime<Utc> {
    order
        .finish_time
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .unwrap_or_else(Utc::now)
}
