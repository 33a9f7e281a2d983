//! In-memory exchange for tests and dry runs.
//!
//! Behaves like the live client at the trait boundary: orders get ids,
//! trigger orders rest until marked finished, and any method can be told to
//! fail its next N calls so sequencing, rollback, and retry paths can be
//! exercised deterministically.

use std::collections::HashMap;

use async_trait::async_trait;
use ladder_core::AccountScope;
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::error::{ExchangeError, Result};
use crate::exchange::FuturesExchange;
use crate::types::{
    ContractSpec, FuturesPosition, InitialOrder, MarketOrderRequest, OrderReceipt,
    TriggerCondition, TriggerOrder, TriggerOrderRequest, TriggerStatus,
};

#[derive(Default)]
struct FailureScript {
    /// Calls to this method seen so far.
    seen: u32,
    /// 1-based call numbers (relative to the start) that must fail.
    fail_calls: std::collections::HashSet<u32>,
}

#[derive(Default)]
struct PaperState {
    next_id: i64,
    specs: HashMap<String, ContractSpec>,
    open_triggers: Vec<TriggerOrder>,
    finished_triggers: Vec<TriggerOrder>,
    market_orders: Vec<(MarketOrderRequest, String)>,
    cancelled: Vec<String>,
    leverage_updates: Vec<(String, u32)>,
    positions: Vec<FuturesPosition>,
    failures: HashMap<String, FailureScript>,
}

pub struct PaperExchange {
    state: Mutex<PaperState>,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperExchange {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState {
                next_id: 1000,
                ..PaperState::default()
            }),
        }
    }

    /// Registers a contract spec returned by `get_contract_spec`.
    pub fn set_contract_spec(&self, spec: ContractSpec) {
        self.state.lock().specs.insert(spec.name.clone(), spec);
    }

    /// Sets (or replaces) the exchange-reported position for a contract.
    /// Size zero models a flat contract.
    pub fn set_position(&self, contract: &str, size: i64, entry_price: Decimal) {
        let mut state = self.state.lock();
        state.positions.retain(|p| p.contract != contract);
        state.positions.push(FuturesPosition {
            contract: contract.to_string(),
            size,
            entry_price,
        });
    }

    /// Makes the next `times` calls to `method` fail with a network error.
    pub fn fail_next(&self, method: &str, times: u32) {
        for nth in 1..=times {
            self.fail_on_call(method, nth);
        }
    }

    /// Makes the `nth` future call to `method` (1-based, counted from now)
    /// fail with a network error. Calls in between succeed.
    pub fn fail_on_call(&self, method: &str, nth: u32) {
        let mut state = self.state.lock();
        let script = state.failures.entry(method.to_string()).or_default();
        let call = script.seen + nth;
        script.fail_calls.insert(call);
    }

    /// Moves an open trigger order to the finished list.
    ///
    /// `finish_as` mirrors the exchange field: `succeeded` for an executed
    /// order, `cancelled` for one removed without executing.
    pub fn mark_trigger_finished(&self, order_id: &str, finish_as: &str) {
        let mut state = self.state.lock();
        if let Some(idx) = state
            .open_triggers
            .iter()
            .position(|o| o.id_str() == order_id)
        {
            let mut order = state.open_triggers.remove(idx);
            order.status = TriggerStatus::Finished;
            order.finish_as = Some(finish_as.to_string());
            order.finish_time = Some(chrono::Utc::now().timestamp());
            state.finished_triggers.push(order);
        }
    }

    /// Ids of every cancel call made so far.
    #[must_use]
    pub fn cancelled_orders(&self) -> Vec<String> {
        self.state.lock().cancelled.clone()
    }

    /// Trigger orders currently resting.
    #[must_use]
    pub fn open_trigger_orders(&self) -> Vec<TriggerOrder> {
        self.state.lock().open_triggers.clone()
    }

    /// Market orders placed so far, with their assigned ids.
    #[must_use]
    pub fn market_orders(&self) -> Vec<(MarketOrderRequest, String)> {
        self.state.lock().market_orders.clone()
    }

    /// Leverage updates requested so far.
    #[must_use]
    pub fn leverage_updates(&self) -> Vec<(String, u32)> {
        self.state.lock().leverage_updates.clone()
    }

    fn take_failure(state: &mut PaperState, method: &str) -> Result<()> {
        let script = state.failures.entry(method.to_string()).or_default();
        script.seen += 1;
        if script.fail_calls.remove(&script.seen) {
            return Err(ExchangeError::Network(format!(
                "injected failure for {method}"
            )));
        }
        Ok(())
    }

    fn assign_id(state: &mut PaperState) -> i64 {
        state.next_id += 1;
        state.next_id
    }
}

#[async_trait]
impl FuturesExchange for PaperExchange {
    async fn list_positions(&self, _scope: &AccountScope) -> Result<Vec<FuturesPosition>> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "list_positions")?;
        Ok(state.positions.clone())
    }

    async fn get_contract_spec(
        &self,
        _scope: &AccountScope,
        contract: &str,
    ) -> Result<ContractSpec> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "get_contract_spec")?;
        state.specs.get(contract).cloned().ok_or_else(|| {
            ExchangeError::invalid_response(
                format!("contract spec {contract}"),
                "unknown contract",
            )
        })
    }

    async fn update_leverage(
        &self,
        _scope: &AccountScope,
        contract: &str,
        leverage: u32,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "update_leverage")?;
        state.leverage_updates.push((contract.to_string(), leverage));
        Ok(())
    }

    async fn place_market_order(
        &self,
        _scope: &AccountScope,
        req: &MarketOrderRequest,
    ) -> Result<OrderReceipt> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "place_market_order")?;
        let fill_price = state
            .specs
            .get(&req.contract)
            .map_or(Decimal::ZERO, |s| s.last_price);
        let id = Self::assign_id(&mut state).to_string();
        state.market_orders.push((req.clone(), id.clone()));
        Ok(OrderReceipt {
            order_id: id,
            contract: req.contract.clone(),
            size: req.size,
            fill_price,
        })
    }

    async fn place_trigger_order(
        &self,
        _scope: &AccountScope,
        req: &TriggerOrderRequest,
    ) -> Result<String> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "place_trigger_order")?;
        let id = Self::assign_id(&mut state);
        state.open_triggers.push(TriggerOrder {
            id,
            status: TriggerStatus::Open,
            trigger: TriggerCondition {
                price: req.trigger_price,
                rule: req.rule.wire_code(),
            },
            initial: InitialOrder {
                contract: req.contract.clone(),
                size: req.size,
                price: Decimal::ZERO,
                reduce_only: req.reduce_only,
            },
            finish_as: None,
            finish_time: None,
        });
        Ok(id.to_string())
    }

    async fn cancel_trigger_order(&self, _scope: &AccountScope, order_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "cancel_trigger_order")?;
        let Some(idx) = state
            .open_triggers
            .iter()
            .position(|o| o.id_str() == order_id)
        else {
            return Err(ExchangeError::order_not_found(order_id));
        };
        let mut order = state.open_triggers.remove(idx);
        order.status = TriggerStatus::Finished;
        order.finish_as = Some("cancelled".to_string());
        order.finish_time = Some(chrono::Utc::now().timestamp());
        state.finished_triggers.push(order);
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn list_trigger_orders(
        &self,
        _scope: &AccountScope,
        status: TriggerStatus,
    ) -> Result<Vec<TriggerOrder>> {
        let mut state = self.state.lock();
        Self::take_failure(&mut state, "list_trigger_orders")?;
        Ok(match status {
            TriggerStatus::Open => state.open_triggers.clone(),
            TriggerStatus::Finished => state.finished_triggers.clone(),
        })
    }
}
