//! The trading seam the rest of the system consumes.

use async_trait::async_trait;
use ladder_core::AccountScope;

use crate::error::Result;
use crate::types::{
    ContractSpec, FuturesPosition, MarketOrderRequest, OrderReceipt, TriggerOrder,
    TriggerOrderRequest, TriggerStatus,
};

/// Perpetual-futures trading operations, keyed by [`AccountScope`]
/// (credential pair + settlement currency).
///
/// Implemented by [`crate::client::GateFuturesClient`] against the live API
/// and by [`crate::paper::PaperExchange`] for tests.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    /// Lists open positions under the scope.
    async fn list_positions(&self, scope: &AccountScope) -> Result<Vec<FuturesPosition>>;

    /// Fetches the live contract specification.
    async fn get_contract_spec(&self, scope: &AccountScope, contract: &str)
        -> Result<ContractSpec>;

    /// Sets position leverage on the contract.
    async fn update_leverage(
        &self,
        scope: &AccountScope,
        contract: &str,
        leverage: u32,
    ) -> Result<()>;

    /// Places a market order and returns the exchange receipt.
    async fn place_market_order(
        &self,
        scope: &AccountScope,
        req: &MarketOrderRequest,
    ) -> Result<OrderReceipt>;

    /// Places a conditional order; returns the exchange-native order id.
    async fn place_trigger_order(
        &self,
        scope: &AccountScope,
        req: &TriggerOrderRequest,
    ) -> Result<String>;

    /// Cancels a resting conditional order.
    async fn cancel_trigger_order(&self, scope: &AccountScope, order_id: &str) -> Result<()>;

    /// Lists conditional orders filtered by status.
    async fn list_trigger_orders(
        &self,
        scope: &AccountScope,
        status: TriggerStatus,
    ) -> Result<Vec<TriggerOrder>>;
}
