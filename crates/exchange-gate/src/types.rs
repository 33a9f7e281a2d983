//! Typed records for every Gate.io response shape this system consumes.
//!
//! Gate serializes prices and multipliers as JSON strings; each such field is
//! parsed into a `Decimal` at deserialization time so malformed payloads fail
//! at the boundary with a serde error instead of leaking into business logic.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Live contract specification, fetched before planning a position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Contract name, e.g. `BTC_USDT`.
    pub name: String,
    /// Last traded price.
    #[serde(with = "rust_decimal::serde::str")]
    pub last_price: Decimal,
    /// Value of one contract in base-currency terms.
    #[serde(with = "rust_decimal::serde::str")]
    pub quanto_multiplier: Decimal,
    /// Price tick. Order prices must be multiples of this.
    #[serde(with = "rust_decimal::serde::str")]
    pub order_price_round: Decimal,
    /// Maximum leverage allowed on the contract.
    #[serde(with = "rust_decimal::serde::str")]
    pub leverage_max: Decimal,
}

/// An open position as reported by the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuturesPosition {
    pub contract: String,
    /// Signed contract count: positive long, negative short.
    pub size: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
}

/// Receipt for an accepted market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub contract: String,
    /// Signed filled size.
    pub size: i64,
    /// Average fill price; zero if the exchange has not reported it yet.
    pub fill_price: Decimal,
}

/// Lifecycle status of a trigger order, used as a listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Open,
    Finished,
}

impl TriggerStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for TriggerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price comparison that arms a trigger order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerRule {
    /// Fire when mark price >= trigger price.
    PriceGte,
    /// Fire when mark price <= trigger price.
    PriceLte,
}

impl TriggerRule {
    /// Gate's wire encoding: 1 for `>=`, 2 for `<=`.
    #[must_use]
    pub const fn wire_code(self) -> i32 {
        match self {
            Self::PriceGte => 1,
            Self::PriceLte => 2,
        }
    }
}

/// Trigger condition block inside a trigger order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    /// 1 = fire on price >= trigger, 2 = fire on price <= trigger.
    pub rule: i32,
}

/// The resting order a trigger places once it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitialOrder {
    pub contract: String,
    /// Signed size of the close order.
    pub size: i64,
    /// Limit price; "0" means execute at market.
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(default)]
    pub reduce_only: bool,
}

/// A conditional order resting (or finished) on the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOrder {
    pub id: i64,
    pub status: TriggerStatus,
    pub trigger: TriggerCondition,
    pub initial: InitialOrder,
    /// How a finished order ended: `succeeded`, `cancelled`, `expired`, ...
    #[serde(default)]
    pub finish_as: Option<String>,
    /// Unix seconds when the order finished.
    #[serde(default)]
    pub finish_time: Option<i64>,
}

impl TriggerOrder {
    /// Exchange order id in the opaque string form the rest of the system uses.
    #[must_use]
    pub fn id_str(&self) -> String {
        self.id.to_string()
    }

    /// True when the trigger fired and its close order executed.
    ///
    /// Cancelled or expired orders are finished but never filled anything.
    #[must_use]
    pub fn executed(&self) -> bool {
        self.status == TriggerStatus::Finished
            && self.finish_as.as_deref() == Some("succeeded")
    }

    /// Best available execution price: the trigger price. Gate does not
    /// report the actual fill price on the trigger listing.
    #[must_use]
    pub fn execution_price(&self) -> Decimal {
        self.trigger.price
    }
}

/// Request to open or close size at market.
#[derive(Debug, Clone, Serialize)]
pub struct MarketOrderRequest {
    pub contract: String,
    /// Signed size: positive buys, negative sells.
    pub size: i64,
    pub reduce_only: bool,
}

/// Request for a new conditional (trigger) order.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerOrderRequest {
    pub contract: String,
    /// Signed size of the close order placed when the trigger fires.
    pub size: i64,
    pub trigger_price: Decimal,
    pub rule: TriggerRule,
    pub reduce_only: bool,
}
