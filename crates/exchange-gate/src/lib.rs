//! Gate.io perpetual futures integration.
//!
//! Exposes the [`FuturesExchange`] trait consumed by the execution and
//! monitoring crates, the signed REST client implementing it, and an
//! in-memory paper exchange for tests.

pub mod client;
pub mod error;
pub mod exchange;
pub mod paper;
pub mod types;

pub use client::GateFuturesClient;
pub use error::ExchangeError;
pub use exchange::FuturesExchange;
pub use paper::PaperExchange;
pub use types::{
    ContractSpec, FuturesPosition, InitialOrder, MarketOrderRequest, OrderReceipt,
    TriggerCondition, TriggerOrder, TriggerOrderRequest, TriggerRule, TriggerStatus,
};
