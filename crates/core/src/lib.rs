//! Core types and configuration for the ladder position manager.
//!
//! Everything here is exchange-agnostic: the position record and its phase
//! state machine, fill events, the append-only audit record, the trade
//! recommendation consumed from upstream, and the tunables config.

pub mod config;
pub mod config_loader;
pub mod phase;
pub mod types;

pub use config::{AppConfig, DatabaseConfig, ExchangeConfig, ManagerConfig, PlannerConfig};
pub use config_loader::ConfigLoader;
pub use phase::PositionPhase;
pub use types::{
    AccountScope, ActionAudit, AuditAction, Direction, FillType, MonitoringState, OrderFillEvent,
    PositionState, SettleCurrency, StrategyType, TradeRecommendation,
};
