//! Domain types for managed futures positions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::phase::PositionPhase;

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short. Used when offsetting prices by direction.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Long => Decimal::ONE,
            Self::Short => -Decimal::ONE,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "long",
            Self::Short => "short",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "long" => Ok(Self::Long),
            "short" => Ok(Self::Short),
            other => Err(anyhow::anyhow!("unknown direction: {other}")),
        }
    }
}

/// Settlement currency of the futures contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleCurrency {
    Usdt,
    Btc,
}

impl SettleCurrency {
    /// Lowercase form used in API paths and the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Usdt => "usdt",
            Self::Btc => "btc",
        }
    }
}

impl fmt::Display for SettleCurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettleCurrency {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "usdt" => Ok(Self::Usdt),
            "btc" => Ok(Self::Btc),
            other => Err(anyhow::anyhow!("unknown settlement currency: {other}")),
        }
    }
}

/// Which credentials and settlement currency an exchange call runs under.
///
/// Order listings are fetched once per scope, not per position, so the fill
/// detector groups positions by this key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountScope {
    /// Name of a credential entry in the application config.
    pub credential_ref: String,
    pub settle: SettleCurrency,
}

/// Exit strategy chosen by the planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    /// One take-profit and one stop.
    Single,
    /// Two take-profit tiers plus a runner.
    MultiTier,
}

impl StrategyType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::MultiTier => "multi_tier",
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "multi_tier" => Ok(Self::MultiTier),
            other => Err(anyhow::anyhow!("unknown strategy type: {other}")),
        }
    }
}

/// Which leg of the position an order fill belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillType {
    Tier1,
    Tier2,
    StopLoss,
    Manual,
}

impl FillType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tier1 => "tier1",
            Self::Tier2 => "tier2",
            Self::StopLoss => "sl",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for FillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FillType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tier1" => Ok(Self::Tier1),
            "tier2" => Ok(Self::Tier2),
            "sl" => Ok(Self::StopLoss),
            "manual" => Ok(Self::Manual),
            other => Err(anyhow::anyhow!("unknown fill type: {other}")),
        }
    }
}

/// Durable record of one managed position.
///
/// Created atomically with its initial conditional orders, mutated only by
/// the fill detector and the stop-loss manager, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionState {
    pub id: Uuid,
    pub contract: String,
    pub direction: Direction,
    pub strategy: StrategyType,
    /// Total contract quantity at entry.
    pub total_size: i64,
    pub entry_price: Decimal,
    pub entry_order_id: String,
    /// Contract value multiplier, captured at entry for PnL math.
    pub multiplier: Decimal,
    pub tier1_size: i64,
    pub tier2_size: i64,
    pub runner_size: i64,
    pub tier1_order_id: Option<String>,
    pub tier2_order_id: Option<String>,
    /// The one active protective stop. Cleared only when the position ends.
    pub stop_order_id: Option<String>,
    pub phase: PositionPhase,
    pub remaining_size: i64,
    pub realized_pnl: Decimal,
    pub original_stop_price: Decimal,
    pub current_stop_price: Decimal,
    pub tier1_price: Decimal,
    pub tier2_price: Decimal,
    pub leverage: u32,
    pub credential_ref: String,
    pub settle: SettleCurrency,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PositionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    #[must_use]
    pub fn scope(&self) -> AccountScope {
        AccountScope {
            credential_ref: self.credential_ref.clone(),
            settle: self.settle,
        }
    }

    /// The conditional order ids this position is waiting on, with the fill
    /// type each one would produce.
    #[must_use]
    pub fn watched_orders(&self) -> Vec<(&str, FillType)> {
        let mut out = Vec::with_capacity(3);
        if let Some(id) = self.tier1_order_id.as_deref() {
            out.push((id, FillType::Tier1));
        }
        if let Some(id) = self.tier2_order_id.as_deref() {
            out.push((id, FillType::Tier2));
        }
        if let Some(id) = self.stop_order_id.as_deref() {
            out.push((id, FillType::StopLoss));
        }
        out
    }

    /// Size the given fill type was reserved at placement time.
    #[must_use]
    pub const fn reserved_size(&self, fill_type: FillType) -> i64 {
        match fill_type {
            FillType::Tier1 => self.tier1_size,
            FillType::Tier2 => self.tier2_size,
            FillType::StopLoss | FillType::Manual => self.remaining_size,
        }
    }
}

/// Internal record that a specific exchange order executed.
///
/// `order_id` is the idempotency key: the journal never holds two events for
/// the same order, so replaying a finished-order list is harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderFillEvent {
    pub order_id: String,
    pub position_id: Uuid,
    pub contract: String,
    pub fill_type: FillType,
    pub size: i64,
    pub price: Decimal,
    pub filled_at: DateTime<Utc>,
    /// Set once the stop-loss manager has acted on the event.
    pub processed_at: Option<DateTime<Utc>>,
}

/// What a given audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PositionOpened,
    OrderPlaced,
    OrderCancelled,
    RollbackCancel,
    EmergencyStop,
    FillDetected,
    StopReplaced,
    PhaseAdvanced,
    PositionClosed,
    MonitorStarted,
    MonitorStopped,
}

impl AuditAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PositionOpened => "position_opened",
            Self::OrderPlaced => "order_placed",
            Self::OrderCancelled => "order_cancelled",
            Self::RollbackCancel => "rollback_cancel",
            Self::EmergencyStop => "emergency_stop",
            Self::FillDetected => "fill_detected",
            Self::StopReplaced => "stop_replaced",
            Self::PhaseAdvanced => "phase_advanced",
            Self::PositionClosed => "position_closed",
            Self::MonitorStarted => "monitor_started",
            Self::MonitorStopped => "monitor_stopped",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "position_opened" => Ok(Self::PositionOpened),
            "order_placed" => Ok(Self::OrderPlaced),
            "order_cancelled" => Ok(Self::OrderCancelled),
            "rollback_cancel" => Ok(Self::RollbackCancel),
            "emergency_stop" => Ok(Self::EmergencyStop),
            "fill_detected" => Ok(Self::FillDetected),
            "stop_replaced" => Ok(Self::StopReplaced),
            "phase_advanced" => Ok(Self::PhaseAdvanced),
            "position_closed" => Ok(Self::PositionClosed),
            "monitor_started" => Ok(Self::MonitorStarted),
            "monitor_stopped" => Ok(Self::MonitorStopped),
            other => Err(anyhow::anyhow!("unknown audit action: {other}")),
        }
    }
}

/// Append-only forensic record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionAudit {
    pub id: Uuid,
    pub position_id: Uuid,
    pub action: AuditAction,
    pub details: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error: Option<String>,
}

impl ActionAudit {
    /// Convenience constructor for a successful action.
    #[must_use]
    pub fn ok(position_id: Uuid, action: AuditAction, details: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            action,
            details: details.into(),
            timestamp: Utc::now(),
            success: true,
            error: None,
        }
    }

    /// Convenience constructor for a failed action.
    #[must_use]
    pub fn failed(
        position_id: Uuid,
        action: AuditAction,
        details: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            position_id,
            action,
            details: details.into(),
            timestamp: Utc::now(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// Singleton monitoring row: whether the loops are live and when they last ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringState {
    pub is_active: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub tracked_position_count: i64,
}

/// Input produced upstream (recommendation engine), consumed verbatim here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecommendation {
    pub contract: String,
    pub direction: Direction,
    pub stop_price: Decimal,
    pub take_profit_price: Decimal,
    /// Requested position size in settlement-currency terms.
    pub notional: Decimal,
    pub leverage: u32,
    pub scope: AccountScope,
}
