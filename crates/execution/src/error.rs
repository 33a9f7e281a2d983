//! Error types for position placement.

use ladder_exchange_gate::ExchangeError;
use thiserror::Error;

/// Result of one rollback cancellation attempt. Kept per order so failed
/// cancellations are visible to callers and tests, not just a log line.
#[derive(Debug, Clone)]
pub struct CancelOutcome {
    pub order_id: String,
    pub cancelled: bool,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The recommendation could not be turned into a plan.
    #[error("planning failed: {0}")]
    Plan(String),

    /// Pre-entry exchange call failed (contract spec, leverage). No position
    /// exists, nothing to unwind.
    #[error("exchange error before entry: {0}")]
    Exchange(#[from] ExchangeError),

    /// The market entry order itself failed. No position exists.
    #[error("entry order failed on {contract}: {source}")]
    Entry {
        contract: String,
        #[source]
        source: ExchangeError,
    },

    /// A conditional placement failed after entry; the placed conditionals
    /// were rolled back and an emergency stop now protects the position.
    #[error("conditional placement failed on {contract} at {stage}: {source}")]
    ConditionalFailed {
        contract: String,
        /// Which leg failed: `tier1`, `tier2`, or `stop`.
        stage: String,
        #[source]
        source: ExchangeError,
        rollback: Vec<CancelOutcome>,
        /// Id of the emergency stop now resting on the exchange.
        emergency_stop_order_id: String,
    },

    /// The position is open on the exchange with no protective stop. The
    /// caller must not swallow this.
    #[error("CRITICAL: {contract} position is open and UNPROTECTED: {details}")]
    Critical {
        contract: String,
        details: String,
        rollback: Vec<CancelOutcome>,
    },
}

impl ExecutionError {
    /// True for the unprotected-position case.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::Critical { .. })
    }
}

/// Result type alias for execution operations.
pub type Result<T> = std::result::Result<T, ExecutionError>;
