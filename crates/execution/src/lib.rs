//! Turning a trade recommendation into a protected position.
//!
//! [`plan`] holds the pure sizing and pricing rules; [`PositionPlacer`]
//! drives the exchange through the placement sequence and persists the
//! resulting position.

pub mod error;
pub mod plan;
pub mod placer;

pub use error::{CancelOutcome, ExecutionError, Result};
pub use plan::{plan_prices, plan_sizes, round_to_tick, TierPrices, TierSizes};
pub use placer::{PlacementOutcome, PositionPlacer};
