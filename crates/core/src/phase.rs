//! Position lifecycle phases.
//!
//! Transitions are strictly monotonic: a position can never move back to an
//! earlier phase, and terminal phases accept no transition at all. The store
//! and the stop-loss manager both gate every phase write through
//! [`PositionPhase::can_advance_to`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current stage in a managed position's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionPhase {
    /// Entry filled, all conditional orders resting, no tier filled yet.
    Initial,
    /// First take-profit tier filled; stop moved to breakeven.
    Tp1Filled,
    /// Second tier filled; stop trailing behind the runner.
    Tp2Filled,
    /// Runner closed in profit. Terminal.
    Completed,
    /// Stop-loss fired and closed the remaining size. Terminal.
    StoppedOut,
}

impl PositionPhase {
    /// True for phases that end the managed lifecycle.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::StoppedOut)
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// `StoppedOut` is reachable from any live phase (a stop can fire at any
    /// time). `Completed` requires at least one take-profit fill: the
    /// multi-tier ladder reaches it via `Tp2Filled` when the runner closes,
    /// a single-tier position via `Tp1Filled` when its lone take-profit
    /// covers the whole size.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Initial, Self::Tp1Filled)
            | (Self::Tp1Filled, Self::Tp2Filled)
            | (Self::Tp1Filled | Self::Tp2Filled, Self::Completed)
            | (Self::Initial | Self::Tp1Filled | Self::Tp2Filled, Self::StoppedOut) => true,
            _ => false,
        }
    }

    /// Stable text form used in the database and in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Tp1Filled => "tp1_filled",
            Self::Tp2Filled => "tp2_filled",
            Self::Completed => "completed",
            Self::StoppedOut => "stopped_out",
        }
    }
}

impl fmt::Display for PositionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionPhase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initial" => Ok(Self::Initial),
            "tp1_filled" => Ok(Self::Tp1Filled),
            "tp2_filled" => Ok(Self::Tp2Filled),
            "completed" => Ok(Self::Completed),
            "stopped_out" => Ok(Self::StoppedOut),
            other => Err(anyhow::anyhow!("unknown position phase: {other}")),
        }
    }
}
