//! Position monitoring: fill detection, stop-loss management, and the
//! orchestrator that owns the polling-loop lifecycle.

pub mod detector;
pub mod errors;
pub mod orchestrator;
pub mod stop_loss;

pub use detector::FillDetector;
pub use errors::{ErrorBuffer, ErrorEntry, ManagerError, Result, Severity};
pub use orchestrator::{Orchestrator, PositionDetails, SystemStatus};
pub use stop_loss::StopLossManager;
