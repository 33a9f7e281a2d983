//! Manager errors and the rolling error buffer.

use chrono::{DateTime, Utc};
use ladder_exchange_gate::ExchangeError;
use ladder_execution::ExecutionError;
use ladder_store::StoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The old stop was cancelled but every placement attempt failed. The
    /// position is unprotected until the next cycle succeeds.
    #[error("stop replacement for position {position_id} failed after {attempts} attempts: {source}")]
    StopReplacement {
        position_id: Uuid,
        attempts: u32,
        #[source]
        source: ExchangeError,
    },
}

impl ManagerError {
    /// True when the error leaves a position without a protective stop.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        match self {
            Self::StopReplacement { .. } => true,
            Self::Execution(e) => e.is_critical(),
            Self::Exchange(_) | Self::Store(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// How bad a buffered error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One buffered error, as surfaced by the status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub at: DateTime<Utc>,
    pub severity: Severity,
    /// What was being attempted, e.g. `fill detection main/usdt`.
    pub context: String,
    pub message: String,
}

/// Rolling buffer of recent operational errors.
///
/// Loops push here instead of dying; operators read the tail through the
/// status query instead of trawling logs. Oldest entries fall off once the
/// capacity is reached.
pub struct ErrorBuffer {
    entries: Mutex<VecDeque<ErrorEntry>>,
    capacity: usize,
}

impl ErrorBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, severity: Severity, context: impl Into<String>, message: impl Into<String>) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(ErrorEntry {
            at: Utc::now(),
            severity,
            context: context.into(),
            message: message.into(),
        });
    }

    pub fn warn(&self, context: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Warning, context, message);
    }

    pub fn critical(&self, context: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Critical, context, message);
    }

    /// Buffered entries, oldest first.
    #[must_use]
    pub fn recent(&self) -> Vec<ErrorEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
