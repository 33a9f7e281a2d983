//! Error types for the Gate.io futures integration.

use thiserror::Error;

/// Errors that can occur when talking to the exchange.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// API request rejected by the exchange.
    #[error("API error: {status_code} - {message}")]
    Api {
        /// HTTP status code.
        status_code: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Request timeout.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Response did not match the expected shape.
    #[error("invalid response for {context}: {message}")]
    InvalidResponse {
        /// What was being fetched.
        context: String,
        /// What went wrong.
        message: String,
    },

    /// Order rejected by the exchange.
    #[error("order rejected on {contract}: {message}")]
    OrderRejected { contract: String, message: String },

    /// Trigger order not found.
    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// Configuration error (unknown credential, missing env var).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ExchangeError {
    /// Creates an API error from status code and message.
    pub fn api(status_code: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status_code,
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Creates an order-rejected error.
    pub fn order_rejected(contract: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OrderRejected {
            contract: contract.into(),
            message: message.into(),
        }
    }

    /// Creates an order-not-found error.
    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::OrderNotFound {
            order_id: order_id.into(),
        }
    }

    /// True if retrying the same call later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Api { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;
