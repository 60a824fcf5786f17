//! Error types for the connectivity engine
//!
//! Errors are partitioned into local/business failures, which are never
//! retried, and transient failures, which the retry policy may replay.

use rust_decimal::Decimal;
use thiserror::Error;

/// Connectivity engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    // Local/business failures. The remote backend rejected the request for a
    // reason that will not change on replay.
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("amount below the market minimum of {minimum}")]
    AmountTooSmall { minimum: Decimal },

    #[error("order {order_id} is stuck and cannot be acted on")]
    StuckOrder { order_id: String },

    #[error("currency {symbol} does not exist on this backend")]
    UnknownCurrency { symbol: String },

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("invalid order book payload: {0}")]
    InvalidBook(&'static str),

    #[error("allocation for {symbol} would exceed 100%")]
    InvalidAllocation { symbol: String },

    // Transient failures, eligible for retry.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rate limited by the backend")]
    RateLimited,

    #[error("server error (status {status})")]
    ServerError { status: u16 },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("request timed out")]
    Timeout,

    // Surfaces with their own handling rules.
    #[error("price feed failure for {symbol}: {reason}")]
    Oracle { symbol: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    /// True for errors the retry policy must never replay. Background daemons
    /// also treat these as unrecoverable and fail-stop on them.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientBalance
                | EngineError::AmountTooSmall { .. }
                | EngineError::StuckOrder { .. }
                | EngineError::UnknownCurrency { .. }
                | EngineError::NotSupported(_)
                | EngineError::InvalidBook(_)
                | EngineError::InvalidAllocation { .. }
                | EngineError::Oracle { .. }
                | EngineError::Config(_)
        )
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return EngineError::Timeout;
        }
        if let Some(status) = err.status() {
            if status.as_u16() == 429 {
                return EngineError::RateLimited;
            }
            if status.is_server_error() {
                return EngineError::ServerError {
                    status: status.as_u16(),
                };
            }
        }
        EngineError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::MalformedResponse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for EngineError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        EngineError::Transport(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_errors_are_not_retryable() {
        assert!(EngineError::InsufficientBalance.is_local());
        assert!(EngineError::StuckOrder {
            order_id: "42".into()
        }
        .is_local());
        assert!(EngineError::UnknownCurrency {
            symbol: "XYZ".into()
        }
        .is_local());
        assert!(EngineError::InvalidBook("missing ask side").is_local());
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(!EngineError::RateLimited.is_local());
        assert!(!EngineError::Timeout.is_local());
        assert!(!EngineError::ServerError { status: 502 }.is_local());
        assert!(!EngineError::Transport("connection reset".into()).is_local());
    }
}
