//! Root Error Type
//!
//! Unifies module errors and assigns each a stable domain-prefixed code.
//! Codes are numeric within their domain so callers can match on them
//! without string comparison.

use serde::Serialize;
use thiserror::Error;

/// Root error type for the swap engine
#[derive(Debug, Error)]
pub enum SwapdError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("script error: {0}")]
    Script(#[from] crate::script::ScriptError),

    #[error("transaction builder error: {0}")]
    Builder(#[from] crate::chain::builder::BuilderError),

    #[error("chain error: {0}")]
    Chain(#[from] crate::chain::client::ChainError),

    #[error("lightning error: {0}")]
    Lightning(#[from] crate::lightning::LightningError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("wallet error: {0}")]
    Wallet(#[from] crate::wallet::WalletError),

    #[error("rate error: {0}")]
    Rate(#[from] crate::rates::RateError),

    #[error("nursery error: {0}")]
    Nursery(#[from] crate::swap::NurseryError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwapdError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Whether a retry can reasonably succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Chain(e) => e.is_transient(),
            Self::Io(_) => true,
            _ => false,
        }
    }

    /// Domain-prefixed numeric code, stable across releases
    pub fn code(&self) -> String {
        let (domain, number) = match self {
            Self::Config(_) => ("Service", 0),
            Self::Script(_) => ("Swap", 0),
            Self::Builder(_) => ("Swap", 1),
            Self::Validation(_) => ("Swap", 2),
            Self::InvariantViolation(_) => ("Swap", 3),
            Self::Nursery(_) => ("Swap", 4),
            Self::Chain(_) => ("Chain", 0),
            Self::Lightning(_) => ("Lightning", 0),
            Self::Storage(_) => ("Database", 0),
            Self::Wallet(_) => ("Wallet", 0),
            Self::Rate(_) => ("Rates", 0),
            Self::Io(_) => ("Service", 1),
        };
        format!("{}.{}", domain, number)
    }

    /// The `{code, message}` shape surfaced to callers
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// Wire-facing error payload
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

/// Result type alias using SwapdError
pub type Result<T> = std::result::Result<T, SwapdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = SwapdError::validation("invoice amount missing");
        assert_eq!(err.code(), "Swap.2");

        let response = err.to_response();
        assert!(response.message.contains("invoice amount missing"));
    }

    #[test]
    fn test_retryable() {
        assert!(!SwapdError::validation("bad input").is_retryable());
        assert!(!SwapdError::invariant("state mismatch").is_retryable());
    }
}
