//! Error types for the decision pipeline

use crate::gateway::GatewayError;

/// Errors raised while driving the entry and exit loops.
///
/// Only `AccountUnavailable` is fatal (to the entry loop); everything else
/// is logged and retried on the next poll.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Data unavailable: {what}")]
    DataUnavailable { what: String },

    #[error("Invalid sizing: {0}")]
    InvalidSizing(String),

    #[error("Order rejected by broker (code {code})")]
    OrderRejected { code: u32 },

    #[error("Account info unavailable")]
    AccountUnavailable,

    #[error("Invalid order request: {0}")]
    InvalidOrder(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl EngineError {
    pub fn unavailable(what: impl Into<String>) -> Self {
        EngineError::DataUnavailable { what: what.into() }
    }

    /// Whether the entry loop must stop rather than keep trading
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::AccountUnavailable)
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
