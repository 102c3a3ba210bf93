//! Error taxonomy for the trading engine.
//!
//! The lifecycle controller catches the recoverable classes per trade or per
//! pair and keeps going; anything else aborts the cycle.

use thiserror::Error;

/// Result type alias using our BotError
pub type Result<T> = std::result::Result<T, BotError>;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum BotError {
    /// Exchange or network temporarily unavailable
    #[error("Temporary exchange failure: {0}")]
    Temporary(String),

    /// Exchange rejected an order or does not know the order reference
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// Not enough free balance for the requested action
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Missing market metadata or another unmet precondition
    #[error("Dependency error: {0}")]
    Dependency(String),

    /// Exchange-reported fills disagree with the order record
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Whether the error only affects the current pair/trade for this cycle.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BotError::Temporary(_)
                | BotError::InvalidOrder(_)
                | BotError::InsufficientFunds(_)
                | BotError::Dependency(_)
                | BotError::Reconciliation(_)
        )
    }

    /// Transient faults the run loop logs and retries on the next tick.
    pub fn is_temporary(&self) -> bool {
        matches!(self, BotError::Temporary(_))
    }
}

impl From<config::ConfigError> for BotError {
    fn from(err: config::ConfigError) -> Self {
        BotError::Config(err.to_string())
    }
}
