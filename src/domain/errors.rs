// src/domain/errors.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Reconciliation error: {0}")]
    Recon(#[from] ReconError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Implement From for common error types
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Unknown(s)
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Order error: {0}")]
    Order(String),

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Malformed payload: {0}")]
    Payload(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request error: {0}")]
    Request(String),
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Illegal status transition: {from} -> {to} for order {order_id}")]
    IllegalTransition {
        order_id: i64,
        from: String,
        to: String,
    },

    #[error("Order {0} is locked")]
    Locked(i64),

    #[error("Order not found: {0}")]
    OrderNotFound(i64),

    #[error("Trade not found: {0}")]
    TradeNotFound(i64),

    #[error("Sync state may not regress for trade {0}")]
    SyncRegression(i64),
}

#[derive(Error, Debug)]
pub enum ReconError {
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("No matching position for trade {0}")]
    NoPosition(i64),

    #[error("Account skipped: {0}")]
    AccountSkipped(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
pub type ExchangeResult<T> = Result<T, ExchangeError>;
pub type LedgerResult<T> = Result<T, LedgerError>;
pub type ReconResult<T> = Result<T, ReconError>;
