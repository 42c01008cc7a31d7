//! Error types.
//!
//! Only [`SubscriptionError`] ever crosses the serve-loop boundary.  Handler
//! and delivery failures are absorbed by the dispatcher and logged.

use thiserror::Error;

/// Whatever a user handler or responder returns on failure.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Opening a subscription on the event source failed.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("event source unavailable: {0}")]
    Unavailable(String),

    #[error("event source already has an active subscription")]
    AlreadySubscribed,
}

/// Delivering a query answer back to the asking peer failed.
#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("unknown or stale query id: {0}")]
    UnknownQuery(u64),

    #[error("response delivery failed: {0}")]
    Delivery(String),
}

/// Binary-level error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("failed to initialize event stream: {0}")]
    Subscription(#[from] SubscriptionError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
