//! Error types for credential rotation events

use thiserror::Error;

/// Credential rotation errors
#[derive(Error, Debug)]
pub enum RotationError {
    /// Redis connection or operation error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Message body is not a decimal application id
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Subscription dropped by the transport
    #[error("Subscription lost: {0}")]
    SubscriptionLost(String),
}
