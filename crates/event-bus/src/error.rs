use thiserror::Error;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// No live connection to the broker.
    #[error("Event bus is not connected")]
    NotConnected,

    /// Establishing or keeping the broker connection failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Declaring an exchange or queue failed.
    #[error("Failed to declare {kind} '{name}': {reason}")]
    Declare {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// The exchange has not been declared on the broker.
    #[error("Exchange not found: {0}")]
    ExchangeNotFound(String),

    /// Publishing a message failed.
    #[error("Failed to publish to '{exchange}' with routing key '{routing_key}': {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    /// Binding or consuming a queue failed.
    #[error("Failed to subscribe to '{exchange}' with pattern '{pattern}': {reason}")]
    Subscribe {
        exchange: String,
        pattern: String,
        reason: String,
    },

    /// A routing pattern could not be parsed.
    #[error("Invalid routing pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Error returned by a message handler.
///
/// The bus only cares that handling failed; the message decides redelivery.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(String);

impl HandlerError {
    /// Creates a handler error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self(format!("malformed payload: {e}"))
    }
}

impl From<BusError> for HandlerError {
    fn from(e: BusError) -> Self {
        Self(e.to_string())
    }
}
