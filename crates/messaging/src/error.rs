use thiserror::Error;

/// Boxed error returned by message handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur when talking to the broker.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// There is no live channel (never connected, or reconnecting).
    #[error("Messaging client is not ready")]
    ClientNotReady,

    /// The broker explicitly rejected the published message.
    #[error("Message was nacked by the broker")]
    MessageNacked,

    /// No confirmation arrived within the configured wait.
    #[error("Timeout waiting for publish confirmation")]
    PublishTimeout,

    /// The caller gave up before the confirmation arrived.
    ///
    /// The message may or may not have been accepted.
    #[error("Publish cancelled while waiting for confirmation")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Connection, channel or declaration failure reported by the broker.
    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Failed to register consumer for queue {queue}: {reason}")]
    ConsumerRegister { queue: String, reason: String },
}

#[cfg(feature = "amqp")]
impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::Broker(err.to_string())
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
