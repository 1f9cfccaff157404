//! Error types specific to card transport

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connection error
    #[error("Failed to connect to device")]
    Connection,

    /// Transmission error
    #[error("Failed to transmit data")]
    Transmission,

    /// The card left the reader while it was being used
    #[error("Card was removed")]
    CardRemoved,

    /// Another party holds exclusive access to the card
    #[error("Card is in exclusive use by another connection")]
    ExclusiveAccess,

    /// Device error
    #[error("Device error")]
    Device,

    /// Error reported by the reader driver
    #[error("Driver error: {0}")]
    Driver(String),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Cancelled operation
    #[error("Operation cancelled")]
    Cancelled,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a new driver error
    pub fn driver<S: Into<String>>(message: S) -> Self {
        Self::Driver(message.into())
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }
}
