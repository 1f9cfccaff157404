//! Core error type for all APDU operations
//!
//! Transport faults, malformed frames and continuation failures are all
//! expressed through [`Error`] so wrappers can propagate whatever the
//! underlying exchange raised without losing its kind.

use crate::response::error::ResponseError;
use crate::transport::TransportError;

/// Convenience result alias
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Core error type that encompasses all possible errors in the crate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    //
    // Transport related errors
    //
    /// The underlying exchange primitive failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    //
    // Frame related errors
    //
    /// A response frame could not be parsed
    #[error(transparent)]
    Response(#[from] ResponseError),

    /// Invalid command length
    #[error("Invalid command length: {0}")]
    InvalidCommandLength(usize),

    /// Invalid command data
    #[error("Invalid command data: {0}")]
    InvalidCommandData(&'static str),

    //
    // Continuation related errors
    //
    /// The device answered in a way the continuation protocol does not allow
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A continuation chain did not terminate within its bound
    #[error("Chain limit of {limit} continuation responses exceeded")]
    ChainLimitExceeded {
        /// The configured bound
        limit: usize,
    },

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        #[source]
        source: Box<Self>,
    },

    /// Generic dynamic error with string message
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new error with a dynamic message
    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::Message(message.into())
    }

    /// Create a new protocol violation
    pub const fn protocol(message: &'static str) -> Self {
        Self::ProtocolViolation(message)
    }

    /// Strip any [`Error::Context`] layers and return the innermost error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// The transport error at the root of this error, if any
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self.root() {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }

    /// Whether the card physically left the reader during the operation
    pub fn is_card_removed(&self) -> bool {
        matches!(self.transport_error(), Some(TransportError::CardRemoved))
    }

    /// Whether the error is a malformed response or a runaway continuation chain
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self.root(),
            Self::ProtocolViolation(_) | Self::ChainLimitExceeded { .. } | Self::Response(_)
        )
    }
}

/// Extension trait for Result with APDU Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err: Result<()> = Err(Error::from(TransportError::CardRemoved));
        let err = err
            .context("GET RESPONSE")
            .context("outer")
            .unwrap_err();

        assert!(err.is_card_removed());
        assert!(!err.is_protocol_violation());
        assert_eq!(err.to_string(), "outer: GET RESPONSE: Card was removed");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_protocol_violation_kinds() {
        assert!(Error::ChainLimitExceeded { limit: 32 }.is_protocol_violation());
        assert!(Error::from(ResponseError::Incomplete(1)).is_protocol_violation());
        assert!(
            Error::protocol("bad")
                .with_context("wrapped")
                .is_protocol_violation()
        );
        assert!(!Error::from(TransportError::Transmission).is_protocol_violation());
    }
}
