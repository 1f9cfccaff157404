//! Error types reported to card applications

use std::time::Duration;

use cardlink_apdu_core::{Error as ApduError, TransportError};

/// Convenience result alias
pub type Result<T, E = SessionError> = core::result::Result<T, E>;

/// Outcome of a failed exchange or a failed session
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The reader or the card failed during an exchange
    #[error("Transport fault: {0}")]
    Transport(#[source] ApduError),

    /// The card left the reader
    #[error("Card was removed")]
    TagRemoved,

    /// The application did not submit a command in time
    #[error("No command was submitted within {0:?}")]
    IdleTimeout(Duration),

    /// The session layer was used in a way it does not allow
    #[error("Configuration error: {0}")]
    Configuration(&'static str),

    /// The runner was stopped
    #[error("Session runner was cancelled")]
    Cancelled,

    /// The application dropped its start request without resolving it
    #[error("Start request was abandoned by the application")]
    StartAborted,
}

impl SessionError {
    /// Whether the failure only ends the current session
    pub const fn is_card_removed(&self) -> bool {
        matches!(self, Self::TagRemoved)
    }

    /// Whether the failure comes from misuse of the session API
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

impl From<ApduError> for SessionError {
    fn from(error: ApduError) -> Self {
        if error.is_card_removed() {
            Self::TagRemoved
        } else {
            Self::Transport(error)
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        ApduError::from(error).into()
    }
}

impl From<SessionError> for ApduError {
    fn from(error: SessionError) -> Self {
        match error {
            SessionError::Transport(e) => e,
            SessionError::TagRemoved => TransportError::CardRemoved.into(),
            SessionError::IdleTimeout(_) => TransportError::Timeout.into(),
            SessionError::Cancelled => TransportError::Cancelled.into(),
            other => Self::message(other.to_string()),
        }
    }
}
