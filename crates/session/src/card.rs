//! Card description handed to applications

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

/// Transmission protocol requested from, or negotiated with, a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, derive_more::Display)]
pub enum Protocol {
    /// Character-oriented T=0
    #[display("T=0")]
    T0,
    /// Block-oriented T=1
    #[display("T=1")]
    T1,
    /// Whatever the reader and card agree on
    #[default]
    #[display("*")]
    Any,
    /// Direct connection to the reader without a card protocol
    #[display("DIRECT")]
    Direct,
}

/// Error returned when a protocol name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown protocol: {0}")]
pub struct ParseProtocolError(String);

impl FromStr for Protocol {
    type Err = ParseProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "T=0" | "T0" => Ok(Self::T0),
            "T=1" | "T1" => Ok(Self::T1),
            "*" | "ANY" => Ok(Self::Any),
            "DIRECT" => Ok(Self::Direct),
            _ => Err(ParseProtocolError(s.to_owned())),
        }
    }
}

/// Description of the card a session was started for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardData {
    reader: String,
    atr: Bytes,
    protocol: Protocol,
}

impl CardData {
    /// Describe a card seen in `reader`
    pub fn new(reader: impl Into<String>, atr: impl Into<Bytes>, protocol: Protocol) -> Self {
        Self {
            reader: reader.into(),
            atr: atr.into(),
            protocol,
        }
    }

    /// Name of the reader holding the card
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Answer-to-reset bytes
    pub fn atr(&self) -> &[u8] {
        &self.atr
    }

    /// Protocol negotiated for the session
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl fmt::Display for CardData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ATR {}, {})",
            self.reader,
            hex::encode_upper(&self.atr),
            self.protocol
        )
    }
}
