//! Error types specific to APDU responses

/// Error raised while decoding a response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResponseError {
    /// Fewer than two bytes were received, so there is no status word
    #[error("Incomplete response: {0} bytes, status word requires 2")]
    Incomplete(usize),
}
