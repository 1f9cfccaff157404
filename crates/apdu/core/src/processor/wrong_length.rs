//! Retry on `6C xx` with the Le the card asked for

use bytes::Bytes;
use tracing::trace;

use crate::command::Command;
use crate::error::ResultExt;
use crate::response;
use crate::response::status::SW1_WRONG_LE;
use crate::transport::CardTransport;
use crate::Error;

/// Reissues a command once when the card answers `6C xx`
///
/// The retry carries the same header and data with Le replaced by `xx`
/// (00 meaning 256). The retry's raw response is returned verbatim once it
/// is known to carry a status word; any other status is returned unmodified.
#[derive(Debug)]
pub struct WrongLengthProcessor<T> {
    inner: T,
}

impl<T: CardTransport> WrongLengthProcessor<T> {
    /// Wrap a transport
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Get a reference to the wrapped transport
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap the wrapped transport
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: CardTransport> CardTransport for WrongLengthProcessor<T> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let response_bytes = self.inner.transmit_raw(command)?;
        let (status, _) = response::split(&response_bytes)?;

        if status.sw1 != SW1_WRONG_LE {
            return Ok(response_bytes);
        }

        let le = status.announced_length();
        let retry = Command::from_bytes(command)
            .context("Failed to rebuild command for wrong length retry")?
            .with_le(le);

        trace!(le, status = status.description(), "Retrying command with corrected Le");

        let retried = self
            .inner
            .transmit_raw(&retry.to_bytes())
            .context("Wrong length retry failed")?;
        response::split(&retried)?;
        Ok(retried)
    }
}
