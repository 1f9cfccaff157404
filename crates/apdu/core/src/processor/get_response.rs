//! GET RESPONSE chaining on `61 xx`

use bytes::Bytes;
use tracing::trace;

use super::{Chain, DEFAULT_CHAIN_LIMIT, Step, continuation_command};
use crate::error::ResultExt;
use crate::response::status::SW1_MORE_DATA;
use crate::transport::CardTransport;
use crate::Error;

/// GET RESPONSE processor that handles automatic response chaining
///
/// While the card answers `61 xx`, the data received so far is kept and
/// `CLA C0 00 00 xx` is sent to fetch the rest. The logical response is the
/// concatenated data followed by the final status word.
#[derive(Debug)]
pub struct GetResponseProcessor<T> {
    inner: T,
    /// Maximum number of `61 xx` statuses tolerated in one chain
    max_chain: usize,
}

impl<T: CardTransport> GetResponseProcessor<T> {
    /// Wrap a transport with the default chain limit
    pub const fn new(inner: T) -> Self {
        Self::with_limit(inner, DEFAULT_CHAIN_LIMIT)
    }

    /// Wrap a transport with an explicit chain limit
    pub const fn with_limit(inner: T, max_chain: usize) -> Self {
        Self { inner, max_chain }
    }

    /// The configured chain limit
    pub const fn max_chain(&self) -> usize {
        self.max_chain
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

impl<T: CardTransport> CardTransport for GetResponseProcessor<T> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let mut chain = Chain::new(SW1_MORE_DATA, self.max_chain);
        let mut response_bytes = self.inner.transmit_raw(command)?;

        loop {
            match chain.step(&response_bytes)? {
                Step::Done(response) => return Ok(response),
                Step::Continue(le) => {
                    trace!(le, "Sending GET RESPONSE command");
                    response_bytes = self
                        .inner
                        .transmit_raw(&continuation_command(command, le))
                        .context("Failed to transmit GET RESPONSE command")?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, TransportError};

    fn chain_of(links: usize) -> Vec<Vec<u8>> {
        let mut responses: Vec<Vec<u8>> = (0..links).map(|i| vec![i as u8, 0x61, 0x01]).collect();
        responses.push(vec![0xFF, 0x90, 0x00]);
        responses
    }

    #[test]
    fn test_get_response_processor() {
        let mock = MockTransport::new([
            &[0x61, 0x05][..],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x90, 0x00][..],
        ]);
        let mut processor = GetResponseProcessor::new(mock);

        let command = [0x00, 0xB0, 0x00, 0x00];
        let response = processor.transmit_raw(&command).unwrap();

        assert_eq!(response.as_ref(), &[0x01, 0x02, 0x03, 0x04, 0x05, 0x90, 0x00]);

        let mock = processor.into_inner();
        assert_eq!(mock.commands[0].as_ref(), &command);
        assert_eq!(mock.commands[1].as_ref(), &[0x00, 0xC0, 0x00, 0x00, 0x05]);
    }

    #[test]
    fn test_accumulates_data_in_order() {
        let mock = MockTransport::new([
            &[0xA1, 0xA2, 0x61, 0x02][..],
            &[0xB1, 0xB2, 0x61, 0x00][..],
            &[0xC1, 0x62, 0x82][..],
        ]);
        let mut processor = GetResponseProcessor::new(mock);

        let response = processor.transmit_raw(&[0x80, 0xCA, 0x00, 0x00]).unwrap();
        assert_eq!(
            response.as_ref(),
            &[0xA1, 0xA2, 0xB1, 0xB2, 0xC1, 0x62, 0x82]
        );

        let mock = processor.into_inner();
        assert_eq!(mock.commands[1].as_ref(), &[0x80, 0xC0, 0x00, 0x00, 0x02]);
        assert_eq!(mock.commands[2].as_ref(), &[0x80, 0xC0, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_no_chaining_passthrough() {
        let mut processor = GetResponseProcessor::new(MockTransport::new([[0x01, 0x6A, 0x82]]));
        let response = processor.transmit_raw(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
        assert_eq!(response.as_ref(), &[0x01, 0x6A, 0x82]);
        assert_eq!(processor.inner().commands.len(), 1);
    }

    #[test]
    fn test_chain_below_limit_completes() {
        let links = DEFAULT_CHAIN_LIMIT - 1;
        let mut processor = GetResponseProcessor::new(MockTransport::new(chain_of(links)));

        let response = processor.transmit_raw(&[0x00, 0xB0, 0x00, 0x00]).unwrap();

        let mut expected: Vec<u8> = (0..links).map(|i| i as u8).collect();
        expected.extend_from_slice(&[0xFF, 0x90, 0x00]);
        assert_eq!(response.as_ref(), expected.as_slice());
        assert_eq!(processor.inner().commands.len(), links + 1);
    }

    #[test]
    fn test_chain_at_limit_is_rejected() {
        let mut processor =
            GetResponseProcessor::new(MockTransport::new(chain_of(DEFAULT_CHAIN_LIMIT)));

        let err = processor.transmit_raw(&[0x00, 0xB0, 0x00, 0x00]).unwrap_err();

        assert!(matches!(err, Error::ChainLimitExceeded { limit: 32 }));
        assert!(err.is_protocol_violation());
        // The 32nd continuation status stops the chain without another GET RESPONSE
        assert_eq!(processor.inner().commands.len(), DEFAULT_CHAIN_LIMIT);
    }

    #[test]
    fn test_custom_limit() {
        let mut processor = GetResponseProcessor::with_limit(MockTransport::new(chain_of(3)), 3);
        assert_eq!(processor.max_chain(), 3);
        assert!(processor.transmit_raw(&[0x00, 0xB0, 0x00, 0x00]).is_err());

        let mut processor = GetResponseProcessor::with_limit(MockTransport::new(chain_of(2)), 3);
        assert!(processor.transmit_raw(&[0x00, 0xB0, 0x00, 0x00]).is_ok());
    }

    #[test]
    fn test_fault_mid_chain_is_preserved() {
        let mock = MockTransport::new([[0x61, 0x10]]).then_fail(TransportError::CardRemoved);
        let mut processor = GetResponseProcessor::new(mock);
        let err = processor.transmit_raw(&[0x00, 0xB0, 0x00, 0x00]).unwrap_err();
        assert!(err.is_card_removed());
        assert!(matches!(err, Error::Context { .. }));
    }
}
