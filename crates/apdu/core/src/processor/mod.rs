//! Continuation wrappers for APDU exchanges
//!
//! Some cards cannot answer a command in a single physical exchange. The
//! wrappers in this module decorate a transport and hide one continuation
//! protocol each, so the caller sees one logical exchange:
//!
//! - [`WrongLengthProcessor`]: `6C xx` means "retry with Le = xx"
//! - [`GetResponseProcessor`]: `61 xx` means "xx more bytes, fetch them with GET RESPONSE"
//! - [`MoreDataProcessor`]: the same chaining triggered by the proprietary `9F xx`,
//!   expressed over [`AsyncCardTransport`](crate::AsyncCardTransport)
//!
//! Every wrapper is itself a transport, so they compose by nesting in any order.
//! None of them keeps state between calls.

mod get_response;
mod more_data;
mod wrong_length;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::Error;
use crate::command::{Command, ExpectedLength};
use crate::response;

pub use get_response::GetResponseProcessor;
pub use more_data::MoreDataProcessor;
pub use wrong_length::WrongLengthProcessor;

/// Instruction byte of GET RESPONSE
pub const INS_GET_RESPONSE: u8 = 0xC0;

/// Default bound on the number of continuation statuses a chain may carry
pub const DEFAULT_CHAIN_LIMIT: usize = 32;

/// Builds the continuation command for a chaining status
///
/// The class byte is taken from the command that started the chain.
pub(crate) fn continuation_command(original: &[u8], le: ExpectedLength) -> Bytes {
    let cla = original.first().copied().unwrap_or(0x00);
    Command::new_with_le(cla, INS_GET_RESPONSE, 0x00, 0x00, le).to_bytes()
}

/// Outcome of feeding one physical response into a [`Chain`]
#[derive(Debug)]
pub(crate) enum Step {
    /// Another continuation command must be issued with this Le
    Continue(ExpectedLength),
    /// The chain is complete; this is the assembled logical response
    Done(Bytes),
}

/// Accumulates the data of a continuation chain
#[derive(Debug)]
pub(crate) struct Chain {
    trigger: u8,
    limit: usize,
    seen: usize,
    buffer: BytesMut,
}

impl Chain {
    pub(crate) fn new(trigger: u8, limit: usize) -> Self {
        Self {
            trigger,
            limit,
            seen: 0,
            buffer: BytesMut::new(),
        }
    }

    /// Consume one physical response and decide how the chain proceeds
    pub(crate) fn step(&mut self, raw: &[u8]) -> Result<Step, Error> {
        let (status, data) = response::split(raw)?;
        self.buffer.extend_from_slice(data);

        if status.sw1 != self.trigger {
            trace!(
                total_data_len = self.buffer.len(),
                final_sw = %status,
                status = status.description(),
                chain_count = self.seen,
                "Completed response chaining"
            );
            let mut assembled = std::mem::take(&mut self.buffer);
            assembled.put_u8(status.sw1);
            assembled.put_u8(status.sw2);
            return Ok(Step::Done(assembled.freeze()));
        }

        self.seen += 1;
        if self.seen >= self.limit {
            return Err(Error::ChainLimitExceeded { limit: self.limit });
        }

        trace!(
            remaining = status.sw2,
            chain_count = self.seen,
            "Continuing response chain"
        );
        Ok(Step::Continue(status.announced_length()))
    }
}
