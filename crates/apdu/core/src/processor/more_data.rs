//! Proprietary `9F xx` chaining over an asynchronous transport

use std::future::Future;

use bytes::Bytes;
use tracing::trace;

use super::{Chain, DEFAULT_CHAIN_LIMIT, Step, continuation_command};
use crate::error::ResultExt;
use crate::response::status::SW1_PROPRIETARY_MORE_DATA;
use crate::transport::AsyncCardTransport;
use crate::Error;

/// Follows `9F xx` "more data" chains on an asynchronous transport
///
/// Each submitted step is awaited and its status decides whether another
/// continuation step is composed or the outer future completes with the
/// concatenated data and final status word.
#[derive(Debug)]
pub struct MoreDataProcessor<A> {
    inner: A,
    max_chain: usize,
}

impl<A: AsyncCardTransport> MoreDataProcessor<A> {
    /// Wrap an asynchronous transport with the default chain limit
    pub const fn new(inner: A) -> Self {
        Self::with_limit(inner, DEFAULT_CHAIN_LIMIT)
    }

    /// Wrap an asynchronous transport with an explicit chain limit
    pub const fn with_limit(inner: A, max_chain: usize) -> Self {
        Self { inner, max_chain }
    }

    /// Unwrap the wrapped transport
    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: AsyncCardTransport> MoreDataProcessor<A> {
    async fn exchange(&mut self, command: Bytes) -> Result<Bytes, Error> {
        let mut chain = Chain::new(SW1_PROPRIETARY_MORE_DATA, self.max_chain);
        let mut step = self.inner.submit(command.clone()).await?;

        loop {
            match chain.step(&step)? {
                Step::Done(response) => return Ok(response),
                Step::Continue(le) => {
                    trace!(le, "Requesting proprietary continuation");
                    step = self
                        .inner
                        .submit(continuation_command(&command, le))
                        .await
                        .context("Failed to submit continuation command")?;
                }
            }
        }
    }
}

impl<A: AsyncCardTransport> AsyncCardTransport for MoreDataProcessor<A> {
    fn submit(&mut self, command: Bytes) -> impl Future<Output = Result<Bytes, Error>> + Send {
        self.exchange(command)
    }
}
