//! Transport traits for APDU communication with cards
//!
//! A transport is the "bytes in, bytes out" exchange primitive offered by a
//! reader. It has no knowledge of command structure or continuation
//! protocols; those live in [`crate::processor`].

pub mod error;

use std::fmt;
use std::future::Future;

use bytes::Bytes;
pub use error::TransportError;
use tracing::{debug, trace};

use crate::Error;

/// Trait for blocking card transports
///
/// Implementations perform exactly one physical exchange per call and must
/// not interpret the contents of the command or response.
pub trait CardTransport: Send + Sync + fmt::Debug {
    /// Send raw APDU bytes to card and return response bytes
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        trace!(command = %hex::encode(command), "Transmitting raw command");
        let result = self.do_transmit_raw(command);
        match &result {
            Ok(response) => {
                trace!(response = %hex::encode(response), "Received raw response");
            }
            Err(e) => {
                debug!(error = %e, "Transport error during transmission");
            }
        }
        result
    }

    /// Internal implementation of transmit_raw
    /// This is the method that concrete implementations should override
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error>;
}

impl<T: CardTransport + ?Sized> CardTransport for &mut T {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).do_transmit_raw(command)
    }
}

impl<T: CardTransport + ?Sized> CardTransport for Box<T> {
    fn transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).transmit_raw(command)
    }

    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        (**self).do_transmit_raw(command)
    }
}

/// Trait for asynchronous card transports
///
/// The returned future resolves once the card has answered. Only one
/// submission may be outstanding at a time, which the `&mut self` receiver
/// enforces.
pub trait AsyncCardTransport: Send + fmt::Debug {
    /// Submit raw APDU bytes and resolve with the raw response bytes
    fn submit(&mut self, command: Bytes) -> impl Future<Output = Result<Bytes, Error>> + Send;
}

/// Runs a blocking transport inline when the submission future is polled
#[derive(Debug)]
pub struct Inline<T> {
    inner: T,
}

impl<T: CardTransport> Inline<T> {
    /// Wrap a blocking transport
    pub const fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Unwrap the blocking transport
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: CardTransport> AsyncCardTransport for Inline<T> {
    fn submit(&mut self, command: Bytes) -> impl Future<Output = Result<Bytes, Error>> + Send {
        async move { self.inner.transmit_raw(&command) }
    }
}

/// Drives an asynchronous transport to completion on the calling thread
#[derive(Debug)]
pub struct Blocking<A> {
    inner: A,
}

impl<A: AsyncCardTransport> Blocking<A> {
    /// Wrap an asynchronous transport
    pub const fn new(inner: A) -> Self {
        Self { inner }
    }

    /// Unwrap the asynchronous transport
    pub fn into_inner(self) -> A {
        self.inner
    }
}

impl<A: AsyncCardTransport + Sync> CardTransport for Blocking<A> {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        futures::executor::block_on(self.inner.submit(Bytes::copy_from_slice(command)))
    }
}

#[cfg(test)]
pub(crate) use mock::MockTransport;
