//! Core traits and types for APDU (Application Protocol Data Unit) exchanges
//!
//! This crate provides the byte-level building blocks used by the session layer
//! to talk to a smart card according to ISO/IEC 7816-4.
//!
//! ## Overview
//!
//! - [`Command`] and [`Response`] encode and decode command and response frames
//! - [`CardTransport`] and [`AsyncCardTransport`] describe the "bytes in, bytes out"
//!   exchange primitive offered by a reader
//! - The [`processor`] module contains continuation wrappers that hide
//!   multi-exchange protocols (wrong Le retry, GET RESPONSE chaining and the
//!   proprietary `9F xx` chaining) behind a single logical exchange
//!
//! Wrappers are transports themselves, so they stack by nesting:
//!
//! ```
//! use cardlink_apdu_core::prelude::*;
//! use cardlink_apdu_core::processor::{GetResponseProcessor, WrongLengthProcessor};
//!
//! #[derive(Debug)]
//! struct Echo;
//!
//! impl CardTransport for Echo {
//!     fn do_transmit_raw(&mut self, _command: &[u8]) -> Result<Bytes, Error> {
//!         Ok(Bytes::from_static(&[0x90, 0x00]))
//!     }
//! }
//!
//! let mut transport = GetResponseProcessor::new(WrongLengthProcessor::new(Echo));
//! let response = transport.transmit_raw(&[0x00, 0xA4, 0x04, 0x00]).unwrap();
//! assert_eq!(response.as_ref(), &[0x90, 0x00]);
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod command;
pub mod error;
pub mod processor;
pub mod response;
pub mod transport;

pub use command::{Command, ExpectedLength};
pub use error::{Error, Result, ResultExt};
pub use response::Response;
pub use response::status::StatusWord;
pub use transport::{AsyncCardTransport, CardTransport, TransportError};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    // Core types
    pub use crate::{Bytes, BytesMut, Error, Result, ResultExt};

    // Frames
    pub use crate::command::{Command, ExpectedLength};
    pub use crate::response::Response;
    pub use crate::response::status::{StatusWord, common as status};

    // Transport layer
    pub use crate::transport::{AsyncCardTransport, CardTransport, TransportError};
}
