//! Reader abstraction the runner polls
//!
//! A terminal answers presence questions within a bounded wait and opens
//! connections to the card it holds. Every call is blocking; the runner
//! and its removal watch call it from their own threads.

#[cfg(feature = "pcsc")]
pub mod pcsc;

use std::fmt;
use std::time::Duration;

use cardlink_apdu_core::{CardTransport, Error};

use crate::card::{CardData, Protocol};

/// An open connection to the card in a terminal
#[derive(Debug)]
pub struct Connection<T> {
    /// Raw exchange primitive for the card
    pub transport: T,
    /// What the terminal reported about the card
    pub card: CardData,
}

impl<T: CardTransport> Connection<T> {
    /// Pair a transport with its card description
    pub const fn new(transport: T, card: CardData) -> Self {
        Self { transport, card }
    }
}

/// A card reader driven by a [`SessionRunner`](crate::SessionRunner)
pub trait Terminal: Send + Sync + fmt::Debug + 'static {
    /// Transport produced by [`Terminal::connect`]
    type Transport: CardTransport + 'static;

    /// Human readable reader name
    fn name(&self) -> &str;

    /// Whether a card is present right now
    fn is_card_present(&self) -> Result<bool, Error>;

    /// Wait up to `timeout` for a card; `Ok(true)` once one is present
    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, Error>;

    /// Wait up to `timeout` for the card to leave; `Ok(true)` once the reader is empty
    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, Error>;

    /// Connect to the present card
    fn connect(&self, protocol: Protocol) -> Result<Connection<Self::Transport>, Error>;
}
