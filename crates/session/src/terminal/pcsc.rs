//! PC/SC backed terminal

use std::ffi::CString;
use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use cardlink_apdu_core::{CardTransport, Error, TransportError};
use pcsc::{Card, Context, Disposition, Protocols, ReaderState, Scope, ShareMode, State};
use tracing::{debug, trace};

use super::{Connection, Terminal};
use crate::card::{CardData, Protocol};

/// Map a PC/SC failure onto the transport taxonomy
fn map_error(error: pcsc::Error) -> Error {
    let kind = match error {
        pcsc::Error::RemovedCard | pcsc::Error::NoSmartcard | pcsc::Error::ResetCard => {
            TransportError::CardRemoved
        }
        pcsc::Error::SharingViolation => TransportError::ExclusiveAccess,
        pcsc::Error::Timeout => TransportError::Timeout,
        pcsc::Error::Cancelled => TransportError::Cancelled,
        pcsc::Error::NoService
        | pcsc::Error::ServiceStopped
        | pcsc::Error::UnknownReader
        | pcsc::Error::ReaderUnavailable => TransportError::Connection,
        other => TransportError::driver(other.to_string()),
    };
    kind.into()
}

/// List the readers known to the PC/SC service
pub fn list_readers() -> Result<Vec<String>, Error> {
    let context = Context::establish(Scope::User).map_err(map_error)?;
    let readers = context.list_readers_owned().map_err(map_error)?;
    Ok(readers
        .into_iter()
        .map(|reader| reader.to_string_lossy().into_owned())
        .collect())
}

/// One PC/SC reader
///
/// Presence polling runs on its own context, so a removal watch blocked in
/// `SCardGetStatusChange` never holds up a transmit on the card context.
pub struct PcscTerminal {
    context: Context,
    monitor: Context,
    reader: CString,
    name: String,
    share_mode: ShareMode,
}

impl fmt::Debug for PcscTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTerminal")
            .field("name", &self.name)
            .field("share_mode", &self.share_mode)
            .finish()
    }
}

impl PcscTerminal {
    /// Open the reader called `name` with a fresh user-scope context
    pub fn open(name: &str) -> Result<Self, Error> {
        let context = Context::establish(Scope::User).map_err(map_error)?;
        Self::with_context(context, name)
    }

    /// Open the reader called `name`, connecting cards on an existing context
    ///
    /// Presence polling always gets a dedicated context.
    pub fn with_context(context: Context, name: &str) -> Result<Self, Error> {
        let reader = CString::new(name)
            .map_err(|_| Error::from(TransportError::other("reader name contains a NUL byte")))?;
        let monitor = Context::establish(Scope::User).map_err(map_error)?;
        Ok(Self {
            context,
            monitor,
            reader,
            name: name.to_owned(),
            share_mode: ShareMode::Shared,
        })
    }

    /// Connect exclusively instead of shared
    pub const fn exclusive(mut self) -> Self {
        self.share_mode = ShareMode::Exclusive;
        self
    }

    fn has_card(state: State) -> bool {
        state.contains(State::PRESENT) && !state.contains(State::EMPTY)
    }

    /// Wait until the card presence equals `present`
    fn wait_for(&self, present: bool, timeout: Duration) -> Result<bool, Error> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.monitor
            .get_status_change(Some(Duration::ZERO), &mut states)
            .map_err(map_error)?;
        if Self::has_card(states[0].event_state()) == present {
            return Ok(true);
        }

        states[0].sync_current_state();
        match self.monitor.get_status_change(Some(timeout), &mut states) {
            Ok(()) => Ok(Self::has_card(states[0].event_state()) == present),
            Err(pcsc::Error::Timeout) => Ok(false),
            Err(e) => Err(map_error(e)),
        }
    }
}

impl Terminal for PcscTerminal {
    type Transport = PcscTransport;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_card_present(&self) -> Result<bool, Error> {
        let mut states = [ReaderState::new(self.reader.clone(), State::UNAWARE)];
        self.monitor
            .get_status_change(Some(Duration::ZERO), &mut states)
            .map_err(map_error)?;
        Ok(Self::has_card(states[0].event_state()))
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, Error> {
        self.wait_for(true, timeout)
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, Error> {
        self.wait_for(false, timeout)
    }

    fn connect(&self, protocol: Protocol) -> Result<Connection<PcscTransport>, Error> {
        let (share_mode, protocols) = match protocol {
            Protocol::T0 => (self.share_mode, Protocols::T0),
            Protocol::T1 => (self.share_mode, Protocols::T1),
            Protocol::Any => (self.share_mode, Protocols::ANY),
            Protocol::Direct => (ShareMode::Direct, Protocols::UNDEFINED),
        };

        let card = self
            .context
            .connect(&self.reader, share_mode, protocols)
            .map_err(map_error)?;
        let status = card.status2_owned().map_err(map_error)?;
        let negotiated = match status.protocol2() {
            Some(pcsc::Protocol::T0) => Protocol::T0,
            Some(pcsc::Protocol::T1) => Protocol::T1,
            _ => Protocol::Direct,
        };
        let atr = Bytes::copy_from_slice(status.atr());

        debug!(reader = %self.name, atr = %hex::encode(&atr), %negotiated, "Connected to card");
        Ok(Connection::new(
            PcscTransport {
                card: Some(card),
                reader: self.name.clone(),
            },
            CardData::new(self.name.clone(), atr, negotiated),
        ))
    }
}

/// Exchange primitive over a PC/SC card handle
pub struct PcscTransport {
    card: Option<Card>,
    reader: String,
}

impl fmt::Debug for PcscTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscTransport")
            .field("reader", &self.reader)
            .field("has_card", &self.card.is_some())
            .finish()
    }
}

impl CardTransport for PcscTransport {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let card = self.card.as_ref().ok_or(TransportError::CardRemoved)?;

        let mut response_buffer = [0u8; pcsc::MAX_BUFFER_SIZE_EXTENDED];
        match card.transmit(command, &mut response_buffer) {
            Ok(response) => Ok(Bytes::copy_from_slice(response)),
            Err(e) => {
                if matches!(e, pcsc::Error::ResetCard | pcsc::Error::RemovedCard) {
                    trace!(reader = %self.reader, "Dropping card handle");
                    self.card = None;
                }
                Err(map_error(e))
            }
        }
    }
}

impl Drop for PcscTransport {
    fn drop(&mut self) {
        if let Some(card) = self.card.take() {
            let _ = card.disconnect(Disposition::LeaveCard);
        }
    }
}
