//! Hand-off of commands from the application to the runner thread
//!
//! The application publishes at most one command at a time into a shared
//! slot and receives a [`PendingResponse`]. The runner thread takes the
//! command, performs the exchange, and completes the placeholder. Closing the
//! slot fails any outstanding placeholder exactly once.

use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use bytes::Bytes;
use cardlink_apdu_core::{AsyncCardTransport, CardTransport, Command, Error as ApduError};
use futures::channel::oneshot;
use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::error::SessionError;

type Reply = oneshot::Sender<Result<Bytes, SessionError>>;

enum Slot {
    Closed,
    Idle,
    Requested { command: Bytes, reply: Reply },
    InFlight { reply: Reply },
}

impl Slot {
    const fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Idle => "idle",
            Self::Requested { .. } => "requested",
            Self::InFlight { .. } => "in-flight",
        }
    }
}

/// What the runner got while waiting for a command
#[derive(Debug)]
pub(crate) enum Next {
    /// A command to exchange; the slot is now in flight
    Command(Bytes),
    /// The slot was closed
    Closed,
    /// Nothing was published before the timeout
    TimedOut,
}

/// Single-slot rendezvous between one application and one runner
pub(crate) struct Rendezvous {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl Rendezvous {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot::Idle),
            cond: Condvar::new(),
        })
    }

    /// Publish a command for the runner
    pub(crate) fn publish(&self, command: Bytes) -> Result<PendingResponse, SessionError> {
        let mut slot = self.slot.lock();
        match *slot {
            Slot::Closed => Err(SessionError::Configuration(
                "no session is accepting commands",
            )),
            Slot::Requested { .. } | Slot::InFlight { .. } => Err(SessionError::Configuration(
                "an exchange is already pending",
            )),
            Slot::Idle => {
                let (reply, response) = oneshot::channel();
                trace!(command = %hex::encode(&command), "Publishing command");
                *slot = Slot::Requested { command, reply };
                self.cond.notify_all();
                Ok(PendingResponse { response })
            }
        }
    }

    /// Wait up to `timeout` for a published command
    pub(crate) fn next_command(&self, timeout: Duration) -> Next {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            match mem::replace(&mut *slot, Slot::Idle) {
                Slot::Requested { command, reply } => {
                    *slot = Slot::InFlight { reply };
                    return Next::Command(command);
                }
                Slot::Closed => {
                    *slot = Slot::Closed;
                    return Next::Closed;
                }
                other => *slot = other,
            }

            let timed_out = self.cond.wait_until(&mut slot, deadline).timed_out();
            if timed_out && matches!(*slot, Slot::Idle | Slot::InFlight { .. }) {
                return Next::TimedOut;
            }
        }
    }

    /// Return the slot to idle and resolve the in-flight placeholder
    ///
    /// Does nothing if the slot was closed meanwhile, since closing already
    /// resolved the placeholder.
    pub(crate) fn complete(&self, result: Result<Bytes, SessionError>) {
        let reply = {
            let mut slot = self.slot.lock();
            match mem::replace(&mut *slot, Slot::Idle) {
                Slot::InFlight { reply } => reply,
                other => {
                    *slot = other;
                    return;
                }
            }
        };
        let _ = reply.send(result);
    }

    /// Close the slot, failing any outstanding placeholder with `reason`
    ///
    /// Returns `false` if the slot was already closed.
    pub(crate) fn close(&self, reason: SessionError) -> bool {
        let previous = {
            let mut slot = self.slot.lock();
            let previous = mem::replace(&mut *slot, Slot::Closed);
            self.cond.notify_all();
            previous
        };

        match previous {
            Slot::Closed => false,
            Slot::Idle => true,
            Slot::Requested { reply, .. } | Slot::InFlight { reply } => {
                trace!(%reason, "Failing outstanding exchange");
                let _ = reply.send(Err(reason));
                true
            }
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        matches!(*self.slot.lock(), Slot::Closed)
    }
}

impl fmt::Debug for Rendezvous {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rendezvous")
            .field("slot", &self.slot.lock().name())
            .finish()
    }
}

/// Placeholder for the response to a published command
///
/// Await it from async code or call [`PendingResponse::wait`] from a
/// blocking thread.
#[derive(Debug)]
#[must_use = "the response is lost if the placeholder is dropped"]
pub struct PendingResponse {
    response: oneshot::Receiver<Result<Bytes, SessionError>>,
}

impl PendingResponse {
    /// Block the calling thread until the exchange has been resolved
    pub fn wait(self) -> Result<Bytes, SessionError> {
        futures::executor::block_on(self)
    }
}

impl Future for PendingResponse {
    type Output = Result<Bytes, SessionError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.response)
            .poll(cx)
            .map(|resolved| resolved.unwrap_or(Err(SessionError::Cancelled)))
    }
}

/// Application-side handle to an active card session
///
/// Handed to [`CardApplication::on_card_present`](crate::CardApplication::on_card_present).
/// Clones share the same session; only one exchange may be outstanding at a
/// time across all of them.
#[derive(Debug, Clone)]
pub struct CardHandle {
    rendezvous: Arc<Rendezvous>,
}

impl CardHandle {
    pub(crate) const fn new(rendezvous: Arc<Rendezvous>) -> Self {
        Self { rendezvous }
    }

    /// Submit raw command bytes to the card
    ///
    /// Fails synchronously with [`SessionError::Configuration`] when no
    /// session is active or an exchange is already pending.
    pub fn transmit(&self, command: impl Into<Bytes>) -> Result<PendingResponse, SessionError> {
        self.rendezvous.publish(command.into())
    }

    /// Submit a structured command to the card
    pub fn transmit_command(&self, command: &Command) -> Result<PendingResponse, SessionError> {
        self.transmit(command.to_bytes())
    }

    /// Whether the session still accepts commands
    pub fn is_active(&self) -> bool {
        !self.rendezvous.is_closed()
    }
}

impl CardTransport for CardHandle {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, ApduError> {
        Ok(self.transmit(Bytes::copy_from_slice(command))?.wait()?)
    }
}

impl AsyncCardTransport for CardHandle {
    fn submit(&mut self, command: Bytes) -> impl Future<Output = Result<Bytes, ApduError>> + Send {
        let pending = self.transmit(command);
        async move {
            let response = pending?.await?;
            Ok::<_, ApduError>(response)
        }
    }
}
