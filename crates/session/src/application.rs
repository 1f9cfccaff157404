//! Application callbacks and their delivery
//!
//! Callbacks never run on the runner thread. Every runner owns one
//! dispatcher thread that drains an ordered event queue, so an application
//! observes events in the order the runner produced them and a slow
//! callback never stalls card polling.

use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, trace};

use crate::card::CardData;
use crate::config::{AppParameters, StartRequest};
use crate::error::SessionError;
use crate::exchange::CardHandle;

/// Callbacks through which a runner drives an application
///
/// At most one of [`on_card_removed`](Self::on_card_removed) and
/// [`on_error`](Self::on_error) is delivered per session.
pub trait CardApplication: Send + Sync + 'static {
    /// Called once when the runner starts
    ///
    /// The request must be resolved, here or later from any thread, before
    /// the runner starts waiting for cards. The default accepts
    /// [`AppParameters::default`].
    fn on_start(&self, request: StartRequest) {
        request.resolve(AppParameters::default());
    }

    /// A card was connected and accepts commands through `card`
    fn on_card_present(&self, card: CardHandle, data: CardData);

    /// The card of the current session left the reader
    fn on_card_removed(&self) {}

    /// The current session, or the runner itself, failed
    fn on_error(&self, error: SessionError);
}

/// Event queued for delivery to the application
pub(crate) enum AppEvent {
    Start(StartRequest),
    CardPresent(CardHandle, CardData),
    CardRemoved,
    Error(SessionError),
}

impl fmt::Debug for AppEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start(_) => f.write_str("Start"),
            Self::CardPresent(_, data) => write!(f, "CardPresent({data})"),
            Self::CardRemoved => f.write_str("CardRemoved"),
            Self::Error(e) => write!(f, "Error({e})"),
        }
    }
}

/// Sending half of a runner's event queue
#[derive(Debug, Clone)]
pub(crate) struct Dispatcher {
    sender: Sender<AppEvent>,
}

impl Dispatcher {
    /// Start the delivery thread for `app`
    ///
    /// The thread exits once every clone of the dispatcher is dropped and the
    /// queue has been drained.
    pub(crate) fn spawn(app: Arc<dyn CardApplication>, name: &str) -> io::Result<Self> {
        let (sender, receiver) = unbounded();
        thread::Builder::new()
            .name(format!("{name}-events"))
            .spawn(move || deliver(app.as_ref(), receiver))?;
        Ok(Self { sender })
    }

    pub(crate) fn dispatch(&self, event: AppEvent) {
        trace!(?event, "Queueing application event");
        if let Err(e) = self.sender.send(event) {
            debug!(event = ?e.into_inner(), "Application event queue is closed");
        }
    }
}

fn deliver(app: &dyn CardApplication, events: Receiver<AppEvent>) {
    for event in events {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match event {
            AppEvent::Start(request) => app.on_start(request),
            AppEvent::CardPresent(card, data) => app.on_card_present(card, data),
            AppEvent::CardRemoved => app.on_card_removed(),
            AppEvent::Error(e) => app.on_error(e),
        }));
        if outcome.is_err() {
            error!("Application callback panicked");
        }
    }
    trace!("Application event queue drained");
}
