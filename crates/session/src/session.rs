//! Per-session bookkeeping shared by the runner and the removal watch

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::application::{AppEvent, Dispatcher};
use crate::card::CardData;
use crate::error::SessionError;
use crate::exchange::{CardHandle, Rendezvous};

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outcome {
    Removed,
    Fault(SessionError),
    IdleTimeout(Duration),
    Cancelled,
}

impl Outcome {
    /// Error handed to an exchange still outstanding when the session ends
    fn reason(&self) -> SessionError {
        match self {
            Self::Removed => SessionError::TagRemoved,
            Self::Fault(e) => e.clone(),
            Self::IdleTimeout(limit) => SessionError::IdleTimeout(*limit),
            Self::Cancelled => SessionError::Cancelled,
        }
    }

    fn event(&self) -> AppEvent {
        match self {
            Self::Removed => AppEvent::CardRemoved,
            other => AppEvent::Error(other.reason()),
        }
    }
}

/// One card session
///
/// The first call to [`Session::conclude`] wins: it closes the rendezvous
/// and queues exactly one of the removed or error notifications. Later
/// calls only report the recorded outcome.
#[derive(Debug)]
pub(crate) struct Session {
    card: CardData,
    rendezvous: Arc<Rendezvous>,
    dispatcher: Dispatcher,
    outcome: Mutex<Option<Outcome>>,
}

impl Session {
    pub(crate) fn new(card: CardData, dispatcher: Dispatcher) -> Arc<Self> {
        Arc::new(Self {
            card,
            rendezvous: Rendezvous::new(),
            dispatcher,
            outcome: Mutex::new(None),
        })
    }

    pub(crate) fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    /// Hand the session to the application
    pub(crate) fn announce(&self) {
        self.dispatcher.dispatch(AppEvent::CardPresent(
            CardHandle::new(Arc::clone(&self.rendezvous)),
            self.card.clone(),
        ));
    }

    /// End the session unless it already ended, returning the recorded outcome
    pub(crate) fn conclude(&self, outcome: Outcome) -> Outcome {
        let mut recorded = self.outcome.lock();
        if let Some(existing) = recorded.as_ref() {
            return existing.clone();
        }

        debug!(?outcome, reader = %self.card.reader(), "Concluding session");
        self.rendezvous.close(outcome.reason());
        self.dispatcher.dispatch(outcome.event());
        *recorded = Some(outcome.clone());
        outcome
    }

    pub(crate) fn outcome(&self) -> Option<Outcome> {
        self.outcome.lock().clone()
    }

    pub(crate) fn is_concluded(&self) -> bool {
        self.outcome.lock().is_some()
    }
}
