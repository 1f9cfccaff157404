//! Shared fixtures: a scripted terminal and a recording application
#![allow(dead_code, unreachable_pub)]

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cardlink_apdu_core::{CardTransport, Error, TransportError};
use cardlink_session::prelude::*;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// ATR reported by inserted cards
pub const ATR: [u8; 4] = [0x3B, 0x8F, 0x80, 0x01];

/// Install a test subscriber honouring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Runner configuration with short polling slices and no idle timeout
pub fn fast_config() -> RunnerConfig {
    RunnerConfig::default()
        .with_poll_interval(Duration::from_millis(20))
        .with_watch_interval(Duration::from_millis(20))
        .with_idle_timeout(None)
}

/// Poll `condition` until it holds or [`WAIT`] elapses
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

type Responder = Arc<dyn Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync>;

fn success(_command: &[u8]) -> Result<Vec<u8>, TransportError> {
    Ok(vec![0x90, 0x00])
}

struct Reader {
    /// Generation of the inserted card, `None` when empty
    card: Option<u64>,
    generation: u64,
    responder: Responder,
    connect_error: Option<TransportError>,
    refusal: Option<TransportError>,
    connects: usize,
    hold: bool,
    commands: Vec<Vec<u8>>,
}

impl Reader {
    const fn holds(&self, generation: u64) -> bool {
        matches!(self.card, Some(current) if current == generation)
    }
}

struct Shared {
    reader: Mutex<Reader>,
    changed: Condvar,
}

/// Terminal whose card is inserted and removed by the test
pub struct MockTerminal {
    name: String,
    shared: Arc<Shared>,
}

impl fmt::Debug for MockTerminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTerminal").field("name", &self.name).finish()
    }
}

impl MockTerminal {
    /// An empty reader whose cards answer every command with `90 00`
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            shared: Arc::new(Shared {
                reader: Mutex::new(Reader {
                    card: None,
                    generation: 0,
                    responder: Arc::new(success),
                    connect_error: None,
                    refusal: None,
                    connects: 0,
                    hold: false,
                    commands: Vec::new(),
                }),
                changed: Condvar::new(),
            }),
        })
    }

    fn update(&self, change: impl FnOnce(&mut Reader)) {
        let mut reader = self.shared.reader.lock();
        change(&mut reader);
        self.shared.changed.notify_all();
    }

    /// Put a fresh card into the reader
    pub fn insert(&self) {
        self.update(|reader| {
            reader.generation += 1;
            reader.card = Some(reader.generation);
        });
    }

    /// Take the card out of the reader
    pub fn remove(&self) {
        self.update(|reader| reader.card = None);
    }

    /// Answer commands with `responder`
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&[u8]) -> Result<Vec<u8>, TransportError> + Send + Sync + 'static,
    {
        self.update(|reader| reader.responder = Arc::new(responder));
    }

    /// Fail the next connection attempt
    pub fn fail_connect(&self, error: TransportError) {
        self.update(|reader| reader.connect_error = Some(error));
    }

    /// Fail every connection attempt until cleared
    pub fn refuse_connections(&self, refusal: Option<TransportError>) {
        self.update(|reader| reader.refusal = refusal);
    }

    /// Number of connection attempts so far
    pub fn connects(&self) -> usize {
        self.shared.reader.lock().connects
    }

    /// Block exchanges until released or until the card is removed
    pub fn hold_exchanges(&self, hold: bool) {
        self.update(|reader| reader.hold = hold);
    }

    /// Every command that reached the card
    pub fn commands(&self) -> Vec<Vec<u8>> {
        self.shared.reader.lock().commands.clone()
    }

    fn wait_for(&self, present: bool, timeout: Duration) -> bool {
        let mut reader = self.shared.reader.lock();
        let _ = self
            .shared
            .changed
            .wait_while_for(&mut reader, |r| r.card.is_some() != present, timeout);
        reader.card.is_some() == present
    }
}

impl Terminal for MockTerminal {
    type Transport = MockCard;

    fn name(&self) -> &str {
        &self.name
    }

    fn is_card_present(&self) -> Result<bool, Error> {
        Ok(self.shared.reader.lock().card.is_some())
    }

    fn wait_for_card_present(&self, timeout: Duration) -> Result<bool, Error> {
        Ok(self.wait_for(true, timeout))
    }

    fn wait_for_card_absent(&self, timeout: Duration) -> Result<bool, Error> {
        Ok(self.wait_for(false, timeout))
    }

    fn connect(&self, protocol: Protocol) -> Result<Connection<MockCard>, Error> {
        let mut reader = self.shared.reader.lock();
        reader.connects += 1;
        if let Some(error) = reader.connect_error.take() {
            return Err(error.into());
        }
        if let Some(error) = &reader.refusal {
            return Err(error.clone().into());
        }
        let generation = reader.card.ok_or(TransportError::CardRemoved)?;

        let negotiated = match protocol {
            Protocol::Any => Protocol::T1,
            other => other,
        };
        Ok(Connection::new(
            MockCard {
                shared: Arc::clone(&self.shared),
                generation,
            },
            CardData::new(self.name.clone(), Bytes::from_static(&ATR), negotiated),
        ))
    }
}

/// Connection to one inserted card of a [`MockTerminal`]
pub struct MockCard {
    shared: Arc<Shared>,
    generation: u64,
}

impl fmt::Debug for MockCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockCard")
            .field("generation", &self.generation)
            .finish()
    }
}

impl CardTransport for MockCard {
    fn do_transmit_raw(&mut self, command: &[u8]) -> Result<Bytes, Error> {
        let mut reader = self.shared.reader.lock();
        reader.commands.push(command.to_vec());
        let generation = self.generation;
        self.shared
            .changed
            .wait_while(&mut reader, |r| r.hold && r.holds(generation));

        if !reader.holds(generation) {
            return Err(TransportError::CardRemoved.into());
        }
        let responder = Arc::clone(&reader.responder);
        drop(reader);

        Ok(Bytes::from(responder(command)?))
    }
}

/// What the application observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Present(CardData),
    Removed,
    Error(SessionError),
}

enum StartMode {
    Resolve(AppParameters),
    Abandon,
    Defer(Sender<StartRequest>),
}

/// Application that records every callback
pub struct RecordingApp {
    start: StartMode,
    events: Sender<Event>,
    cards: Sender<CardHandle>,
}

/// Test-side view of a [`RecordingApp`]
pub struct Recorder {
    events: Receiver<Event>,
    cards: Receiver<CardHandle>,
    starts: Receiver<StartRequest>,
}

impl RecordingApp {
    fn build(start: impl FnOnce(Sender<StartRequest>) -> StartMode) -> (Arc<Self>, Recorder) {
        let (events_tx, events) = unbounded();
        let (cards_tx, cards) = unbounded();
        let (starts_tx, starts) = unbounded();
        let app = Arc::new(Self {
            start: start(starts_tx),
            events: events_tx,
            cards: cards_tx,
        });
        (
            app,
            Recorder {
                events,
                cards,
                starts,
            },
        )
    }

    /// Resolve the start request immediately with `parameters`
    pub fn new(parameters: AppParameters) -> (Arc<Self>, Recorder) {
        Self::build(|_| StartMode::Resolve(parameters))
    }

    /// Drop the start request without resolving it
    pub fn abandoning() -> (Arc<Self>, Recorder) {
        Self::build(|_| StartMode::Abandon)
    }

    /// Hand the start request to the test
    pub fn deferred() -> (Arc<Self>, Recorder) {
        Self::build(StartMode::Defer)
    }
}

impl CardApplication for RecordingApp {
    fn on_start(&self, request: StartRequest) {
        match &self.start {
            StartMode::Resolve(parameters) => request.resolve(*parameters),
            StartMode::Abandon => drop(request),
            StartMode::Defer(starts) => {
                let _ = starts.send(request);
            }
        }
    }

    fn on_card_present(&self, card: CardHandle, data: CardData) {
        let _ = self.cards.send(card);
        let _ = self.events.send(Event::Present(data));
    }

    fn on_card_removed(&self) {
        let _ = self.events.send(Event::Removed);
    }

    fn on_error(&self, error: SessionError) {
        let _ = self.events.send(Event::Error(error));
    }
}

impl Recorder {
    /// The next callback, failing the test after [`WAIT`]
    pub fn next_event(&self) -> Event {
        self.events
            .recv_timeout(WAIT)
            .expect("no application event arrived in time")
    }

    /// The handle of the next session
    pub fn next_card(&self) -> CardHandle {
        self.cards
            .recv_timeout(WAIT)
            .expect("no card session started in time")
    }

    /// The next deferred start request
    pub fn next_start(&self) -> StartRequest {
        self.starts
            .recv_timeout(WAIT)
            .expect("no start request arrived in time")
    }

    /// Assert that no callback arrives within `quiet`
    pub fn assert_quiet(&self, quiet: Duration) {
        if let Ok(event) = self.events.recv_timeout(quiet) {
            panic!("unexpected application event: {event:?}");
        }
    }

    /// Wait for a session to start and return its handle and data
    pub fn next_session(&self) -> (CardHandle, CardData) {
        let card = self.next_card();
        match self.next_event() {
            Event::Present(data) => (card, data),
            other => panic!("expected a card-present event, got {other:?}"),
        }
    }
}
