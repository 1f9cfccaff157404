//! The session runner
//!
//! A runner owns one terminal and serves one application. It waits for a
//! card, connects, hands the application a [`CardHandle`](crate::CardHandle),
//! performs the exchanges the application publishes, and reports the end of
//! the session. Depending on the start parameters it then serves the next
//! card or terminates.
//!
//! ```text
//! Starting ─▶ [WaitAbsent] ─▶ WaitPresent ─▶ Connecting ─▶ Active ─┬─▶ Removed ──▶ (next session)
//!                                                                  ├─▶ Fault
//!                                                                  └─▶ IdleTimeout
//!                                                          all exits ─▶ Terminated
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cardlink_apdu_core::CardTransport;
use cardlink_apdu_core::processor::{GetResponseProcessor, WrongLengthProcessor};
use cardlink_apdu_core::response;
use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::application::{AppEvent, CardApplication, Dispatcher};
use crate::config::{AppParameters, RunnerConfig, StartRequest};
use crate::error::SessionError;
use crate::exchange::Next;
use crate::session::{Outcome, Session};
use crate::task::{CancellableTask, Interrupt, TaskError};
use crate::terminal::{Connection, Terminal};
use crate::watch;

/// Where a runner currently is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum RunnerState {
    /// Waiting for the application to resolve its start request
    Starting,
    /// Waiting for the reader to be empty
    WaitAbsent,
    /// Waiting for a card
    WaitPresent,
    /// Connecting to the card
    Connecting,
    /// Serving a session
    Active,
    /// The card of the last session was removed
    Removed,
    /// A session or the runner failed
    Fault,
    /// The application did not submit a command in time
    IdleTimeout,
    /// The runner has stopped for good
    Terminated,
}

/// How a runner finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerExit {
    /// The card of the last session was removed
    Removed {
        /// Number of sessions served
        sessions: usize,
    },
    /// A session or the runner itself failed
    Fault(SessionError),
    /// The runner was stopped
    Cancelled,
}

#[derive(Debug)]
struct StateCell {
    state: Mutex<RunnerState>,
    changed: Condvar,
}

impl StateCell {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RunnerState::Starting),
            changed: Condvar::new(),
        })
    }

    fn get(&self) -> RunnerState {
        *self.state.lock()
    }

    fn set(&self, next: RunnerState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = %*state, to = %next, "Runner state changed");
            *state = next;
            self.changed.notify_all();
        }
    }

    fn wait_for(&self, wanted: RunnerState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while *state != wanted {
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                return *state == wanted;
            }
        }
        true
    }
}

/// Serves an application from one terminal
pub struct SessionRunner<T: Terminal> {
    terminal: Arc<T>,
    app: Arc<dyn CardApplication>,
    config: RunnerConfig,
}

impl<T: Terminal> fmt::Debug for SessionRunner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRunner")
            .field("terminal", &self.terminal)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<T: Terminal> SessionRunner<T> {
    /// Create a runner; nothing happens until [`SessionRunner::spawn`]
    pub fn new(terminal: Arc<T>, app: Arc<dyn CardApplication>, config: RunnerConfig) -> Self {
        Self {
            terminal,
            app,
            config,
        }
    }

    /// Start the runner and its event delivery on their own threads
    pub fn spawn(self) -> io::Result<RunnerHandle> {
        let state = StateCell::new();
        let dispatcher = Dispatcher::spawn(self.app, "cardlink-runner")?;
        let worker = Worker {
            terminal: self.terminal,
            config: self.config,
            dispatcher,
            state: Arc::clone(&state),
        };

        let task = CancellableTask::spawn("cardlink-runner", move |interrupt| worker.run(&interrupt))?;
        Ok(RunnerHandle { task, state })
    }
}

/// Control handle of a spawned runner
#[derive(Debug)]
pub struct RunnerHandle {
    task: CancellableTask<RunnerExit>,
    state: Arc<StateCell>,
}

impl RunnerHandle {
    /// Current lifecycle state
    pub fn state(&self) -> RunnerState {
        self.state.get()
    }

    /// Wait up to `timeout` for the runner to reach `state`
    pub fn wait_for_state(&self, state: RunnerState, timeout: Duration) -> bool {
        self.state.wait_for(state, timeout)
    }

    /// Whether the runner thread has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_done()
    }

    /// Wait up to `timeout` for the runner thread to exit
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.task.wait_timeout(timeout)
    }

    /// Cancel the runner and wait until it has shut down
    ///
    /// Returns the runner's own exit if it had already finished.
    pub fn stop(self) -> Result<RunnerExit, TaskError> {
        self.task.cancel(true)?;
        self.join()
    }

    /// Wait for the runner to finish on its own
    pub fn join(self) -> Result<RunnerExit, TaskError> {
        match self.task.get() {
            Err(TaskError::Cancelled) => Ok(RunnerExit::Cancelled),
            other => other,
        }
    }
}

/// Why the runner loop stopped outside of a session
enum Stop {
    Cancelled,
    Fault(SessionError),
}

struct Worker<T: Terminal> {
    terminal: Arc<T>,
    config: RunnerConfig,
    dispatcher: Dispatcher,
    state: Arc<StateCell>,
}

impl<T: Terminal> Worker<T> {
    fn run(self, interrupt: &Interrupt) -> Result<RunnerExit, TaskError> {
        let exit = match self.drive(interrupt) {
            Ok(exit) => Ok(exit),
            Err(Stop::Cancelled) => {
                info!(reader = %self.terminal.name(), "Runner cancelled");
                Err(TaskError::Cancelled)
            }
            Err(Stop::Fault(e)) => {
                error!(reader = %self.terminal.name(), error = %e, "Runner failed");
                self.state.set(RunnerState::Fault);
                self.dispatcher.dispatch(AppEvent::Error(e.clone()));
                Ok(RunnerExit::Fault(e))
            }
        };

        self.state.set(RunnerState::Terminated);
        info!(reader = %self.terminal.name(), "Runner terminated");
        exit
    }

    fn drive(&self, interrupt: &Interrupt) -> Result<RunnerExit, Stop> {
        self.state.set(RunnerState::Starting);
        let parameters = self.negotiate(interrupt)?;
        info!(
            reader = %self.terminal.name(),
            multi_session = parameters.multi_session,
            touch_required = parameters.touch_required,
            protocol = %parameters.protocol,
            "Runner started"
        );

        let mut sessions = 0;
        loop {
            if parameters.touch_required {
                self.state.set(RunnerState::WaitAbsent);
                self.wait_for(false, interrupt)?;
            }
            self.state.set(RunnerState::WaitPresent);
            self.wait_for(true, interrupt)?;

            self.state.set(RunnerState::Connecting);
            let connection = match self.terminal.connect(parameters.protocol) {
                Ok(connection) => connection,
                Err(e) if e.is_card_removed() => {
                    debug!("Card left before the connection was established");
                    interrupt
                        .sleep(self.config.poll_interval)
                        .map_err(|_| Stop::Cancelled)?;
                    continue;
                }
                Err(e) => return Err(Stop::Fault(e.into())),
            };

            sessions += 1;
            match self.serve(connection, interrupt) {
                Outcome::Removed => {
                    self.state.set(RunnerState::Removed);
                    if !parameters.multi_session {
                        return Ok(RunnerExit::Removed { sessions });
                    }
                }
                Outcome::IdleTimeout(limit) => {
                    self.state.set(RunnerState::IdleTimeout);
                    return Ok(RunnerExit::Fault(SessionError::IdleTimeout(limit)));
                }
                Outcome::Fault(e) => {
                    self.state.set(RunnerState::Fault);
                    return Ok(RunnerExit::Fault(e));
                }
                Outcome::Cancelled => return Err(Stop::Cancelled),
            }
        }
    }

    /// Dispatch the start request and wait for its resolution
    fn negotiate(&self, interrupt: &Interrupt) -> Result<AppParameters, Stop> {
        let (request, resolution) = StartRequest::new(self.terminal.name());
        self.dispatcher.dispatch(AppEvent::Start(request));

        loop {
            if interrupt.is_interrupted() {
                return Err(Stop::Cancelled);
            }
            match resolution.recv_timeout(self.config.poll_interval) {
                Ok(parameters) => return Ok(parameters),
                Err(RecvTimeoutError::Timeout) => trace!("Waiting for start resolution"),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Stop::Fault(SessionError::StartAborted));
                }
            }
        }
    }

    /// Poll the terminal until card presence equals `present`
    fn wait_for(&self, present: bool, interrupt: &Interrupt) -> Result<(), Stop> {
        loop {
            if interrupt.is_interrupted() {
                return Err(Stop::Cancelled);
            }
            let reached = if present {
                self.terminal.wait_for_card_present(self.config.poll_interval)
            } else {
                self.terminal.wait_for_card_absent(self.config.poll_interval)
            };
            match reached {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => return Err(Stop::Fault(SessionError::Transport(e))),
            }
        }
    }

    /// Stack the configured continuation wrappers over a raw transport
    fn install_wrappers(&self, raw: T::Transport) -> Box<dyn CardTransport> {
        let mut transport: Box<dyn CardTransport> = Box::new(raw);
        if self.config.wrong_length_retry {
            transport = Box::new(WrongLengthProcessor::new(transport));
        }
        if self.config.get_response {
            transport = Box::new(GetResponseProcessor::with_limit(
                transport,
                self.config.chain_limit,
            ));
        }
        transport
    }

    /// Run one session from connection to its conclusion
    fn serve(&self, connection: Connection<T::Transport>, interrupt: &Interrupt) -> Outcome {
        let Connection { transport, card } = connection;
        info!(%card, "Card session started");

        let mut transport = self.install_wrappers(transport);
        let session = Session::new(card, self.dispatcher.clone());
        self.state.set(RunnerState::Active);
        session.announce();

        let watch = match watch::spawn(
            Arc::clone(&self.terminal),
            Arc::clone(&session),
            self.config.watch_interval,
        ) {
            Ok(watch) => watch,
            Err(e) => {
                let error = cardlink_apdu_core::Error::message(format!(
                    "failed to start removal watch: {e}"
                ));
                return session.conclude(Outcome::Fault(SessionError::Transport(error)));
            }
        };

        let outcome = self.exchange(&session, transport.as_mut(), interrupt);

        // The watch must be gone before the next session polls the terminal
        let _ = watch.cancel(true);
        let _ = watch.get();

        info!(?outcome, "Card session ended");
        outcome
    }

    /// Perform published exchanges until the session concludes
    fn exchange(
        &self,
        session: &Session,
        transport: &mut dyn CardTransport,
        interrupt: &Interrupt,
    ) -> Outcome {
        let mut idle_since = Instant::now();

        loop {
            if interrupt.is_interrupted() {
                return session.conclude(Outcome::Cancelled);
            }

            let slice = match self.config.idle_timeout {
                Some(limit) => {
                    let idle = idle_since.elapsed();
                    if idle >= limit {
                        warn!(?limit, "No command submitted in time");
                        return session.conclude(Outcome::IdleTimeout(limit));
                    }
                    (limit - idle).min(self.config.poll_interval)
                }
                None => self.config.poll_interval,
            };

            match session.rendezvous().next_command(slice) {
                Next::TimedOut => {}
                Next::Closed => return session.outcome().unwrap_or(Outcome::Cancelled),
                Next::Command(command) => {
                    let result = transport
                        .transmit_raw(&command)
                        .and_then(|raw| {
                            response::split(&raw)?;
                            Ok(raw)
                        })
                        .map_err(SessionError::from);
                    idle_since = Instant::now();

                    match result {
                        Ok(response) => session.rendezvous().complete(Ok(response)),
                        Err(SessionError::TagRemoved) => {
                            info!("Card removed during exchange");
                            return session.conclude(Outcome::Removed);
                        }
                        Err(e) => {
                            warn!(error = %e, "Exchange failed");
                            return session.conclude(Outcome::Fault(e));
                        }
                    }
                }
            }
        }
    }
}
