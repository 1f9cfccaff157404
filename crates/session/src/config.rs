//! Runner configuration and application start parameters

use std::time::Duration;

use cardlink_apdu_core::processor::DEFAULT_CHAIN_LIMIT;
use crossbeam_channel::{Receiver, Sender};

use crate::card::Protocol;

/// Tuning knobs of a [`SessionRunner`](crate::SessionRunner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Slice used while waiting for a card or for the start resolution
    pub poll_interval: Duration,
    /// Slice used by the removal watch
    pub watch_interval: Duration,
    /// How long an active session may wait for a command, `None` to wait forever
    pub idle_timeout: Option<Duration>,
    /// Maximum number of continuation statuses in one response chain
    pub chain_limit: usize,
    /// Install the `6C xx` retry wrapper
    pub wrong_length_retry: bool,
    /// Install the `61 xx` GET RESPONSE wrapper
    pub get_response: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            watch_interval: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(60)),
            chain_limit: DEFAULT_CHAIN_LIMIT,
            wrong_length_retry: true,
            get_response: true,
        }
    }
}

impl RunnerConfig {
    /// Set the presence polling slice
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the removal watch slice
    pub const fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }

    /// Set or disable the idle timeout
    pub const fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the continuation chain limit
    pub const fn with_chain_limit(mut self, limit: usize) -> Self {
        self.chain_limit = limit;
        self
    }

    /// Enable or disable the wrong length retry
    pub const fn with_wrong_length_retry(mut self, enabled: bool) -> Self {
        self.wrong_length_retry = enabled;
        self
    }

    /// Enable or disable GET RESPONSE chaining
    pub const fn with_get_response(mut self, enabled: bool) -> Self {
        self.get_response = enabled;
        self
    }
}

/// Parameters an application chooses when the runner starts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppParameters {
    /// Keep serving new cards after a removal
    pub multi_session: bool,
    /// Require the reader to be empty before each session's card is accepted
    pub touch_required: bool,
    /// Protocol requested when connecting
    pub protocol: Protocol,
}

impl AppParameters {
    /// Enable or disable multi-session mode
    pub const fn with_multi_session(mut self, multi_session: bool) -> Self {
        self.multi_session = multi_session;
        self
    }

    /// Enable or disable the touch requirement
    pub const fn with_touch_required(mut self, touch_required: bool) -> Self {
        self.touch_required = touch_required;
        self
    }

    /// Set the protocol requested when connecting
    pub const fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }
}

/// Single-use resolver handed to [`CardApplication::on_start`](crate::CardApplication::on_start)
///
/// It may be resolved synchronously inside the callback or later from any
/// thread. Dropping it unresolved aborts the runner.
#[derive(Debug)]
pub struct StartRequest {
    reader: String,
    resolver: Sender<AppParameters>,
}

impl StartRequest {
    pub(crate) fn new(reader: impl Into<String>) -> (Self, Receiver<AppParameters>) {
        let (resolver, resolution) = crossbeam_channel::bounded(1);
        let request = Self {
            reader: reader.into(),
            resolver,
        };
        (request, resolution)
    }

    /// Name of the reader the runner serves
    pub fn reader(&self) -> &str {
        &self.reader
    }

    /// Accept the start with the given parameters
    pub fn resolve(self, parameters: AppParameters) {
        // The runner may already be gone if it was stopped during start
        let _ = self.resolver.send(parameters);
    }
}
