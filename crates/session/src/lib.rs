//! Asynchronous card sessions over blocking, poll-based readers
//!
//! A [`SessionRunner`] turns a [`Terminal`] (a reader that can only be
//! polled and exchanged with synchronously) into a stream of card sessions
//! delivered to a [`CardApplication`]. The application talks to the card
//! through a [`CardHandle`] from any thread; each command is executed on the
//! runner thread and resolved through a [`PendingResponse`].
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cardlink_session::prelude::*;
//!
//! struct Logger;
//!
//! impl CardApplication for Logger {
//!     fn on_start(&self, request: StartRequest) {
//!         request.resolve(AppParameters::default().with_multi_session(true));
//!     }
//!
//!     fn on_card_present(&self, card: CardHandle, data: CardData) {
//!         std::thread::spawn(move || {
//!             let response = card.transmit(vec![0x00, 0xA4, 0x04, 0x00])?.wait()?;
//!             println!("{data}: {}", hex::encode(response));
//!             Ok::<_, SessionError>(())
//!         });
//!     }
//!
//!     fn on_error(&self, error: SessionError) {
//!         eprintln!("session failed: {error}");
//!     }
//! }
//!
//! # fn run<T: Terminal>(terminal: Arc<T>) -> std::io::Result<()> {
//! let runner = SessionRunner::new(terminal, Arc::new(Logger), RunnerConfig::default()).spawn()?;
//! println!("runner finished: {:?}", runner.join());
//! # Ok(())
//! # }
//! ```
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod application;
pub mod card;
pub mod config;
pub mod error;
pub mod exchange;
pub mod runner;
mod session;
pub mod task;
pub mod terminal;
mod watch;

pub use application::CardApplication;
pub use card::{CardData, Protocol};
pub use config::{AppParameters, RunnerConfig, StartRequest};
pub use error::{Result, SessionError};
pub use exchange::{CardHandle, PendingResponse};
pub use runner::{RunnerExit, RunnerHandle, RunnerState, SessionRunner};
pub use task::{CancellableTask, Interrupt, TaskError};
pub use terminal::{Connection, Terminal};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        AppParameters, CardApplication, CardData, CardHandle, Connection, PendingResponse,
        Protocol, RunnerConfig, RunnerExit, RunnerHandle, RunnerState, SessionError,
        SessionRunner, StartRequest, Terminal,
    };
}
