//! Background detection of card removal during a session

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, trace, warn};

use crate::error::SessionError;
use crate::session::{Outcome, Session};
use crate::task::CancellableTask;
use crate::terminal::Terminal;

/// Poll `terminal` until its card leaves, then conclude `session` as removed
///
/// The watch also stops once the session has been concluded by someone
/// else, or when the task is cancelled.
pub(crate) fn spawn<T: Terminal>(
    terminal: Arc<T>,
    session: Arc<Session>,
    interval: Duration,
) -> io::Result<CancellableTask<()>> {
    CancellableTask::spawn("cardlink-watch", move |interrupt| {
        while !session.is_concluded() {
            interrupt.check()?;

            match terminal.wait_for_card_absent(interval) {
                Ok(false) => trace!(reader = %terminal.name(), "Card still present"),
                Ok(true) => {
                    info!(reader = %terminal.name(), "Card removed");
                    session.conclude(Outcome::Removed);
                }
                Err(e) if e.is_card_removed() => {
                    info!(reader = %terminal.name(), "Card removed");
                    session.conclude(Outcome::Removed);
                }
                Err(e) => {
                    warn!(reader = %terminal.name(), error = %e, "Removal watch failed");
                    session.conclude(Outcome::Fault(SessionError::Transport(e)));
                }
            }
        }
        Ok(())
    })
}
