//! Cancellable work on a dedicated thread
//!
//! A [`CancellableTask`] owns one worker thread. Cancellation raises the
//! task's [`Interrupt`], which wakes the worker from any interruptible wait,
//! and [`CancellableTask::get`] only returns once the worker has actually
//! unwound. Callers can therefore rely on the worker having released
//! whatever it held by the time they observe the cancellation.

use std::any::Any;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const COMPLETED: u8 = 2;

/// Boxed cause of a failed task
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a task did not produce a value
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The task was cancelled, or its worker gave up after an interrupt
    #[error("Task was cancelled")]
    Cancelled,

    /// The worker failed
    #[error("Task failed: {0}")]
    Failed(#[source] BoxError),

    /// A caller passed an argument the task does not accept
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl TaskError {
    /// Wrap any error as a task failure
    pub fn failed<E: Into<BoxError>>(error: E) -> Self {
        Self::Failed(error.into())
    }

    /// Whether the task ended through cancellation
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Default)]
struct Flag {
    raised: Mutex<bool>,
    cond: Condvar,
}

/// Interrupt token observed by a worker
///
/// Cheap to clone; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<Flag>,
}

impl Interrupt {
    /// Create a token that has not been raised
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the interrupt and wake every interruptible wait
    pub fn raise(&self) {
        let mut raised = self.flag.raised.lock();
        *raised = true;
        self.flag.cond.notify_all();
    }

    /// Whether the interrupt has been raised
    pub fn is_interrupted(&self) -> bool {
        *self.flag.raised.lock()
    }

    /// Fail with [`TaskError::Cancelled`] once the interrupt has been raised
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_interrupted() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration` unless interrupted first
    pub fn sleep(&self, duration: Duration) -> Result<(), TaskError> {
        let deadline = Instant::now() + duration;
        let mut raised = self.flag.raised.lock();
        while !*raised {
            if self.flag.cond.wait_until(&mut raised, deadline).timed_out() {
                break;
            }
        }
        if *raised {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Marks the task finished when the worker exits, including by panic
struct Finish {
    state: Arc<AtomicU8>,
    _done: Sender<()>,
}

impl Drop for Finish {
    fn drop(&mut self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, COMPLETED, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// A unit of work running on its own thread that can be cancelled
pub struct CancellableTask<T> {
    name: String,
    state: Arc<AtomicU8>,
    interrupt: Interrupt,
    done: Receiver<()>,
    handle: JoinHandle<Result<T, TaskError>>,
}

impl<T: Send + 'static> CancellableTask<T> {
    /// Start `work` on a new named thread
    ///
    /// The worker receives the task's [`Interrupt`] and is expected to
    /// return [`TaskError::Cancelled`] once it observes it.
    pub fn spawn<F>(name: impl Into<String>, work: F) -> io::Result<Self>
    where
        F: FnOnce(Interrupt) -> Result<T, TaskError> + Send + 'static,
    {
        let name = name.into();
        let state = Arc::new(AtomicU8::new(RUNNING));
        let interrupt = Interrupt::new();
        let (done_tx, done) = crossbeam_channel::bounded(0);

        let finish = Finish {
            state: Arc::clone(&state),
            _done: done_tx,
        };
        let worker_interrupt = interrupt.clone();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let _finish = finish;
            work(worker_interrupt)
        })?;

        trace!(task = %name, "Spawned task");
        Ok(Self {
            name,
            state,
            interrupt,
            done,
            handle,
        })
    }
}

impl<T> CancellableTask<T> {
    /// Request cancellation
    ///
    /// Cancellation always interrupts the worker, so `may_interrupt` must be
    /// `true`. Returns `Ok(true)` only for the call that moved the task into
    /// the cancelled state; later calls and calls after completion return
    /// `Ok(false)`.
    pub fn cancel(&self, may_interrupt: bool) -> Result<bool, TaskError> {
        if !may_interrupt {
            return Err(TaskError::InvalidArgument(
                "cancellation requires permission to interrupt the worker",
            ));
        }

        let cancelled = self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if cancelled {
            debug!(task = %self.name, "Cancelling task");
            self.interrupt.raise();
        }
        Ok(cancelled)
    }

    /// Whether the task was cancelled before it completed
    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Whether the worker thread has exited
    pub fn is_done(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait up to `timeout` for the worker to exit
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(self.done.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// The worker thread's name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the worker has exited and return its outcome
    pub fn get(self) -> Result<T, TaskError> {
        let joined = self.handle.join();
        let cancelled = self.state.load(Ordering::Acquire) == CANCELLED;

        match joined {
            _ if cancelled => Err(TaskError::Cancelled),
            Ok(result) => result,
            Err(payload) => Err(TaskError::failed(panic_message(payload.as_ref()))),
        }
    }
}

impl<T> fmt::Debug for CancellableTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableTask")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .field("done", &self.is_done())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("worker panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {message}")
    } else {
        "worker panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;

    #[test]
    fn test_returns_worker_value() {
        let task = CancellableTask::spawn("value", |_| Ok(42)).unwrap();
        assert_eq!(task.name(), "value");
        assert_eq!(task.get().unwrap(), 42);
    }

    #[test]
    fn test_get_waits_for_unwinding() {
        let unwound = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&unwound);

        let task = CancellableTask::spawn("unwind", move |interrupt| {
            while interrupt.sleep(Duration::from_millis(5)).is_ok() {}
            // Release held resources slowly
            thread::sleep(Duration::from_millis(100));
            flag.store(true, Ordering::SeqCst);
            interrupt.check().map(|_| ())
        })
        .unwrap();

        assert!(task.cancel(true).unwrap());
        assert!(!task.cancel(true).unwrap());
        assert!(task.is_cancelled());

        let err = task.get().unwrap_err();
        assert!(err.is_cancelled());
        assert!(unwound.load(Ordering::SeqCst));
    }

    #[test]
    fn test_racing_cancels_have_one_winner() {
        for _ in 0..20 {
            let task = CancellableTask::spawn("race", |interrupt| {
                interrupt.sleep(Duration::from_secs(10))
            })
            .unwrap();
            let start = std::sync::Barrier::new(4);

            let wins = thread::scope(|scope| {
                let racers: Vec<_> = (0..4)
                    .map(|_| {
                        scope.spawn(|| {
                            start.wait();
                            task.cancel(true).unwrap()
                        })
                    })
                    .collect();
                racers
                    .into_iter()
                    .map(|racer| racer.join().unwrap())
                    .filter(|won| *won)
                    .count()
            });
            assert_eq!(wins, 1);
            assert!(task.get().unwrap_err().is_cancelled());
        }
    }

    #[test]
    fn test_cancel_requires_interrupt() {
        let task = CancellableTask::spawn("no-interrupt", |interrupt| {
            interrupt.sleep(Duration::from_secs(10))
        })
        .unwrap();

        assert!(matches!(
            task.cancel(false),
            Err(TaskError::InvalidArgument(_))
        ));
        assert!(!task.is_cancelled());

        assert!(task.cancel(true).unwrap());
        assert!(task.get().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_cancel_after_completion() {
        let task = CancellableTask::spawn("finished", |_| Ok("done")).unwrap();
        assert!(task.wait_timeout(Duration::from_secs(5)));

        assert!(!task.cancel(true).unwrap());
        assert_eq!(task.get().unwrap(), "done");
    }

    #[test]
    fn test_worker_cancellation_without_request() {
        let task = CancellableTask::spawn("gave-up", |_| Err::<(), _>(TaskError::Cancelled)).unwrap();
        assert!(task.get().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_failure_keeps_cause() {
        let task = CancellableTask::spawn("failing", |_| {
            Err::<(), _>(TaskError::failed(io::Error::new(
                io::ErrorKind::NotFound,
                "reader missing",
            )))
        })
        .unwrap();

        match task.get() {
            Err(TaskError::Failed(cause)) => {
                let io = cause.downcast_ref::<io::Error>().unwrap();
                assert_eq!(io.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_panic_becomes_failure() {
        let task = CancellableTask::spawn("panicking", |_| -> Result<(), TaskError> {
            panic!("boom")
        })
        .unwrap();

        match task.get() {
            Err(TaskError::Failed(cause)) => assert!(cause.to_string().contains("boom")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_wait_timeout_while_running() {
        let task = CancellableTask::spawn("slow", |interrupt| {
            interrupt.sleep(Duration::from_secs(10))
        })
        .unwrap();

        assert!(!task.wait_timeout(Duration::from_millis(20)));
        task.cancel(true).unwrap();
        assert!(task.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_interrupt_sleep() {
        let interrupt = Interrupt::new();
        assert!(interrupt.sleep(Duration::from_millis(1)).is_ok());

        let raiser = interrupt.clone();
        let start = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise();
        });

        assert!(interrupt.sleep(Duration::from_secs(10)).is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(interrupt.check().is_err());
        handle.join().unwrap();
    }
}
