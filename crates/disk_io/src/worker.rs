//! Owned worker threads with an observable lifecycle.
//!
//! A [`Worker`] runs one loop body on a named thread and must be joined
//! explicitly; nothing is detached. The loop body receives the worker's
//! [`ThreadState`] cell so it can observe a termination request.
//!
//! ```text
//! NotRunning ──spawn──▶ Running ──request_stop──▶ Terminating ──exit──▶ Terminated
//! ```

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::error::QueueError;
use crate::sync::StateCell;

/// Lifecycle of a worker thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ThreadState {
    /// Not started yet.
    NotRunning,
    /// Running its loop.
    Running,
    /// Asked to stop; finishing outstanding work.
    Terminating,
    /// Loop returned.
    Terminated,
}

/// A named thread running a loop body until it returns.
pub struct Worker {
    name: String,
    state: Arc<StateCell<ThreadState>>,
    handle: Option<JoinHandle<Result<(), QueueError>>>,
}

impl Worker {
    /// Starts `body` on a new thread called `name`.
    pub fn spawn<F>(name: &str, body: F) -> Result<Self, QueueError>
    where
        F: FnOnce(&StateCell<ThreadState>) -> Result<(), QueueError> + Send + 'static,
    {
        let state = Arc::new(StateCell::new(ThreadState::NotRunning));
        let thread_state = Arc::clone(&state);
        state.set(ThreadState::Running);

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                let result = body(&thread_state);
                thread_state.set(ThreadState::Terminated);
                result
            })
            .map_err(|source| {
                state.set(ThreadState::NotRunning);
                QueueError::Spawn {
                    name: name.to_owned(),
                    source,
                }
            })?;

        Ok(Self {
            name: name.to_owned(),
            state,
            handle: Some(handle),
        })
    }

    /// Returns the thread name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ThreadState {
        self.state.get()
    }

    /// Returns true when called from the worker's own thread.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| handle.thread().id() == thread::current().id())
    }

    /// Moves a running worker to `Terminating`.
    ///
    /// The loop body is expected to notice and return; waking it from
    /// whatever it blocks on is the caller's job.
    pub fn request_stop(&self) {
        self.state
            .update(|state| (state == ThreadState::Running).then_some(ThreadState::Terminating));
    }

    /// Waits for the thread to exit and returns the loop's result.
    ///
    /// Joining twice returns `Ok(())` the second time. Joining from the
    /// worker's own thread detaches it instead of deadlocking.
    pub fn join(&mut self) -> Result<(), QueueError> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }
        match handle.join() {
            Ok(result) => result,
            Err(_) => {
                self.state.set(ThreadState::Terminated);
                Err(QueueError::Panicked(self.name.clone()))
            }
        }
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::mpsc;

    #[test]
    fn worker_runs_until_stopped() {
        let mut worker = Worker::spawn("test-loop", |state| {
            state.wait_for(ThreadState::Terminating);
            Ok(())
        })
        .expect("spawn");

        assert_eq!(worker.name(), "test-loop");
        assert_eq!(worker.state(), ThreadState::Running);

        worker.request_stop();
        worker.join().expect("clean exit");
        assert_eq!(worker.state(), ThreadState::Terminated);
        worker.join().expect("second join is a no-op");
    }

    #[test]
    fn join_returns_loop_error() {
        let mut worker = Worker::spawn("failing-loop", |_| Err(QueueError::Fatal)).expect("spawn");
        assert!(matches!(worker.join(), Err(QueueError::Fatal)));
    }

    #[test]
    fn join_reports_panic() {
        let mut worker =
            Worker::spawn("panicking-loop", |_| panic!("loop body exploded")).expect("spawn");
        match worker.join() {
            Err(QueueError::Panicked(name)) => assert_eq!(name, "panicking-loop"),
            other => panic!("unexpected join result: {other:?}"),
        }
    }

    #[test]
    fn worker_knows_its_own_thread() {
        let slot: Arc<Mutex<Option<Worker>>> = Arc::new(Mutex::new(None));
        let body_slot = Arc::clone(&slot);
        let (report, inside) = mpsc::channel();
        let worker = Worker::spawn("self-aware", move |state| {
            state.wait_for(ThreadState::Terminating);
            let current = body_slot
                .lock()
                .expect("slot")
                .as_ref()
                .is_some_and(Worker::is_current);
            report.send(current).expect("report");
            Ok(())
        })
        .expect("spawn");
        assert!(!worker.is_current());

        let mut guard = slot.lock().expect("slot");
        guard.insert(worker).request_stop();
        drop(guard);

        assert!(inside.recv().expect("worker reported"));
        let mut worker = slot.lock().expect("slot").take().expect("worker");
        worker.join().expect("clean exit");
    }

    #[test]
    fn stop_is_ignored_after_exit() {
        let mut worker = Worker::spawn("short-loop", |_| Ok(())).expect("spawn");
        worker.join().expect("exit");
        worker.request_stop();
        assert_eq!(worker.state(), ThreadState::Terminated);
    }
}
