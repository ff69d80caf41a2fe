//! Per-device dispatcher: one OS context, a poster thread and a waiter thread.
//!
//! # Flow
//!
//! ```text
//! add_request ─▶ waiting ──[num_waiting]──▶ poster ──[num_free_events]──▶ context
//!                                                                           │
//!     handler ◀── complete_request ◀── waiter ◀──[num_posted]── get_events ◀┘
//! ```
//!
//! Three counting semaphores tie the threads together:
//!
//! - `num_waiting` counts requests in the waiting list. The poster sleeps on
//!   it when there is nothing to submit.
//! - `num_free_events` counts free submission slots, starting at the
//!   negotiated window. The poster takes one before every submission and the
//!   waiter returns one per resolved completion, so at most `capacity`
//!   requests are ever registered with the OS.
//! - `num_posted` counts requests registered with the OS and not yet
//!   reaped. The waiter sleeps on it instead of blocking in the OS with
//!   nothing outstanding.
//!
//! The poster pops a request, marks it posted and inserts it into the
//! posted map under the waiting lock, so a request is always in exactly
//! one list until it completes, and a completion that arrives before `post`
//! returns can always be resolved. The waiter returns the slots of a batch
//! before it runs any handler, so a slow or blocking handler never starves
//! the poster.
//!
//! # Shutdown
//!
//! [`AioQueue::shutdown`] stops accepting work, lets the poster drain the
//! waiting list, then lets the waiter drain every posted request, and only
//! then joins both threads. The OS context is released once the last thread
//! holding it has exited. When the last queue handle is dropped by a
//! completion handler, the joins move to a short-lived reaper thread.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rustc_hash::FxHashMap;

use crate::config::{PriorityOp, QueueConfig};
use crate::context::{self, IoContext, IoEvent};
use crate::debug_io;
use crate::error::{QueueError, RequestError};
use crate::request::{RequestKind, RequestPtr};
use crate::sync::{Semaphore, StateCell};
use crate::worker::{ThreadState, Worker};


/// Thread name of the submitting side.
const POSTER_THREAD: &str = "aio-poster";
/// Thread name of the completion side.
const WAITER_THREAD: &str = "aio-waiter";
/// Thread that joins the workers when shutdown starts on one of them.
const REAPER_THREAD: &str = "aio-reaper";

/// State shared by the queue handle and its two threads.
struct Shared {
    context: Arc<dyn IoContext>,
    waiting: Mutex<VecDeque<RequestPtr>>,
    posted: Mutex<FxHashMap<u64, RequestPtr>>,
    num_waiting: Semaphore,
    num_free_events: Semaphore,
    num_posted: Semaphore,
    capacity: usize,
    max_events: usize,
    priority: AtomicU8,
    accepting: AtomicBool,
    failed: AtomicBool,
}

impl Shared {
    fn new(context: Arc<dyn IoContext>, config: &QueueConfig) -> Self {
        let capacity = config.requested_window().min(context.capacity()).max(1);
        let max_events = config.events_per_wait(capacity).max(1);
        Self {
            context,
            waiting: Mutex::new(VecDeque::new()),
            posted: Mutex::new(FxHashMap::default()),
            num_waiting: Semaphore::new(0),
            num_free_events: Semaphore::new(capacity),
            num_posted: Semaphore::new(0),
            capacity,
            max_events,
            priority: AtomicU8::new(config.priority.as_u8()),
            accepting: AtomicBool::new(true),
            failed: AtomicBool::new(false),
        }
    }

    fn lock_waiting(&self) -> std::sync::MutexGuard<'_, VecDeque<RequestPtr>> {
        self.waiting.lock().expect("waiting list mutex poisoned")
    }

    fn lock_posted(&self) -> std::sync::MutexGuard<'_, FxHashMap<u64, RequestPtr>> {
        self.posted.lock().expect("posted map mutex poisoned")
    }

    fn priority(&self) -> PriorityOp {
        PriorityOp::from_u8(self.priority.load(Ordering::Relaxed))
    }

    /// Removes `request` from the posted map and delivers `status`.
    fn complete_request(&self, request: &RequestPtr, status: Result<usize, RequestError>) -> bool {
        self.lock_posted().remove(&request.token());
        request.completed(status)
    }

    /// Marks the queue failed and abandons every posted request.
    fn fail(&self, err: &io::Error) {
        self.failed.store(true, Ordering::SeqCst);
        let abandoned = self.abandon_posted();
        debug_io::trace_fatal(self.context.name(), err, abandoned);
        // Unblock a poster waiting for a slot that will never be returned.
        self.num_free_events.release_many(self.capacity);
    }

    /// Pops the next request and moves it to the posted map.
    fn take_next(&self) -> Option<RequestPtr> {
        let mut waiting = self.lock_waiting();
        let request = pop_next(&mut waiting, self.priority())?;
        let claimed = request.mark_posted();
        debug_assert!(claimed, "waiting list holds a request that is not waiting");
        self.lock_posted().insert(request.token(), Arc::clone(&request));
        Some(request)
    }

    /// Cancels a waiting request outright, or asks the context to cancel a
    /// posted one.
    fn cancel(&self, request: &RequestPtr) -> bool {
        let removed = {
            let mut waiting = self.lock_waiting();
            waiting
                .iter()
                .position(|queued| Arc::ptr_eq(queued, request))
                .and_then(|index| waiting.remove(index))
        };
        if let Some(removed) = removed {
            // If the poster already holds this permit it will find the list
            // one short and go back to sleep.
            self.num_waiting.try_acquire();
            removed.completed(Err(RequestError::Canceled));
            debug_io::trace_cancel(request.token(), true);
            return true;
        }

        let posted = self.lock_posted().get(&request.token()).cloned();
        let canceled = posted.is_some_and(|posted| posted.cancel(self.context.as_ref()));
        debug_io::trace_cancel(request.token(), canceled);
        canceled
    }

    /// Signals the poster to drain the waiting list and stop.
    fn stop_poster(&self, poster: Option<&Worker>) {
        if let Some(poster) = poster {
            poster.request_stop();
            self.num_waiting.release();
        }
    }

    /// Joins the poster, then stops and joins the waiter.
    ///
    /// The waiter is only stopped once nothing can be posted any more.
    fn join_workers(&self, poster: Option<Worker>, waiter: Option<Worker>) -> Result<(), QueueError> {
        let poster_result = poster.map_or(Ok(()), |mut poster| poster.join());
        let waiter_result = waiter.map_or(Ok(()), |mut waiter| {
            waiter.request_stop();
            self.num_posted.release();
            waiter.join()
        });

        if self.failed.load(Ordering::SeqCst) {
            // Posted by a poster that raced the failure; no waiter is left.
            self.abandon_posted();
        }

        debug_io::trace_shutdown(self.context.name());
        waiter_result.and(poster_result)
    }

    fn abandon_posted(&self) -> usize {
        let abandoned: Vec<RequestPtr> = self.lock_posted().drain().map(|(_, req)| req).collect();
        for request in &abandoned {
            request.abandon();
        }
        abandoned.len()
    }

    fn post_loop(&self, state: &StateCell<ThreadState>) -> Result<(), QueueError> {
        loop {
            self.num_waiting.acquire();
            // Take the slot before choosing the request so priority applies
            // to whatever is waiting when the slot frees up.
            self.num_free_events.acquire();
            let Some(request) = self.take_next() else {
                // Either the termination wakeup or the permit of a request
                // that was canceled while waiting.
                self.num_free_events.release();
                if state.get() == ThreadState::Terminating {
                    return Ok(());
                }
                continue;
            };

            if self.failed.load(Ordering::SeqCst) {
                self.num_free_events.release();
                self.complete_request(&request, Err(RequestError::QueueFailed));
                continue;
            }

            debug_io::trace_post(
                request.token(),
                request.kind().as_str(),
                request.offset(),
                request.len(),
            );
            match request.post(self.context.as_ref()) {
                Ok(()) => self.num_posted.release(),
                Err(err) => {
                    debug_io::trace_submit_failed(request.token(), &err);
                    self.num_free_events.release();
                    self.complete_request(&request, Err(RequestError::Submit(Arc::new(err))));
                }
            }
        }
    }

    fn wait_loop(&self, state: &StateCell<ThreadState>) -> Result<(), QueueError> {
        let mut events: Vec<IoEvent> = Vec::with_capacity(self.max_events);
        let mut finished: Vec<(RequestPtr, Result<usize, RequestError>)> =
            Vec::with_capacity(self.max_events);
        loop {
            self.num_posted.acquire();
            if state.get() == ThreadState::Terminating && self.lock_posted().is_empty() {
                return Ok(());
            }

            events.clear();
            if let Err(err) = self.context.get_events(1, self.max_events, &mut events) {
                self.fail(&err);
                return Err(QueueError::Context(err));
            }

            {
                let mut posted = self.lock_posted();
                for event in events.drain(..) {
                    let Some(request) = posted.remove(&event.token) else {
                        debug_io::trace_orphan_event(event.token, event.result);
                        continue;
                    };
                    debug_io::trace_complete(event.token, event.result);
                    let status = request.status_from_event(event.result);
                    finished.push((request, status));
                }
            }

            let resolved = finished.len();
            if resolved == 0 {
                self.num_posted.release();
                continue;
            }
            // One permit was taken above; the rest cover the other
            // requests resolved in this cycle.
            self.num_posted.acquire_many(resolved - 1);
            self.num_free_events.release_many(resolved);

            // Handlers run with the slots already returned: one may block,
            // add requests, or drop the last queue handle.
            for (request, status) in finished.drain(..) {
                request.completed(status);
            }
        }
    }
}

/// Pops the first request of the preferred kind, or the oldest request.
fn pop_next(waiting: &mut VecDeque<RequestPtr>, priority: PriorityOp) -> Option<RequestPtr> {
    let preferred = match priority {
        PriorityOp::Read => Some(RequestKind::Read),
        PriorityOp::Write => Some(RequestKind::Write),
        PriorityOp::None => None,
    };
    if let Some(kind) = preferred
        && let Some(index) = waiting.iter().position(|req| req.kind() == kind)
    {
        return waiting.remove(index);
    }
    waiting.pop_front()
}

/// Bounded-concurrency asynchronous I/O queue for one device.
///
/// Dropping the queue shuts it down; call [`shutdown`](Self::shutdown)
/// explicitly to observe a fatal context error.
pub struct AioQueue {
    shared: Arc<Shared>,
    poster: Mutex<Option<Worker>>,
    waiter: Mutex<Option<Worker>>,
}

impl AioQueue {
    /// Creates a queue backed by the context selected in `config`.
    pub fn new(config: &QueueConfig) -> Result<Arc<Self>, QueueError> {
        let context = context::open_context(config)?;
        Self::with_context(context, config)
    }

    /// Creates a queue over an existing context.
    ///
    /// The submission window is the smaller of the configured window and
    /// the context's capacity.
    pub fn with_context(
        context: Arc<dyn IoContext>,
        config: &QueueConfig,
    ) -> Result<Arc<Self>, QueueError> {
        let shared = Arc::new(Shared::new(context, config));

        let poster_shared = Arc::clone(&shared);
        let poster = Worker::spawn(POSTER_THREAD, move |state| poster_shared.post_loop(state))?;

        let waiter_shared = Arc::clone(&shared);
        let waiter = match Worker::spawn(WAITER_THREAD, move |state| waiter_shared.wait_loop(state)) {
            Ok(waiter) => waiter,
            Err(err) => {
                let mut poster = poster;
                shared.accepting.store(false, Ordering::SeqCst);
                shared.stop_poster(Some(&poster));
                let _ = poster.join();
                return Err(err);
            }
        };

        debug_io::trace_queue_start(shared.context.name(), shared.capacity, shared.max_events);

        Ok(Arc::new(Self {
            shared,
            poster: Mutex::new(Some(poster)),
            waiter: Mutex::new(Some(waiter)),
        }))
    }

    /// Queues `request` for submission.
    ///
    /// The request's handler runs exactly once after this returns `Ok`.
    /// Fails without touching the request if the queue is shut down or
    /// failed, or if the request was already queued.
    pub fn add_request(&self, request: &RequestPtr) -> Result<(), QueueError> {
        if self.shared.failed.load(Ordering::SeqCst) {
            return Err(QueueError::Fatal);
        }
        {
            let mut waiting = self.shared.lock_waiting();
            if !self.shared.accepting.load(Ordering::SeqCst) {
                return Err(QueueError::ShutDown);
            }
            if !request.enqueue() {
                return Err(QueueError::AlreadyQueued {
                    token: request.token(),
                });
            }
            waiting.push_back(Arc::clone(request));
        }
        self.shared.num_waiting.release();
        Ok(())
    }

    /// Attempts to cancel `request`.
    ///
    /// A waiting request is removed and its handler runs on the calling
    /// thread with [`RequestError::Canceled`]. A posted request is handed to
    /// the OS for cancellation and completes through the waiter. Returns
    /// false when the request already finished or the OS could not cancel
    /// it; the handler then reports the normal outcome.
    pub fn cancel_request(&self, request: &RequestPtr) -> bool {
        self.shared.cancel(request)
    }

    /// Returns the kind posted first when both are waiting.
    #[must_use]
    pub fn priority_op(&self) -> PriorityOp {
        self.shared.priority()
    }

    /// Changes the kind posted first; takes effect on the next pop.
    pub fn set_priority_op(&self, op: PriorityOp) {
        self.shared.priority.store(op.as_u8(), Ordering::Relaxed);
    }

    /// Number of requests not yet submitted.
    #[must_use]
    pub fn num_waiting(&self) -> usize {
        self.shared.lock_waiting().len()
    }

    /// Number of requests registered with the OS.
    #[must_use]
    pub fn num_posted(&self) -> usize {
        self.shared.lock_posted().len()
    }

    /// Negotiated submission window.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Completion events collected per wait cycle.
    #[must_use]
    pub fn max_events(&self) -> usize {
        self.shared.max_events
    }

    /// Name of the OS context backing this queue.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        self.shared.context.name()
    }

    /// Returns true while the queue accepts new requests.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst) && !self.shared.failed.load(Ordering::SeqCst)
    }

    /// Stops accepting requests, drains all outstanding ones and joins both
    /// threads.
    ///
    /// Every request accepted before the call has completed or been
    /// canceled when this returns. Returns the context error if the waiter
    /// stopped on a fatal failure. Later calls return `Ok(())`.
    ///
    /// Called from a completion handler of this queue, it only stops intake
    /// and signals the threads; a reaper thread finishes the drain and the
    /// joins, and the call returns `Ok(())` without waiting.
    pub fn shutdown(&self) -> Result<(), QueueError> {
        {
            let _waiting = self.shared.lock_waiting();
            self.shared.accepting.store(false, Ordering::SeqCst);
        }

        let poster = self.poster.lock().expect("poster mutex poisoned").take();
        let waiter = self.waiter.lock().expect("waiter mutex poisoned").take();
        if poster.is_none() && waiter.is_none() {
            return Ok(());
        }
        self.shared.stop_poster(poster.as_ref());

        let on_worker = poster.as_ref().is_some_and(Worker::is_current)
            || waiter.as_ref().is_some_and(Worker::is_current);
        if !on_worker {
            return self.shared.join_workers(poster, waiter);
        }

        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name(REAPER_THREAD.to_owned())
            .spawn(move || {
                let _ = shared.join_workers(poster, waiter);
            })
            .map(drop)
            .map_err(|source| QueueError::Spawn {
                name: REAPER_THREAD.to_owned(),
                source,
            })
    }
}

impl Drop for AioQueue {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

impl fmt::Debug for AioQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AioQueue")
            .field("backend", &self.backend_name())
            .field("capacity", &self.shared.capacity)
            .field("max_events", &self.shared.max_events)
            .field("priority", &self.priority_op())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}
