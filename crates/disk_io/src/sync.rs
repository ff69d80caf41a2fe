//! Blocking synchronization primitives shared by the dispatcher threads.
//!
//! The standard library provides mutexes and condition variables but no
//! counting semaphore. [`Semaphore`] fills that gap for producer/consumer
//! hand-off between caller threads, the poster and the waiter.
//! [`StateCell`] is a small observable state variable that threads can block
//! on until it reaches a given value.

use std::sync::{Condvar, Mutex};

/// A counting semaphore built on a mutex and a condition variable.
///
/// Permits are plain counts; there is no ownership or guard type. A thread
/// calling [`acquire`](Self::acquire) blocks until at least one permit is
/// available and then consumes it.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` initial permits.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Blocks until one permit is available and consumes it.
    pub fn acquire(&self) {
        self.acquire_many(1);
    }

    /// Blocks until `count` permits are available and consumes all of them.
    ///
    /// Acquiring zero permits returns immediately.
    pub fn acquire_many(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        while *permits < count {
            permits = self
                .available
                .wait(permits)
                .expect("semaphore mutex poisoned");
        }
        *permits -= count;
    }

    /// Consumes one permit if available without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Adds one permit.
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Adds `count` permits.
    pub fn release_many(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut permits = self.permits.lock().expect("semaphore mutex poisoned");
        *permits += count;
        drop(permits);
        // Waiters may need different counts, so each one re-checks.
        self.available.notify_all();
    }

    /// Returns the number of permits currently available.
    ///
    /// The value may be stale by the time the caller inspects it.
    #[must_use]
    pub fn available(&self) -> usize {
        *self.permits.lock().expect("semaphore mutex poisoned")
    }
}

/// An observable value that threads can wait on.
///
/// Every [`set`](Self::set) wakes all waiters, which re-check their
/// predicate. Used for worker thread states and request lifecycle states.
#[derive(Debug)]
pub struct StateCell<T> {
    value: Mutex<T>,
    changed: Condvar,
}

impl<T: Copy + PartialEq> StateCell<T> {
    /// Creates a cell holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            value: Mutex::new(initial),
            changed: Condvar::new(),
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> T {
        *self.value.lock().expect("state mutex poisoned")
    }

    /// Replaces the value and wakes all waiters.
    pub fn set(&self, value: T) {
        *self.value.lock().expect("state mutex poisoned") = value;
        self.changed.notify_all();
    }

    /// Applies `transition` atomically with respect to other updates.
    ///
    /// `transition` returns the new value, or `None` to leave the cell
    /// untouched. Returns the value observed before the call together with
    /// whether a transition happened.
    pub fn update(&self, transition: impl FnOnce(T) -> Option<T>) -> (T, bool) {
        let mut value = self.value.lock().expect("state mutex poisoned");
        let previous = *value;
        match transition(previous) {
            Some(next) => {
                *value = next;
                drop(value);
                self.changed.notify_all();
                (previous, true)
            }
            None => (previous, false),
        }
    }

    /// Blocks until the value equals `target`.
    pub fn wait_for(&self, target: T) {
        self.wait_until(|value| value == target);
    }

    /// Blocks until `predicate` holds for the value and returns that value.
    pub fn wait_until(&self, mut predicate: impl FnMut(T) -> bool) -> T {
        let mut value = self.value.lock().expect("state mutex poisoned");
        while !predicate(*value) {
            value = self.changed.wait(value).expect("state mutex poisoned");
        }
        *value
    }
}
