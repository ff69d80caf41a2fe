//! Scriptable context used by unit tests.
//!
//! Records every submission and lets the test decide when and how each
//! operation completes. Never touches the buffers it is handed.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::{ControlBlock, IoContext, IoEvent};

#[derive(Debug, Default)]
struct MockState {
    submitted: Vec<u64>,
    in_flight: Vec<(u64, usize)>,
    max_in_flight: usize,
    ready: VecDeque<IoEvent>,
}

#[derive(Debug)]
pub(crate) struct ScriptedContext {
    state: Mutex<MockState>,
    changed: Condvar,
    capacity: usize,
    auto_complete: bool,
    cancel_succeeds: AtomicBool,
    fail_submit: AtomicBool,
    fail_wait: AtomicBool,
}

impl ScriptedContext {
    /// Operations stay in flight until the test completes them.
    pub(crate) fn new(capacity: usize) -> Self {
        Self::build(capacity, false)
    }

    /// Every submission completes immediately with its full length.
    pub(crate) fn auto(capacity: usize) -> Self {
        Self::build(capacity, true)
    }

    fn build(capacity: usize, auto_complete: bool) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
            capacity,
            auto_complete,
            cancel_succeeds: AtomicBool::new(true),
            fail_submit: AtomicBool::new(false),
            fail_wait: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_cancel_succeeds(&self, value: bool) {
        self.cancel_succeeds.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_submit(&self, value: bool) {
        self.fail_submit.store(value, Ordering::SeqCst);
    }

    /// Makes the next and all later waits fail with `EBADF`.
    pub(crate) fn break_context(&self) {
        self.fail_wait.store(true, Ordering::SeqCst);
        let _guard = self.state.lock().expect("mock mutex poisoned");
        self.changed.notify_all();
    }

    pub(crate) fn submitted(&self) -> Vec<u64> {
        self.state.lock().expect("mock mutex poisoned").submitted.clone()
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.state.lock().expect("mock mutex poisoned").in_flight.len()
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().expect("mock mutex poisoned").max_in_flight
    }

    /// Blocks until at least `count` operations have been submitted.
    pub(crate) fn wait_for_submissions(&self, count: usize) {
        let mut state = self.state.lock().expect("mock mutex poisoned");
        while state.submitted.len() < count {
            state = self.changed.wait(state).expect("mock mutex poisoned");
        }
    }

    /// Completes the oldest unfinished operation with its full length.
    pub(crate) fn complete_next(&self) -> Option<u64> {
        let mut state = self.state.lock().expect("mock mutex poisoned");
        let pending = state
            .in_flight
            .iter()
            .find(|(token, _)| !state.ready.iter().any(|event| event.token == *token))
            .copied();
        let (token, len) = pending?;
        state.ready.push_back(IoEvent {
            token,
            result: len as i64,
        });
        drop(state);
        self.changed.notify_all();
        Some(token)
    }

    /// Completes `token` with an explicit result.
    pub(crate) fn complete(&self, token: u64, result: i64) {
        let mut state = self.state.lock().expect("mock mutex poisoned");
        state.ready.push_back(IoEvent { token, result });
        drop(state);
        self.changed.notify_all();
    }
}

impl IoContext for ScriptedContext {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn submit(&self, control: &ControlBlock) -> io::Result<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        let mut state = self.state.lock().expect("mock mutex poisoned");
        state.submitted.push(control.token());
        state.in_flight.push((control.token(), control.len()));
        state.max_in_flight = state.max_in_flight.max(state.in_flight.len());
        if self.auto_complete {
            state.ready.push_back(IoEvent {
                token: control.token(),
                result: control.len() as i64,
            });
        }
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    fn cancel(&self, control: &ControlBlock) -> io::Result<bool> {
        if !self.cancel_succeeds.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let mut state = self.state.lock().expect("mock mutex poisoned");
        let token = control.token();
        let outstanding = state.in_flight.iter().any(|(t, _)| *t == token)
            && !state.ready.iter().any(|event| event.token == token);
        if !outstanding {
            return Ok(false);
        }
        state.ready.push_back(IoEvent {
            token,
            result: -i64::from(libc::ECANCELED),
        });
        drop(state);
        self.changed.notify_all();
        Ok(true)
    }

    fn get_events(&self, min: usize, max: usize, events: &mut Vec<IoEvent>) -> io::Result<usize> {
        let mut state = self.state.lock().expect("mock mutex poisoned");
        loop {
            if self.fail_wait.load(Ordering::SeqCst) {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            if state.ready.len() >= min.max(1) {
                break;
            }
            state = self.changed.wait(state).expect("mock mutex poisoned");
        }

        let mut count = 0;
        while count < max.max(1) {
            let Some(event) = state.ready.pop_front() else {
                break;
            };
            state.in_flight.retain(|(token, _)| *token != event.token);
            events.push(event);
            count += 1;
        }
        Ok(count)
    }
}
