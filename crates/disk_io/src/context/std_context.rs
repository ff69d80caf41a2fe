//! Portable context that performs positioned I/O on the waiting thread.
//!
//! Submitted control blocks sit in a pending list until the waiter calls
//! [`get_events`](IoContext::get_events), which executes a batch with
//! `pread`/`pwrite` outside the lock and reports the results. A block still
//! pending can always be canceled; a block already picked up cannot.

use std::collections::VecDeque;
use std::io;
use std::sync::{Condvar, Mutex};

use super::{ControlBlock, IoContext, IoEvent};
use crate::request::RequestKind;

#[derive(Debug, Default)]
struct StdState {
    pending: VecDeque<ControlBlock>,
    ready: VecDeque<IoEvent>,
    /// Blocks picked up by `get_events` and still executing.
    running: usize,
}

impl StdState {
    fn registered(&self) -> usize {
        self.pending.len() + self.ready.len() + self.running
    }
}

/// Context emulating asynchronous I/O with synchronous positioned calls.
#[derive(Debug)]
pub struct StdContext {
    state: Mutex<StdState>,
    changed: Condvar,
    capacity: usize,
}

impl StdContext {
    /// Creates a context accepting up to `capacity` operations at once.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(StdState::default()),
            changed: Condvar::new(),
            capacity: capacity.max(1),
        }
    }
}

impl IoContext for StdContext {
    fn name(&self) -> &'static str {
        "std"
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn submit(&self, control: &ControlBlock) -> io::Result<()> {
        let mut state = self.state.lock().expect("std context mutex poisoned");
        if state.registered() >= self.capacity {
            return Err(io::Error::from_raw_os_error(libc::EAGAIN));
        }
        state.pending.push_back(*control);
        drop(state);
        self.changed.notify_one();
        Ok(())
    }

    fn cancel(&self, control: &ControlBlock) -> io::Result<bool> {
        let mut state = self.state.lock().expect("std context mutex poisoned");
        let Some(index) = state
            .pending
            .iter()
            .position(|pending| pending.token() == control.token())
        else {
            return Ok(false);
        };
        state.pending.remove(index);
        state.ready.push_back(IoEvent {
            token: control.token(),
            result: -i64::from(libc::ECANCELED),
        });
        drop(state);
        self.changed.notify_one();
        Ok(true)
    }

    fn get_events(&self, min: usize, max: usize, events: &mut Vec<IoEvent>) -> io::Result<usize> {
        let max = max.max(1);
        let start = events.len();
        let batch: Vec<ControlBlock> = {
            let mut state = self.state.lock().expect("std context mutex poisoned");
            while state.pending.is_empty() && state.ready.len() < min {
                state = self
                    .changed
                    .wait(state)
                    .expect("std context mutex poisoned");
            }

            let ready = state.ready.len().min(max);
            events.extend(state.ready.drain(..ready));
            if ready >= min.max(1) || state.pending.is_empty() {
                return Ok(ready);
            }

            let take = (max - ready).min(state.pending.len());
            state.running += take;
            state.pending.drain(..take).collect()
        };

        for control in &batch {
            events.push(IoEvent {
                token: control.token(),
                result: perform(control),
            });
        }

        self.state
            .lock()
            .expect("std context mutex poisoned")
            .running -= batch.len();
        Ok(events.len() - start)
    }
}

/// Executes one positioned transfer, returning bytes or a negated errno.
fn perform(control: &ControlBlock) -> i64 {
    let Ok(offset) = libc::off_t::try_from(control.offset()) else {
        return -i64::from(libc::EINVAL);
    };
    loop {
        // Safety: `buf` points to `len` bytes owned by the posted request,
        // which cannot be released before this event is reported.
        let rc = unsafe {
            match control.kind() {
                RequestKind::Read => {
                    libc::pread(control.fd(), control.buf().cast(), control.len(), offset)
                }
                RequestKind::Write => libc::pwrite(
                    control.fd(),
                    control.buf().cast_const().cast(),
                    control.len(),
                    offset,
                ),
            }
        };
        if rc >= 0 {
            return rc as i64;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return -i64::from(err.raw_os_error().unwrap_or(libc::EIO));
    }
}
