//! io_uring context for Linux 5.6+.
//!
//! One ring per queue. The poster pushes SQEs and the waiter reaps CQEs,
//! each under its own lock, so the two sides never touch the same ring
//! half concurrently. Posted operations are canceled synchronously through
//! `IORING_REGISTER_SYNC_CANCEL` (Linux 6.0+); on older kernels every
//! cancellation attempt reports "not canceled".

use std::fmt;
use std::io;
use std::sync::{Mutex, OnceLock};

use io_uring::{IoUring as RawIoUring, Probe, opcode, types};

use super::{ControlBlock, IoContext, IoEvent};
use crate::debug_io;
use crate::request::RequestKind;

/// Largest ring the kernel accepts (`IORING_MAX_ENTRIES`).
const MAX_RING_ENTRIES: usize = 32768;

static SUPPORTED: OnceLock<bool> = OnceLock::new();

/// Returns true if this kernel can run the queue on io_uring.
///
/// The answer comes from building a one-entry ring the first time and is
/// cached for the life of the process.
#[must_use]
pub fn is_io_uring_available() -> bool {
    *SUPPORTED.get_or_init(|| UringContext::new(1).is_ok())
}

/// Ring setup blocked by seccomp, `io_uring_disabled` or a kernel built
/// without io_uring.
fn is_unsupported(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOSYS | libc::EPERM | libc::EACCES))
}

fn unsupported(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, format!("io_uring unavailable: {reason}"))
}

/// Checks that the ring understands positioned reads and writes.
///
/// Opcode probing itself appeared together with `IORING_OP_READ` and
/// `IORING_OP_WRITE` (Linux 5.6), so a failed probe means an older kernel.
fn check_opcodes(ring: &RawIoUring) -> io::Result<()> {
    let mut probe = Probe::new();
    ring.submitter()
        .register_probe(&mut probe)
        .map_err(|err| unsupported(&format!("opcode probe failed: {err}")))?;
    if probe.is_supported(opcode::Read::CODE) && probe.is_supported(opcode::Write::CODE) {
        Ok(())
    } else {
        Err(unsupported("read/write opcodes missing"))
    }
}

/// io_uring-backed asynchronous I/O context.
pub struct UringContext {
    ring: RawIoUring,
    entries: usize,
    submit_lock: Mutex<()>,
    reap_lock: Mutex<()>,
}

impl UringContext {
    /// Creates a ring for up to `requested` simultaneous operations.
    ///
    /// When the kernel refuses the size for lack of resources the request
    /// is halved until it succeeds or reaches one entry. Fails with
    /// [`io::ErrorKind::Unsupported`] when the kernel cannot run io_uring
    /// or lacks the read and write opcodes.
    pub fn new(requested: usize) -> io::Result<Self> {
        let mut entries = requested.clamp(1, MAX_RING_ENTRIES);
        loop {
            match RawIoUring::new(entries as u32) {
                Ok(ring) => {
                    check_opcodes(&ring)?;
                    return Ok(Self {
                        ring,
                        entries,
                        submit_lock: Mutex::new(()),
                        reap_lock: Mutex::new(()),
                    });
                }
                Err(err) if entries > 1 && is_resource_shortage(&err) => {
                    debug_io::trace_context_shrink(entries, entries / 2);
                    entries /= 2;
                }
                Err(err) if is_unsupported(&err) => {
                    return Err(unsupported(&err.to_string()));
                }
                Err(err) => {
                    return Err(io::Error::new(
                        err.kind(),
                        format!("io_uring init failed with {entries} entries: {err}"),
                    ));
                }
            }
        }
    }

    fn reap(&self, max: usize, events: &mut Vec<IoEvent>) -> usize {
        // Safety: only the waiter reaps, serialized by `reap_lock`.
        let mut completion = unsafe { self.ring.completion_shared() };
        let mut count = 0;
        for cqe in completion.by_ref().take(max) {
            events.push(IoEvent {
                token: cqe.user_data(),
                result: i64::from(cqe.result()),
            });
            count += 1;
        }
        count
    }
}

impl fmt::Debug for UringContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UringContext")
            .field("entries", &self.entries)
            .finish_non_exhaustive()
    }
}

impl IoContext for UringContext {
    fn name(&self) -> &'static str {
        "io_uring"
    }

    fn capacity(&self) -> usize {
        self.entries
    }

    fn submit(&self, control: &ControlBlock) -> io::Result<()> {
        let len = u32::try_from(control.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "transfer exceeds io_uring length limit")
        })?;
        let fd = types::Fd(control.fd());
        let entry = match control.kind() {
            RequestKind::Read => opcode::Read::new(fd, control.buf(), len)
                .offset(control.offset())
                .build(),
            RequestKind::Write => opcode::Write::new(fd, control.buf().cast_const(), len)
                .offset(control.offset())
                .build(),
        }
        .user_data(control.token());

        let _guard = self.submit_lock.lock().expect("io_uring submit mutex poisoned");
        // Safety: submissions are serialized by `submit_lock`, and the
        // buffer outlives the operation because the posted request owns it.
        unsafe {
            let mut submission = self.ring.submission_shared();
            submission
                .push(&entry)
                .map_err(|_| io::Error::from_raw_os_error(libc::EAGAIN))?;
        }

        // Once pushed the SQE is visible to the kernel; a failed enter here
        // is retried implicitly by the waiter's next enter.
        if let Err(err) = self.ring.submitter().submit() {
            debug_io::trace_deferred_submit(&err);
        }
        Ok(())
    }

    fn cancel(&self, control: &ControlBlock) -> io::Result<bool> {
        let builder = types::CancelBuilder::user_data(control.token());
        match self.ring.submitter().register_sync_cancel(None, builder) {
            Ok(()) => Ok(true),
            Err(err)
                if matches!(
                    err.raw_os_error(),
                    Some(libc::ENOENT | libc::EALREADY | libc::EINVAL)
                ) =>
            {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn get_events(&self, min: usize, max: usize, events: &mut Vec<IoEvent>) -> io::Result<usize> {
        let max = max.max(1);
        let _guard = self.reap_lock.lock().expect("io_uring reap mutex poisoned");

        let ready = self.reap(max, events);
        if ready >= min {
            return Ok(ready);
        }

        match self.ring.submitter().submit_and_wait(min - ready) {
            Ok(_) => {}
            Err(err) if is_transient(&err) => return Ok(ready + self.reap(max - ready, events)),
            Err(err) => return Err(err),
        }
        Ok(ready + self.reap(max - ready, events))
    }
}

fn is_resource_shortage(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::ENOMEM | libc::EAGAIN))
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::EINTR | libc::EAGAIN | libc::EBUSY)
    )
}
