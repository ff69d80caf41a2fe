//! OS asynchronous I/O contexts.
//!
//! An [`IoContext`] is the bounded pool of in-flight operations the
//! dispatcher submits to. Posting hands it a [`ControlBlock`]; the waiter
//! collects [`IoEvent`]s and resolves them back to requests through the
//! block's token.
//!
//! Two implementations ship with the crate:
//!
//! - `UringContext`: Linux io_uring (`io_uring` feature, Linux 5.6+).
//! - [`StdContext`]: a portable context that performs positioned
//!   `pread`/`pwrite` calls on the thread collecting events.
//!
//! # Concurrency contract
//!
//! The dispatcher calls [`submit`](IoContext::submit) from the poster
//! thread, [`get_events`](IoContext::get_events) from the waiter thread, and
//! [`cancel`](IoContext::cancel) from arbitrary caller threads. Each
//! implementation serializes its own shared state.

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;

use crate::config::{BackendPolicy, QueueConfig};
use crate::error::QueueError;
use crate::request::RequestKind;

mod std_context;

#[cfg(test)]
pub(crate) mod mock;

#[cfg(all(target_os = "linux", feature = "io_uring"))]
mod uring;
#[cfg(not(all(target_os = "linux", feature = "io_uring")))]
#[path = "uring_stub.rs"]
mod uring;

pub use std_context::StdContext;
pub use uring::{UringContext, is_io_uring_available};

/// OS-facing description of one operation.
///
/// Only the crate creates control blocks, from a request that owns the
/// buffer `buf` points into. The buffer stays alive and unmoved until the
/// request completes.
#[derive(Clone, Copy, Debug)]
pub struct ControlBlock {
    token: u64,
    fd: RawFd,
    buf: *mut u8,
    len: usize,
    offset: u64,
    kind: RequestKind,
}

// Safety: the pointer targets a heap buffer owned by the request, which is
// kept alive by the queue until the operation completes.
unsafe impl Send for ControlBlock {}
unsafe impl Sync for ControlBlock {}

impl ControlBlock {
    pub(crate) fn new(
        token: u64,
        fd: RawFd,
        buf: *mut u8,
        len: usize,
        offset: u64,
        kind: RequestKind,
    ) -> Self {
        Self {
            token,
            fd,
            buf,
            len,
            offset,
            kind,
        }
    }

    /// Identifier echoed back in the completion event.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// File descriptor of the target file.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Start of the transfer buffer.
    #[must_use]
    pub fn buf(&self) -> *mut u8 {
        self.buf
    }

    /// Transfer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for zero-length transfers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// File offset in bytes.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Transfer direction.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }
}

/// A completion reported by the OS.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IoEvent {
    /// Token of the completed control block.
    pub token: u64,
    /// Bytes transferred, or a negated errno.
    pub result: i64,
}

/// A bounded OS context for asynchronous block I/O.
pub trait IoContext: Send + Sync + fmt::Debug {
    /// Short backend name for diagnostics.
    fn name(&self) -> &'static str;

    /// Number of operations the context accepts at once.
    fn capacity(&self) -> usize;

    /// Registers `control` with the OS.
    ///
    /// An error means the OS never saw the operation and will not report a
    /// completion for it.
    fn submit(&self, control: &ControlBlock) -> io::Result<()>;

    /// Attempts to withdraw a registered operation.
    ///
    /// `Ok(true)` means the operation will complete with `ECANCELED`.
    /// `Ok(false)` means it was already running or finished and completes
    /// normally.
    fn cancel(&self, control: &ControlBlock) -> io::Result<bool>;

    /// Blocks until at least `min` completions are available, then appends
    /// up to `max` of them to `events`.
    ///
    /// Returns the number appended. An interrupted wait returns `Ok(0)`.
    fn get_events(&self, min: usize, max: usize, events: &mut Vec<IoEvent>) -> io::Result<usize>;
}

/// Creates the context selected by `config`.
pub(crate) fn open_context(config: &QueueConfig) -> Result<Arc<dyn IoContext>, QueueError> {
    let window = config.requested_window();
    match config.backend {
        BackendPolicy::Disabled => Ok(Arc::new(StdContext::new(window))),
        BackendPolicy::Enabled => match UringContext::new(window) {
            Ok(context) => Ok(Arc::new(context)),
            Err(err) if err.kind() == io::ErrorKind::Unsupported => Err(QueueError::Unsupported),
            Err(err) => Err(QueueError::Context(err)),
        },
        BackendPolicy::Auto => match UringContext::new(window) {
            Ok(context) => Ok(Arc::new(context)),
            Err(_) => Ok(Arc::new(StdContext::new(window))),
        },
    }
}
