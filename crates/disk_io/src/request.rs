//! A single asynchronous I/O operation and its lifecycle.
//!
//! ```text
//! Created ──▶ Waiting ──▶ Posted ──▶ Completed
//!                │           │
//!                └───────────┴──────▶ Canceled
//! ```
//!
//! A request is created by a file handle, shared between the caller and the
//! queue through [`RequestPtr`], and dropped once neither the caller nor the
//! queue's lists reference it. Its [`ControlBlock`] is filled by the poster
//! thread in [`post`](Request::post) and read afterwards by the waiter or a
//! cancelling thread. Until it completes, a queued request sits in exactly
//! one of the queue's lists, and its state says which.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use crate::buffer::IoBuffer;
use crate::context::{ControlBlock, IoContext};
use crate::error::RequestError;
use crate::file::FileHandle;
use crate::sync::StateCell;

/// Shared ownership of a request between its creator and the queue.
pub type RequestPtr = Arc<Request>;

/// Completion callback, invoked exactly once with the finished request.
///
/// The handler runs before the request turns terminal: inside it
/// [`Request::status`] and [`Request::take_buffer`] already answer, but
/// [`Request::poll`] is still false and [`Request::wait`] on the same
/// request never returns.
pub type CompletionHandler = Box<dyn FnOnce(&Request) + Send + 'static>;

/// Tokens start at 1 so that 0 never identifies a request.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Direction of a transfer.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestKind {
    /// Device to memory.
    Read,
    /// Memory to device.
    Write,
}

impl RequestKind {
    /// Returns a short lowercase name for diagnostics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a request.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum RequestState {
    /// Built but not yet handed to a queue.
    Created,
    /// Queued, not yet submitted to the OS.
    Waiting,
    /// Registered with the OS context.
    Posted,
    /// Finished, successfully or with an error.
    Completed,
    /// Finished by cancellation.
    Canceled,
}

impl RequestState {
    /// Returns true for `Completed` and `Canceled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }
}

/// One read or write of a block-aligned buffer at a file offset.
pub struct Request {
    token: u64,
    file: Arc<FileHandle>,
    offset: u64,
    len: usize,
    kind: RequestKind,
    buffer: Mutex<Option<IoBuffer>>,
    handler: Mutex<Option<CompletionHandler>>,
    control: OnceLock<ControlBlock>,
    state: StateCell<RequestState>,
    status: OnceLock<Result<usize, RequestError>>,
}

impl Request {
    /// Creates a request transferring the whole of `buffer` at `offset`.
    ///
    /// The buffer moves into the request and can be taken back with
    /// [`take_buffer`](Self::take_buffer) once the request has finished.
    pub fn new<F>(
        file: Arc<FileHandle>,
        buffer: IoBuffer,
        offset: u64,
        kind: RequestKind,
        handler: F,
    ) -> RequestPtr
    where
        F: FnOnce(&Self) + Send + 'static,
    {
        Arc::new(Self {
            token: NEXT_TOKEN.fetch_add(1, Ordering::Relaxed),
            file,
            offset,
            len: buffer.len(),
            kind,
            buffer: Mutex::new(Some(buffer)),
            handler: Mutex::new(Some(Box::new(handler))),
            control: OnceLock::new(),
            state: StateCell::new(RequestState::Created),
            status: OnceLock::new(),
        })
    }

    /// Returns the identifier carried through the OS context.
    #[must_use]
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Returns the file this request targets.
    #[must_use]
    pub fn file(&self) -> &Arc<FileHandle> {
        &self.file
    }

    /// Returns the byte offset in the file.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Returns the transfer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for zero-length requests.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the transfer direction.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.state.get()
    }

    /// Returns the final outcome, or `None` while the request is in flight.
    ///
    /// `Ok` carries the number of bytes transferred.
    #[must_use]
    pub fn status(&self) -> Option<Result<usize, RequestError>> {
        self.status.get().cloned()
    }

    /// Returns true once the request has finished.
    #[must_use]
    pub fn poll(&self) -> bool {
        self.state.get().is_terminal()
    }

    /// Blocks until the request has finished and its handler has returned.
    ///
    /// Must not be called from the request's own handler.
    pub fn wait(&self) -> Result<usize, RequestError> {
        self.state.wait_until(RequestState::is_terminal);
        self.status
            .get()
            .cloned()
            .unwrap_or(Err(RequestError::QueueFailed))
    }

    /// Takes the buffer back once the request has finished.
    ///
    /// Returns `None` while the OS may still access the buffer, or if the
    /// buffer was already taken.
    pub fn take_buffer(&self) -> Option<IoBuffer> {
        self.status.get()?;
        self.buffer.lock().expect("request buffer mutex poisoned").take()
    }

    /// Moves the request from `Created` to `Waiting`.
    ///
    /// Returns false if the request was already handed to a queue.
    pub(crate) fn enqueue(&self) -> bool {
        let (_, changed) = self
            .state
            .update(|state| (state == RequestState::Created).then_some(RequestState::Waiting));
        changed
    }

    /// Moves the request from `Waiting` to `Posted`.
    ///
    /// The poster claims a request while it still holds the waiting list,
    /// so a canceller either finds it there or sees it posted.
    pub(crate) fn mark_posted(&self) -> bool {
        let (_, changed) = self
            .state
            .update(|state| (state == RequestState::Waiting).then_some(RequestState::Posted));
        changed
    }

    /// Fills the control block and submits it to `context`.
    ///
    /// The request must already be marked posted. On failure the caller
    /// must complete it with the error.
    pub(crate) fn post(&self, context: &dyn IoContext) -> io::Result<()> {
        let control = self.fill_control_block()?;
        context.submit(control)
    }

    /// Attempts to withdraw a posted request from `context`.
    ///
    /// Success means the OS will report the request as canceled through the
    /// normal completion path. Failure means the operation completes
    /// normally.
    pub(crate) fn cancel(&self, context: &dyn IoContext) -> bool {
        match self.control_block() {
            Some(control) => context.cancel(control).unwrap_or(false),
            None => false,
        }
    }

    /// Records the outcome and runs the completion handler.
    ///
    /// Only the first call has any effect; later calls return false.
    pub(crate) fn completed(&self, status: Result<usize, RequestError>) -> bool {
        let terminal = match &status {
            Err(RequestError::Canceled) => RequestState::Canceled,
            _ => RequestState::Completed,
        };
        if self.status.set(status).is_err() {
            return false;
        }

        let handler = self
            .handler
            .lock()
            .expect("request handler mutex poisoned")
            .take();
        if let Some(handler) = handler {
            handler(self);
        }
        self.state.set(terminal);
        true
    }

    /// Completes the request with `QueueFailed` without returning its buffer.
    ///
    /// Used when the OS context broke with the request still registered:
    /// the kernel may yet write into the buffer, so it is leaked rather
    /// than handed back.
    pub(crate) fn abandon(&self) -> bool {
        if let Some(buffer) = self.buffer.lock().expect("request buffer mutex poisoned").take() {
            std::mem::forget(buffer);
        }
        self.completed(Err(RequestError::QueueFailed))
    }

    /// Interprets a completion event result for this request.
    pub(crate) fn status_from_event(&self, result: i64) -> Result<usize, RequestError> {
        if result < 0 {
            return Err(RequestError::from_completion(result as i32));
        }
        let transferred = result as usize;
        if transferred == self.len {
            Ok(transferred)
        } else {
            Err(RequestError::ShortTransfer {
                expected: self.len,
                transferred,
            })
        }
    }

    /// Returns the control block while the request is posted.
    pub(crate) fn control_block(&self) -> Option<&ControlBlock> {
        if self.state.get() == RequestState::Posted {
            self.control.get()
        } else {
            None
        }
    }

    fn fill_control_block(&self) -> io::Result<&ControlBlock> {
        let buf = {
            let mut buffer = self.buffer.lock().expect("request buffer mutex poisoned");
            buffer
                .as_mut()
                .map(IoBuffer::as_mut_ptr)
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "buffer missing"))?
        };
        let control = ControlBlock::new(
            self.token,
            self.file.raw_fd(),
            buf,
            self.len,
            self.offset,
            self.kind,
        );
        self.control
            .set(control)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "request already posted"))?;
        Ok(self.control.get().expect("control block just set"))
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("token", &self.token)
            .field("kind", &self.kind)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

/// Blocks until every request in `requests` has finished.
pub fn wait_all(requests: &[RequestPtr]) {
    for request in requests {
        let _ = request.wait();
    }
}

/// Returns the index of the first finished request, if any.
#[must_use]
pub fn poll_any(requests: &[RequestPtr]) -> Option<usize> {
    requests.iter().position(|request| request.poll())
}
