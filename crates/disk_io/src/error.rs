//! Error types for the dispatcher.
//!
//! Per-request failures are [`RequestError`] values delivered through the
//! completion handler, never through a separate channel. Queue-level
//! failures are [`QueueError`] values returned by queue operations.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

/// Failure of a single request, observed through [`Request::status`].
///
/// Cloneable so every observer of a request (handler, waiter, poller) can
/// read the same outcome.
///
/// [`Request::status`]: crate::Request::status
#[derive(Debug, Clone, thiserror::Error)]
pub enum RequestError {
    /// The OS context refused the submission.
    #[error("submission rejected: {0}")]
    Submit(#[source] Arc<io::Error>),

    /// The operation finished with a device or transfer error.
    #[error("I/O failed: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The operation transferred fewer bytes than requested.
    #[error("short transfer: {transferred} of {expected} bytes")]
    ShortTransfer {
        /// Bytes the request asked for.
        expected: usize,
        /// Bytes the OS reported.
        transferred: usize,
    },

    /// The request was canceled before it completed.
    #[error("request canceled")]
    Canceled,

    /// The queue failed while the request was outstanding.
    #[error("queue failed with the request outstanding")]
    QueueFailed,
}

impl RequestError {
    /// Builds an `Io` error from a negated errno reported by a completion.
    pub(crate) fn from_completion(result: i32) -> Self {
        if result == -libc::ECANCELED {
            Self::Canceled
        } else {
            Self::Io(Arc::new(io::Error::from_raw_os_error(-result)))
        }
    }

    /// Returns true for [`RequestError::Canceled`].
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns the OS error code, if this error carries one.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Submit(err) | Self::Io(err) => err.raw_os_error(),
            _ => None,
        }
    }
}

/// Failure of a queue operation.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue no longer accepts requests.
    #[error("queue is shut down")]
    ShutDown,

    /// The queue's completion source failed earlier; see [`AioQueue::shutdown`].
    ///
    /// [`AioQueue::shutdown`]: crate::AioQueue::shutdown
    #[error("queue stopped after a fatal context error")]
    Fatal,

    /// The request was already handed to a queue.
    #[error("request {token} was already queued")]
    AlreadyQueued {
        /// Token of the rejected request.
        token: u64,
    },

    /// A file could not be opened or inspected.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Path that failed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Creating or waiting on the OS context failed.
    #[error("asynchronous I/O context error: {0}")]
    Context(#[source] io::Error),

    /// io_uring was required but is not available.
    #[error("io_uring requested but not available on this system")]
    Unsupported,

    /// A worker thread could not be started.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name.
        name: String,
        /// The underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// A worker thread panicked.
    #[error("{0} thread panicked")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_errno_maps_to_io_error() {
        let err = RequestError::from_completion(-libc::EIO);
        assert!(matches!(err, RequestError::Io(_)));
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
    }

    #[test]
    fn ecanceled_maps_to_canceled() {
        let err = RequestError::from_completion(-libc::ECANCELED);
        assert!(err.is_canceled());
        assert_eq!(err.raw_os_error(), None);
    }

    #[test]
    fn short_transfer_display() {
        let err = RequestError::ShortTransfer {
            expected: 4096,
            transferred: 100,
        };
        assert_eq!(err.to_string(), "short transfer: 100 of 4096 bytes");
    }

    #[test]
    fn spawn_error_names_thread() {
        let err = QueueError::Spawn {
            name: "aio-poster".into(),
            source: io::Error::other("no threads"),
        };
        let display = format!("{err}");
        assert!(display.contains("aio-poster"));
        assert!(display.contains("no threads"));
    }
}
