//! Stub io_uring context for platforms or builds without io_uring.
//!
//! [`is_io_uring_available`] always returns false and [`UringContext::new`]
//! always fails, so [`BackendPolicy::Auto`](crate::BackendPolicy::Auto)
//! falls back to the portable context.

use std::io;

use super::{ControlBlock, IoContext, IoEvent};

/// Always returns `false`: io_uring is not compiled in.
#[must_use]
pub fn is_io_uring_available() -> bool {
    false
}

/// Placeholder that can never be constructed successfully.
#[derive(Debug)]
pub struct UringContext {
    _private: (),
}

impl UringContext {
    /// Always fails with [`io::ErrorKind::Unsupported`].
    pub fn new(_requested: usize) -> io::Result<Self> {
        Err(unsupported())
    }
}

impl IoContext for UringContext {
    fn name(&self) -> &'static str {
        "io_uring"
    }

    fn capacity(&self) -> usize {
        0
    }

    fn submit(&self, _control: &ControlBlock) -> io::Result<()> {
        Err(unsupported())
    }

    fn cancel(&self, _control: &ControlBlock) -> io::Result<bool> {
        Ok(false)
    }

    fn get_events(&self, _min: usize, _max: usize, _events: &mut Vec<IoEvent>) -> io::Result<usize> {
        Err(unsupported())
    }
}

fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "io_uring is not available in this build",
    )
}
