//! Queue tracing (lifecycle at debug level, per-request at trace level).
//!
//! Every function has a no-op twin when the `tracing` feature is disabled,
//! so call sites never need their own `cfg` guards.

use std::io;

#[cfg(feature = "tracing")]
use tracing::{debug, error, trace, warn};

/// Trace queue startup.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_queue_start(backend: &str, capacity: usize, max_events: usize) {
    debug!(
        target: "disk_io::queue",
        operation = "queue_start",
        backend = backend,
        capacity = capacity,
        max_events = max_events,
        "set up {} queue with {} entries ({} events per wait)",
        backend,
        capacity,
        max_events
    );
}

/// Trace queue startup - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_queue_start(_backend: &str, _capacity: usize, _max_events: usize) {}

/// Trace a request handed to the OS.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_post(token: u64, kind: &str, offset: u64, len: usize) {
    trace!(
        target: "disk_io::queue",
        operation = "post",
        token = token,
        io_op = kind,
        offset = offset,
        length = len,
        "post {} token={} offset={} len={}",
        kind,
        token,
        offset,
        len
    );
}

/// Trace a request handed to the OS - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_post(_token: u64, _kind: &str, _offset: u64, _len: usize) {}

/// Trace a completion event.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_complete(token: u64, result: i64) {
    trace!(
        target: "disk_io::queue",
        operation = "complete",
        token = token,
        result = result,
        "complete token={} result={}",
        token,
        result
    );
}

/// Trace a completion event - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_complete(_token: u64, _result: i64) {}

/// Trace a completion whose token matches no posted request.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_orphan_event(token: u64, result: i64) {
    warn!(
        target: "disk_io::queue",
        operation = "orphan_event",
        token = token,
        result = result,
        "completion for unknown token={} result={}",
        token,
        result
    );
}

/// Trace an orphan completion - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_orphan_event(_token: u64, _result: i64) {}

/// Trace a submission the OS refused.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_submit_failed(token: u64, err: &io::Error) {
    warn!(
        target: "disk_io::queue",
        operation = "submit_failed",
        token = token,
        error = %err,
        "submission of token={} failed: {}",
        token,
        err
    );
}

/// Trace a refused submission - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_submit_failed(_token: u64, _err: &io::Error) {}

/// Trace an io_uring enter failure after the SQE was already queued.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_deferred_submit(err: &io::Error) {
    debug!(
        target: "disk_io::queue",
        operation = "deferred_submit",
        error = %err,
        "submit deferred to next enter: {}",
        err
    );
}

/// Trace a deferred submit - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_deferred_submit(_err: &io::Error) {}

/// Trace a context size negotiation step.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_context_shrink(from: usize, to: usize) {
    debug!(
        target: "disk_io::queue",
        operation = "context_shrink",
        from = from,
        to = to,
        "context refused {} entries, retrying with {}",
        from,
        to
    );
}

/// Trace a context size negotiation step - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_context_shrink(_from: usize, _to: usize) {}

/// Trace the outcome of a cancellation attempt.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_cancel(token: u64, canceled: bool) {
    trace!(
        target: "disk_io::queue",
        operation = "cancel",
        token = token,
        canceled = canceled,
        "cancel token={} canceled={}",
        token,
        canceled
    );
}

/// Trace a cancellation attempt - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_cancel(_token: u64, _canceled: bool) {}

/// Trace a fatal failure of the completion source.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_fatal(backend: &str, err: &io::Error, outstanding: usize) {
    error!(
        target: "disk_io::queue",
        operation = "fatal",
        backend = backend,
        error = %err,
        outstanding = outstanding,
        "{} context failed with {} requests outstanding: {}",
        backend,
        outstanding,
        err
    );
}

/// Trace a fatal context failure - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_fatal(_backend: &str, _err: &io::Error, _outstanding: usize) {}

/// Trace queue shutdown.
#[cfg(feature = "tracing")]
#[inline]
pub fn trace_shutdown(backend: &str) {
    debug!(
        target: "disk_io::queue",
        operation = "shutdown",
        backend = backend,
        "{} queue drained and stopped",
        backend
    );
}

/// Trace queue shutdown - no-op when tracing is disabled.
#[cfg(not(feature = "tracing"))]
#[inline]
pub fn trace_shutdown(_backend: &str) {}
