//! Asynchronous block I/O dispatcher for out-of-core computation.
//!
//! This crate moves blocks of data between RAM and block devices with
//! bounded-concurrency asynchronous I/O. Callers describe an operation as a
//! [`Request`] (buffer, file, offset, kind, completion handler) and hand it to
//! an [`AioQueue`]; the queue submits it to the operating system's
//! asynchronous I/O context and invokes the handler once the operation has
//! finished.
//!
//! # Architecture
//!
//! Each [`AioQueue`] owns one OS context and two worker threads:
//!
//! ```text
//! caller threads          poster thread               waiter thread
//! ──────────────          ─────────────               ─────────────
//! add_request ──▶ waiting ──▶ post() ──▶ posted ──▶ get_events ──▶ handler
//!                 (FIFO,       (bounded by            (up to max_events
//!                  priority)    max_sim_requests)      per wait cycle)
//! ```
//!
//! - **Backpressure**: a counting semaphore of free submission slots keeps the
//!   number of requests registered with the OS at or below
//!   `max_sim_requests`.
//! - **Exactly-once completion**: every request added to a queue reaches a
//!   terminal state (completed, failed or canceled) and its handler runs
//!   exactly once, on the waiter thread or on the cancelling thread.
//! - **Buffer ownership**: an [`IoBuffer`] moves into its request and can only
//!   be taken back once the request is terminal, so the memory the kernel
//!   writes into always outlives the operation.
//!
//! [`DiskQueues`] maps physical devices to queues so that files on the same
//! device share one dispatcher, and [`AioFile`] is a thin file handle that
//! builds requests for it.
//!
//! # Backends
//!
//! - **io_uring** on Linux 5.6+ (`io_uring` feature, runtime detection)
//! - **portable** `pread`/`pwrite` emulation performed on the waiter thread
//!
//! # Example
//!
//! ```no_run
//! use disk_io::{AioFile, DiskQueues, IoBuffer, OpenMode, QueueConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queues = DiskQueues::new(QueueConfig::default());
//! let file = AioFile::open("/tmp/blocks.bin", OpenMode::read_write().create(true), &queues)?;
//!
//! let mut block = IoBuffer::zeroed(4096);
//! block.as_mut_slice().fill(7);
//! let request = file.awrite(block, 0, |req| {
//!     if let Some(Err(err)) = req.status() {
//!         eprintln!("write failed: {err}");
//!     }
//! })?;
//! request.wait()?;
//! queues.shutdown_all()?;
//! # Ok(())
//! # }
//! ```

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_docs)]

pub mod buffer;
pub mod config;
pub mod context;
pub mod error;
pub mod file;
pub mod queue;
pub mod registry;
pub mod request;
pub mod sync;
pub mod worker;

mod debug_io;

pub use buffer::{BLOCK_ALIGNMENT, IoBuffer};
pub use config::{BackendPolicy, PriorityOp, QueueConfig};
pub use context::{ControlBlock, IoContext, IoEvent, StdContext, is_io_uring_available};
pub use error::{QueueError, RequestError};
pub use file::{AioFile, DeviceId, FileHandle, OpenMode};
pub use queue::AioQueue;
pub use registry::DiskQueues;
pub use request::{
    CompletionHandler, Request, RequestKind, RequestPtr, RequestState, poll_any, wait_all,
};
pub use sync::{Semaphore, StateCell};
pub use worker::{ThreadState, Worker};
