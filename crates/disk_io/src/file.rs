//! Files bound to the queue of the device they live on.
//!
//! [`FileHandle`] is what a request refers to: an open descriptor plus the
//! device it belongs to. [`AioFile`] pairs a handle with the queue serving
//! that device and builds requests for it. Requests never hold the queue;
//! an [`AioFile`] does, so a handler that captures one may end up dropping
//! the queue from inside the dispatcher, which the queue tolerates.

use std::fmt;
use std::fs::{File, Metadata, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;

use crate::buffer::IoBuffer;
use crate::error::QueueError;
use crate::queue::AioQueue;
use crate::registry::DiskQueues;
use crate::request::{Request, RequestKind, RequestPtr};

/// Identifies the block device a file lives on (`st_dev`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DeviceId(u64);

impl DeviceId {
    /// Wraps a raw device number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the device of the file described by `metadata`.
    #[must_use]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self(metadata.dev())
    }

    /// Returns the raw device number.
    #[must_use]
    pub const fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{:#x}", self.0)
    }
}

/// How [`AioFile::open`] opens a file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OpenMode {
    write: bool,
    create: bool,
    truncate: bool,
    direct: bool,
}

impl OpenMode {
    /// Reading an existing file.
    #[must_use]
    pub fn read_only() -> Self {
        Self::default()
    }

    /// Reading and writing an existing file.
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            write: true,
            ..Self::default()
        }
    }

    /// Creates the file if it does not exist. Implies write access.
    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self.write |= create;
        self
    }

    /// Truncates the file to zero length on open. Implies write access.
    #[must_use]
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self.write |= truncate;
        self
    }

    /// Bypasses the page cache (`O_DIRECT` on Linux, ignored elsewhere).
    ///
    /// Direct transfers need block-aligned offsets and lengths; misaligned
    /// requests fail with `EINVAL` through their completion handler.
    #[must_use]
    pub fn direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    /// Returns true if the file is opened for writing.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.write
    }

    /// Returns true if the page cache is bypassed.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        self.direct
    }

    fn options(&self) -> OpenOptions {
        let mut opts = OpenOptions::new();
        opts.read(true)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate);

        #[cfg(target_os = "linux")]
        if self.direct {
            use std::os::unix::fs::OpenOptionsExt;
            opts.custom_flags(libc::O_DIRECT);
        }
        opts
    }
}

/// An open file and the device it belongs to.
#[derive(Debug)]
pub struct FileHandle {
    file: File,
    device: DeviceId,
}

impl FileHandle {
    /// Wraps an open file, reading its device from metadata.
    pub fn new(file: File) -> io::Result<Self> {
        let device = DeviceId::from_metadata(&file.metadata()?);
        Ok(Self { file, device })
    }

    /// Returns the descriptor handed to the OS context.
    #[must_use]
    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Returns the device the file lives on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Returns the underlying file.
    #[must_use]
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Returns the current file length in bytes.
    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncates or extends the file to `len` bytes.
    pub fn set_size(&self, len: u64) -> io::Result<()> {
        self.file.set_len(len)
    }
}

impl AsRawFd for FileHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.raw_fd()
    }
}

/// A file whose reads and writes go through its device's [`AioQueue`].
#[derive(Debug, Clone)]
pub struct AioFile {
    handle: Arc<FileHandle>,
    queue: Arc<AioQueue>,
}

impl AioFile {
    /// Opens `path` and binds it to the queue of its device in `queues`.
    pub fn open<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        queues: &DiskQueues,
    ) -> Result<Self, QueueError> {
        let path = path.as_ref();
        let open_error = |source| QueueError::Open {
            path: path.to_path_buf(),
            source,
        };
        let file = mode.options().open(path).map_err(open_error)?;
        let handle = FileHandle::new(file).map_err(open_error)?;
        let queue = queues.queue_for(handle.device())?;
        Ok(Self {
            handle: Arc::new(handle),
            queue,
        })
    }

    /// Binds an already open file to `queue`.
    pub fn from_file(file: File, queue: Arc<AioQueue>) -> io::Result<Self> {
        Ok(Self {
            handle: Arc::new(FileHandle::new(file)?),
            queue,
        })
    }

    /// Returns the handle shared with this file's requests.
    #[must_use]
    pub fn handle(&self) -> &Arc<FileHandle> {
        &self.handle
    }

    /// Returns the queue serving this file.
    #[must_use]
    pub fn queue(&self) -> &Arc<AioQueue> {
        &self.queue
    }

    /// Returns the device the file lives on.
    #[must_use]
    pub fn device(&self) -> DeviceId {
        self.handle.device()
    }

    /// Returns the current file length in bytes.
    pub fn size(&self) -> io::Result<u64> {
        self.handle.size()
    }

    /// Truncates or extends the file to `len` bytes.
    pub fn set_size(&self, len: u64) -> io::Result<()> {
        self.handle.set_size(len)
    }

    /// Reads `buffer.len()` bytes at `offset` into `buffer`.
    ///
    /// `handler` runs once the read has finished; the filled buffer is
    /// available through [`Request::take_buffer`].
    pub fn aread<F>(&self, buffer: IoBuffer, offset: u64, handler: F) -> Result<RequestPtr, QueueError>
    where
        F: FnOnce(&Request) + Send + 'static,
    {
        self.submit(RequestKind::Read, buffer, offset, handler)
    }

    /// Writes the whole of `buffer` at `offset`.
    pub fn awrite<F>(&self, buffer: IoBuffer, offset: u64, handler: F) -> Result<RequestPtr, QueueError>
    where
        F: FnOnce(&Request) + Send + 'static,
    {
        self.submit(RequestKind::Write, buffer, offset, handler)
    }

    fn submit<F>(
        &self,
        kind: RequestKind,
        buffer: IoBuffer,
        offset: u64,
        handler: F,
    ) -> Result<RequestPtr, QueueError>
    where
        F: FnOnce(&Request) + Send + 'static,
    {
        let request = Request::new(Arc::clone(&self.handle), buffer, offset, kind, handler);
        self.queue.add_request(&request)?;
        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendPolicy, QueueConfig};

    fn portable_queues() -> DiskQueues {
        DiskQueues::new(QueueConfig::default().with_backend(BackendPolicy::Disabled))
    }

    #[test]
    fn open_mode_flags_imply_write() {
        assert!(!OpenMode::read_only().is_writable());
        assert!(OpenMode::read_write().is_writable());
        assert!(OpenMode::read_only().create(true).is_writable());
        assert!(OpenMode::read_only().truncate(true).is_writable());
        assert!(OpenMode::read_only().direct(true).is_direct());
    }

    #[test]
    fn handle_reports_device_and_size() {
        let file = tempfile::tempfile().expect("tempfile");
        let expected = DeviceId::from_metadata(&file.metadata().expect("metadata"));
        let handle = FileHandle::new(file).expect("handle");

        assert_eq!(handle.device(), expected);
        assert_eq!(handle.size().expect("size"), 0);
        handle.set_size(8192).expect("grow");
        assert_eq!(handle.size().expect("size"), 8192);
        assert_eq!(handle.as_raw_fd(), handle.raw_fd());
    }

    #[test]
    fn open_missing_file_names_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("missing.bin");
        let queues = portable_queues();

        match AioFile::open(&path, OpenMode::read_only(), &queues) {
            Err(QueueError::Open { path: failed, source }) => {
                assert_eq!(failed, path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected open result: {other:?}"),
        }
        assert!(queues.is_empty(), "no queue for a file that never opened");
    }

    #[test]
    fn write_then_read_through_queue() {
        let dir = tempfile::tempdir().expect("tempdir");
        let queues = portable_queues();
        let file = AioFile::open(
            dir.path().join("blocks.bin"),
            OpenMode::read_write().create(true),
            &queues,
        )
        .expect("open");

        let write = file
            .awrite(IoBuffer::from_slice(&[0xAB; 4096]), 4096, |_| {})
            .expect("queue write");
        assert_eq!(write.wait().expect("write"), 4096);
        assert_eq!(file.size().expect("size"), 8192);

        let read = file
            .aread(IoBuffer::zeroed(4096), 4096, |_| {})
            .expect("queue read");
        assert_eq!(read.wait().expect("read"), 4096);
        let data = read.take_buffer().expect("buffer back");
        assert!(data.as_slice().iter().all(|&b| b == 0xAB));

        assert_eq!(file.queue().backend_name(), "std");
        queues.shutdown_all().expect("shutdown");
    }

    #[test]
    fn read_past_end_is_short() {
        let queues = portable_queues();
        let queue = queues
            .queue_for(DeviceId::new(0))
            .expect("queue");
        let file = AioFile::from_file(tempfile::tempfile().expect("tempfile"), queue).expect("file");
        file.set_size(100).expect("size");

        let read = file.aread(IoBuffer::zeroed(512), 0, |_| {}).expect("queue read");
        assert!(matches!(
            read.wait(),
            Err(crate::RequestError::ShortTransfer {
                expected: 512,
                transferred: 100
            })
        ));
        queues.shutdown_all().expect("shutdown");
    }

    #[test]
    fn requests_after_shutdown_are_rejected() {
        let queues = portable_queues();
        let queue = queues.queue_for(DeviceId::new(7)).expect("queue");
        let file = AioFile::from_file(tempfile::tempfile().expect("tempfile"), queue).expect("file");
        queues.shutdown_all().expect("shutdown");

        assert!(matches!(
            file.awrite(IoBuffer::zeroed(512), 0, |_| {}),
            Err(QueueError::ShutDown)
        ));
    }
}
