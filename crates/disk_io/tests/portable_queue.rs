//! End-to-end tests over the portable `pread`/`pwrite` context.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use disk_io::{
    AioFile, AioQueue, BackendPolicy, DiskQueues, IoBuffer, OpenMode, PriorityOp, QueueConfig,
    QueueError, RequestError, RequestPtr, RequestState, StdContext, poll_any, wait_all,
};

fn portable(window: usize) -> QueueConfig {
    QueueConfig::default()
        .with_backend(BackendPolicy::Disabled)
        .with_max_sim_requests(window)
}

fn block(fill: u8) -> IoBuffer {
    let mut buf = IoBuffer::zeroed(4096);
    buf.as_mut_slice().fill(fill);
    buf
}

#[test]
fn many_blocks_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let queues = DiskQueues::new(portable(8));
    let file = AioFile::open(
        dir.path().join("stripe.bin"),
        OpenMode::read_write().create(true).truncate(true),
        &queues,
    )
    .expect("open");

    let completions = Arc::new(AtomicUsize::new(0));
    let writes: Vec<RequestPtr> = (0..64u8)
        .map(|i| {
            let completions = Arc::clone(&completions);
            file.awrite(block(i), u64::from(i) * 4096, move |_| {
                completions.fetch_add(1, Ordering::SeqCst);
            })
            .expect("queue write")
        })
        .collect();
    wait_all(&writes);
    assert_eq!(completions.load(Ordering::SeqCst), 64);
    assert!(writes.iter().all(|w| matches!(w.status(), Some(Ok(4096)))));
    assert_eq!(file.size().expect("size"), 64 * 4096);

    let reads: Vec<RequestPtr> = (0..64u64)
        .map(|i| {
            file.aread(IoBuffer::zeroed(4096), i * 4096, |_| {})
                .expect("queue read")
        })
        .collect();
    wait_all(&reads);
    for (i, read) in reads.iter().enumerate() {
        let data = read.take_buffer().expect("buffer back");
        assert!(data.as_slice().iter().all(|&b| usize::from(b) == i), "block {i}");
    }

    queues.shutdown_all().expect("shutdown");
}

#[test]
fn handler_sees_final_status_and_buffer() {
    let dir = tempfile::tempdir().expect("tempdir");
    let queues = DiskQueues::new(portable(2));
    let file = AioFile::open(
        dir.path().join("handler.bin"),
        OpenMode::read_write().create(true),
        &queues,
    )
    .expect("open");
    file.set_size(4096).expect("size");

    let (tx, rx) = std::sync::mpsc::channel();
    let request = file
        .aread(IoBuffer::zeroed(4096), 0, move |req| {
            let buffer = req.take_buffer().expect("buffer in handler");
            tx.send((req.status(), buffer.len())).expect("send");
        })
        .expect("queue read");

    let (status, len) = rx.recv().expect("handler ran");
    assert!(matches!(status, Some(Ok(4096))));
    assert_eq!(len, 4096);
    request.wait().expect("read");
    assert_eq!(request.state(), RequestState::Completed);
    assert!(request.take_buffer().is_none(), "taken by the handler");
    queues.shutdown_all().expect("shutdown");
}

#[test]
fn device_errors_reach_the_handler() {
    let queue = AioQueue::with_context(Arc::new(StdContext::new(4)), &portable(4)).expect("queue");
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("readonly.bin");
    std::fs::write(&path, [0u8; 4096]).expect("seed");
    let read_only = std::fs::File::open(&path).expect("open");
    let file = AioFile::from_file(read_only, Arc::clone(&queue)).expect("file");

    let request = file.awrite(block(1), 0, |_| {}).expect("queue write");
    let err = request.wait().expect_err("write to read-only fd");
    assert!(matches!(err, RequestError::Io(_)));
    assert_eq!(err.raw_os_error(), Some(libc::EBADF));
    queue.shutdown().expect("shutdown");
}

#[test]
fn poll_any_finds_the_finished_request() {
    let queues = DiskQueues::new(portable(4));
    let dir = tempfile::tempdir().expect("tempdir");
    let file = AioFile::open(
        dir.path().join("poll.bin"),
        OpenMode::read_write().create(true),
        &queues,
    )
    .expect("open");

    let request = file.awrite(block(9), 0, |_| {}).expect("queue write");
    request.wait().expect("write");
    let pending = [request];
    assert_eq!(poll_any(&pending), Some(0));
    queues.shutdown_all().expect("shutdown");
}

#[test]
fn registry_shutdown_drains_and_then_rejects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let queues = DiskQueues::new(portable(1));
    queues.set_priority_op(PriorityOp::None);
    let file = AioFile::open(
        dir.path().join("drain.bin"),
        OpenMode::read_write().create(true),
        &queues,
    )
    .expect("open");

    let requests: Vec<RequestPtr> = (0..16u64)
        .map(|i| file.awrite(block(3), i * 4096, |_| {}).expect("queue write"))
        .collect();
    queues.shutdown_all().expect("shutdown");

    assert!(requests.iter().all(|r| r.state().is_terminal()));
    assert!(matches!(
        file.awrite(block(3), 0, |_| {}),
        Err(QueueError::ShutDown)
    ));
    assert!(matches!(
        AioFile::open(dir.path().join("late.bin"), OpenMode::read_write().create(true), &queues),
        Err(QueueError::ShutDown)
    ));
}
