/*!
 * Stream Tests
 * Many concurrent streams against a backend with few descriptors
 */

use futures::future::join_all;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;

use graceful_vfs::core::limits::DEFAULT_STRESS_FILE_COUNT;
use graceful_vfs::retry::FileWriteStream;
use graceful_vfs::{
    FileSystem, GracefulFs, MemFS, OpenFlags, ReadStreamOptions, RetryQueue, StreamEvent,
    StreamState, WriteStreamOptions,
};

use super::support::ScriptedFs;

const DESCRIPTOR_LIMIT: usize = 64;

fn contents(i: usize) -> String {
    format!("line {}\n", i)
}

async fn wait_for_descriptors(backend: &MemFS, expected: usize) {
    while backend.open_descriptors() != expected {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_more_streams_than_descriptors() {
    let backend = MemFS::with_descriptor_limit(DESCRIPTOR_LIMIT);
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));

    let writes = (0..DEFAULT_STRESS_FILE_COUNT).map(|i| {
        let mut stream = fs.create_write_stream(format!("/f{}", i), WriteStreamOptions::default());
        stream.write(contents(i)).unwrap();
        stream.finished()
    });
    for result in join_all(writes).await {
        result.unwrap();
    }
    wait_for_descriptors(&backend, 0).await;

    let reads = (0..DEFAULT_STRESS_FILE_COUNT).map(|i| {
        let stream = fs.create_read_stream(format!("/f{}", i), ReadStreamOptions::default());
        async move { (i, stream.collect().await) }
    });
    for (i, result) in join_all(reads).await {
        assert_eq!(result.unwrap(), contents(i).into_bytes());
    }
    wait_for_descriptors(&backend, 0).await;

    let stats = fs.queue().stats();
    assert!(stats.deferred_total > 0);
    assert_eq!(stats.pending, 0);
    assert!(backend.peak_descriptors() <= DESCRIPTOR_LIMIT);
    assert_eq!(backend.read_dir(Path::new("/")).unwrap().len(), DEFAULT_STRESS_FILE_COUNT);
}

#[tokio::test]
async fn test_parked_stream_stays_opening() {
    let backend = MemFS::with_descriptor_limit(1);
    backend.write_file(Path::new("/a"), b"a").unwrap();
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));

    let mut first = fs.create_read_stream(
        "/a",
        ReadStreamOptions {
            auto_close: false,
            ..Default::default()
        },
    );
    let fd = match first.next_event().await {
        Some(StreamEvent::Open(fd)) => fd,
        other => panic!("expected open, got {:?}", other),
    };

    let second = fs.create_read_stream("/a", ReadStreamOptions::default());
    while fs.queue().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(second.state(), StreamState::Opening);

    fs.close(fd).await.unwrap();
    assert_eq!(second.collect().await.unwrap(), b"a");
}

#[tokio::test]
async fn test_write_stream_buffers_while_parked() {
    let backend = ScriptedFs::new();
    backend.exhaust("open", 1);
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));

    let mut stream: FileWriteStream = fs.create_write_stream(
        "/out",
        WriteStreamOptions {
            flags: OpenFlags::append_only(),
            ..Default::default()
        },
    );
    stream.write("one ").unwrap();
    stream.write("two").unwrap();

    while fs.queue().is_empty() {
        tokio::task::yield_now().await;
    }
    assert_eq!(stream.state(), StreamState::Opening);

    fs.queue().retry();
    stream.finished().await.unwrap();
    assert_eq!(
        backend.backend().read_file(Path::new("/out")).unwrap(),
        b"one two"
    );
}

#[tokio::test]
async fn test_dropped_write_stream_still_finishes() {
    let backend = MemFS::new();
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));

    let mut stream = fs.create_write_stream("/dropped", WriteStreamOptions::default());
    stream.write("kept").unwrap();
    drop(stream);

    while !backend.exists(Path::new("/dropped")) {
        tokio::task::yield_now().await;
    }
    wait_for_descriptors(&backend, 0).await;
    assert_eq!(backend.read_file(Path::new("/dropped")).unwrap(), b"kept");
}

#[tokio::test]
async fn test_write_stream_event_order() {
    let backend = MemFS::new();
    let fs = GracefulFs::with_queue(backend, Arc::new(RetryQueue::new()));

    let mut stream = fs.create_write_stream("/events", WriteStreamOptions::default());
    stream.write("x").unwrap();
    stream.end();

    let mut events = Vec::new();
    while let Some(event) = stream.next_event().await {
        events.push(event);
    }

    assert_eq!(events.len(), 3);
    assert!(matches!(events[0], StreamEvent::Open(_)));
    assert_eq!(events[1], StreamEvent::Finish);
    assert_eq!(events[2], StreamEvent::Close);
    assert_eq!(stream.state(), StreamState::Closed);
}
