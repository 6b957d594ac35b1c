/*!
 * Graceful Filesystem Tests
 * Async adapters and pass-through behavior of the wrapper
 */

use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tokio_test::{assert_pending, assert_ready};

use graceful_vfs::{FileSystem, GracefulFs, MemFS, OpenFlags, OpenMode, RetryQueue, VfsError};

use super::support::ScriptedFs;

fn limited(limit: usize) -> (GracefulFs, MemFS) {
    let backend = MemFS::with_descriptor_limit(limit);
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));
    (fs, backend)
}

#[test]
fn test_async_open_waits_for_release() {
    let (fs, backend) = limited(1);
    backend.write_file(Path::new("/a"), b"a").unwrap();
    let held = backend
        .open(Path::new("/a"), OpenFlags::read_only(), OpenMode::default())
        .unwrap();

    let waiter = fs.clone();
    let mut open = tokio_test::task::spawn(async move {
        waiter
            .open("/a", OpenFlags::read_only(), OpenMode::default())
            .await
    });
    assert_pending!(open.poll());
    assert_eq!(fs.queue().len(), 1);

    fs.close_sync(held).unwrap();
    assert!(open.is_woken());
    let fd = assert_ready!(open.poll()).unwrap();
    assert_eq!(backend.open_descriptors(), 1);

    fs.close_sync(fd).unwrap();
    assert_eq!(backend.open_descriptors(), 0);
}

#[tokio::test]
async fn test_async_read_file_and_errors() {
    let (fs, _) = limited(4);
    fs.write_file("/data.bin", &[0xff, 0xfe]).unwrap();

    assert_eq!(fs.read_file("/data.bin").await.unwrap(), vec![0xff, 0xfe]);
    assert!(matches!(
        fs.read_to_string("/data.bin").await,
        Err(VfsError::InvalidArgument(_))
    ));
    assert!(matches!(
        fs.read_file("/missing").await,
        Err(VfsError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_async_read_dir_after_exhaustion() {
    let backend = ScriptedFs::new();
    backend.backend().create_dir(Path::new("/dir")).unwrap();
    for name in ["c", "a", "b"] {
        backend.seed(&format!("/dir/{}", name), b"");
    }
    backend.exhaust("read_dir", 1);
    let fs = GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()));

    let lister = fs.clone();
    let listing = tokio::spawn(async move { lister.read_dir("/dir").await });

    while fs.queue().is_empty() {
        tokio::task::yield_now().await;
    }
    fs.queue().retry();

    let names: Vec<_> = listing
        .await
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a", "b", "c"]);
}

#[test]
fn test_close_with_reports_outcome_after_drain() {
    let (fs, backend) = limited(1);
    backend.write_file(Path::new("/a"), b"a").unwrap();
    let held = backend
        .open(Path::new("/a"), OpenFlags::read_only(), OpenMode::default())
        .unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    fs.read_file_with("/a", move |result| {
        let _ = tx.send(result);
    });

    let mut replayed_first = false;
    fs.close_with(held, |result| {
        assert_eq!(result, Ok(()));
        replayed_first = rx.try_recv().is_ok();
    });
    assert!(replayed_first);
}

#[test]
fn test_close_unknown_descriptor_is_reported() {
    let (fs, _) = limited(1);
    let mut outcome = None;
    fs.close_with(7, |result| outcome = Some(result));
    assert_eq!(outcome, Some(Err(VfsError::BadDescriptor(7))));
}

#[test]
fn test_pass_through_operations() {
    let (fs, backend) = limited(2);

    fs.create_dir("/dir").unwrap();
    fs.write_file("/dir/a.txt", b"hello").unwrap();
    assert!(fs.exists("/dir/a.txt"));
    assert_eq!(fs.metadata("/dir/a.txt").unwrap().size, 5);

    fs.rename("/dir/a.txt", "/dir/b.txt").unwrap();
    assert!(!fs.exists("/dir/a.txt"));

    let fd = backend
        .open(Path::new("/dir/b.txt"), OpenFlags::read_write(), OpenMode::default())
        .unwrap();
    let mut buf = [0u8; 8];
    let n = fs.read(fd, &mut buf).unwrap();
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(fs.write(fd, b"!").unwrap(), 1);
    fs.close_sync(fd).unwrap();

    fs.remove_file("/dir/b.txt").unwrap();
    fs.remove_dir_all("/dir").unwrap();
    assert!(!fs.exists("/dir"));
    assert_eq!(fs.name(), "memory");
}
