/*!
 * Retry Queue Tests
 * Ordering and release accounting of parked invocations
 */

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use graceful_vfs::{FileSystem, GracefulFs, MemFS, OpenFlags, OpenMode, RetryQueue, VfsError};

use super::support::{Completions, ScriptedFs};

fn graceful(backend: &ScriptedFs) -> GracefulFs {
    GracefulFs::with_queue(backend.clone(), Arc::new(RetryQueue::new()))
}

fn open(fs: &GracefulFs, path: &str, completions: &Completions) {
    fs.open_with(
        path,
        OpenFlags::read_only(),
        OpenMode::default(),
        completions.recorder(path),
    );
}

#[test]
fn test_exhausted_call_completes_after_enough_releases() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.exhaust("open", 3);
    let fs = graceful(&backend);
    let completions = Completions::default();

    open(&fs, "/a", &completions);
    assert_eq!(completions.len(), 0);
    assert_eq!(fs.queue().len(), 1);

    // First two replays are exhausted again
    fs.queue().retry();
    fs.queue().retry();
    assert_eq!(completions.len(), 0);

    fs.queue().retry();
    assert_eq!(completions.labels(), vec!["/a"]);
    assert!(completions.all_ok());
    assert_eq!(backend.attempts("open"), 4);
    assert!(fs.queue().is_empty());
}

#[test]
fn test_enfile_is_treated_like_emfile() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.fail("read_file", VfsError::FileTableOverflow("read_file".into()), 1);
    let fs = graceful(&backend);

    let (tx, rx) = mpsc::channel();
    fs.read_file_with("/a", move |result| {
        let _ = tx.send(result);
    });
    assert!(rx.try_recv().is_err());

    fs.queue().retry();
    assert_eq!(rx.try_recv().unwrap().unwrap(), b"a");
}

#[test]
fn test_other_errors_are_not_retried() {
    let backend = ScriptedFs::new();
    backend.fail("open", VfsError::PermissionDenied("/a".into()), 1);
    let fs = graceful(&backend);

    let (tx, rx) = mpsc::channel();
    fs.open_with("/a", OpenFlags::read_only(), OpenMode::default(), move |result| {
        let _ = tx.send(result);
    });

    assert_eq!(
        rx.try_recv().unwrap(),
        Err(VfsError::PermissionDenied("/a".into()))
    );
    assert!(fs.queue().is_empty());
    assert_eq!(backend.attempts("open"), 1);
}

#[test]
fn test_parked_calls_replay_in_arrival_order() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.seed("/b", b"b");
    backend.exhaust("open", 2);
    let fs = graceful(&backend);
    let completions = Completions::default();

    open(&fs, "/a", &completions);
    open(&fs, "/b", &completions);
    assert_eq!(fs.queue().len(), 2);

    fs.queue().retry();
    assert_eq!(completions.labels(), vec!["/a"]);

    fs.queue().retry();
    assert_eq!(completions.labels(), vec!["/a", "/b"]);
}

#[test]
fn test_reexhausted_replay_moves_behind_later_arrivals() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.seed("/b", b"b");
    // A's first attempt, B's first attempt, A's replay
    backend.exhaust("open", 3);
    let fs = graceful(&backend);
    let completions = Completions::default();

    open(&fs, "/a", &completions);
    open(&fs, "/b", &completions);

    fs.queue().retry();
    assert_eq!(completions.len(), 0);
    assert_eq!(fs.queue().len(), 2);

    fs.queue().retry();
    fs.queue().retry();
    assert_eq!(completions.labels(), vec!["/b", "/a"]);
    assert_eq!(
        backend.attempted_paths("open"),
        vec![
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/a"),
            PathBuf::from("/b"),
            PathBuf::from("/a"),
        ]
    );
}

#[test]
fn test_one_release_admits_one_replay() {
    let backend = ScriptedFs::new();
    for path in ["/a", "/b", "/c"] {
        backend.seed(path, b"x");
    }
    backend.exhaust("open", 3);
    let fs = graceful(&backend);
    let completions = Completions::default();

    for path in ["/a", "/b", "/c"] {
        open(&fs, path, &completions);
    }
    assert_eq!(backend.attempts("open"), 3);

    fs.queue().retry();
    assert_eq!(backend.attempts("open"), 4);
    assert_eq!(completions.labels(), vec!["/a"]);
    assert_eq!(fs.queue().len(), 2);
}

#[test]
fn test_close_releases_drain_the_queue() {
    let backend = ScriptedFs::new();
    backend.seed("/held", b"h");
    backend.seed("/a", b"a");
    let fs = graceful(&backend);

    let held = backend
        .backend()
        .open(Path::new("/held"), OpenFlags::read_only(), OpenMode::default())
        .unwrap();

    backend.exhaust("read_dir", 1);
    let (tx, rx) = mpsc::channel();
    fs.read_dir_with("/", move |result| {
        let _ = tx.send(result);
    });
    assert!(rx.try_recv().is_err());

    fs.close_sync(held).unwrap();
    let names: Vec<_> = rx
        .try_recv()
        .unwrap()
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["a", "held"]);
}

#[test]
fn test_failed_close_leaves_queue_alone() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.exhaust("open", 1);
    let fs = graceful(&backend);
    let completions = Completions::default();

    let fd = backend
        .backend()
        .open(Path::new("/a"), OpenFlags::read_only(), OpenMode::default())
        .unwrap();
    open(&fs, "/a", &completions);

    backend.fail("close", VfsError::IoError("scripted close failure".into()), 1);
    assert!(fs.close_sync(fd).is_err());
    assert_eq!(fs.queue().len(), 1);
    assert_eq!(completions.len(), 0);

    // The descriptor is still open; a second close succeeds and drains
    fs.close_sync(fd).unwrap();
    assert_eq!(completions.labels(), vec!["/a"]);
}

#[test]
fn test_stats_track_deferrals_and_replays() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.seed("/b", b"b");
    backend.exhaust("open", 3);
    let fs = graceful(&backend);
    let completions = Completions::default();

    open(&fs, "/a", &completions);
    open(&fs, "/b", &completions);
    fs.queue().retry();
    fs.queue().retry();
    fs.queue().retry();
    fs.queue().retry();

    let stats = fs.queue().stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.deferred_total, 3);
    assert_eq!(stats.replayed_total, 3);
    assert_eq!(stats.idle_releases, 1);
    assert_eq!(stats.peak_depth, 2);
}

#[test]
#[serial]
fn test_default_wrapper_uses_global_queue() {
    let backend = ScriptedFs::new();
    backend.seed("/a", b"a");
    backend.exhaust("open", 1);
    let fs = GracefulFs::new(backend.clone());
    assert!(Arc::ptr_eq(fs.queue(), &RetryQueue::global()));

    let completions = Completions::default();
    open(&fs, "/a", &completions);
    assert!(!RetryQueue::global().is_empty());

    RetryQueue::global().retry();
    assert_eq!(completions.labels(), vec!["/a"]);
    assert!(RetryQueue::global().is_empty());
}

#[test]
#[serial]
fn test_global_queue_spans_backends() {
    let first = ScriptedFs::new();
    let second = ScriptedFs::new();
    first.seed("/one", b"1");
    second.seed("/two", b"2");
    first.exhaust("open", 1);
    second.exhaust("open", 1);

    let fs_one = GracefulFs::new(first.clone());
    let fs_two = GracefulFs::new(second.clone());
    let completions = Completions::default();
    open(&fs_one, "/one", &completions);
    open(&fs_two, "/two", &completions);

    // Releasing on one backend replays whatever is at the head, wherever it targets
    let held = second
        .backend()
        .open(Path::new("/two"), OpenFlags::read_only(), OpenMode::default())
        .unwrap();
    fs_two.close_sync(held).unwrap();
    assert_eq!(completions.labels(), vec!["/one"]);

    RetryQueue::global().retry();
    assert_eq!(completions.labels(), vec!["/one", "/two"]);
}

proptest! {
    #[test]
    fn prop_read_dir_is_sorted_by_name(
        names in prop::collection::btree_set("[a-zA-Z0-9_-][a-zA-Z0-9._-]{0,11}", 0..24)
    ) {
        let backend = MemFS::new();
        for name in &names {
            backend.write_file(&Path::new("/").join(name), b"").unwrap();
        }
        let fs = GracefulFs::with_queue(backend, Arc::new(RetryQueue::new()));

        let (tx, rx) = mpsc::channel();
        fs.read_dir_with("/", move |result| {
            let _ = tx.send(result);
        });

        let listed: Vec<String> = rx.recv().unwrap().unwrap().into_iter().map(|e| e.name).collect();
        let expected: Vec<String> = names.into_iter().collect();
        prop_assert_eq!(listed, expected);
    }
}
