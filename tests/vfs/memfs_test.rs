/*!
 * MemFS Tests
 * Descriptor accounting under concurrent use
 */

use std::path::Path;
use std::sync::Arc;
use std::thread;

use graceful_vfs::vfs::types::{FileType, VfsError};
use graceful_vfs::{FileSystem, MemFS, OpenFlags, OpenMode};

#[test]
fn test_memfs_metadata() {
    let fs = MemFS::new();
    fs.create_dir(Path::new("/dir")).unwrap();
    fs.write_file(Path::new("/dir/file.txt"), b"hello").unwrap();

    let meta = fs.metadata(Path::new("/dir/file.txt")).unwrap();
    assert!(meta.is_file());
    assert_eq!(meta.size, 5);

    let meta = fs.metadata(Path::new("/dir")).unwrap();
    assert_eq!(meta.file_type, FileType::Directory);
}

#[test]
fn test_relative_paths_resolve_from_root() {
    let fs = MemFS::new();
    fs.write_file(Path::new("note.txt"), b"n").unwrap();
    assert!(fs.exists(Path::new("/note.txt")));
    assert_eq!(fs.read_file(Path::new("/x/../note.txt")).unwrap(), b"n");
}

#[test]
fn test_concurrent_opens_never_exceed_limit() {
    let fs = Arc::new(MemFS::with_descriptor_limit(8));
    fs.write_file(Path::new("/shared"), b"data").unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let fs = Arc::clone(&fs);
            thread::spawn(move || {
                let mut exhausted = 0;
                for _ in 0..200 {
                    match fs.open(Path::new("/shared"), OpenFlags::read_only(), OpenMode::default()) {
                        Ok(fd) => fs.close(fd).unwrap(),
                        Err(VfsError::TooManyOpenFiles(_)) => exhausted += 1,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                exhausted
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert!(fs.peak_descriptors() <= 8);
    assert_eq!(fs.open_descriptors(), 0);
}
