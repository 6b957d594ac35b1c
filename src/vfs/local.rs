/*!
 * Local Filesystem Backend
 * Wraps std::fs for host filesystem access with a descriptor table
 */

use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs;
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use super::traits::FileSystem;
use super::types::*;
use crate::core::limits::FIRST_DESCRIPTOR;
use crate::core::types::Fd;

/// Local filesystem implementation using std::fs
///
/// Every descriptor returned by `open` holds a real OS file handle until it
/// is passed to `close`, so this backend hits the host's descriptor limits.
#[derive(Debug, Clone)]
pub struct LocalFS {
    root: PathBuf,
    files: Arc<DashMap<Fd, Arc<Mutex<fs::File>>, RandomState>>,
    next_fd: Arc<AtomicU32>,
}

impl LocalFS {
    /// Create new local filesystem rooted at specified path
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            files: Arc::new(DashMap::with_hasher(RandomState::new())),
            next_fd: Arc::new(AtomicU32::new(FIRST_DESCRIPTOR)),
        }
    }

    /// Root directory all paths are resolved against
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of descriptors currently open through this backend
    pub fn open_descriptors(&self) -> usize {
        self.files.len()
    }

    /// Resolve path relative to root
    /// `..` can never climb above the root
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut components = Vec::with_capacity(8);

        for component in path.components() {
            match component {
                Component::Normal(name) => components.push(name),
                Component::ParentDir => {
                    components.pop();
                }
                _ => {}
            }
        }

        let mut result = self.root.clone();
        for component in components {
            result.push(component);
        }
        result
    }

    fn file(&self, fd: Fd) -> VfsResult<Arc<Mutex<fs::File>>> {
        self.files
            .get(&fd)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(VfsError::BadDescriptor(fd))
    }

    /// Convert std::io::Error to VfsError
    fn io_error(e: std::io::Error, context: impl Into<String>) -> VfsError {
        use std::io::ErrorKind;

        let context = context.into();

        if let Some(err) = e
            .raw_os_error()
            .and_then(|code| Self::errno_error(code, &context))
        {
            return err;
        }

        match e.kind() {
            ErrorKind::NotFound => VfsError::NotFound(context),
            ErrorKind::PermissionDenied => VfsError::PermissionDenied(context),
            ErrorKind::AlreadyExists => VfsError::AlreadyExists(context),
            _ => VfsError::IoError(format!("{}: {}", context, e)),
        }
    }

    /// Errors whose meaning is only carried by the errno
    #[cfg(unix)]
    fn errno_error(code: i32, context: &str) -> Option<VfsError> {
        use nix::errno::Errno;

        let context = context.to_string();
        match code {
            c if c == Errno::EMFILE as i32 => Some(VfsError::TooManyOpenFiles(context)),
            c if c == Errno::ENFILE as i32 => Some(VfsError::FileTableOverflow(context)),
            c if c == Errno::EISDIR as i32 => Some(VfsError::IsADirectory(context)),
            c if c == Errno::ENOTDIR as i32 => Some(VfsError::NotADirectory(context)),
            _ => None,
        }
    }

    #[cfg(not(unix))]
    fn errno_error(_code: i32, _context: &str) -> Option<VfsError> {
        None
    }

    fn convert_file_type(ft: fs::FileType) -> FileType {
        if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else if ft.is_file() {
            FileType::File
        } else {
            FileType::Unknown
        }
    }

    fn convert_metadata(md: fs::Metadata) -> Metadata {
        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            md.permissions().mode()
        };
        #[cfg(not(unix))]
        let mode = if md.permissions().readonly() {
            0o444
        } else {
            0o644
        };

        Metadata {
            file_type: Self::convert_file_type(md.file_type()),
            size: md.len(),
            permissions: Permissions::new(mode),
            modified: md.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            created: md.created().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

impl FileSystem for LocalFS {
    fn open(&self, path: &Path, flags: OpenFlags, mode: OpenMode) -> VfsResult<Fd> {
        flags.validate()?;

        let full_path = self.resolve(path);
        let mut options = fs::OpenOptions::new();

        options.read(flags.read);
        options.write(flags.write);
        options.append(flags.append);
        options.truncate(flags.truncate);
        options.create(flags.create);
        options.create_new(flags.create_new);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode.bits());
        }
        #[cfg(not(unix))]
        let _ = mode;

        let file = options
            .open(&full_path)
            .map_err(|e| Self::io_error(e, format!("open {}", path.display())))?;

        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.files.insert(fd, Arc::new(Mutex::new(file)));
        Ok(fd)
    }

    fn close(&self, fd: Fd) -> VfsResult<()> {
        // Dropping the last handle closes the OS descriptor
        self.files
            .remove(&fd)
            .map(|_| ())
            .ok_or(VfsError::BadDescriptor(fd))
    }

    fn read(&self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize> {
        let file = self.file(fd)?;
        let mut file = file.lock();
        file.read(buf)
            .map_err(|e| Self::io_error(e, format!("read fd {}", fd)))
    }

    fn write(&self, fd: Fd, data: &[u8]) -> VfsResult<usize> {
        let file = self.file(fd)?;
        let mut file = file.lock();
        file.write(data)
            .map_err(|e| Self::io_error(e, format!("write fd {}", fd)))
    }

    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>> {
        let full_path = self.resolve(path);
        fs::read(&full_path).map_err(|e| Self::io_error(e, format!("read {}", path.display())))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()> {
        let full_path = self.resolve(path);
        fs::write(&full_path, data)
            .map_err(|e| Self::io_error(e, format!("write {}", path.display())))
    }

    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Entry>> {
        let full_path = self.resolve(path);
        let entries = fs::read_dir(&full_path)
            .map_err(|e| Self::io_error(e, format!("read_dir {}", path.display())))?;

        let mut result = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| Self::io_error(e, format!("read dir entry in {}", path.display())))?;
            let name = entry.file_name().into_string().map_err(|_| {
                VfsError::InvalidPath(format!("invalid UTF-8 in entry of {}", path.display()))
            })?;
            let file_type = entry
                .file_type()
                .map_err(|e| Self::io_error(e, format!("get file type for {}", name)))?;

            result.push(Entry::new_unchecked(
                name,
                Self::convert_file_type(file_type),
            ));
        }

        Ok(result)
    }

    fn metadata(&self, path: &Path) -> VfsResult<Metadata> {
        let full_path = self.resolve(path);
        let md = fs::metadata(&full_path)
            .map_err(|e| Self::io_error(e, format!("metadata {}", path.display())))?;
        Ok(Self::convert_metadata(md))
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn create_dir(&self, path: &Path) -> VfsResult<()> {
        let full_path = self.resolve(path);
        fs::create_dir_all(&full_path)
            .map_err(|e| Self::io_error(e, format!("create_dir {}", path.display())))
    }

    fn remove_file(&self, path: &Path) -> VfsResult<()> {
        let full_path = self.resolve(path);
        fs::remove_file(&full_path)
            .map_err(|e| Self::io_error(e, format!("remove_file {}", path.display())))
    }

    fn remove_dir_all(&self, path: &Path) -> VfsResult<()> {
        let full_path = self.resolve(path);
        fs::remove_dir_all(&full_path)
            .map_err(|e| Self::io_error(e, format!("remove_dir_all {}", path.display())))
    }

    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()> {
        let from_full = self.resolve(from);
        let to_full = self.resolve(to);
        fs::rename(&from_full, &to_full).map_err(|e| {
            Self::io_error(e, format!("rename {} to {}", from.display(), to.display()))
        })
    }

    fn name(&self) -> &str {
        "local"
    }
}
