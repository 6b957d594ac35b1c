/*!
 * VFS Traits
 * Descriptor-level filesystem abstraction
 */

use std::path::Path;

use super::types::*;
use crate::core::types::Fd;

/// Virtual filesystem trait
///
/// Backends hand out numeric descriptors from `open` and take them back in
/// `close`. `read_file` and `read_dir` acquire a descriptor internally even
/// though they do not return one, so they can fail with descriptor
/// exhaustion like `open` does.
pub trait FileSystem: Send + Sync {
    /// Open file with specified flags and creation mode
    fn open(&self, path: &Path, flags: OpenFlags, mode: OpenMode) -> VfsResult<Fd>;

    /// Release a descriptor
    fn close(&self, fd: Fd) -> VfsResult<()>;

    /// Read from the descriptor's current position, 0 at end of file
    fn read(&self, fd: Fd, buf: &mut [u8]) -> VfsResult<usize>;

    /// Write at the descriptor's current position (or the end when appending)
    fn write(&self, fd: Fd, data: &[u8]) -> VfsResult<usize>;

    /// Read entire file contents
    fn read_file(&self, path: &Path) -> VfsResult<Vec<u8>>;

    /// Write entire file contents (create or overwrite)
    fn write_file(&self, path: &Path, data: &[u8]) -> VfsResult<()>;

    /// List directory contents, in whatever order the backend produces
    fn read_dir(&self, path: &Path) -> VfsResult<Vec<Entry>>;

    /// Get file metadata
    fn metadata(&self, path: &Path) -> VfsResult<Metadata>;

    /// Check if file/directory exists
    fn exists(&self, path: &Path) -> bool;

    /// Create directory (including parents)
    fn create_dir(&self, path: &Path) -> VfsResult<()>;

    /// Delete file
    fn remove_file(&self, path: &Path) -> VfsResult<()>;

    /// Remove directory recursively
    fn remove_dir_all(&self, path: &Path) -> VfsResult<()>;

    /// Move/rename file
    fn rename(&self, from: &Path, to: &Path) -> VfsResult<()>;

    /// Get filesystem name/type
    fn name(&self) -> &str;
}
