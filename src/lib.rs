/*!
 * Graceful VFS Library
 * Filesystem access that waits out descriptor exhaustion instead of failing
 */

pub mod core;
pub mod monitoring;
pub mod retry;
pub mod vfs;

// Re-exports
pub use crate::core::types::Fd;
pub use monitoring::{init_tracing, RetryStats};
pub use retry::{
    GracefulFs, ReadStream, ReadStreamOptions, RetryQueue, StreamEvent, StreamState, WriteStream,
    WriteStreamOptions,
};
pub use vfs::{FileSystem, LocalFS, MemFS, OpenFlags, OpenMode, VfsError, VfsResult};
