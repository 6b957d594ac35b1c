/*!
 * Virtual File System Module
 * Descriptor-level filesystem abstraction and its backends
 */

pub mod local;
pub mod memory;
pub mod traits;
pub mod types;

// Re-exports
pub use local::LocalFS;
pub use memory::MemFS;
pub use traits::FileSystem;
pub use types::{
    sort_entries, Entry, FileType, Metadata, OpenFlags, OpenMode, Permissions, VfsError, VfsResult,
};
