/*!
 * VFS Types
 * Shared types for filesystem operations
 */

mod entry;
mod errors;
mod file_type;
mod metadata;
mod open_flags;
mod permissions;

pub use entry::{sort_entries, Entry};
pub use errors::{VfsError, VfsResult};
pub use file_type::FileType;
pub use metadata::Metadata;
pub(crate) use open_flags::flags_or_string;
pub use open_flags::{OpenFlags, OpenMode};
pub use permissions::Permissions;
