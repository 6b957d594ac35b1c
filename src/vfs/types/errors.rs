/*!
 * VFS Error Types
 * Structured, type-safe error handling for filesystem operations
 */

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::core::types::Fd;

/// VFS operation result
///
/// # Must Use
/// VFS operations can fail and must be handled to prevent data loss
#[must_use = "VFS operations can fail and must be handled"]
pub type VfsResult<T> = Result<T, VfsError>;

/// VFS errors with structured, type-safe error handling
///
/// All error variants include context strings that should be non-empty.
/// Serialization uses tagged enum pattern for type safety.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "error", content = "details")]
pub enum VfsError {
    #[error("Not found: {0}")]
    NotFound(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Already exists: {0}")]
    AlreadyExists(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Permission denied: {0}")]
    PermissionDenied(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Not a directory: {0}")]
    NotADirectory(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Is a directory: {0}")]
    IsADirectory(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Invalid path: {0}")]
    InvalidPath(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("I/O error: {0}")]
    IoError(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Not supported: {0}")]
    NotSupported(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    /// Per-process descriptor limit reached (EMFILE)
    #[error("Too many open files: {0}")]
    TooManyOpenFiles(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    /// System-wide descriptor table full (ENFILE)
    #[error("File table overflow: {0}")]
    FileTableOverflow(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Bad file descriptor: {0}")]
    BadDescriptor(Fd),

    /// A parked operation was dropped before it could be replayed
    #[error("Operation abandoned: {0}")]
    Abandoned(#[serde(deserialize_with = "deserialize_nonempty_string")] String),

    #[error("Read-only filesystem")]
    ReadOnly,
}

impl VfsError {
    /// Whether this failure is retryable once another descriptor is released
    #[inline]
    #[must_use]
    pub const fn is_exhaustion(&self) -> bool {
        matches!(
            self,
            VfsError::TooManyOpenFiles(_) | VfsError::FileTableOverflow(_)
        )
    }

    /// POSIX-style error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            VfsError::NotFound(_) => "ENOENT",
            VfsError::AlreadyExists(_) => "EEXIST",
            VfsError::PermissionDenied(_) => "EACCES",
            VfsError::NotADirectory(_) => "ENOTDIR",
            VfsError::IsADirectory(_) => "EISDIR",
            VfsError::InvalidPath(_) | VfsError::InvalidArgument(_) => "EINVAL",
            VfsError::IoError(_) => "EIO",
            VfsError::NotSupported(_) => "ENOTSUP",
            VfsError::TooManyOpenFiles(_) => "EMFILE",
            VfsError::FileTableOverflow(_) => "ENFILE",
            VfsError::BadDescriptor(_) => "EBADF",
            VfsError::Abandoned(_) => "ECANCELED",
            VfsError::ReadOnly => "EROFS",
        }
    }
}

/// Deserialize and validate non-empty string for error messages
pub(super) fn deserialize_nonempty_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if s.is_empty() {
        return Err(serde::de::Error::custom("error message must not be empty"));
    }
    Ok(s)
}
