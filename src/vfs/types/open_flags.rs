/*!
 * VFS Open Flags and Mode
 * Flags and modes for file opening operations
 */

use super::errors::VfsError;
use super::permissions::Permissions;
use crate::core::limits::DEFAULT_STREAM_FILE_MODE;
use crate::core::serde::{is_default, is_false};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// File open flags with compact serialization (skips false values)
///
/// Also deserializes from the short string form (`"r"`, `"w+"`, `"ax"`, ...)
/// so stream options can be written the way callers usually spell them.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", default, deny_unknown_fields)]
pub struct OpenFlags {
    #[serde(skip_serializing_if = "is_false")]
    pub read: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub write: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub append: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub truncate: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub create: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub create_new: bool,
}

impl OpenFlags {
    /// `r`: open for reading, fail if missing
    #[inline]
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Default::default()
        }
    }

    /// `r+`: open for reading and writing, fail if missing
    #[inline]
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            ..Default::default()
        }
    }

    /// `w`: create or truncate, write only
    #[inline]
    #[must_use]
    pub fn write_truncate() -> Self {
        Self {
            write: true,
            create: true,
            truncate: true,
            ..Default::default()
        }
    }

    /// `wx`: create exclusively, write only
    #[inline]
    #[must_use]
    pub fn create_new() -> Self {
        Self {
            write: true,
            create_new: true,
            ..Default::default()
        }
    }

    /// `a`: create if missing, append only
    #[inline]
    #[must_use]
    pub fn append_only() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Default::default()
        }
    }

    /// Parse the short string form
    pub fn parse(short: &str) -> Result<Self, VfsError> {
        let flags = match short {
            "r" | "rs" | "sr" => Self::read_only(),
            "r+" | "rs+" | "sr+" => Self::read_write(),
            "w" => Self::write_truncate(),
            "wx" | "xw" => Self::create_new(),
            "w+" => Self {
                read: true,
                ..Self::write_truncate()
            },
            "wx+" | "xw+" => Self {
                read: true,
                ..Self::create_new()
            },
            "a" => Self::append_only(),
            "ax" | "xa" => Self {
                create: false,
                create_new: true,
                ..Self::append_only()
            },
            "a+" => Self {
                read: true,
                ..Self::append_only()
            },
            "ax+" | "xa+" => Self {
                read: true,
                create: false,
                create_new: true,
                ..Self::append_only()
            },
            other => {
                return Err(VfsError::InvalidArgument(format!(
                    "unknown open flags: {:?}",
                    other
                )))
            }
        };
        Ok(flags)
    }

    /// Check if any write operation is possible
    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.write || self.append
    }

    /// Check if this will create a file
    #[inline]
    #[must_use]
    pub const fn will_create(&self) -> bool {
        self.create || self.create_new
    }

    /// Convert from POSIX-style flags (O_RDONLY, O_WRONLY, O_RDWR, etc.)
    pub fn from_posix(flags: u32) -> Self {
        let access_mode = flags & 0x0003;
        let read = access_mode == 0x0000 || access_mode == 0x0002;
        let write = access_mode == 0x0001 || access_mode == 0x0002;

        Self {
            read,
            write,
            append: flags & 0x0400 != 0,
            truncate: flags & 0x0200 != 0,
            create: flags & 0x0040 != 0,
            create_new: flags & 0x0080 != 0,
        }
    }

    /// Convert to POSIX-style flags
    pub fn to_posix(&self) -> u32 {
        let mut flags = match (self.read, self.is_writable()) {
            (true, true) => 0x0002,  // O_RDWR
            (false, true) => 0x0001, // O_WRONLY
            _ => 0x0000,             // O_RDONLY
        };

        if self.append {
            flags |= 0x0400; // O_APPEND
        }
        if self.truncate {
            flags |= 0x0200; // O_TRUNC
        }
        if self.create {
            flags |= 0x0040; // O_CREAT
        }
        if self.create_new {
            flags |= 0x0080 | 0x0040; // O_EXCL | O_CREAT
        }

        flags
    }

    /// Validate flag combinations
    #[must_use = "validation result must be checked"]
    pub fn validate(&self) -> Result<(), VfsError> {
        if !self.read && !self.is_writable() {
            return Err(VfsError::InvalidArgument(
                "flags grant neither read nor write access".into(),
            ));
        }
        if self.create_new && !self.is_writable() {
            return Err(VfsError::InvalidArgument(
                "create_new requires write flag".into(),
            ));
        }
        if self.truncate && !self.write {
            return Err(VfsError::InvalidArgument(
                "truncate requires write flag".into(),
            ));
        }
        if self.append && self.truncate {
            return Err(VfsError::InvalidArgument(
                "cannot use both append and truncate".into(),
            ));
        }
        Ok(())
    }
}

impl FromStr for OpenFlags {
    type Err = VfsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accepts either the struct form or the short string form
pub(crate) mod flags_or_string {
    use super::OpenFlags;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Short(String),
        Full(OpenFlags),
    }

    pub fn serialize<S>(flags: &OpenFlags, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        flags.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OpenFlags, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Repr::deserialize(deserializer)? {
            Repr::Short(short) => OpenFlags::parse(&short).map_err(serde::de::Error::custom),
            Repr::Full(flags) => Ok(flags),
        }
    }
}

/// File open mode (for creation) with serde support
///
/// Specifies permissions for newly created files. Defaults to 0o666.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenMode {
    #[serde(skip_serializing_if = "is_default", default)]
    pub permissions: Permissions,
}

impl OpenMode {
    /// Create mode with specified permissions
    #[inline]
    #[must_use]
    pub const fn new(mode: u32) -> Self {
        Self {
            permissions: Permissions::new(mode),
        }
    }

    /// Raw mode bits
    #[inline]
    #[must_use]
    pub const fn bits(&self) -> u32 {
        self.permissions.mode
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_FILE_MODE)
    }
}
