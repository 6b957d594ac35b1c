/*!
 * System Limits and Constants
 *
 * Centralized location for descriptor numbering, stream sizing and
 * stress-run defaults.
 */

// =============================================================================
// DESCRIPTOR TABLE
// =============================================================================

/// First descriptor handed out by a backend descriptor table
/// [LINUX-COMPAT] 0, 1 and 2 belong to stdin, stdout and stderr
pub const FIRST_DESCRIPTOR: u32 = 3;

// =============================================================================
// STREAMS
// =============================================================================

/// Default read chunk size for read streams (64KB)
pub const DEFAULT_HIGH_WATER_MARK: usize = 64 * 1024;

/// Default creation mode for files opened by streams
/// [LINUX-COMPAT] Same as the libc default before umask
pub const DEFAULT_STREAM_FILE_MODE: u32 = 0o666;

// =============================================================================
// STRESS RUN
// =============================================================================

/// Number of files opened concurrently by the stress binary
/// One more than the common 4096 soft descriptor limit
pub const DEFAULT_STRESS_FILE_COUNT: usize = 4097;

/// Default storage directory for the stress binary
pub const DEFAULT_STRESS_STORAGE_PATH: &str = "/tmp/graceful-vfs-stress";
