/*!
 * Core Types
 * Common types used across the filesystem layers
 */

/// File descriptor type
pub type Fd = u32;
