//! Process exit codes
//!
//! Follows sysexits.h for usage errors.

/// Operation completed, warnings included
pub const SUCCESS: i32 = 0;

/// Unspecified failure (cluster, repository, network)
pub const ERROR: i32 = 1;

/// The configuration produced error diagnostics
pub const VALIDATION_ERROR: i32 = 2;

/// File not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Invalid arguments or options
pub const USAGE_ERROR: i32 = 64;
