//! Exit code constants for CLI commands
//!
//! - 0: Success
//! - 1: The run failed, was cancelled or is waiting for input
//! - 2: The workflow document is invalid

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// The run failed, was cancelled or paused, or the command could not be carried out
pub const EXIT_FAILURE: i32 = 1;

/// The workflow document failed to parse or compile
pub const EXIT_INVALID: i32 = 2;
