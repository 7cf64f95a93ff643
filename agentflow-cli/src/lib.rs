//! agentflow CLI library
//!
//! Argument definitions and command implementations, exposed for tests.

/// Command-line interface definitions and argument parsing
pub mod cli;
/// Compile command
pub mod compile;
/// Error type carrying an exit code
pub mod error;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// Reading workflow documents from disk
pub mod loader;
/// Run command
pub mod run;
/// Ctrl-C handling
pub mod signal_handler;
/// Visualize command
pub mod visualize;
