//! Stable exit codes for the `llm-do` CLI.

/// The worker or task completed and its result was printed.
pub const OK: i32 = 0;
/// Any handled failure: not found, permission, size, invalid input, model
/// error, or cancellation.
pub const FAILURE: i32 = 1;
