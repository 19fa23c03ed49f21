//! Deterministic, pure logic shared by the harness.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data and return deterministic outputs suitable for tests. The approval
//! session is the one stateful piece; its I/O lives behind a prompter trait.

pub mod approval;
pub mod call_stack;
pub mod glob;
pub mod suffix;
pub mod types;
