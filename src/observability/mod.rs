//! Process diagnostics.
//!
//! Provides:
//! - tracing subscriber setup for the binary and tests

pub mod tracing;
