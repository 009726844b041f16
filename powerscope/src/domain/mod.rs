//! Domain model for powerscope
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling with a fatal/recoverable split

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{Pid, Ticks};

pub use errors::{MetricError, ProfilerError, RingError, Severity};
