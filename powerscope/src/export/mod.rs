//! Report output
//!
//! This module writes the per-tick data stream: one header line followed by
//! one correlated row per tick. See [`report`] for the row schema.

pub mod report;

pub use report::{format_row, ReportRow, ReportWriter, HEADER, UNAVAILABLE};
