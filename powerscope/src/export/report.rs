//! Row-per-tick report stream
//!
//! ```text
//! timestamp, callchains, power, resource_usage, gpu_power
//! 2024-01-01T00:00:00.005123Z, spin;main;|spin;main;|, 14.250000, 97.83, NA
//! ```
//!
//! Fields are joined by `", "`. Unavailable values are written as `NA`, and
//! every row is flushed as soon as it is written so a reader tailing the
//! stream never sees a partial row.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Column names, in row order
pub const HEADER: &str = "timestamp, callchains, power, resource_usage, gpu_power";

/// Marker for a value that could not be measured this tick
pub const UNAVAILABLE: &str = "NA";

const FIELD_SEPARATOR: &str = ", ";

/// One tick's correlated output
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRow {
    pub timestamp: DateTime<Utc>,
    /// Serialized call chains drained this tick (may be empty)
    pub callchains: String,
    pub power_watts: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub gpu_power_watts: Option<f64>,
}

/// Render a row without the trailing newline
#[must_use]
pub fn format_row(row: &ReportRow) -> String {
    let mut line = String::with_capacity(64 + row.callchains.len());
    line.push_str(&row.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true));
    line.push_str(FIELD_SEPARATOR);
    line.push_str(&row.callchains);
    line.push_str(FIELD_SEPARATOR);
    push_value(&mut line, row.power_watts, 6);
    line.push_str(FIELD_SEPARATOR);
    push_value(&mut line, row.cpu_usage_percent, 2);
    line.push_str(FIELD_SEPARATOR);
    push_value(&mut line, row.gpu_power_watts, 6);
    line
}

fn push_value(line: &mut String, value: Option<f64>, precision: usize) {
    match value {
        // Writing to a String cannot fail
        Some(v) if v.is_finite() => {
            let _ = write!(line, "{v:.precision$}");
        }
        _ => line.push_str(UNAVAILABLE),
    }
}

/// Writes the header once, then rows, flushing after each line
pub struct ReportWriter<W: Write> {
    out: W,
    header_written: bool,
    rows: u64,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, header_written: false, rows: 0 }
    }

    /// Write the header line if it has not been written yet
    ///
    /// # Errors
    /// Returns an error if the sink rejects the write
    pub fn write_header(&mut self) -> io::Result<()> {
        if !self.header_written {
            writeln!(self.out, "{HEADER}")?;
            self.out.flush()?;
            self.header_written = true;
        }
        Ok(())
    }

    /// Write one row (and the header first, if needed)
    ///
    /// # Errors
    /// Returns an error if the sink rejects the write
    pub fn write_row(&mut self, row: &ReportRow) -> io::Result<()> {
        self.write_header()?;
        let mut line = format_row(row);
        line.push('\n');
        self.out.write_all(line.as_bytes())?;
        self.out.flush()?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written so far
    #[must_use]
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
