//! Compact textual rendering of call chains
//!
//! Each frame becomes `symbol;` (or `0x<16 hex digits>;` when unresolved)
//! and each chain ends with `|`:
//!
//! ```text
//! busy::spin;busy::main;__libc_start_main;|0x00007f1e2a028123;|
//! └──────────────── chain 1 ────────────────┘└──── chain 2 ────┘
//! ```
//!
//! Chains from one tick are appended back to back in drain order.

use std::fmt::Write as _;

use super::sample_decoder::CallChainRecord;
use crate::symbolization::Resolve;

/// Separator written after every frame
pub const FRAME_DELIMITER: char = ';';

/// Terminator written after every chain
pub const CHAIN_DELIMITER: char = '|';

/// Renders decoded call chains for the report's `callchains` column
#[derive(Debug, Default)]
pub struct CallChainSerializer {
    buffer: String,
    chains: usize,
}

impl CallChainSerializer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one chain, resolving every frame through `resolver`
    pub fn push(&mut self, record: &CallChainRecord, resolver: &dyn Resolve) {
        for &addr in &record.frames {
            match resolver.resolve(addr) {
                Some(name) if !name.is_empty() => push_sanitized(&mut self.buffer, &name),
                _ => push_hex(&mut self.buffer, addr),
            }
            self.buffer.push(FRAME_DELIMITER);
        }
        self.buffer.push(CHAIN_DELIMITER);
        self.chains += 1;
    }

    /// Number of chains appended so far
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains
    }

    /// Text accumulated so far
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buffer
    }

    /// Hand out the accumulated text and start over for the next tick
    pub fn take(&mut self) -> String {
        self.chains = 0;
        std::mem::take(&mut self.buffer)
    }
}

/// Serialize a single chain
#[must_use]
pub fn serialize(record: &CallChainRecord, resolver: &dyn Resolve) -> String {
    let mut serializer = CallChainSerializer::new();
    serializer.push(record, resolver);
    serializer.take()
}

/// Fixed-width hexadecimal token for an unresolved address
#[must_use]
pub fn hex_token(addr: u64) -> String {
    let mut out = String::with_capacity(18);
    push_hex(&mut out, addr);
    out
}

fn push_hex(out: &mut String, addr: u64) {
    // Writing to a String cannot fail
    let _ = write!(out, "0x{addr:016x}");
}

/// Delimiters and whitespace inside names would break row parsing
fn push_sanitized(out: &mut String, name: &str) {
    out.extend(name.chars().map(|c| match c {
        FRAME_DELIMITER | CHAIN_DELIMITER | ',' => '_',
        c if c.is_whitespace() => '_',
        c => c,
    }));
}
