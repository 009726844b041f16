//! Memory mapping utilities for process address space analysis
//!
//! This module parses /proc/pid/maps to enumerate the executable, file-backed
//! mappings of a process (the main binary and every loaded shared object),
//! which is what the address-space map resolves instruction addresses against.

use anyhow::{Context, Result};
use std::fs;

use crate::domain::Pid;

/// Memory range in a process's address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: u64,
    pub end: u64,
}

impl MemoryRange {
    /// Check if an address falls within this memory range
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// One executable, file-backed line of /proc/pid/maps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedModule {
    pub range: MemoryRange,
    /// Offset into the backing file where this mapping starts
    pub file_offset: u64,
    pub path: String,
}

impl MappedModule {
    /// File offset corresponding to a runtime address inside this mapping
    #[must_use]
    pub fn file_offset_of(&self, addr: u64) -> u64 {
        addr - self.range.start + self.file_offset
    }
}

/// Read and parse /proc/pid/maps
///
/// # Errors
/// Returns an error if /proc/pid/maps cannot be read
pub fn read_executable_mappings(pid: Pid) -> Result<Vec<MappedModule>> {
    let maps_path = format!("{}/maps", pid.proc_dir());
    let maps = fs::read_to_string(&maps_path).context(format!("Failed to read {maps_path}"))?;
    Ok(parse_executable_mappings(&maps))
}

/// Parse the text of /proc/pid/maps, keeping executable file-backed mappings
///
/// Line format: `start-end perms offset dev inode pathname`. Anonymous
/// regions and pseudo-files (`[vdso]`, `[stack]`, ...) are skipped, as are
/// lines that fail to parse.
#[must_use]
pub fn parse_executable_mappings(maps: &str) -> Vec<MappedModule> {
    maps.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<MappedModule> {
    let mut parts = line.split_whitespace();
    let range = parts.next()?;
    let perms = parts.next()?;
    let offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    // Paths may contain spaces; " (deleted)" marks an unlinked file
    let path = parts.collect::<Vec<_>>().join(" ");

    if !perms.contains('x') || !path.starts_with('/') {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let file_offset = u64::from_str_radix(offset, 16).ok()?;
    if end <= start {
        return None;
    }

    Some(MappedModule { range: MemoryRange { start, end }, file_offset, path })
}
