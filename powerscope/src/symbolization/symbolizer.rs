use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use log::{debug, warn};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Symbolizer for one ELF module (executable or shared object)
///
/// Resolves link-time virtual addresses to function names using the ELF
/// symbol tables first and DWARF debug info as a fallback.
pub struct Symbolizer {
    /// Text symbols from `.symtab` and `.dynsym`, sorted by address
    symbols: Vec<SymbolEntry>,
    /// `PT_LOAD` segments, for file offset → virtual address translation
    segments: Vec<LoadSegment>,
    dwarf: Option<Context<EndianRcSlice<RunTimeEndian>>>,
    demangle: bool,
}

#[derive(Debug, Clone)]
struct SymbolEntry {
    address: u64,
    size: u64,
    name: String,
}

#[derive(Debug, Clone, Copy)]
struct LoadSegment {
    file_offset: u64,
    file_size: u64,
    address: u64,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed
    pub fn new<P: AsRef<Path>>(binary_path: P, demangle: bool) -> Result<Self> {
        let binary_path = binary_path.as_ref();
        let binary_data = fs::read(binary_path)
            .with_context(|| format!("Failed to read {}", binary_path.display()))?;

        let obj_file = object::File::parse(&*binary_data).context("Failed to parse object file")?;

        let mut symbols: Vec<SymbolEntry> = obj_file
            .symbols()
            .chain(obj_file.dynamic_symbols())
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.is_definition() && sym.address() != 0)
            .filter_map(|sym| {
                let name = sym.name().ok().filter(|n| !n.is_empty())?;
                Some(SymbolEntry { address: sym.address(), size: sym.size(), name: name.to_string() })
            })
            .collect();
        symbols.sort_by_key(|entry| entry.address);
        symbols.dedup_by_key(|entry| entry.address);

        let segments = obj_file
            .segments()
            .map(|segment| {
                let (file_offset, file_size) = segment.file_range();
                LoadSegment { file_offset, file_size, address: segment.address() }
            })
            .collect();

        let has_debug_info =
            obj_file.section_by_name(".debug_info").is_some_and(|section| section.size() > 0);
        let dwarf = if has_debug_info {
            match load_dwarf(&obj_file) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    warn!("Ignoring DWARF in {}: {e}", binary_path.display());
                    None
                }
            }
        } else {
            None
        };

        debug!(
            "Loaded {}: {} symbols, DWARF {}",
            binary_path.display(),
            symbols.len(),
            if dwarf.is_some() { "yes" } else { "no" }
        );

        Ok(Self { symbols, segments, dwarf, demangle })
    }

    /// Number of text symbols available for lookup
    #[must_use]
    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }

    /// Translate a file offset to the link-time virtual address it is loaded at
    ///
    /// Objects without program headers are treated as identity-mapped.
    #[must_use]
    pub fn virtual_address(&self, file_offset: u64) -> Option<u64> {
        if self.segments.is_empty() {
            return Some(file_offset);
        }
        self.segments
            .iter()
            .find(|seg| file_offset >= seg.file_offset && file_offset - seg.file_offset < seg.file_size)
            .map(|seg| file_offset - seg.file_offset + seg.address)
    }

    /// Resolve a link-time virtual address to a function name
    #[must_use]
    pub fn resolve(&self, addr: u64) -> Option<String> {
        if let Some(entry) = self.symbol_at(addr) {
            return Some(self.display_name(&entry.name));
        }
        self.resolve_dwarf(addr)
    }

    fn symbol_at(&self, addr: u64) -> Option<&SymbolEntry> {
        let idx = self.symbols.partition_point(|entry| entry.address <= addr);
        let entry = self.symbols.get(idx.checked_sub(1)?)?;
        // Size-less symbols (hand-written asm) extend to the next symbol
        (entry.size == 0 || addr - entry.address < entry.size).then_some(entry)
    }

    fn resolve_dwarf(&self, addr: u64) -> Option<String> {
        let ctx = self.dwarf.as_ref()?;
        let mut frames = ctx.find_frames(addr).skip_all_loads().ok()?;

        // Innermost inlined frame comes first; the last one is the physical function
        let mut name = None;
        while let Ok(Some(frame)) = frames.next() {
            if let Some(function) = frame.function {
                let resolved =
                    if self.demangle { function.demangle() } else { function.raw_name() };
                if let Ok(resolved) = resolved {
                    name = Some(resolved.into_owned());
                }
            }
        }
        name
    }

    fn display_name(&self, raw: &str) -> String {
        if self.demangle {
            Self::demangle_symbol(raw)
        } else {
            raw.to_string()
        }
    }

    /// Demangle a Rust symbol name (non-Rust names pass through unchanged)
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

fn load_dwarf(obj_file: &object::File<'_>) -> Result<Context<EndianRcSlice<RunTimeEndian>>> {
    let endian = if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

    let load_section = |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
        let data = obj_file
            .section_by_name(id.name())
            .and_then(|section| section.uncompressed_data().ok())
            .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
        Ok(EndianRcSlice::new(Rc::from(&*data), endian))
    };

    let dwarf = gimli::Dwarf::load(&load_section)?;
    Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")
}
