//! # Symbol Resolution and Address Translation
//!
//! This module converts raw instruction pointers captured in call-chain
//! samples into human-readable function names. This process is called
//! **symbolization** or **symbol resolution**.
//!
//! ## The Symbolization Problem
//!
//! The kernel records runtime addresses like `0x55f3a2b4c780`. The target's
//! binaries are position independent and randomized by ASLR, so the same
//! function lives at a different runtime address on every run. To name it we
//! must map the runtime address back into the file that contains it.
//!
//! ## Address Translation Flow
//!
//! ```text
//! 1. Read /proc/<pid>/maps once at attach time
//!    55d0c0a02000-55d0c0a05000 r-xp 00002000 ... /usr/bin/busy
//!
//! 2. Find the mapping containing the address
//!    0x55d0c0a02780 ∈ [0x55d0c0a02000, 0x55d0c0a05000)
//!
//! 3. Runtime address → file offset
//!    0x55d0c0a02780 - 0x55d0c0a02000 + 0x2000 = 0x2780
//!
//! 4. File offset → link-time address via the ELF PT_LOAD segments
//!    segment (offset 0x2000, vaddr 0x2000) → 0x2780
//!
//! 5. Nearest preceding text symbol (.symtab / .dynsym), else DWARF
//!    0x2780 → busy_loop
//!
//! 6. Demangle Rust symbols
//!    _ZN4busy4spin17h...E → busy::spin
//! ```
//!
//! **Libraries used**:
//! - `object`: ELF parsing (symbols, segments, sections)
//! - `gimli` + `addr2line`: DWARF function names when the symbol table misses
//! - `rustc-demangle`: Rust symbol demangling
//!
//! ## Module Structure
//!
//! - **`memory_maps`**: parses `/proc/<pid>/maps` into executable mappings
//! - **`symbolizer`**: one ELF file's symbols and segments
//! - **`address_space`**: per-process map from mappings to symbolizers
//!
//! ## Limitations
//!
//! - The map is a snapshot: libraries loaded after attach stay unresolved
//! - Stripped binaries without `.dynsym` entries resolve to nothing
//! - JIT and anonymous executable memory is never resolved

pub mod address_space;
pub mod memory_maps;
pub mod symbolizer;

use std::rc::Rc;

pub use address_space::AddressSpaceMap;
pub use memory_maps::{parse_executable_mappings, read_executable_mappings, MappedModule, MemoryRange};
pub use symbolizer::Symbolizer;

/// Best-effort mapping from an instruction address to a symbol name
///
/// `None` is not an error: callers render the raw address instead.
pub trait Resolve {
    fn resolve(&self, addr: u64) -> Option<Rc<str>>;
}
