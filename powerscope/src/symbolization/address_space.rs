//! Per-process address space map
//!
//! Built once at attach time from /proc/pid/maps: every executable mapping is
//! paired with a [`Symbolizer`] for its backing file. Each distinct file is
//! loaded once and shared between its mappings.
//!
//! The map is never updated after construction, so modules `dlopen`ed after
//! attach resolve to nothing and their frames render as raw addresses.

use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use super::memory_maps::{read_executable_mappings, MappedModule};
use super::{Resolve, Symbolizer};
use crate::domain::{Pid, ProfilerError};

/// Resolved addresses kept before the cache starts over
const CACHE_LIMIT: usize = 1 << 16;

struct ModuleEntry {
    mapping: MappedModule,
    symbols: Option<Rc<Symbolizer>>,
}

/// Resolver for instruction addresses of one target process
pub struct AddressSpaceMap {
    /// Sorted by start address, non-overlapping
    modules: Vec<ModuleEntry>,
    /// Cache of resolved names by runtime address, at most [`CACHE_LIMIT`]
    /// entries
    cache: RefCell<HashMap<u64, Option<Rc<str>>>>,
}

impl AddressSpaceMap {
    /// Build the map from the live mappings of `pid`
    ///
    /// Modules whose files cannot be read or parsed are kept without symbols.
    ///
    /// # Errors
    /// Returns an error if /proc/pid/maps cannot be read or lists no
    /// executable file mappings.
    pub fn build(pid: Pid, demangle: bool) -> Result<Self, ProfilerError> {
        let mappings = read_executable_mappings(pid)
            .map_err(|e| ProfilerError::AddressSpaceInit { pid, reason: format!("{e:#}") })?;
        if mappings.is_empty() {
            return Err(ProfilerError::AddressSpaceInit {
                pid,
                reason: "no executable file mappings".to_string(),
            });
        }

        let mut loaded: HashMap<String, Option<Rc<Symbolizer>>> = HashMap::new();
        let modules: Vec<(MappedModule, Option<Rc<Symbolizer>>)> = mappings
            .into_iter()
            .map(|mapping| {
                let symbols = loaded
                    .entry(mapping.path.clone())
                    .or_insert_with(|| load_module(pid, &mapping.path, demangle))
                    .clone();
                (mapping, symbols)
            })
            .collect();

        let map = Self::from_modules(modules);
        info!(
            "Address space for {pid}: {} executable mappings, {} files with symbols",
            map.modules.len(),
            loaded.values().filter(|symbols| symbols.is_some()).count()
        );
        Ok(map)
    }

    /// Assemble a map from already-loaded modules
    #[must_use]
    pub fn from_modules(modules: Vec<(MappedModule, Option<Rc<Symbolizer>>)>) -> Self {
        let mut modules: Vec<ModuleEntry> = modules
            .into_iter()
            .map(|(mapping, symbols)| ModuleEntry { mapping, symbols })
            .collect();
        modules.sort_by_key(|entry| entry.mapping.range.start);
        Self { modules, cache: RefCell::new(HashMap::new()) }
    }

    /// Number of executable mappings known to the map
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// The mapping containing a runtime address, if any
    #[must_use]
    pub fn module_for(&self, addr: u64) -> Option<&MappedModule> {
        self.entry_for(addr).map(|entry| &entry.mapping)
    }

    fn entry_for(&self, addr: u64) -> Option<&ModuleEntry> {
        let idx = self.modules.partition_point(|entry| entry.mapping.range.start <= addr);
        let entry = self.modules.get(idx.checked_sub(1)?)?;
        entry.mapping.range.contains(addr).then_some(entry)
    }

    fn lookup(&self, addr: u64) -> Option<String> {
        let entry = self.entry_for(addr)?;
        let symbols = entry.symbols.as_ref()?;
        let svma = symbols.virtual_address(entry.mapping.file_offset_of(addr))?;
        symbols.resolve(svma)
    }
}

impl Resolve for AddressSpaceMap {
    fn resolve(&self, addr: u64) -> Option<Rc<str>> {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }
        let resolved: Option<Rc<str>> = self.lookup(addr).map(Rc::from);
        let mut cache = self.cache.borrow_mut();
        if cache.len() >= CACHE_LIMIT {
            debug!("Symbol cache full ({CACHE_LIMIT} addresses), clearing");
            cache.clear();
        }
        cache.insert(addr, resolved.clone());
        resolved
    }
}

/// Load symbols for a mapped file, looking through the target's root first
///
/// A target in another mount namespace sees its files under /proc/pid/root.
fn load_module(pid: Pid, path: &str, demangle: bool) -> Option<Rc<Symbolizer>> {
    let rooted = format!("{}/root{path}", pid.proc_dir());
    let result = Symbolizer::new(&rooted, demangle).or_else(|_| Symbolizer::new(path, demangle));
    match result {
        Ok(symbols) => Some(Rc::new(symbols)),
        Err(e) => {
            warn!("No symbols for {path}: {e:#}");
            None
        }
    }
}
