use object::{Object, ObjectSymbol, SymbolKind};
use powerscope::domain::Pid;
use powerscope::profiling::{serialize, CallChainRecord};
use powerscope::symbolization::{AddressSpaceMap, Resolve, Symbolizer};
use powerscope_common::PerfEventHeader;

/// Address and raw name of a sized text symbol in `path`
fn text_symbol(path: &str, wanted: &str) -> Option<u64> {
    let data = std::fs::read(path).expect("read binary");
    let file = object::File::parse(&*data).expect("parse binary");
    file.symbols()
        .find(|sym| sym.kind() == SymbolKind::Text && sym.size() > 0 && sym.name() == Ok(wanted))
        .map(|sym| sym.address())
}

#[test]
fn test_symbolizer_creation() {
    let binary_path = env!("CARGO_BIN_EXE_powerscope");

    let symbolizer = Symbolizer::new(binary_path, true);
    assert!(symbolizer.is_ok(), "Failed to create symbolizer: {:?}", symbolizer.err());
    assert!(symbolizer.unwrap().symbol_count() > 0);
}

#[test]
fn test_symbolizer_resolves_main() {
    let binary_path = env!("CARGO_BIN_EXE_powerscope");
    let symbolizer = Symbolizer::new(binary_path, true).expect("Failed to create symbolizer");

    let Some(main) = text_symbol(binary_path, "main") else {
        eprintln!("binary has no sized `main` symbol (stripped?), skipping");
        return;
    };
    assert_eq!(symbolizer.resolve(main).as_deref(), Some("main"));
    assert_eq!(symbolizer.resolve(main + 1).as_deref(), Some("main"));
}

#[inline(never)]
fn marker_function() -> u64 {
    std::hint::black_box(42)
}

#[test]
fn test_own_process_frames_resolve() {
    assert_eq!(marker_function(), 42);

    let pid = Pid(i32::try_from(std::process::id()).unwrap());
    let map = AddressSpaceMap::build(pid, true).expect("Failed to build address space");

    let addr = marker_function as fn() -> u64 as usize as u64;
    let name = map.resolve(addr).expect("own function should resolve");
    assert!(name.contains("marker_function"), "resolved to {name}");

    // Repeated lookups hit the cache and agree
    assert_eq!(map.resolve(addr), Some(name));
}

#[test]
fn test_unmapped_address_serializes_as_hex() {
    let pid = Pid(i32::try_from(std::process::id()).unwrap());
    let map = AddressSpaceMap::build(pid, true).expect("Failed to build address space");

    let chain = CallChainRecord { header: PerfEventHeader::default(), frames: vec![0x10] };
    assert_eq!(serialize(&chain, &map), "0x0000000000000010;|");
}

#[test]
fn test_mangled_names_kept_with_no_demangle() {
    let pid = Pid(i32::try_from(std::process::id()).unwrap());
    let map = AddressSpaceMap::build(pid, false).expect("Failed to build address space");

    let addr = marker_function as fn() -> u64 as usize as u64;
    let name = map.resolve(addr).expect("own function should resolve");
    assert!(name.starts_with("_ZN") || name.starts_with("_R"), "expected mangled name, got {name}");
}
