//! # Shared Data Structures (Kernel ↔ Userspace)
//!
//! Defines the `perf_event` kernel ABI consumed by powerscope. All types use
//! `#[repr(C)]` and must match `include/uapi/linux/perf_event.h`
//! byte-for-byte: the kernel writes into memory laid out by these structs.
//!
//! ## Key Types
//!
//! - [`PerfEventAttr`] - Sampling-source configuration passed to `perf_event_open(2)`
//! - [`PerfEventMmapPage`] - Control page at the start of the shared ring buffer
//! - [`PerfEventHeader`] - Fixed header prefixing every ring-buffer record
//!
//! ## Ring Buffer Layout
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────────────────────┐
//! │ control page (4 KiB) │ data region (2^n pages, circular)            │
//! │ data_head @1024      │ [header|nr|ip0|ip1|...][header|...]...       │
//! │ data_tail @1032      │                                              │
//! └──────────────────────┴──────────────────────────────────────────────┘
//! ```

#![no_std]

// ============================================================================
// perf_event_attr constants
// ============================================================================

/// `PERF_TYPE_HARDWARE`: generalized hardware events
pub const PERF_TYPE_HARDWARE: u32 = 0;

/// `PERF_COUNT_HW_INSTRUCTIONS`: retired instructions
pub const PERF_COUNT_HW_INSTRUCTIONS: u64 = 1;

/// `PERF_SAMPLE_CALLCHAIN`: record the call chain with each sample
pub const PERF_SAMPLE_CALLCHAIN: u64 = 1 << 5;

/// `PERF_ATTR_SIZE_VER5`: size of [`PerfEventAttr`] as declared to the kernel
pub const PERF_ATTR_SIZE_VER5: u32 = 112;

/// Bit positions inside [`PerfEventAttr::flags`]
pub mod attr_flags {
    pub const DISABLED: u64 = 1 << 0;
    pub const EXCLUDE_KERNEL: u64 = 1 << 5;
    pub const EXCLUDE_HV: u64 = 1 << 6;
    pub const MMAP: u64 = 1 << 8;
    pub const FREQ: u64 = 1 << 10;
}

// ============================================================================
// ioctl requests (_IO('$', n))
// ============================================================================

pub const PERF_EVENT_IOC_ENABLE: u64 = 0x2400;
pub const PERF_EVENT_IOC_DISABLE: u64 = 0x2401;
pub const PERF_EVENT_IOC_RESET: u64 = 0x2403;

// ============================================================================
// Record kinds
// ============================================================================

/// **Overrun notification**: the kernel dropped `lost` records
///
/// Body: `{ id: u64, lost: u64 }`
pub const PERF_RECORD_LOST: u32 = 2;

/// **Sample**: with `PERF_SAMPLE_CALLCHAIN` only, the body is
/// `{ nr: u64, ips: [u64; nr] }`
pub const PERF_RECORD_SAMPLE: u32 = 9;

/// Sanity ceiling on `nr` in a call-chain sample
///
/// Larger values only appear when the consumer reads bytes that are not a
/// record header (buffer corruption or a desynchronized tail).
pub const MAX_CALLCHAIN_FRAMES: u64 = 100;

/// Size in bytes of [`PerfEventHeader`]
pub const RECORD_HEADER_SIZE: usize = core::mem::size_of::<PerfEventHeader>();

// ============================================================================
// Shared Data Structures
// ============================================================================

/// `struct perf_event_attr` (ABI version 5)
///
/// The kernel bitfield block (`disabled`, `inherit`, ..., `mmap`, `freq`, ...)
/// is exposed as a single [`flags`](Self::flags) word; see [`attr_flags`].
#[repr(C)]
#[derive(Clone, Copy, Default, Debug)]
pub struct PerfEventAttr {
    pub type_: u32,
    pub size: u32,
    pub config: u64,
    /// `sample_period` or, with [`attr_flags::FREQ`], `sample_freq`
    pub sample_period_or_freq: u64,
    pub sample_type: u64,
    pub read_format: u64,
    pub flags: u64,
    pub wakeup_events: u32,
    pub bp_type: u32,
    pub config1: u64,
    pub config2: u64,
    pub branch_sample_type: u64,
    pub sample_regs_user: u64,
    pub sample_stack_user: u32,
    pub clockid: i32,
    pub sample_regs_intr: u64,
    pub aux_watermark: u32,
    pub sample_max_stack: u16,
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved_2: u16,
}

impl PerfEventAttr {
    /// Instruction-retirement sampling with call chains, created disabled
    ///
    /// The counter stays off until `PERF_EVENT_IOC_ENABLE` so the consumer can
    /// finish mapping the buffer and building the address space first.
    #[must_use]
    pub fn instruction_callchains(frequency_hz: u64, user_only: bool) -> Self {
        let mut flags = attr_flags::DISABLED | attr_flags::MMAP | attr_flags::FREQ;
        if user_only {
            flags |= attr_flags::EXCLUDE_KERNEL | attr_flags::EXCLUDE_HV;
        }
        Self {
            type_: PERF_TYPE_HARDWARE,
            size: PERF_ATTR_SIZE_VER5,
            config: PERF_COUNT_HW_INSTRUCTIONS,
            sample_period_or_freq: frequency_hz,
            sample_type: PERF_SAMPLE_CALLCHAIN,
            flags,
            ..Self::default()
        }
    }
}

/// `struct perf_event_header`
///
/// Prefixes every record in the data region. `size` covers the header itself.
#[repr(C)]
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct PerfEventHeader {
    /// Record kind (`PERF_RECORD_*`)
    pub type_: u32,
    /// `PERF_RECORD_MISC_*` flags
    pub misc: u16,
    /// Total record size in bytes, header included
    pub size: u16,
}

impl PerfEventHeader {
    /// Parse a header from its native-endian wire form
    #[must_use]
    pub fn from_bytes(bytes: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            type_: u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            misc: u16::from_ne_bytes([bytes[4], bytes[5]]),
            size: u16::from_ne_bytes([bytes[6], bytes[7]]),
        }
    }

    /// Encode into native-endian wire form
    #[must_use]
    pub fn to_bytes(self) -> [u8; RECORD_HEADER_SIZE] {
        let mut out = [0u8; RECORD_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.type_.to_ne_bytes());
        out[4..6].copy_from_slice(&self.misc.to_ne_bytes());
        out[6..8].copy_from_slice(&self.size.to_ne_bytes());
        out
    }
}

/// `struct perf_event_mmap_page`
///
/// First page of the shared mapping. Only the `data_*` cursors and geometry
/// matter to the ring-buffer consumer; the rest is exposed for diagnostics.
///
/// **Ownership**:
/// - `data_head`: written by the kernel (producer)
/// - `data_tail`: written by userspace (consumer)
#[repr(C)]
pub struct PerfEventMmapPage {
    pub version: u32,
    pub compat_version: u32,
    pub lock: u32,
    pub index: u32,
    pub offset: i64,
    pub time_enabled: u64,
    pub time_running: u64,
    pub capabilities: u64,
    pub pmc_width: u16,
    pub time_shift: u16,
    pub time_mult: u32,
    pub time_offset: u64,
    pub time_zero: u64,
    pub size: u32,
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved_1: u32,
    pub time_cycles: u64,
    pub time_mask: u64,
    #[allow(clippy::pub_underscore_fields)]
    pub _reserved: [u8; 116 * 8],
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub aux_head: u64,
    pub aux_tail: u64,
    pub aux_offset: u64,
    pub aux_size: u64,
}

const _: () = assert!(core::mem::size_of::<PerfEventAttr>() == PERF_ATTR_SIZE_VER5 as usize);
const _: () = assert!(RECORD_HEADER_SIZE == 8);
const _: () = assert!(core::mem::offset_of!(PerfEventMmapPage, data_head) == 1024);
const _: () = assert!(core::mem::offset_of!(PerfEventMmapPage, data_tail) == 1032);
const _: () = assert!(core::mem::offset_of!(PerfEventMmapPage, data_size) == 1048);
