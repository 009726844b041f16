//! # Ring Buffer Consumer
//!
//! Drains variable-length records from the circular data region shared with
//! the kernel. The kernel is the single producer (advances `data_head`), this
//! reader is the single consumer (advances `data_tail`). No locks: ordering
//! is carried entirely by the two cursors and a full fence on each side.
//!
//! ## Drain Protocol
//!
//! ```text
//! 1. head = load(data_head)
//! 2. fence                      ← records up to head are fully written
//! 3. while tail < head:
//!      read header at tail      (split copy if it straddles the end)
//!      read record at tail      (borrowed, or two-segment copy if wrapped)
//!      hand record to the sink
//!      tail += header.size
//! 4. fence                      ← all reads above complete before release
//! 5. store(data_tail, tail)     ← kernel may now reuse the region
//! ```
//!
//! ## Wraparound
//!
//! ```text
//! capacity = 64, tail = 56, record size = 24
//!
//!  0        16                              56      64
//!  ├────────┼───────────────────────────────┼───────┤
//!  │ part 2 │                               │part 1 │
//!  └────────┘                               └───────┘
//!  record bytes = data[56..64] ++ data[0..16]
//! ```
//!
//! Storage is abstracted by [`RingStorage`] so the same reader runs against
//! the live `perf_event` mapping ([`MmapRing`](super::MmapRing)) and an
//! in-memory [`VecRing`] in tests.

// Cursor arithmetic mixes u64 kernel cursors with usize offsets bounded by capacity
#![allow(clippy::cast_possible_truncation)]

use log::{debug, warn};
use powerscope_common::{PerfEventHeader, RECORD_HEADER_SIZE};
use std::borrow::Cow;
use std::sync::atomic::{fence, Ordering};

use crate::domain::{ProfilerError, RingError};
use crate::profiling::sample_decoder::{encode_callchain_sample, encode_lost_record};

/// Backing memory and cursors of a single-producer/single-consumer ring
pub trait RingStorage {
    /// Size of the data region in bytes (a power of two)
    fn capacity(&self) -> u64;

    /// Producer cursor (monotonic, written by the kernel)
    fn load_head(&self) -> u64;

    /// Consumer cursor (monotonic, written only by us)
    fn load_tail(&self) -> u64;

    /// Publish the consumer cursor
    fn store_tail(&mut self, tail: u64);

    /// Bounds-checked view of `len` bytes at `offset` within the data region
    ///
    /// Returns `None` if `offset + len` exceeds [`capacity`](Self::capacity).
    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]>;

    /// Cursor and geometry snapshot for diagnostics
    fn control(&self) -> ControlSnapshot {
        ControlSnapshot {
            data_head: self.load_head(),
            data_tail: self.load_tail(),
            data_size: self.capacity(),
            ..ControlSnapshot::default()
        }
    }
}

/// Copy of the control-page fields worth printing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub version: u32,
    pub compat_version: u32,
    pub index: u32,
    pub time_enabled: u64,
    pub time_running: u64,
    pub data_head: u64,
    pub data_tail: u64,
    pub data_offset: u64,
    pub data_size: u64,
}

impl<S: RingStorage + ?Sized> RingStorage for Box<S> {
    fn capacity(&self) -> u64 {
        (**self).capacity()
    }

    fn load_head(&self) -> u64 {
        (**self).load_head()
    }

    fn load_tail(&self) -> u64 {
        (**self).load_tail()
    }

    fn store_tail(&mut self, tail: u64) {
        (**self).store_tail(tail);
    }

    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        (**self).bytes(offset, len)
    }

    fn control(&self) -> ControlSnapshot {
        (**self).control()
    }
}

/// One record reconstructed from the ring, header included
#[derive(Debug)]
pub struct RawRecord<'a> {
    pub header: PerfEventHeader,
    /// All `header.size` bytes; borrowed when contiguous, owned when wrapped
    pub bytes: Cow<'a, [u8]>,
}

impl RawRecord<'_> {
    /// Record payload following the header
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.bytes[RECORD_HEADER_SIZE..]
    }

    /// True if the record straddled the wrap boundary and was copied
    #[must_use]
    pub fn is_wrapped(&self) -> bool {
        matches!(self.bytes, Cow::Owned(_))
    }
}

/// Accounting for a single drain pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Records handed to the sink
    pub records: usize,
    /// Bytes consumed by those records
    pub bytes: u64,
    /// Unread bytes thrown away after a corrupt record
    pub discarded_bytes: u64,
    /// Why the drain stopped early, if it did
    pub error: Option<RingError>,
}

/// Consumer side of the shared ring buffer
pub struct RingBufferReader<S> {
    storage: S,
}

impl<S: RingStorage> RingBufferReader<S> {
    /// Wrap a ring, validating its geometry
    ///
    /// # Errors
    /// Returns an error if the capacity is not a non-zero power of two or
    /// cannot hold a single record header.
    pub fn new(storage: S) -> Result<Self, ProfilerError> {
        let capacity = storage.capacity();
        if !capacity.is_power_of_two() || capacity < RECORD_HEADER_SIZE as u64 {
            return Err(ProfilerError::InvalidBufferGeometry(format!(
                "data region of {capacity} bytes is not a power of two >= {RECORD_HEADER_SIZE}"
            )));
        }
        Ok(Self { storage })
    }

    /// Access the underlying storage (cursors, geometry)
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the underlying storage
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Drain every complete record between `tail` and `head`
    ///
    /// Non-blocking: returns immediately with zero records when the ring is
    /// empty, in which case `tail` is not written at all.
    ///
    /// A corrupt record aborts the pass and discards the rest of the backlog
    /// (`tail` jumps to `head`), since nothing after it can be framed. An
    /// allocation failure aborts the pass but keeps the record for the next
    /// drain.
    pub fn drain<F>(&mut self, mut sink: F) -> DrainOutcome
    where
        F: FnMut(RawRecord<'_>),
    {
        let head = self.storage.load_head();
        // Pairs with the kernel's fence between writing records and data_head
        fence(Ordering::SeqCst);
        let start = self.storage.load_tail();

        let mut outcome = DrainOutcome::default();
        if head == start {
            return outcome;
        }
        if start > head {
            // Nothing between the cursors can be trusted; resume at the producer
            fence(Ordering::SeqCst);
            self.storage.store_tail(head);
            let err = RingError::TailAheadOfHead { tail: start, head };
            warn!("Ring drain aborted: {err}");
            outcome.error = Some(err);
            return outcome;
        }

        let mut tail = start;
        while tail < head {
            let record = match self.read_header(tail).and_then(|header| {
                self.validate(header, tail, head)?;
                self.read_record(tail, header)
            }) {
                Ok(record) => record,
                Err(err) => {
                    outcome.error = Some(err);
                    break;
                }
            };

            let size = u64::from(record.header.size);
            if record.is_wrapped() {
                debug!("Reassembled {size}-byte record across wrap at tail {tail}");
            }
            sink(record);

            tail += size;
            outcome.records += 1;
            outcome.bytes += size;
        }

        let publish = match outcome.error {
            Some(RingError::CorruptRecord { .. } | RingError::OutOfBounds { .. }) => {
                outcome.discarded_bytes = head - tail;
                head
            }
            _ => tail,
        };

        // All reads of [start, publish) must complete before the kernel sees the new tail
        fence(Ordering::SeqCst);
        self.storage.store_tail(publish);

        if let Some(ref err) = outcome.error {
            warn!("Ring drain aborted after {} records: {err}", outcome.records);
        }
        outcome
    }

    fn region(&self, offset: usize, len: usize) -> Result<&[u8], RingError> {
        self.storage.bytes(offset, len).ok_or(RingError::OutOfBounds {
            offset,
            len,
            capacity: self.storage.capacity(),
        })
    }

    /// Offset of `cursor` inside the data region and bytes left before the wrap
    fn position(&self, cursor: u64) -> (usize, usize) {
        let capacity = self.storage.capacity();
        let relative = cursor & (capacity - 1);
        (relative as usize, (capacity - relative) as usize)
    }

    fn read_header(&self, tail: u64) -> Result<PerfEventHeader, RingError> {
        let (relative, contiguous) = self.position(tail);
        let mut raw = [0u8; RECORD_HEADER_SIZE];

        if contiguous >= RECORD_HEADER_SIZE {
            raw.copy_from_slice(self.region(relative, RECORD_HEADER_SIZE)?);
        } else {
            let (first, second) = raw.split_at_mut(contiguous);
            first.copy_from_slice(self.region(relative, contiguous)?);
            second.copy_from_slice(self.region(0, RECORD_HEADER_SIZE - contiguous)?);
        }

        Ok(PerfEventHeader::from_bytes(&raw))
    }

    fn validate(&self, header: PerfEventHeader, tail: u64, head: u64) -> Result<(), RingError> {
        let size = u64::from(header.size);
        let capacity = self.storage.capacity();
        if usize::from(header.size) < RECORD_HEADER_SIZE || size > capacity || size > head - tail {
            return Err(RingError::CorruptRecord { tail, head, size: header.size, capacity });
        }
        Ok(())
    }

    fn read_record(&self, tail: u64, header: PerfEventHeader) -> Result<RawRecord<'_>, RingError> {
        let size = usize::from(header.size);
        let (relative, contiguous) = self.position(tail);

        if contiguous >= size {
            let bytes = Cow::Borrowed(self.region(relative, size)?);
            return Ok(RawRecord { header, bytes });
        }

        let mut copy = Vec::new();
        copy.try_reserve_exact(size).map_err(|_| RingError::AllocationFailed { bytes: size })?;
        copy.extend_from_slice(self.region(relative, contiguous)?);
        copy.extend_from_slice(self.region(0, size - contiguous)?);
        Ok(RawRecord { header, bytes: Cow::Owned(copy) })
    }
}

/// In-memory ring with a producer side, for tests and replay
///
/// Mirrors the kernel's behaviour: records are written at `head` and may
/// straddle the end of the data region.
#[derive(Debug, Clone)]
pub struct VecRing {
    data: Vec<u8>,
    head: u64,
    tail: u64,
}

impl VecRing {
    /// Empty ring with both cursors at zero
    ///
    /// # Errors
    /// Returns an error if `capacity` is not a power of two.
    pub fn new(capacity: usize) -> Result<Self, ProfilerError> {
        Self::starting_at(capacity, 0)
    }

    /// Empty ring with both cursors at `cursor`
    ///
    /// Useful to place the next record right before the wrap boundary.
    ///
    /// # Errors
    /// Returns an error if `capacity` is not a power of two.
    pub fn starting_at(capacity: usize, cursor: u64) -> Result<Self, ProfilerError> {
        if !capacity.is_power_of_two() {
            return Err(ProfilerError::InvalidBufferGeometry(format!(
                "{capacity} bytes is not a power of two"
            )));
        }
        Ok(Self { data: vec![0; capacity], head: cursor, tail: cursor })
    }

    /// Producer cursor
    #[must_use]
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Consumer cursor
    #[must_use]
    pub fn tail(&self) -> u64 {
        self.tail
    }

    /// Bytes the producer may still write without overrunning the consumer
    #[must_use]
    pub fn free_space(&self) -> u64 {
        self.data.len() as u64 - (self.head - self.tail)
    }

    /// Write raw record bytes at `head`, wrapping as needed
    ///
    /// Returns `false` (writing nothing) if the record does not fit.
    pub fn push_record(&mut self, record: &[u8]) -> bool {
        if record.len() as u64 > self.free_space() {
            return false;
        }
        let capacity = self.data.len();
        let start = (self.head % capacity as u64) as usize;
        let first = record.len().min(capacity - start);
        self.data[start..start + first].copy_from_slice(&record[..first]);
        self.data[..record.len() - first].copy_from_slice(&record[first..]);
        self.head += record.len() as u64;
        true
    }

    /// Write a `PERF_RECORD_SAMPLE` call-chain record
    pub fn push_sample(&mut self, ips: &[u64]) -> bool {
        self.push_record(&encode_callchain_sample(ips))
    }

    /// Write a `PERF_RECORD_LOST` overrun notification
    pub fn push_lost(&mut self, id: u64, lost: u64) -> bool {
        self.push_record(&encode_lost_record(id, lost))
    }

    /// Write a bare 8-byte header claiming `size` bytes (for corruption tests)
    pub fn push_header(&mut self, type_: u32, size: u16) -> bool {
        self.push_record(&PerfEventHeader { type_, misc: 0, size }.to_bytes())
    }
}

impl RingStorage for VecRing {
    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn load_head(&self) -> u64 {
        self.head
    }

    fn load_tail(&self) -> u64 {
        self.tail
    }

    fn store_tail(&mut self, tail: u64) {
        self.tail = tail;
    }

    fn bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.data.get(offset..offset.checked_add(len)?)
    }
}
