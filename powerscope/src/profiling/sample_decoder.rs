//! Typed decoding of raw ring-buffer records
//!
//! With `sample_type = PERF_SAMPLE_CALLCHAIN` the kernel emits samples as
//!
//! ```text
//! ┌──────────────────────┬──────────┬──────────┬─────┬──────────────┐
//! │ perf_event_header(8) │ nr (u64) │ ip[0]    │ ... │ ip[nr - 1]   │
//! └──────────────────────┴──────────┴──────────┴─────┴──────────────┘
//! ```
//!
//! and overrun notifications as `header | id (u64) | lost (u64)`. Every other
//! record kind is skipped so newer kernels can add kinds without breaking us.

use log::{debug, warn};
use powerscope_common::{
    PerfEventHeader, MAX_CALLCHAIN_FRAMES, PERF_RECORD_LOST, PERF_RECORD_SAMPLE,
    RECORD_HEADER_SIZE,
};

use super::ring_buffer::RawRecord;

const WORD: usize = std::mem::size_of::<u64>();

/// A decoded call-chain sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallChainRecord {
    pub header: PerfEventHeader,
    /// Instruction addresses, innermost frame first
    pub frames: Vec<u64>,
}

impl CallChainRecord {
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Kernel overrun notification: `lost` samples were overwritten
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LostRecord {
    pub id: u64,
    pub lost: u64,
}

/// Why a record produced no sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Record kind we do not consume (mmap, comm, throttle, ...)
    Ignored(u32),
    /// `nr` above [`MAX_CALLCHAIN_FRAMES`]
    TooManyFrames(u64),
    /// Body shorter than its declared contents
    Truncated { needed: usize, available: usize },
}

/// Result of decoding one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    CallChain(CallChainRecord),
    Lost(LostRecord),
    Skip(SkipReason),
}

/// Decodes raw records into call-chain samples
#[derive(Debug, Clone, Copy)]
pub struct SampleDecoder {
    max_frames: u64,
}

impl Default for SampleDecoder {
    fn default() -> Self {
        Self { max_frames: MAX_CALLCHAIN_FRAMES }
    }
}

impl SampleDecoder {
    /// Classify and decode one record
    ///
    /// Never fails: malformed samples become [`Decoded::Skip`] and are logged.
    #[must_use]
    pub fn decode(&self, record: &RawRecord<'_>) -> Decoded {
        let body = record.body();
        match record.header.type_ {
            PERF_RECORD_SAMPLE => self.decode_sample(record.header, body),
            PERF_RECORD_LOST => match (read_word(body, 0), read_word(body, 1)) {
                (Some(id), Some(lost)) => Decoded::Lost(LostRecord { id, lost }),
                _ => Decoded::Skip(SkipReason::Truncated { needed: 2 * WORD, available: body.len() }),
            },
            other => {
                debug!("Ignoring record kind {other} ({} bytes)", record.header.size);
                Decoded::Skip(SkipReason::Ignored(other))
            }
        }
    }

    fn decode_sample(&self, header: PerfEventHeader, body: &[u8]) -> Decoded {
        let Some(nr) = read_word(body, 0) else {
            return Decoded::Skip(SkipReason::Truncated { needed: WORD, available: body.len() });
        };

        if nr > self.max_frames {
            warn!("Dropping sample reporting {nr} frames (limit {})", self.max_frames);
            return Decoded::Skip(SkipReason::TooManyFrames(nr));
        }

        // nr <= max_frames, so this cannot overflow
        #[allow(clippy::cast_possible_truncation)]
        let needed = WORD * (1 + nr as usize);
        if body.len() < needed {
            warn!("Dropping sample with {nr} frames in a {}-byte body", body.len());
            return Decoded::Skip(SkipReason::Truncated { needed, available: body.len() });
        }

        let frames = body[WORD..needed]
            .chunks_exact(WORD)
            .map(|chunk| u64::from_ne_bytes(chunk.try_into().unwrap_or([0; WORD])))
            .collect();

        Decoded::CallChain(CallChainRecord { header, frames })
    }
}

fn read_word(body: &[u8], index: usize) -> Option<u64> {
    let start = index * WORD;
    let bytes = body.get(start..start + WORD)?;
    Some(u64::from_ne_bytes(bytes.try_into().ok()?))
}

fn encode(type_: u32, words: impl ExactSizeIterator<Item = u64>) -> Vec<u8> {
    let size = RECORD_HEADER_SIZE + WORD * words.len();
    let size16 = u16::try_from(size).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&PerfEventHeader { type_, misc: 0, size: size16 }.to_bytes());
    for word in words {
        out.extend_from_slice(&word.to_ne_bytes());
    }
    out
}

/// Wire form of a `PERF_RECORD_SAMPLE` carrying only a call chain
#[must_use]
pub fn encode_callchain_sample(ips: &[u64]) -> Vec<u8> {
    let words: Vec<u64> = std::iter::once(ips.len() as u64).chain(ips.iter().copied()).collect();
    encode(PERF_RECORD_SAMPLE, words.into_iter())
}

/// Wire form of a `PERF_RECORD_LOST` notification
#[must_use]
pub fn encode_lost_record(id: u64, lost: u64) -> Vec<u8> {
    encode(PERF_RECORD_LOST, [id, lost].into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    fn raw(bytes: &[u8]) -> RawRecord<'_> {
        let header = PerfEventHeader::from_bytes(bytes[..RECORD_HEADER_SIZE].try_into().unwrap());
        RawRecord { header, bytes: Cow::Borrowed(bytes) }
    }

    #[test]
    fn test_decodes_callchain() {
        let bytes = encode_callchain_sample(&[0x401000, 0x401234]);
        let Decoded::CallChain(record) = SampleDecoder::default().decode(&raw(&bytes)) else {
            panic!("expected a call chain");
        };
        assert_eq!(record.frames, vec![0x401000, 0x401234]);
        assert_eq!(record.frame_count(), 2);
    }

    #[test]
    fn test_empty_callchain() {
        let bytes = encode_callchain_sample(&[]);
        assert_eq!(
            SampleDecoder::default().decode(&raw(&bytes)),
            Decoded::CallChain(CallChainRecord {
                header: PerfEventHeader { type_: PERF_RECORD_SAMPLE, misc: 0, size: 16 },
                frames: vec![],
            })
        );
    }

    #[test]
    fn test_frame_count_above_ceiling_is_skipped() {
        let frames: Vec<u64> = (0..=MAX_CALLCHAIN_FRAMES).collect();
        let bytes = encode_callchain_sample(&frames);
        assert_eq!(
            SampleDecoder::default().decode(&raw(&bytes)),
            Decoded::Skip(SkipReason::TooManyFrames(MAX_CALLCHAIN_FRAMES + 1))
        );
    }

    #[test]
    fn test_frame_count_at_ceiling_is_kept() {
        let frames: Vec<u64> = (0..MAX_CALLCHAIN_FRAMES).collect();
        let bytes = encode_callchain_sample(&frames);
        assert!(matches!(SampleDecoder::default().decode(&raw(&bytes)), Decoded::CallChain(_)));
    }

    #[test]
    fn test_truncated_sample_is_skipped() {
        let mut bytes = encode_callchain_sample(&[1, 2, 3]);
        bytes.truncate(RECORD_HEADER_SIZE + 2 * WORD);
        assert!(matches!(
            SampleDecoder::default().decode(&raw(&bytes)),
            Decoded::Skip(SkipReason::Truncated { .. })
        ));
    }

    #[test]
    fn test_lost_record() {
        let bytes = encode_lost_record(7, 42);
        assert_eq!(
            SampleDecoder::default().decode(&raw(&bytes)),
            Decoded::Lost(LostRecord { id: 7, lost: 42 })
        );
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        let bytes = PerfEventHeader { type_: 1, misc: 0, size: 8 }.to_bytes();
        assert_eq!(
            SampleDecoder::default().decode(&raw(&bytes)),
            Decoded::Skip(SkipReason::Ignored(1))
        );
    }
}
