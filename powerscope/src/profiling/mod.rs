//! Profiling core modules
//!
//! Everything between the kernel sampling source and a finished report row:
//! - Sampling source setup and the shared mmap ring
//! - Lock-free ring buffer consumer
//! - Record decoding and call-chain serialization
//! - Target process handles
//! - The per-tick orchestrator
//! - Debug dump output

pub mod callchain;
pub mod config;
pub mod diagnostics;
pub mod orchestrator;
pub mod perf_setup;
pub mod ring_buffer;
pub mod sample_decoder;
pub mod target;

// Re-export common types
pub use callchain::{hex_token, serialize, CallChainSerializer};
pub use config::{GpuBackend, ProfilerConfig};
pub use diagnostics::DumpWriter;
pub use orchestrator::{
    gpu_source, metric_sampler, OrchestratorState, OutputSink, RunStats, SamplingOrchestrator, Termination,
};
pub use perf_setup::{MmapRing, SamplingSource};
pub use ring_buffer::{ControlSnapshot, DrainOutcome, RawRecord, RingBufferReader, RingStorage, VecRing};
pub use sample_decoder::{
    encode_callchain_sample, encode_lost_record, CallChainRecord, Decoded, LostRecord,
    SampleDecoder, SkipReason,
};
pub use target::{AttachedProcess, SpawnedProcess, TargetProcess};
