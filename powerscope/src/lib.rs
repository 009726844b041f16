//! # powerscope - Call-chain, Power and CPU Usage Profiler
//!
//! powerscope samples the call stacks of a running process with a hardware
//! instruction counter and correlates them, tick by tick, with system energy
//! draw, the process's share of CPU time and (optionally) GPU power.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Target Process                           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ retired instructions
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Kernel perf_event (sampling)                    │
//! │  PERF_COUNT_HW_INSTRUCTIONS, freq mode, PERF_SAMPLE_CALLCHAIN   │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ shared mmap ring (head / tail)
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   powerscope (This Crate)                       │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐         │
//! │  │  RingBuffer  │──▶│   Sample     │──▶│  CallChain   │         │
//! │  │   Reader     │   │   Decoder    │   │  Serializer  │         │
//! │  └──────────────┘   └──────────────┘   └──────┬───────┘         │
//! │                                               │ ▲               │
//! │  ┌──────────────┐                             │ │ symbols       │
//! │  │   Metrics    │                      ┌──────┴─┴─────┐         │
//! │  │ RAPL / proc  │                      │ AddressSpace │         │
//! │  │    / GPU     │                      │     Map      │         │
//! │  └──────┬───────┘                      └──────────────┘         │
//! │         ▼                                                       │
//! │  ┌─────────────────────────────────────────┐                    │
//! │  │ SamplingOrchestrator → one row per tick │                    │
//! │  └─────────────────────────────────────────┘                    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`profiling`]: sampling source, ring buffer consumer, record decoding,
//!   call-chain serialization, and the per-tick orchestrator
//! - [`symbolization`]: `/proc/<pid>/maps` + ELF/DWARF symbol resolution
//! - [`metrics`]: RAPL energy, procfs CPU ticks, GPU power sources
//! - [`export`]: the `timestamp, callchains, power, resource_usage, gpu_power` stream
//! - [`cli`]: command-line arguments and their conversion to a config
//! - [`domain`]: core types (`Pid`, `Ticks`) and errors
//! - [`preflight`] / [`process_lookup`]: checks and PID discovery before attach
//!
//! ## Typical Usage
//!
//! ```bash
//! # Attach to a running process by name, one row every 5 ms
//! sudo powerscope my-app
//!
//! # Spawn a workload, sample at 1 kHz for 10 seconds
//! sudo powerscope -F 1000 --duration 10 --output run.csv -- ./busy-chain
//! ```
//!
//! ## Key Concepts
//!
//! - **Ring buffer**: lock-free kernel→userspace record queue with monotonic cursors
//! - **Wraparound**: records may straddle the end of the buffer and are reassembled
//! - **PIE/ASLR**: runtime addresses are mapped back to file offsets before lookup
//! - **RAPL**: Intel/AMD package energy counter exposed through powercap

pub mod cli;
pub mod domain;
pub mod export;
pub mod metrics;
pub mod preflight;
pub mod process_lookup;
pub mod profiling;
pub mod symbolization;
