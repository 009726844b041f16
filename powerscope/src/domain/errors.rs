//! Structured error types for powerscope
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Every error knows whether it may end the run ([`Severity::Fatal`], setup
//! only) or must be contained within the current tick
//! ([`Severity::Recoverable`]).

use super::types::Pid;
use std::path::PathBuf;
use thiserror::Error;

/// Whether an error may terminate the profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Setup failure: abort with a diagnostic and a non-zero exit code
    Fatal,
    /// Per-tick failure: log, mark the affected value unavailable, continue
    Recoverable,
}

#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Process {0} not found")]
    ProcessNotFound(Pid),

    #[error("Failed to open sampling source for {pid}: {source}")]
    SamplingSourceUnavailable {
        pid: Pid,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to {action} sampling source: {source}")]
    SamplingControlFailed {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map ring buffer ({bytes} bytes): {source}")]
    BufferMapFailed {
        bytes: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid ring buffer geometry: {0}")]
    InvalidBufferGeometry(String),

    #[error("Failed to build address space for {pid}: {reason}")]
    AddressSpaceInit { pid: Pid, reason: String },

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ProfilerError {
    /// Classify this error for the orchestrator's propagation policy
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self {
            Self::Ring(_) => Severity::Recoverable,
            Self::ProcessNotFound(_)
            | Self::SamplingSourceUnavailable { .. }
            | Self::SamplingControlFailed { .. }
            | Self::BufferMapFailed { .. }
            | Self::InvalidBufferGeometry(_)
            | Self::AddressSpaceInit { .. }
            | Self::Io(_) => Severity::Fatal,
        }
    }
}

/// Failures while draining the shared ring buffer
///
/// All of these abort the current drain only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("Corrupt record at tail {tail}: size {size} (head {head}, capacity {capacity})")]
    CorruptRecord { tail: u64, head: u64, size: u16, capacity: u64 },

    #[error("Consumer tail {tail} is ahead of producer head {head}")]
    TailAheadOfHead { tail: u64, head: u64 },

    #[error("Read of {len} bytes at offset {offset} is outside the {capacity}-byte data region")]
    OutOfBounds { offset: usize, len: usize, capacity: u64 },

    #[error("Failed to allocate {bytes} bytes for a wrapped record")]
    AllocationFailed { bytes: usize },
}

/// Failures while reading an energy, CPU-time or GPU counter
///
/// The metric sampler logs these and reports the value as unavailable; they
/// never leave the tick they happened in.
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("No {0} counter available")]
    NoCounter(&'static str),

    #[error("NVML unavailable: {0}")]
    NvmlInit(#[source] nvml_wrapper::error::NvmlError),

    #[error("Failed to read power of GPU {device}: {source}")]
    GpuDevice {
        device: u32,
        #[source]
        source: nvml_wrapper::error::NvmlError,
    },
}

impl MetricError {
    pub(crate) fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Parse { path: path.into(), reason: reason.into() }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read { path: path.into(), source }
    }
}
