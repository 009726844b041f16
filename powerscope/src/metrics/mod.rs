//! Energy, CPU-time and GPU power metrics
//!
//! Each source is an opaque numeric counter read once per tick:
//!
//! - [`energy`]: RAPL `energy_uj` microjoule counter → watts
//! - [`cpu_time`]: `/proc/<pid>/stat` and `/proc/stat` ticks → CPU usage %
//! - [`gpu`]: [`GpuPowerSource`] implementations reporting milliwatts
//! - [`snapshot`]: [`MetricSampler`] and the previous → current deltas
//!
//! Read failures never stop the profiler; the affected value is reported as
//! unavailable for that tick and the previous reading stays the baseline.

pub mod cpu_time;
pub mod energy;
pub mod gpu;
pub mod snapshot;

pub use cpu_time::{cpu_usage_percent, ProcStat};
pub use energy::{power_watts, EnergyCounter, RaplCounter, DEFAULT_ENERGY_COUNTER};
pub use gpu::{GpuPowerSource, HwmonGpu, NoGpu, NvmlGpu};
pub use snapshot::{EnergyReading, MetricSampler, MetricSnapshot, TickMetrics};
