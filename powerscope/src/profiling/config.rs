use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

use crate::metrics::DEFAULT_ENERGY_COUNTER;

/// GPU power backend selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum GpuBackend {
    /// Report GPU power as unavailable
    #[default]
    None,
    /// NVIDIA GPUs through `libnvidia-ml`
    Nvml,
    /// DRM hwmon `power1_average` sensors
    Hwmon,
}

/// Validated settings consumed by the sampling orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct ProfilerConfig {
    /// Target sampling rate in Hz
    pub frequency_hz: u64,
    /// Time between report rows
    pub interval: Duration,
    /// Ring buffer data pages (power of two)
    pub data_pages: usize,
    /// Stop after this long; `None` runs until the target exits or Ctrl+C
    pub duration: Option<Duration>,
    pub user_only: bool,
    pub demangle: bool,
    pub energy_counter: PathBuf,
    pub gpu: GpuBackend,
    /// Print ring state and per-sample symbols instead of report rows
    pub dump: bool,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 100,
            interval: Duration::from_millis(5),
            data_pages: 8,
            duration: None,
            user_only: false,
            demangle: true,
            energy_counter: PathBuf::from(DEFAULT_ENERGY_COUNTER),
            gpu: GpuBackend::None,
            dump: false,
        }
    }
}
