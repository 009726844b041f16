//! Point-in-time metric snapshots and per-tick derived values
//!
//! ```text
//!   baseline ──────┐
//!                  ├─▶ TickMetrics { power, cpu usage }
//!   snapshot(t1) ──┘        (baseline → current)
//!        │
//!        └─▶ baseline.advance()
//! ```
//!
//! A source that fails to read is unavailable for that tick only: the
//! baseline keeps its last good reading, so the next successful tick measures
//! across the gap.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::time::Instant;

use super::cpu_time::{cpu_usage_percent, ProcStat};
use super::energy::{energy_delta, power_watts, EnergyCounter};
use super::gpu::GpuPowerSource;
use crate::domain::{MetricError, Pid, Ticks};

/// One energy counter reading and when it was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnergyReading {
    pub microjoules: u64,
    /// Monotonic capture time, used for elapsed time
    pub taken_at: Instant,
}

/// Counter values captured at one instant
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub timestamp: DateTime<Utc>,
    pub energy: Option<EnergyReading>,
    pub process_ticks: Option<Ticks>,
    pub system_ticks: Option<Ticks>,
}

/// Values derived from two consecutive snapshots plus the GPU reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickMetrics {
    pub power_watts: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub gpu_power_watts: Option<f64>,
}

impl MetricSnapshot {
    /// Power and CPU usage over the interval from `previous` to `self`
    #[must_use]
    pub fn since(&self, previous: &MetricSnapshot, energy_wrap: Option<u64>) -> TickMetrics {
        let power_watts = match (previous.energy, self.energy) {
            (Some(before), Some(after)) => {
                let elapsed = after.taken_at.saturating_duration_since(before.taken_at);
                energy_delta(before.microjoules, after.microjoules, energy_wrap)
                    .and_then(|delta| power_watts(delta, elapsed))
            }
            _ => None,
        };

        let process_delta = previous.process_ticks.zip(self.process_ticks).and_then(|(a, b)| b.since(a));
        let system_delta = previous.system_ticks.zip(self.system_ticks).and_then(|(a, b)| b.since(a));
        let cpu_usage_percent = match (process_delta, system_delta) {
            (Some(process), Some(system)) => {
                let usage = cpu_usage_percent(process, system);
                if usage.is_none() {
                    debug!("System CPU ticks did not advance; usage unavailable this tick");
                }
                usage
            }
            _ => None,
        };

        TickMetrics { power_watts, cpu_usage_percent, gpu_power_watts: None }
    }

    /// Move this baseline forward to `current`, keeping the last good
    /// reading of every source `current` is missing
    ///
    /// Process and system ticks only move together so their deltas always
    /// span the same interval.
    pub fn advance(&mut self, current: MetricSnapshot) {
        self.timestamp = current.timestamp;
        if current.energy.is_some() {
            self.energy = current.energy;
        }
        if let (Some(process), Some(system)) = (current.process_ticks, current.system_ticks) {
            self.process_ticks = Some(process);
            self.system_ticks = Some(system);
        }
    }
}

/// Reads every metric source for one target process
pub struct MetricSampler {
    pid: Pid,
    energy: Option<Box<dyn EnergyCounter>>,
    proc_stat: ProcStat,
    gpu: Box<dyn GpuPowerSource>,
    /// Sources that already logged a failure at `warn`
    warned: WarnedSources,
}

#[derive(Default)]
struct WarnedSources {
    energy: bool,
    process: bool,
    system: bool,
    gpu: bool,
}

impl MetricSampler {
    #[must_use]
    pub fn new(
        pid: Pid,
        energy: Option<Box<dyn EnergyCounter>>,
        proc_stat: ProcStat,
        gpu: Box<dyn GpuPowerSource>,
    ) -> Self {
        Self { pid, energy, proc_stat, gpu, warned: WarnedSources::default() }
    }

    /// Wrap range of the energy counter, if any
    #[must_use]
    pub fn energy_wrap(&self) -> Option<u64> {
        self.energy.as_ref().and_then(|counter| counter.wrap_range())
    }

    /// Read every counter now
    pub fn snapshot(&mut self) -> MetricSnapshot {
        let energy = match &self.energy {
            Some(counter) => ok_or_log(counter.read_microjoules(), &mut self.warned.energy)
                .map(|microjoules| EnergyReading { microjoules, taken_at: Instant::now() }),
            None => None,
        };
        let process_ticks = ok_or_log(self.proc_stat.process_ticks(self.pid), &mut self.warned.process);
        let system_ticks = ok_or_log(self.proc_stat.system_ticks(), &mut self.warned.system);

        MetricSnapshot { timestamp: Utc::now(), energy, process_ticks, system_ticks }
    }

    /// Current GPU draw in watts
    pub fn gpu_power_watts(&mut self) -> Option<f64> {
        if self.gpu.device_count() == 0 {
            return None;
        }
        ok_or_log(self.gpu.first_reading(), &mut self.warned.gpu).map(|milliwatts| milliwatts / 1_000.0)
    }
}

/// First failure of a source is a warning, repeats are debug noise
fn ok_or_log<T>(result: Result<T, MetricError>, warned: &mut bool) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) if !*warned => {
            warn!("{e}; reporting NA");
            *warned = true;
            None
        }
        Err(e) => {
            debug!("{e}");
            None
        }
    }
}
