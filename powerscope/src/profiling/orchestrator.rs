//! # Sampling Orchestrator
//!
//! Fixed-cadence loop that correlates call-chain samples with energy, CPU
//! and GPU metrics for one target process.
//!
//! ```text
//!  Initializing ──start()──▶ Sampling ──────────────────────▶ Terminated
//!   open source              │ sleep(interval)                 disable source
//!   map ring                 │ target alive? ── no ──────────▶ release target
//!   build address space      │ snapshot metrics
//!                            │ drain ring → decode → resolve → serialize
//!                            │ emit row
//!                            └─ loop (Ctrl+C / duration limit also end it)
//! ```
//!
//! Setup failures are fatal. Everything inside a tick is contained: a metric
//! that cannot be read is reported as unavailable and a bad drain only loses
//! that tick's unread records. [`SamplingOrchestrator::step`] surfaces the
//! drain error as a [`Severity::Recoverable`] [`ProfilerError`] and the loop
//! carries on; anything [`Severity::Fatal`] ends the run.

#![allow(clippy::cast_precision_loss)] // elapsed seconds for the summary

use log::{debug, info, warn};
use std::io::Write;
use std::time::Duration;
use tokio::time::Instant;

use super::callchain::CallChainSerializer;
use super::config::{GpuBackend, ProfilerConfig};
use super::diagnostics::DumpWriter;
use super::perf_setup::{MmapRing, SamplingSource};
use super::ring_buffer::{RingBufferReader, RingStorage};
use super::sample_decoder::{CallChainRecord, Decoded, SampleDecoder};
use super::target::TargetProcess;
use crate::domain::{Pid, ProfilerError, RingError, Severity};
use crate::export::{ReportRow, ReportWriter};
use crate::metrics::{
    EnergyCounter, GpuPowerSource, HwmonGpu, MetricSampler, MetricSnapshot, NoGpu, NvmlGpu,
    ProcStat, RaplCounter,
};
use crate::symbolization::{AddressSpaceMap, Resolve};

/// Why sampling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    ProcessExited,
    Interrupted,
    DurationLimit,
}

impl std::fmt::Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::ProcessExited => "target exited",
            Self::Interrupted => "interrupted",
            Self::DurationLimit => "duration limit reached",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Initializing,
    Sampling,
    Terminated(Termination),
}

/// Totals across the whole run, for the exit summary
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub ticks: u64,
    pub records: u64,
    pub callchains: u64,
    pub skipped: u64,
    pub lost_samples: u64,
    pub corrupt_drains: u64,
    pub discarded_bytes: u64,
}

/// Where each tick's output goes
pub enum OutputSink<W: Write> {
    Report(ReportWriter<W>),
    Dump(DumpWriter<W>),
}

impl<W: Write> OutputSink<W> {
    #[must_use]
    pub fn new(out: W, dump: bool) -> Self {
        if dump {
            Self::Dump(DumpWriter::new(out))
        } else {
            Self::Report(ReportWriter::new(out))
        }
    }

    fn is_dump(&self) -> bool {
        matches!(self, Self::Dump(_))
    }
}

pub struct SamplingOrchestrator<S: RingStorage = MmapRing> {
    target: Box<dyn TargetProcess>,
    source: Option<SamplingSource>,
    reader: RingBufferReader<S>,
    decoder: SampleDecoder,
    resolver: Box<dyn Resolve>,
    serializer: CallChainSerializer,
    metrics: MetricSampler,
    /// Last good reading of every metric source
    baseline: Option<MetricSnapshot>,
    /// Why the last drain stopped early, until [`Self::step`] reports it
    drain_error: Option<RingError>,
    /// Decoded chains kept for `--dump` output
    retained: Option<Vec<CallChainRecord>>,
    stats: RunStats,
    state: OrchestratorState,
    interval: Duration,
    duration: Option<Duration>,
}

impl SamplingOrchestrator<MmapRing> {
    /// Open the sampling source on `target`, map its ring, build the address
    /// space map, then enable sampling and take the baseline snapshot
    ///
    /// # Errors
    /// Any failure here is fatal and returned as-is
    pub fn attach(mut target: Box<dyn TargetProcess>, config: &ProfilerConfig) -> Result<Self, ProfilerError> {
        let pid = target.pid();
        if !target.is_alive() {
            return Err(ProfilerError::ProcessNotFound(pid));
        }
        let source = SamplingSource::open(pid, config.frequency_hz, config.user_only)?;
        let reader = RingBufferReader::new(source.map_ring(config.data_pages)?)?;
        let resolver = AddressSpaceMap::build(pid, config.demangle)?;
        let metrics = metric_sampler(pid, config);

        let mut orchestrator = Self::from_parts(target, reader, Box::new(resolver), metrics, config);
        orchestrator.source = Some(source);
        orchestrator.start()?;
        Ok(orchestrator)
    }
}

impl<S: RingStorage> SamplingOrchestrator<S> {
    /// Assemble an orchestrator from already-built components, in
    /// [`OrchestratorState::Initializing`]
    pub fn from_parts(
        target: Box<dyn TargetProcess>,
        reader: RingBufferReader<S>,
        resolver: Box<dyn Resolve>,
        metrics: MetricSampler,
        config: &ProfilerConfig,
    ) -> Self {
        Self {
            target,
            source: None,
            reader,
            decoder: SampleDecoder::default(),
            resolver,
            serializer: CallChainSerializer::new(),
            metrics,
            baseline: None,
            drain_error: None,
            retained: config.dump.then(Vec::new),
            stats: RunStats::default(),
            state: OrchestratorState::Initializing,
            interval: config.interval,
            duration: config.duration,
        }
    }

    #[must_use]
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    #[must_use]
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    #[must_use]
    pub fn pid(&self) -> Pid {
        self.target.pid()
    }

    /// Ring storage, for inspection
    #[must_use]
    pub fn ring(&self) -> &S {
        self.reader.storage()
    }

    /// Ring storage, for feeding synthetic records
    pub fn ring_mut(&mut self) -> &mut S {
        self.reader.storage_mut()
    }

    /// Reset and enable the sampling source and take the baseline snapshot
    ///
    /// # Errors
    /// Returns an error if the sampling source cannot be enabled
    pub fn start(&mut self) -> Result<(), ProfilerError> {
        if self.state != OrchestratorState::Initializing {
            return Ok(());
        }
        if let Some(source) = &self.source {
            source.enable()?;
        }
        self.baseline = Some(self.metrics.snapshot());
        self.state = OrchestratorState::Sampling;
        info!("Sampling {} every {:?}", self.target.pid(), self.interval);
        Ok(())
    }

    /// One sampling step: snapshot metrics, drain the ring, build the row
    ///
    /// Never fails; unavailable values are `None` in the row.
    pub fn tick(&mut self) -> ReportRow {
        let current = self.metrics.snapshot();
        let mut row_metrics = match &self.baseline {
            Some(baseline) => current.since(baseline, self.metrics.energy_wrap()),
            None => Default::default(),
        };
        row_metrics.gpu_power_watts = self.metrics.gpu_power_watts();
        let timestamp = current.timestamp;
        match &mut self.baseline {
            Some(baseline) => baseline.advance(current),
            None => self.baseline = Some(current),
        }

        let callchains = self.drain();
        self.stats.ticks += 1;

        ReportRow {
            timestamp,
            callchains,
            power_watts: row_metrics.power_watts,
            cpu_usage_percent: row_metrics.cpu_usage_percent,
            gpu_power_watts: row_metrics.gpu_power_watts,
        }
    }

    fn drain(&mut self) -> String {
        let decoder = &self.decoder;
        let resolver = &*self.resolver;
        let serializer = &mut self.serializer;
        let retained = &mut self.retained;
        let stats = &mut self.stats;

        let outcome = self.reader.drain(|record| match decoder.decode(&record) {
            Decoded::CallChain(chain) => {
                serializer.push(&chain, resolver);
                stats.callchains += 1;
                if let Some(retained) = retained.as_mut() {
                    retained.push(chain);
                }
            }
            Decoded::Lost(lost) => {
                warn!("Kernel dropped {} samples (ring buffer overrun, id {})", lost.lost, lost.id);
                stats.lost_samples += lost.lost;
            }
            Decoded::Skip(reason) => {
                debug!("Skipped record: {reason:?}");
                stats.skipped += 1;
            }
        });

        self.stats.records += outcome.records as u64;
        self.stats.discarded_bytes += outcome.discarded_bytes;
        if matches!(
            outcome.error,
            Some(RingError::CorruptRecord { .. } | RingError::OutOfBounds { .. } | RingError::TailAheadOfHead { .. })
        ) {
            self.stats.corrupt_drains += 1;
        }
        self.drain_error = outcome.error;
        self.serializer.take()
    }

    /// Tick and write the result to `output`
    ///
    /// # Errors
    /// Returns a fatal error if the output sink rejects the write, or a
    /// recoverable [`ProfilerError::Ring`] after the row was written when the
    /// drain stopped early
    pub fn step<W: Write>(&mut self, output: &mut OutputSink<W>) -> Result<(), ProfilerError> {
        if output.is_dump() && self.retained.is_none() {
            self.retained = Some(Vec::new());
        }
        let row = self.tick();
        match output {
            OutputSink::Report(writer) => writer.write_row(&row)?,
            OutputSink::Dump(writer) => {
                let chains = self.retained.as_mut().map(std::mem::take).unwrap_or_default();
                writer.write_tick(&self.reader.storage().control(), &chains, &*self.resolver)?;
            }
        }
        match self.drain_error.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Sample until the target exits, Ctrl+C, or the duration limit
    ///
    /// # Errors
    /// Returns an error if the source cannot be enabled or output fails;
    /// the source is disabled in either case
    pub async fn run<W: Write>(&mut self, output: &mut OutputSink<W>) -> Result<Termination, ProfilerError> {
        let result = self.sample_loop(output).await;
        let reason = match &result {
            Ok(reason) => *reason,
            Err(_) => Termination::Interrupted,
        };
        self.shutdown(reason);
        result
    }

    async fn sample_loop<W: Write>(&mut self, output: &mut OutputSink<W>) -> Result<Termination, ProfilerError> {
        self.start()?;
        if let OutputSink::Report(writer) = output {
            writer.write_header()?;
        }

        let deadline = self.duration.map(|limit| Instant::now() + limit);
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                _ = &mut ctrl_c => return Ok(Termination::Interrupted),
            }

            if !self.target.is_alive() {
                info!("{} has exited", self.target.pid());
                return Ok(Termination::ProcessExited);
            }

            match self.step(output) {
                Ok(()) => {}
                Err(e) if e.severity() == Severity::Recoverable => {
                    debug!("Tick {} continues after: {e}", self.stats.ticks);
                }
                Err(e) => return Err(e),
            }

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(Termination::DurationLimit);
            }
        }
    }

    /// Disable the sampling source and release the target
    pub fn shutdown(&mut self, reason: Termination) {
        if matches!(self.state, OrchestratorState::Terminated(_)) {
            return;
        }
        if let Some(source) = &self.source {
            if let Err(e) = source.disable() {
                warn!("{e}");
            }
        }
        self.target.release();
        self.state = OrchestratorState::Terminated(reason);
        info!("Sampling stopped: {reason}");
    }

    /// Human-readable exit summary
    #[must_use]
    pub fn summary(&self, elapsed: Duration) -> String {
        let stats = &self.stats;
        format!(
            "{} ticks in {:.1}s: {} call chains, {} records skipped, {} samples lost, {} corrupt drains",
            stats.ticks,
            elapsed.as_secs_f64(),
            stats.callchains,
            stats.skipped,
            stats.lost_samples,
            stats.corrupt_drains
        )
    }
}

impl<S: RingStorage> Drop for SamplingOrchestrator<S> {
    fn drop(&mut self) {
        if self.state == OrchestratorState::Sampling {
            self.shutdown(Termination::Interrupted);
        }
    }
}

/// Metric sources for `pid` as selected by `config`
///
/// A missing energy counter is not an error: power is reported as unavailable.
#[must_use]
pub fn metric_sampler(pid: Pid, config: &ProfilerConfig) -> MetricSampler {
    let energy: Option<Box<dyn EnergyCounter>> = match RaplCounter::open(&config.energy_counter) {
        Ok(counter) => Some(Box::new(counter)),
        Err(e) => {
            warn!("{e}; power will be reported as NA");
            None
        }
    };
    MetricSampler::new(pid, energy, ProcStat::default(), gpu_source(config.gpu))
}

/// GPU power source for `backend`, falling back to [`NoGpu`] when NVML is
/// missing
#[must_use]
pub fn gpu_source(backend: GpuBackend) -> Box<dyn GpuPowerSource> {
    match backend {
        GpuBackend::None => Box::new(NoGpu),
        GpuBackend::Hwmon => Box::new(HwmonGpu::discover()),
        GpuBackend::Nvml => match NvmlGpu::init() {
            Ok(gpu) => Box::new(gpu),
            Err(e) => {
                warn!("{e}; GPU power will be reported as NA");
                Box::new(NoGpu)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::VecRing;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    struct Table(HashMap<u64, Rc<str>>);

    impl Resolve for Table {
        fn resolve(&self, addr: u64) -> Option<Rc<str>> {
            self.0.get(&addr).cloned()
        }
    }

    /// Alive for a fixed number of checks
    struct Countdown {
        pid: Pid,
        remaining: Rc<Cell<u32>>,
        released: Rc<Cell<bool>>,
    }

    impl TargetProcess for Countdown {
        fn pid(&self) -> Pid {
            self.pid
        }

        fn is_alive(&mut self) -> bool {
            let left = self.remaining.get();
            self.remaining.set(left.saturating_sub(1));
            left > 0
        }

        fn release(&mut self) {
            self.released.set(true);
        }
    }

    fn own_pid() -> Pid {
        #[allow(clippy::cast_possible_wrap)]
        Pid(std::process::id() as i32)
    }

    fn orchestrator(alive_ticks: u32, config: &ProfilerConfig) -> (SamplingOrchestrator<VecRing>, Rc<Cell<bool>>) {
        let released = Rc::new(Cell::new(false));
        let target = Countdown {
            pid: own_pid(),
            remaining: Rc::new(Cell::new(alive_ticks)),
            released: Rc::clone(&released),
        };
        let resolver = Table(HashMap::from([(0x10, Rc::from("main")), (0x20, Rc::from("spin"))]));
        let reader = RingBufferReader::new(VecRing::new(256).unwrap()).unwrap();
        let metrics = MetricSampler::new(own_pid(), None, ProcStat::default(), Box::new(NoGpu));
        let orchestrator =
            SamplingOrchestrator::from_parts(Box::new(target), reader, Box::new(resolver), metrics, config);
        (orchestrator, released)
    }

    #[test]
    fn test_tick_correlates_chains_in_drain_order() {
        let (mut orch, _) = orchestrator(0, &ProfilerConfig::default());
        orch.start().unwrap();
        assert_eq!(orch.state(), OrchestratorState::Sampling);

        assert!(orch.ring_mut().push_sample(&[0x20, 0x10]));
        assert!(orch.ring_mut().push_sample(&[]));
        assert!(orch.ring_mut().push_sample(&[0x20, 0x30, 0x10]));

        let row = orch.tick();
        assert_eq!(row.callchains, "spin;main;||spin;0x0000000000000030;main;|");
        assert_eq!(row.power_watts, None);
        assert_eq!(row.gpu_power_watts, None);
        assert_eq!(orch.stats().callchains, 3);
        assert_eq!(orch.ring().tail(), orch.ring().head());

        // Nothing new: empty callchains, still one row
        assert_eq!(orch.tick().callchains, "");
        assert_eq!(orch.stats().ticks, 2);
    }

    #[test]
    fn test_lost_and_oversized_records_are_counted() {
        let (mut orch, _) = orchestrator(0, &ProfilerConfig::default());
        orch.start().unwrap();
        assert!(orch.ring_mut().push_lost(7, 12));
        assert!(orch.ring_mut().push_sample(&[0x10]));

        assert_eq!(orch.tick().callchains, "main;|");
        assert_eq!(orch.stats().lost_samples, 12);
        assert_eq!(orch.stats().records, 2);
    }

    #[test]
    fn test_corrupt_record_loses_only_that_tick() {
        let (mut orch, _) = orchestrator(0, &ProfilerConfig::default());
        orch.start().unwrap();
        assert!(orch.ring_mut().push_header(powerscope_common::PERF_RECORD_SAMPLE, 0));
        assert_eq!(orch.tick().callchains, "");
        assert_eq!(orch.stats().corrupt_drains, 1);

        assert!(orch.ring_mut().push_sample(&[0x20]));
        assert_eq!(orch.tick().callchains, "spin;|");
    }

    #[test]
    fn test_step_reports_drain_error_after_writing_row() {
        let (mut orch, _) = orchestrator(0, &ProfilerConfig::default());
        orch.start().unwrap();
        assert!(orch.ring_mut().push_header(powerscope_common::PERF_RECORD_SAMPLE, 0));

        let mut output = OutputSink::new(Vec::new(), false);
        let err = orch.step(&mut output).unwrap_err();
        assert!(matches!(err, ProfilerError::Ring(RingError::CorruptRecord { .. })));
        assert_eq!(err.severity(), Severity::Recoverable);
        let OutputSink::Report(writer) = &output else { unreachable!() };
        assert_eq!(writer.rows_written(), 1);

        // Error is reported once
        orch.step(&mut output).unwrap();
    }

    #[test]
    fn test_attach_to_missing_process() {
        let target = Box::new(crate::profiling::AttachedProcess(Pid(999_999_999)));
        let err = SamplingOrchestrator::attach(target, &ProfilerConfig::default()).err().unwrap();
        assert!(matches!(err, ProfilerError::ProcessNotFound(Pid(999_999_999))));
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn test_gpu_backend_selection() {
        assert_eq!(gpu_source(GpuBackend::None).device_count(), 0);
        // Without an NVIDIA driver this falls back to no GPU instead of failing
        let nvml = gpu_source(GpuBackend::Nvml);
        if nvml.device_count() == 0 {
            assert!(nvml.first_reading().is_err());
        }
    }

    #[test]
    fn test_report_output() {
        let (mut orch, _) = orchestrator(0, &ProfilerConfig::default());
        orch.start().unwrap();
        orch.ring_mut().push_sample(&[0x10]);

        let mut output = OutputSink::new(Vec::new(), false);
        orch.step(&mut output).unwrap();
        let OutputSink::Report(writer) = output else { unreachable!() };
        let text = String::from_utf8(writer.into_inner()).unwrap();

        let line = text.lines().nth(1).unwrap();
        let fields: Vec<&str> = line.split(", ").collect();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[1], "main;|");
        assert_eq!(fields[2], "NA");
        assert_eq!(fields[4], "NA");
    }

    #[test]
    fn test_dump_output() {
        let config = ProfilerConfig { dump: true, ..ProfilerConfig::default() };
        let (mut orch, _) = orchestrator(0, &config);
        orch.start().unwrap();
        orch.ring_mut().push_sample(&[0x10, 0x99]);

        let mut output = OutputSink::new(Vec::new(), true);
        orch.step(&mut output).unwrap();
        let OutputSink::Dump(writer) = output else { unreachable!() };
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert!(text.contains("sample 0: 2 frames"));
        assert!(text.contains("0x0000000000000010 main"));
        assert!(text.contains("0x0000000000000099 ??"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_target_exits() {
        let (mut orch, released) = orchestrator(3, &ProfilerConfig::default());
        let mut output = OutputSink::new(Vec::new(), false);

        let reason = orch.run(&mut output).await.unwrap();
        assert_eq!(reason, Termination::ProcessExited);
        assert_eq!(orch.state(), OrchestratorState::Terminated(Termination::ProcessExited));
        assert_eq!(orch.stats().ticks, 3);
        assert!(released.get());

        let OutputSink::Report(writer) = output else { unreachable!() };
        assert_eq!(writer.rows_written(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_continues_past_corrupt_drain() {
        let (mut orch, _) = orchestrator(3, &ProfilerConfig::default());
        assert!(orch.ring_mut().push_header(powerscope_common::PERF_RECORD_SAMPLE, 0));
        let mut output = OutputSink::new(Vec::new(), false);

        assert_eq!(orch.run(&mut output).await.unwrap(), Termination::ProcessExited);
        assert_eq!(orch.stats().ticks, 3);
        assert_eq!(orch.stats().corrupt_drains, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_at_duration_limit() {
        let config = ProfilerConfig {
            interval: Duration::from_millis(10),
            duration: Some(Duration::from_millis(50)),
            ..ProfilerConfig::default()
        };
        let (mut orch, _) = orchestrator(u32::MAX, &config);
        let mut output = OutputSink::new(Vec::new(), false);

        assert_eq!(orch.run(&mut output).await.unwrap(), Termination::DurationLimit);
        assert_eq!(orch.stats().ticks, 5);
        assert!(orch.summary(Duration::from_millis(1500)).starts_with("5 ticks in 1.5s: 0 call chains"));
    }
}
