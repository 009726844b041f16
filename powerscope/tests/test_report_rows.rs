//! Report rows produced by the orchestrator against fake metric sources

use std::fs;
use std::path::Path;

use powerscope::domain::Pid;
use powerscope::export::HEADER;
use powerscope::metrics::{HwmonGpu, MetricSampler, ProcStat, RaplCounter};
use powerscope::profiling::{
    AttachedProcess, OutputSink, ProfilerConfig, RingBufferReader, SamplingOrchestrator, VecRing,
};
use powerscope::symbolization::AddressSpaceMap;
use tempfile::TempDir;

const PID: i32 = 4242;

fn write_proc(root: &Path, process_ticks: (u64, u64), system: [u64; 7]) {
    let (utime, stime) = process_ticks;
    fs::write(
        root.join(format!("{PID}/stat")),
        format!("{PID} (busy) R 1 {PID} {PID} 0 -1 0 0 0 0 0 {utime} {stime} 0 0 20 0 1 0 100"),
    )
    .unwrap();
    let [user, nice, sys, idle, iowait, irq, softirq] = system;
    fs::write(
        root.join("stat"),
        format!("cpu  {user} {nice} {sys} {idle} {iowait} {irq} {softirq} 0 0 0\n"),
    )
    .unwrap();
}

struct Fixture {
    dir: TempDir,
    orchestrator: SamplingOrchestrator<VecRing>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let proc_root = dir.path().join("proc");
    fs::create_dir_all(proc_root.join(PID.to_string())).unwrap();
    write_proc(&proc_root, (60, 40), [500, 0, 300, 9000, 0, 100, 100]);

    let energy = dir.path().join("energy_uj");
    fs::write(&energy, "1000000").unwrap();
    let gpu = dir.path().join("power1_average");
    fs::write(&gpu, "15250000").unwrap();

    let metrics = MetricSampler::new(
        Pid(PID),
        Some(Box::new(RaplCounter::open(&energy).unwrap())),
        ProcStat::new(&proc_root),
        Box::new(HwmonGpu::from_sensors(vec![gpu])),
    );
    let orchestrator = SamplingOrchestrator::from_parts(
        Box::new(AttachedProcess(Pid(PID))),
        RingBufferReader::new(VecRing::new(1024).unwrap()).unwrap(),
        Box::new(AddressSpaceMap::from_modules(Vec::new())),
        metrics,
        &ProfilerConfig::default(),
    );
    Fixture { dir, orchestrator }
}

#[test]
fn test_row_correlates_all_sources() {
    let Fixture { dir, mut orchestrator } = fixture();
    orchestrator.start().unwrap();

    // Between baseline and tick: +5 process ticks, +100 busy system ticks, +2 J
    write_proc(&dir.path().join("proc"), (63, 42), [560, 0, 330, 9100, 0, 105, 105]);
    fs::write(dir.path().join("energy_uj"), "3000000").unwrap();
    orchestrator.ring_mut().push_sample(&[0xabc, 0xdef]);

    let mut output = OutputSink::new(Vec::new(), false);
    orchestrator.step(&mut output).unwrap();
    let OutputSink::Report(writer) = output else { unreachable!() };
    let text = String::from_utf8(writer.into_inner()).unwrap();

    let mut lines = text.lines();
    assert_eq!(lines.next(), Some(HEADER));
    let fields: Vec<&str> = lines.next().unwrap().split(", ").collect();
    assert_eq!(fields.len(), 5);

    assert!(fields[0].ends_with('Z') && fields[0].contains('T'));
    assert_eq!(fields[0].split('.').nth(1).map(str::len), Some(7), "microseconds + Z");
    assert_eq!(fields[1], "0x0000000000000abc;0x0000000000000def;|");
    let watts: f64 = fields[2].parse().unwrap();
    assert!(watts > 0.0);
    assert_eq!(fields[2].split('.').nth(1).map(str::len), Some(6));
    assert_eq!(fields[3], "5.00");
    assert_eq!(fields[4], "15.250000");
}

#[test]
fn test_unavailable_sources_print_na() {
    let Fixture { dir, mut orchestrator } = fixture();
    orchestrator.start().unwrap();

    // Counters vanish mid-run: that tick reports NA and sampling continues
    fs::remove_file(dir.path().join("energy_uj")).unwrap();
    fs::remove_file(dir.path().join("proc/stat")).unwrap();
    fs::remove_file(dir.path().join("power1_average")).unwrap();

    let row = orchestrator.tick();
    assert_eq!(row.power_watts, None);
    assert_eq!(row.cpu_usage_percent, None);
    assert_eq!(row.gpu_power_watts, None);
    assert_eq!(row.callchains, "");

    let line = powerscope::export::format_row(&row);
    assert!(line.ends_with(", , NA, NA, NA"), "{line}");
}

#[test]
fn test_stalled_system_ticks_make_usage_unavailable() {
    let Fixture { dir: _dir, mut orchestrator } = fixture();
    orchestrator.start().unwrap();

    // Nothing rewritten: system delta is zero
    let row = orchestrator.tick();
    assert_eq!(row.cpu_usage_percent, None);
    assert_eq!(row.power_watts.map(|w| w == 0.0), Some(true));
}

#[test]
fn test_failed_read_does_not_blank_next_tick() {
    let Fixture { dir, mut orchestrator } = fixture();
    orchestrator.start().unwrap();

    // Tick 1: energy counter unreadable, /proc/stat gone
    fs::write(dir.path().join("energy_uj"), "garbage").unwrap();
    fs::remove_file(dir.path().join("proc/stat")).unwrap();
    let row = orchestrator.tick();
    assert_eq!(row.power_watts, None);
    assert_eq!(row.cpu_usage_percent, None);

    // Tick 2: both back, measured against the startup baseline
    fs::write(dir.path().join("energy_uj"), "3000000").unwrap();
    write_proc(&dir.path().join("proc"), (63, 42), [560, 0, 330, 9100, 0, 105, 105]);
    let row = orchestrator.tick();
    assert!(row.power_watts.is_some_and(|watts| watts > 0.0), "{row:?}");
    assert_eq!(row.cpu_usage_percent.map(|usage| format!("{usage:.2}")), Some("5.00".to_string()));
}
