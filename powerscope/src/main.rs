//! # powerscope - Main Entry Point
//!
//! Thin shim over the library:
//! - **Attach** (`powerscope <PROCESS>` or `--pid <PID>`): profile a running process
//! - **Spawn** (`powerscope -- <COMMAND>`): launch a command and profile it
//!
//! Report rows go to stdout (or `--output`); everything else goes to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::{Duration, Instant};

use powerscope::cli::{Args, TargetSelection};
use powerscope::domain::Pid;
use powerscope::preflight::run_preflight_checks;
use powerscope::process_lookup::find_process_by_name;
use powerscope::profiling::{
    AttachedProcess, OutputSink, SamplingOrchestrator, SpawnedProcess, TargetProcess,
};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    // perf_event_open and mmap report EACCES/EPERM through the error chain
    let denied = err.chain().any(|cause| {
        cause.downcast_ref::<io::Error>().is_some_and(|e| e.kind() == io::ErrorKind::PermissionDenied)
    });
    let msg = err.to_string().to_lowercase();
    if denied || msg.contains("permission denied") {
        EXIT_NOPERM
    } else if msg.contains("missing required argument") || msg.contains("invalid usage") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Turn the CLI target selection into a live target handle
///
/// A spawned command gets `--spawn-delay-ms` to start up before we attach.
async fn resolve_target(args: &Args) -> Result<Box<dyn TargetProcess>> {
    Ok(match args.target()? {
        TargetSelection::Name(name) => {
            let info = find_process_by_name(&name)?;
            info!("Resolved '{name}' to {} ({})", info.pid, info.exe_path.display());
            Box::new(AttachedProcess(info.pid))
        }
        TargetSelection::Pid(pid) => Box::new(AttachedProcess(Pid(pid))),
        TargetSelection::Spawn(command) => {
            let child = SpawnedProcess::spawn(&command)?;
            tokio::time::sleep(Duration::from_millis(args.spawn_delay_ms)).await;
            Box::new(child)
        }
    })
}

fn open_output(args: &Args) -> Result<Box<dyn Write>> {
    Ok(match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?,
        )),
        None => Box::new(io::stdout()),
    })
}

#[tokio::main(flavor = "current_thread")]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let config = args.to_config()?;

    let target = resolve_target(&args).await?;
    let pid = target.pid();

    // A spawned target is released when `target` drops on the error path
    run_preflight_checks(pid.0, config.user_only, &config.energy_counter, quiet)?;

    if !quiet {
        eprintln!("powerscope v{}", env!("CARGO_PKG_VERSION"));
        eprintln!("pid: {}", pid.0);
        eprintln!(
            "sampling: {} Hz, row every {} ms, {} ring pages",
            config.frequency_hz,
            config.interval.as_millis(),
            config.data_pages
        );
    }

    let mut orchestrator = SamplingOrchestrator::attach(target, &config)
        .with_context(|| format!("Failed to start sampling {pid}"))?;

    let mut output = OutputSink::new(open_output(&args)?, config.dump);
    if !quiet {
        if let Some(path) = &args.output {
            eprintln!("output: {}", path.display());
        }
    }

    let started = Instant::now();
    let reason = orchestrator.run(&mut output).await.context("Sampling failed")?;

    if !quiet {
        eprintln!("\n{reason}: {}", orchestrator.summary(started.elapsed()));
    }
    Ok(())
}
