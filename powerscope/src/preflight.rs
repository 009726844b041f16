//! Pre-flight checks for powerscope
//!
//! Validates system requirements before opening the sampling source.
//! Provides clear, actionable error messages when requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use anyhow::{bail, Context, Result};
use log::warn;
use std::path::Path;

const PARANOID_PATH: &str = "/proc/sys/kernel/perf_event_paranoid";

/// Run all pre-flight checks for sampling `pid`
///
/// # Errors
/// Returns an error if the process is gone, its maps are unreadable, or
/// `perf_event_paranoid` forbids the requested event
pub fn run_preflight_checks(pid: i32, user_only: bool, energy_counter: &Path, quiet: bool) -> Result<()> {
    check_process_exists(pid)?;
    check_proc_access(pid)?;
    check_perf_paranoid(user_only)?;
    if !quiet {
        check_energy_counter(energy_counter);
    }
    Ok(())
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions
    unsafe { libc::geteuid() == 0 }
}

/// Check that `perf_event_paranoid` allows sampling another process
///
/// - `<= 1`: kernel and user samples allowed
/// - `2`: user space only (`--user-only`)
/// - `> 2`: no unprivileged perf events at all
fn check_perf_paranoid(user_only: bool) -> Result<()> {
    if is_root() {
        return Ok(());
    }
    let Ok(text) = std::fs::read_to_string(PARANOID_PATH) else {
        // Unknown: let perf_event_open decide
        return Ok(());
    };
    let level: i32 = text.trim().parse().with_context(|| format!("Unexpected {PARANOID_PATH}: {text:?}"))?;
    paranoid_allows(level, user_only)
}

fn paranoid_allows(level: i32, user_only: bool) -> Result<()> {
    if level > 2 {
        bail!(
            "Permission denied: perf_event_paranoid is {level}, which blocks unprivileged sampling.\n\n\
             Run with sudo, or: sudo sysctl kernel.perf_event_paranoid=1"
        );
    }
    if level == 2 && !user_only {
        bail!(
            "Permission denied: perf_event_paranoid is 2, which blocks kernel call chains.\n\n\
             Run with sudo, pass --user-only, or: sudo sysctl kernel.perf_event_paranoid=1"
        );
    }
    Ok(())
}

/// Warn (without failing) when the energy counter cannot be read
fn check_energy_counter(path: &Path) {
    if let Err(e) = std::fs::read_to_string(path) {
        warn!("Energy counter {} unreadable ({e}); the power column will be NA", path.display());
    }
}

/// Check if the target process exists
///
/// # Errors
/// Returns an error if `/proc/<pid>` does not exist
pub fn check_process_exists(pid: i32) -> Result<()> {
    let proc_path = format!("/proc/{pid}");
    if !Path::new(&proc_path).exists() {
        bail!(
            "Process {pid} not found.\n\n\
             Is the process still running? Check with: ps -p {pid}"
        );
    }
    Ok(())
}

/// Check if we can read the process's memory maps
///
/// # Errors
/// Returns an error if `/proc/<pid>/maps` is unreadable
pub fn check_proc_access(pid: i32) -> Result<()> {
    let maps_path = format!("/proc/{pid}/maps");
    std::fs::read_to_string(&maps_path).with_context(|| {
        format!(
            "Cannot read {maps_path}\n\n\
             This usually means:\n\
             - The process doesn't exist (check: ps -p {pid})\n\
             - Permission denied (run with sudo)\n\
             - /proc is not mounted"
        )
    })?;
    Ok(())
}
