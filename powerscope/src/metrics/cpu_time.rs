//! CPU time accounting from procfs
//!
//! - Process: `utime + stime` (fields 14 and 15 of `/proc/<pid>/stat`)
//! - System: busy ticks from the aggregate `cpu` line of `/proc/stat`,
//!   `user + nice + system + irq + softirq`
//!
//! Both are in `USER_HZ` ticks, so utilization is a plain ratio of deltas.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{MetricError, Pid, Ticks};

/// Reader for process and system CPU time under a procfs root
#[derive(Debug, Clone)]
pub struct ProcStat {
    root: PathBuf,
}

impl Default for ProcStat {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcStat {
    /// Use `root` in place of `/proc`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Accumulated user + system ticks of one process
    ///
    /// # Errors
    /// Returns an error if the stat file is missing or malformed
    pub fn process_ticks(&self, pid: Pid) -> Result<Ticks, MetricError> {
        let path = self.root.join(pid.0.to_string()).join("stat");
        let text = read(&path)?;
        parse_process_stat(&text).ok_or_else(|| MetricError::parse(&path, "missing utime/stime"))
    }

    /// System-wide busy ticks across all CPUs
    ///
    /// # Errors
    /// Returns an error if `/proc/stat` is missing or malformed
    pub fn system_ticks(&self) -> Result<Ticks, MetricError> {
        let path = self.root.join("stat");
        let text = read(&path)?;
        parse_system_stat(&text).ok_or_else(|| MetricError::parse(&path, "missing aggregate cpu line"))
    }
}

fn read(path: &Path) -> Result<String, MetricError> {
    fs::read_to_string(path).map_err(|e| MetricError::read(path, e))
}

/// Extract `utime + stime` from the contents of `/proc/<pid>/stat`
///
/// The command name (field 2) may contain spaces and parentheses, so fields
/// are counted from the last `)`.
#[must_use]
pub fn parse_process_stat(text: &str) -> Option<Ticks> {
    let (_, rest) = text.rsplit_once(')')?;
    // rest starts at field 3 (state); utime is field 14
    let mut fields = rest.split_whitespace().skip(11);
    let utime: u64 = fields.next()?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(Ticks(utime + stime))
}

/// Extract busy ticks from the aggregate `cpu` line of `/proc/stat`
#[must_use]
pub fn parse_system_stat(text: &str) -> Option<Ticks> {
    let line = text.lines().find(|line| line.split_whitespace().next() == Some("cpu"))?;
    let values: Vec<u64> =
        line.split_whitespace().skip(1).map(str::parse).collect::<Result<_, _>>().ok()?;
    // user nice system idle iowait irq softirq ...
    let busy = [0, 1, 2, 5, 6].iter().map(|&i| values.get(i).copied()).sum::<Option<u64>>()?;
    Some(Ticks(busy))
}

/// Share of system busy time spent in the target, in percent
///
/// `None` when the system counter did not advance.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cpu_usage_percent(process_delta: u64, system_delta: u64) -> Option<f64> {
    (system_delta > 0).then(|| 100.0 * process_delta as f64 / system_delta as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const PID_STAT: &str = "4242 (busy (worker) 1) R 1 4242 4242 0 -1 4194304 120 0 0 0 \
                            37 5 0 0 20 0 1 0 1234 10000 200 18446744073709551615";

    const PROC_STAT: &str = "cpu  100 10 50 9000 20 3 7 0 0 0\n\
                             cpu0 50 5 25 4500 10 1 3 0 0 0\n\
                             intr 12345\n";

    #[test]
    fn test_process_stat_with_awkward_comm() {
        assert_eq!(parse_process_stat(PID_STAT), Some(Ticks(42)));
    }

    #[test]
    fn test_process_stat_truncated() {
        assert_eq!(parse_process_stat("1 (x) R 1 2 3"), None);
        assert_eq!(parse_process_stat("garbage"), None);
    }

    #[test]
    fn test_system_stat_busy_ticks() {
        assert_eq!(parse_system_stat(PROC_STAT), Some(Ticks(100 + 10 + 50 + 3 + 7)));
        assert_eq!(parse_system_stat("cpu0 1 2 3\n"), None);
    }

    #[test]
    fn test_usage_percent() {
        let usage = cpu_usage_percent(5, 100).unwrap();
        assert_eq!(format!("{usage:.2}"), "5.00");
        assert_eq!(cpu_usage_percent(5, 0), None);
    }

    #[test]
    fn test_reads_from_fake_procfs() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("4242")).unwrap();
        fs::write(root.path().join("4242/stat"), PID_STAT).unwrap();
        fs::write(root.path().join("stat"), PROC_STAT).unwrap();

        let proc_stat = ProcStat::new(root.path());
        assert_eq!(proc_stat.process_ticks(Pid(4242)).unwrap(), Ticks(42));
        assert_eq!(proc_stat.system_ticks().unwrap(), Ticks(170));
        assert!(matches!(proc_stat.process_ticks(Pid(1)), Err(MetricError::Read { .. })));
    }

    #[test]
    fn test_reads_own_process() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = Pid(std::process::id() as i32);
        let proc_stat = ProcStat::default();
        assert!(proc_stat.process_ticks(pid).is_ok());
        assert!(proc_stat.system_ticks().unwrap().0 > 0);
    }
}
