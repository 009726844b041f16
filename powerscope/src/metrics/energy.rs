//! RAPL energy counter
//!
//! `energy_uj` is a monotonically increasing microjoule counter that wraps
//! at `max_energy_range_uj`. Power over a tick is the counter delta divided
//! by the elapsed wall time.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::MetricError;

/// Default package-0 RAPL counter
pub const DEFAULT_ENERGY_COUNTER: &str = "/sys/class/powercap/intel-rapl/intel-rapl:0/energy_uj";

/// A cumulative energy counter in microjoules
pub trait EnergyCounter {
    /// Current counter value
    ///
    /// # Errors
    /// Returns an error if the counter cannot be read or parsed
    fn read_microjoules(&self) -> Result<u64, MetricError>;

    /// Value at which the counter wraps back to zero, if known
    fn wrap_range(&self) -> Option<u64> {
        None
    }
}

/// `energy_uj` file under `/sys/class/powercap`
#[derive(Debug, Clone)]
pub struct RaplCounter {
    path: PathBuf,
    max_range: Option<u64>,
}

impl RaplCounter {
    /// Open the counter at `path`, reading its wrap range from the sibling
    /// `max_energy_range_uj` when present
    ///
    /// # Errors
    /// Returns an error if the counter itself is unreadable
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, MetricError> {
        let path = path.into();
        let max_range = path
            .parent()
            .map(|dir| dir.join("max_energy_range_uj"))
            .and_then(|range_path| read_u64(&range_path).ok());
        let counter = Self { path, max_range };
        counter.read_microjoules()?;
        debug!("Energy counter {} (wraps at {:?} uJ)", counter.path.display(), counter.max_range);
        Ok(counter)
    }
}

impl EnergyCounter for RaplCounter {
    fn read_microjoules(&self) -> Result<u64, MetricError> {
        read_u64(&self.path)
    }

    fn wrap_range(&self) -> Option<u64> {
        self.max_range
    }
}

/// Microjoules consumed between two readings, accounting for one wrap
///
/// Without a known wrap range a decreasing counter yields `None`.
#[must_use]
pub fn energy_delta(previous: u64, current: u64, wrap_range: Option<u64>) -> Option<u64> {
    if current >= previous {
        return Some(current - previous);
    }
    let range = wrap_range?;
    range.checked_sub(previous).map(|to_wrap| to_wrap + current)
}

/// Average power in watts for `delta_uj` microjoules over `elapsed`
///
/// `None` when no time has passed.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn power_watts(delta_uj: u64, elapsed: Duration) -> Option<f64> {
    let seconds = elapsed.as_secs_f64();
    (seconds > 0.0).then(|| delta_uj as f64 / 1_000_000.0 / seconds)
}

pub(crate) fn read_u64(path: &Path) -> Result<u64, MetricError> {
    let text = fs::read_to_string(path).map_err(|e| MetricError::read(path, e))?;
    text.trim()
        .parse::<u64>()
        .map_err(|e| MetricError::parse(path, format!("{e}: {:?}", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_two_watts() {
        let delta = energy_delta(1_000_000, 3_000_000, None).unwrap();
        let watts = power_watts(delta, Duration::from_secs(1)).unwrap();
        assert!((watts - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_elapsed_is_unavailable() {
        assert_eq!(power_watts(1_000, Duration::ZERO), None);
    }

    #[test]
    fn test_wraparound() {
        assert_eq!(energy_delta(990, 10, Some(1_000)), Some(20));
        assert_eq!(energy_delta(990, 10, None), None);
        // Reading above the advertised range is nonsense
        assert_eq!(energy_delta(2_000, 10, Some(1_000)), None);
    }

    #[test]
    fn test_rapl_counter_reads_sysfs_files() {
        let dir = TempDir::new().unwrap();
        let counter_path = dir.path().join("energy_uj");
        fs::write(&counter_path, "123456\n").unwrap();
        fs::write(dir.path().join("max_energy_range_uj"), "262143328850\n").unwrap();

        let counter = RaplCounter::open(&counter_path).unwrap();
        assert_eq!(counter.read_microjoules().unwrap(), 123_456);
        assert_eq!(counter.wrap_range(), Some(262_143_328_850));
    }

    #[test]
    fn test_rapl_counter_without_range() {
        let dir = TempDir::new().unwrap();
        let counter_path = dir.path().join("energy_uj");
        fs::write(&counter_path, "7").unwrap();

        let counter = RaplCounter::open(&counter_path).unwrap();
        assert_eq!(counter.wrap_range(), None);
    }

    #[test]
    fn test_rapl_counter_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            RaplCounter::open(dir.path().join("missing")),
            Err(MetricError::Read { .. })
        ));

        let garbage = dir.path().join("energy_uj");
        fs::write(&garbage, "not a number").unwrap();
        assert!(matches!(RaplCounter::open(&garbage), Err(MetricError::Parse { .. })));
    }
}
