//! CLI argument definitions

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::metrics::DEFAULT_ENERGY_COUNTER;
use crate::profiling::{GpuBackend, ProfilerConfig};

#[derive(Parser, Debug)]
#[command(
    name = "powerscope",
    version,
    about = "Correlate sampled call chains with power and CPU usage of a process",
    after_help = "\
EXAMPLES:
    sudo powerscope my-app                       Attach by process name
    sudo powerscope --pid 1234 -i 10             Explicit PID, one row every 10 ms
    sudo powerscope -F 1000 -- ./busy-chain      Spawn and profile a command
    sudo powerscope --pid 1234 --dump            Print raw samples with symbols"
)]
pub struct Args {
    /// Process name to profile (auto-detects PID)
    #[arg(value_name = "PROCESS")]
    pub process: Option<String>,

    /// Process ID to profile
    #[arg(short, long)]
    pub pid: Option<i32>,

    /// Command to launch and profile (`*.py` runs with python3)
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,

    /// Sampling frequency in Hz
    #[arg(short = 'F', long, default_value = "100")]
    pub frequency: u64,

    /// Milliseconds between report rows
    #[arg(short, long, default_value = "5")]
    pub interval_ms: u64,

    /// Ring buffer data pages (power of two)
    #[arg(long, default_value = "8")]
    pub pages: usize,

    /// Stop after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Write report rows to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// RAPL energy counter to read
    #[arg(long, value_name = "PATH", default_value = DEFAULT_ENERGY_COUNTER)]
    pub energy_counter: PathBuf,

    /// GPU power source
    #[arg(long, value_enum, default_value_t = GpuBackend::None)]
    pub gpu: GpuBackend,

    /// Milliseconds to wait after spawning COMMAND before attaching
    #[arg(long, default_value = "1000")]
    pub spawn_delay_ms: u64,

    /// Sample user space only (works with a stricter perf_event_paranoid)
    #[arg(long)]
    pub user_only: bool,

    /// Keep raw mangled symbol names
    #[arg(long)]
    pub no_demangle: bool,

    /// Print ring state and every sample with symbols instead of report rows
    #[arg(long)]
    pub dump: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

/// How the target process is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
    Name(String),
    Pid(i32),
    Spawn(Vec<String>),
}

impl Args {
    /// The single target selected by PROCESS, `--pid` or `-- COMMAND`
    ///
    /// # Errors
    /// Returns an error unless exactly one of them is given
    pub fn target(&self) -> Result<TargetSelection> {
        let given = [self.process.is_some(), self.pid.is_some(), !self.command.is_empty()];
        match given.iter().filter(|&&g| g).count() {
            0 => bail!(
                "Missing required argument: PROCESS, --pid or -- COMMAND\n\n\
                 Usage:\n  \
                 powerscope my-app              Attach by process name\n  \
                 powerscope --pid 1234          Attach by PID\n  \
                 powerscope -- ./my-app args    Spawn and profile\n\n\
                 Run 'powerscope --help' for more options"
            ),
            1 => {}
            _ => bail!(
                "Invalid usage: PROCESS, --pid and -- COMMAND are mutually exclusive"
            ),
        }

        Ok(if let Some(name) = &self.process {
            TargetSelection::Name(name.clone())
        } else if let Some(pid) = self.pid {
            TargetSelection::Pid(pid)
        } else {
            TargetSelection::Spawn(self.command.clone())
        })
    }

    /// Validated sampling settings
    ///
    /// # Errors
    /// Returns an error for out-of-range values
    pub fn to_config(&self) -> Result<ProfilerConfig> {
        if self.frequency == 0 {
            bail!("Invalid usage: --frequency must be at least 1 Hz");
        }
        if self.interval_ms == 0 {
            bail!("Invalid usage: --interval-ms must be at least 1");
        }
        if !self.pages.is_power_of_two() {
            bail!("Invalid usage: --pages must be a power of two, got {}", self.pages);
        }

        Ok(ProfilerConfig {
            frequency_hz: self.frequency,
            interval: Duration::from_millis(self.interval_ms),
            data_pages: self.pages,
            duration: (self.duration > 0).then(|| Duration::from_secs(self.duration)),
            user_only: self.user_only,
            demangle: !self.no_demangle,
            energy_counter: self.energy_counter.clone(),
            gpu: self.gpu,
            dump: self.dump,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("powerscope").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["--pid", "42"]);
        assert_eq!(args.target().unwrap(), TargetSelection::Pid(42));
        assert_eq!(args.to_config().unwrap(), ProfilerConfig::default());
    }

    #[test]
    fn test_spawn_command_after_separator() {
        let args = parse(&["-F", "1000", "--", "./busy", "--depth", "12"]);
        assert_eq!(
            args.target().unwrap(),
            TargetSelection::Spawn(vec!["./busy".into(), "--depth".into(), "12".into()])
        );
        assert_eq!(args.to_config().unwrap().frequency_hz, 1000);
    }

    #[test]
    fn test_process_name() {
        assert_eq!(parse(&["my-app"]).target().unwrap(), TargetSelection::Name("my-app".into()));
    }

    #[test]
    fn test_target_is_required_and_exclusive() {
        let err = parse(&[]).target().unwrap_err().to_string();
        assert!(err.contains("Missing required argument"));
        assert!(parse(&["my-app", "--pid", "1"]).target().is_err());
        assert!(parse(&["--pid", "1", "--", "ls"]).target().is_err());
    }

    #[test]
    fn test_options_map_to_config() {
        let args = parse(&[
            "--pid", "7", "-i", "20", "--pages", "64", "--duration", "3", "--gpu", "hwmon",
            "--user-only", "--no-demangle", "--dump",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.interval, Duration::from_millis(20));
        assert_eq!(config.data_pages, 64);
        assert_eq!(config.duration, Some(Duration::from_secs(3)));
        assert_eq!(config.gpu, GpuBackend::Hwmon);
        assert!(config.user_only);
        assert!(!config.demangle);
        assert!(config.dump);
    }

    #[test]
    fn test_gpu_backends() {
        assert_eq!(parse(&["--pid", "7"]).to_config().unwrap().gpu, GpuBackend::None);
        assert_eq!(parse(&["--pid", "7", "--gpu", "nvml"]).to_config().unwrap().gpu, GpuBackend::Nvml);
    }

    #[test]
    fn test_invalid_values() {
        assert!(parse(&["--pid", "1", "--pages", "6"]).to_config().is_err());
        assert!(parse(&["--pid", "1", "-F", "0"]).to_config().is_err());
        assert!(parse(&["--pid", "1", "-i", "0"]).to_config().is_err());
    }
}
