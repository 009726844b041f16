//! GPU power sources
//!
//! Sources report per-device power in milliwatts. The report uses the first
//! device that returns a reading; a machine without a usable GPU counter
//! reports the value as unavailable.
//!
//! - [`NvmlGpu`]: NVIDIA management library, one reading per device index
//! - [`HwmonGpu`]: DRM hwmon `power1_average` sensors (amdgpu, i915, nouveau)

use log::{debug, info};
use nvml_wrapper::Nvml;
use std::fs;
use std::path::{Path, PathBuf};

use super::energy::read_u64;
use crate::domain::MetricError;

/// Per-device GPU power readings
pub trait GpuPowerSource {
    /// Number of devices this source knows about
    fn device_count(&self) -> usize;

    /// Current draw of `device` in milliwatts
    ///
    /// # Errors
    /// Returns an error if the device does not report a reading
    fn power_milliwatts(&self, device: usize) -> Result<f64, MetricError>;

    /// Reading of the first device that reports, in milliwatts
    ///
    /// # Errors
    /// Returns [`MetricError::NoCounter`] when no device reports, or the last
    /// device error when every device failed
    fn first_reading(&self) -> Result<f64, MetricError> {
        let mut last_error = MetricError::NoCounter("GPU power");
        for device in 0..self.device_count() {
            match self.power_milliwatts(device) {
                Ok(milliwatts) => return Ok(milliwatts),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }
}

/// No GPU accounting
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGpu;

impl GpuPowerSource for NoGpu {
    fn device_count(&self) -> usize {
        0
    }

    fn power_milliwatts(&self, _device: usize) -> Result<f64, MetricError> {
        Err(MetricError::NoCounter("GPU power"))
    }
}

/// NVIDIA GPUs through NVML
pub struct NvmlGpu {
    nvml: Nvml,
    devices: u32,
}

impl NvmlGpu {
    /// Load `libnvidia-ml` and count its devices
    ///
    /// # Errors
    /// Returns [`MetricError::NvmlInit`] if the library or driver is missing
    pub fn init() -> Result<Self, MetricError> {
        let nvml = Nvml::init().map_err(MetricError::NvmlInit)?;
        let devices = nvml.device_count().map_err(MetricError::NvmlInit)?;
        info!("NVML reports {devices} GPU(s)");
        Ok(Self { nvml, devices })
    }
}

impl GpuPowerSource for NvmlGpu {
    fn device_count(&self) -> usize {
        self.devices as usize
    }

    fn power_milliwatts(&self, device: usize) -> Result<f64, MetricError> {
        let index = u32::try_from(device)
            .ok()
            .filter(|&index| index < self.devices)
            .ok_or(MetricError::NoCounter("GPU power"))?;
        let handle = self
            .nvml
            .device_by_index(index)
            .map_err(|source| MetricError::GpuDevice { device: index, source })?;
        let milliwatts =
            handle.power_usage().map_err(|source| MetricError::GpuDevice { device: index, source })?;
        Ok(f64::from(milliwatts))
    }
}

/// DRM hwmon `power1_average` sensors (microwatts)
#[derive(Debug, Clone, Default)]
pub struct HwmonGpu {
    sensors: Vec<PathBuf>,
}

impl HwmonGpu {
    /// Find sensors under `/sys/class/drm/card*/device/hwmon/hwmon*/`
    #[must_use]
    pub fn discover() -> Self {
        Self::discover_in(Path::new("/sys/class/drm"))
    }

    /// Find sensors under an alternative DRM class directory
    #[must_use]
    pub fn discover_in(drm_class: &Path) -> Self {
        let mut sensors = Vec::new();
        for card in sorted_children(drm_class, |name| {
            name.strip_prefix("card").is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
        }) {
            for hwmon in sorted_children(&card.join("device/hwmon"), |name| name.starts_with("hwmon")) {
                let sensor = hwmon.join("power1_average");
                if sensor.is_file() {
                    debug!("GPU power sensor: {}", sensor.display());
                    sensors.push(sensor);
                }
            }
        }
        info!("Found {} GPU power sensor(s)", sensors.len());
        Self { sensors }
    }

    /// Use an explicit list of `power1_average` files
    #[must_use]
    pub fn from_sensors(sensors: Vec<PathBuf>) -> Self {
        Self { sensors }
    }
}

impl GpuPowerSource for HwmonGpu {
    fn device_count(&self) -> usize {
        self.sensors.len()
    }

    #[allow(clippy::cast_precision_loss)]
    fn power_milliwatts(&self, device: usize) -> Result<f64, MetricError> {
        let sensor = self.sensors.get(device).ok_or(MetricError::NoCounter("GPU power"))?;
        Ok(read_u64(sensor)? as f64 / 1_000.0)
    }
}

fn sorted_children(dir: &Path, keep: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut children: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_str().is_some_and(&keep))
        .map(|entry| entry.path())
        .collect();
    children.sort();
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_drm(cards: &[(&str, Option<&str>)]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (card, reading) in cards {
            let hwmon = dir.path().join(card).join("device/hwmon/hwmon3");
            fs::create_dir_all(&hwmon).unwrap();
            if let Some(reading) = reading {
                fs::write(hwmon.join("power1_average"), reading).unwrap();
            }
        }
        // Connector entries must not be mistaken for cards
        fs::create_dir_all(dir.path().join("card0-DP-1")).unwrap();
        dir
    }

    #[test]
    fn test_no_gpu_is_unavailable() {
        assert!(matches!(NoGpu.first_reading(), Err(MetricError::NoCounter(_))));
    }

    #[test]
    fn test_discovers_and_converts_to_milliwatts() {
        let drm = fake_drm(&[("card0", Some("15250000\n"))]);
        let gpu = HwmonGpu::discover_in(drm.path());
        assert_eq!(gpu.device_count(), 1);
        assert!((gpu.first_reading().unwrap() - 15_250.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_reporting_device_wins() {
        let drm = fake_drm(&[("card0", Some("garbage")), ("card1", Some("2000")), ("card2", Some("9000"))]);
        let gpu = HwmonGpu::discover_in(drm.path());
        assert_eq!(gpu.device_count(), 3);
        assert!((gpu.first_reading().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_nvml_without_driver_or_out_of_range_device() {
        // Build hosts rarely have an NVIDIA driver; both outcomes are valid
        match NvmlGpu::init() {
            Ok(gpu) => {
                let past_end = gpu.device_count();
                assert!(matches!(gpu.power_milliwatts(past_end), Err(MetricError::NoCounter(_))));
            }
            Err(e) => {
                assert!(matches!(e, MetricError::NvmlInit(_)));
                assert!(e.to_string().starts_with("NVML unavailable"));
            }
        }
    }

    #[test]
    fn test_cards_without_sensor_are_skipped() {
        let drm = fake_drm(&[("card0", None)]);
        assert_eq!(HwmonGpu::discover_in(drm.path()).device_count(), 0);
        assert_eq!(HwmonGpu::discover_in(Path::new("/nonexistent")).device_count(), 0);
    }
}
