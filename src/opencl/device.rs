//! Device enumeration and the "semi-ideal" device heuristic.

use opencl3::device::{CL_DEVICE_TYPE_ALL, Device};
use opencl3::error_codes::{CL_DEVICE_NOT_FOUND, ClError};
use opencl3::platform::get_platforms;
use opencl3::types::cl_device_id;

use crate::error::{ClResultExt, Error, Result};

// cl_khr_icd: returned by clGetPlatformIDs when no ICD is installed.
const CL_PLATFORM_NOT_FOUND_KHR: i32 = -1001;

/// One platform/device pair reported by the runtime.
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub platform_index: usize,
    pub device_index: usize,
    pub platform_name: String,
    pub name: String,
    pub vendor: String,
    pub compute_units: u32,
    pub clock_mhz: u32,
    pub global_mem_size: u64,
    id: cl_device_id,
}

impl DeviceCandidate {
    /// Throughput proxy: compute units times max clock frequency.
    pub fn score(&self) -> u64 {
        u64::from(self.compute_units) * u64::from(self.clock_mhz)
    }

    pub fn id(&self) -> cl_device_id {
        self.id
    }

    pub fn device(&self) -> Device {
        Device::new(self.id)
    }
}

/// How the compute context picks its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceSelection {
    /// Highest `compute_units * clock_mhz`, first one wins a tie.
    #[default]
    Best,
    /// A fixed platform/device index pair, as listed by [`list_devices`].
    Index { platform: usize, device: usize },
}

impl DeviceSelection {
    /// Picks a candidate index out of `candidates`, or `None` if nothing
    /// qualifies.
    pub fn pick(&self, candidates: &[DeviceCandidate]) -> Option<usize> {
        match *self {
            DeviceSelection::Best => select_best(candidates),
            DeviceSelection::Index { platform, device } => candidates
                .iter()
                .position(|c| c.platform_index == platform && c.device_index == device),
        }
    }
}

/// Returns the index of the highest scoring candidate.
///
/// Ties go to the earliest candidate in enumeration order. A score of zero
/// never qualifies, so a list of zero-score devices yields `None`.
pub fn select_best(candidates: &[DeviceCandidate]) -> Option<usize> {
    let mut best = None;
    let mut best_score = 0u64;
    for (idx, candidate) in candidates.iter().enumerate() {
        let score = candidate.score();
        if score > best_score {
            best = Some(idx);
            best_score = score;
        }
    }
    best
}

/// Walks every platform and every device type the runtime exposes.
///
/// A machine without any installed OpenCL platform produces an empty list.
pub fn enumerate_devices() -> Result<Vec<DeviceCandidate>> {
    let platforms = match get_platforms() {
        Ok(platforms) => platforms,
        Err(ClError(code)) if code == CL_PLATFORM_NOT_FOUND_KHR => {
            log::debug!("No OpenCL platforms installed");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e).cl_op("clGetPlatformIDs"),
    };

    let mut candidates = Vec::new();
    for (platform_index, platform) in platforms.iter().enumerate() {
        let platform_name = platform
            .name()
            .unwrap_or_else(|_| "Unknown Platform".to_string());

        let device_ids = match platform.get_devices(CL_DEVICE_TYPE_ALL) {
            Ok(ids) => ids,
            Err(ClError(code)) if code == CL_DEVICE_NOT_FOUND => Vec::new(),
            Err(e) => {
                log::warn!("Skipping platform {} ({}): {}", platform_index, platform_name, e);
                continue;
            }
        };

        for (device_index, id) in device_ids.into_iter().enumerate() {
            let device = Device::new(id);
            candidates.push(DeviceCandidate {
                platform_index,
                device_index,
                platform_name: platform_name.clone(),
                name: device
                    .name()
                    .unwrap_or_else(|_| "Unknown Device".to_string()),
                vendor: device
                    .vendor()
                    .unwrap_or_else(|_| "Unknown Vendor".to_string()),
                compute_units: device.max_compute_units().unwrap_or(0),
                clock_mhz: device.max_clock_frequency().unwrap_or(0),
                global_mem_size: device.global_mem_size().unwrap_or(0),
                id,
            });
        }
    }
    Ok(candidates)
}

/// Enumerates devices and applies `selection`.
pub fn select_device(selection: DeviceSelection) -> Result<DeviceCandidate> {
    let mut candidates = enumerate_devices()?;
    for c in &candidates {
        log::debug!(
            "Platform {} device {}: {} score {}",
            c.platform_index,
            c.device_index,
            c.name,
            c.score()
        );
    }
    let idx = selection.pick(&candidates).ok_or(Error::NoDevice)?;
    Ok(candidates.swap_remove(idx))
}

/// Prints every platform and device along with its selection score.
pub fn list_devices() -> Result<()> {
    println!("Available OpenCL Platforms and Devices:");
    let candidates = enumerate_devices()?;
    if candidates.is_empty() {
        println!("  No OpenCL devices found.");
        return Ok(());
    }

    let best = select_best(&candidates);
    let mut current_platform = None;
    for (idx, c) in candidates.iter().enumerate() {
        if current_platform != Some(c.platform_index) {
            println!("\nPlatform {}: {}", c.platform_index, c.platform_name);
            current_platform = Some(c.platform_index);
        }
        println!(
            "  Device {}: {} ({}) - {} CUs @ {} MHz, score {}, Memory: {} MB{}",
            c.device_index,
            c.name,
            c.vendor,
            c.compute_units,
            c.clock_mhz,
            c.score(),
            c.global_mem_size / (1024 * 1024),
            if best == Some(idx) { " [selected]" } else { "" }
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(platform: usize, device: usize, units: u32, mhz: u32) -> DeviceCandidate {
        DeviceCandidate {
            platform_index: platform,
            device_index: device,
            platform_name: format!("platform{}", platform),
            name: format!("device{}.{}", platform, device),
            vendor: "test".to_string(),
            compute_units: units,
            clock_mhz: mhz,
            global_mem_size: 0,
            id: std::ptr::null_mut(),
        }
    }

    #[test]
    fn score_is_units_times_clock() {
        assert_eq!(candidate(0, 0, 32, 1500).score(), 48_000);
    }

    #[test]
    fn score_does_not_overflow_u32() {
        let c = candidate(0, 0, u32::MAX, 4);
        assert_eq!(c.score(), u64::from(u32::MAX) * 4);
    }

    #[test]
    fn picks_highest_score_across_platforms() {
        let list = vec![
            candidate(0, 0, 8, 3000),
            candidate(0, 1, 16, 1000),
            candidate(1, 0, 64, 1200),
            candidate(1, 1, 4, 4000),
        ];
        assert_eq!(select_best(&list), Some(2));
    }

    #[test]
    fn ties_resolve_to_first_seen() {
        let list = vec![
            candidate(0, 0, 10, 100),
            candidate(0, 1, 20, 50),
            candidate(1, 0, 5, 200),
        ];
        assert_eq!(select_best(&list), Some(0));
    }

    #[test]
    fn empty_or_zero_scored_lists_select_nothing() {
        assert_eq!(select_best(&[]), None);
        let list = vec![candidate(0, 0, 0, 1000), candidate(0, 1, 12, 0)];
        assert_eq!(select_best(&list), None);
    }

    #[test]
    fn explicit_index_selection() {
        let list = vec![candidate(0, 0, 64, 2000), candidate(1, 0, 1, 1), candidate(1, 1, 2, 2)];
        let sel = DeviceSelection::Index { platform: 1, device: 1 };
        assert_eq!(sel.pick(&list), Some(2));
        let missing = DeviceSelection::Index { platform: 3, device: 0 };
        assert_eq!(missing.pick(&list), None);
        assert_eq!(DeviceSelection::default().pick(&list), Some(0));
    }
}
