use anyhow::{anyhow, Result};
use std::str::FromStr;

use candle_core::Device;

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceOption {
    Cpu,
    Metal,
    Cuda(usize),
}

impl FromStr for DeviceOption {
    type Err = anyhow::Error;

    // Expecting something like: cpu, metal or cuda:<id>
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(DeviceOption::Cpu),
            "metal" => Ok(DeviceOption::Metal),
            s => match s.strip_prefix("cuda:") {
                Some(id) => Ok(DeviceOption::Cuda(id.parse::<usize>()?)),
                None => Err(anyhow!("Invalid device option: {}", s)),
            },
        }
    }
}

/// Gets the requested device, falling back to the CPU when the crate was built without support
/// for it.
pub fn get_device(device: &DeviceOption) -> Result<Device> {
    let device = match device {
        DeviceOption::Cuda(device_id) if cfg!(feature = "cuda") => Device::new_cuda(*device_id)?,
        DeviceOption::Metal if cfg!(feature = "metal") => Device::new_metal(0)?,
        _ => Device::Cpu,
    };

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_option() {
        assert_eq!(DeviceOption::from_str("cpu").unwrap(), DeviceOption::Cpu);
        assert_eq!(DeviceOption::from_str("metal").unwrap(), DeviceOption::Metal);
        assert_eq!(
            DeviceOption::from_str("cuda:2").unwrap(),
            DeviceOption::Cuda(2)
        );
        assert!(DeviceOption::from_str("cuda:").is_err());
        assert!(DeviceOption::from_str("vulkan").is_err());
    }

    #[test]
    fn test_get_device_cpu() {
        assert!(get_device(&DeviceOption::Cpu).unwrap().is_cpu());
    }
}
