// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Static backend: devices described by a JSON config file instead of live
//! probes. Used in stub mode; the file contents are authoritative and
//! bypass the device cache entirely.

use crate::device::{
    AcceleratorInfo, Device, DeviceData, DeviceSummary, DeviceType, Probe, HW_GPU,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config location; `TCV_DEVICE_CONFIG` overrides it.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tcv/devices.json";

/// On-disk shape of the static device config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticDeviceConfig {
    pub name: String,
    #[serde(default = "default_hw_type")]
    pub hw_type: String,
    #[serde(default)]
    pub gpu_info: Vec<AcceleratorInfo>,
    #[serde(default)]
    pub summaries: Vec<DeviceSummary>,
}

fn default_hw_type() -> String {
    HW_GPU.to_string()
}

/// The static device config path: env override or the default.
pub fn config_path() -> PathBuf {
    match std::env::var_os(tcv_cache::constants::ENV_DEVICE_CONFIG) {
        Some(path) if !path.is_empty() => PathBuf::from(path),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

pub struct StaticDevice {
    data: DeviceData,
}

impl StaticDevice {
    pub fn from_config(path: &Path) -> Result<Device> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read device config {}", path.display()))?;
        let config: StaticDeviceConfig = serde_json::from_str(&raw)
            .with_context(|| format!("invalid device config {}", path.display()))?;
        tracing::debug!(
            "loaded static device config from {} ({} device(s))",
            path.display(),
            config.gpu_info.len()
        );
        Ok(Device::Static(Self {
            data: DeviceData {
                name: config.name,
                device_type: DeviceType::Static,
                hw_type: config.hw_type,
                infos: config.gpu_info,
                summaries: config.summaries,
            },
        }))
    }

    pub fn from_data(data: DeviceData) -> Self {
        Self { data }
    }
}

impl Probe for StaticDevice {
    fn data(&self) -> &DeviceData {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_devices_from_config_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("devices.json");
        std::fs::write(
            &path,
            r#"{
                "name": "fixture",
                "hw_type": "gpu",
                "gpu_info": [{
                    "id": 0, "name": "card0", "uuid": "u",
                    "arch": "gfx90a", "backend": "hip",
                    "warp_size": 64, "ptx_version": 0, "memory_total_mb": 65520
                }],
                "summaries": [{"id": "0", "driver_version": "6.12", "product_name": "MI210"}]
            }"#,
        )
        .unwrap();

        let device = StaticDevice::from_config(&path).unwrap();
        assert_eq!(device.device_type(), DeviceType::Static);
        assert_eq!(device.all_gpu_info().len(), 1);
        assert_eq!(device.all_gpu_info()[0].arch, "gfx90a");
    }

    #[test]
    fn malformed_config_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("devices.json");
        std::fs::write(&path, "[]").unwrap();
        assert!(StaticDevice::from_config(&path).is_err());
    }
}
