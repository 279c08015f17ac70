// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The device model: a tagged variant over vendor backends sharing one
//! capability surface.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::probes::amd::AmdDevice;
use crate::probes::mock::MockDevice;
use crate::probes::nvml::NvmlDevice;
use crate::probes::rocm::RocmDevice;
use crate::probes::statik::StaticDevice;

/// The one hardware class the tool currently cares about.
pub const HW_GPU: &str = "gpu";

/// Backend variant tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mock,
    Static,
    Amd,
    Nvml,
    Rocm,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeviceType::Mock => "MOCK",
            DeviceType::Static => "STATIC",
            DeviceType::Amd => "AMD",
            DeviceType::Nvml => "NVML",
            DeviceType::Rocm => "ROCM",
        };
        write!(f, "{s}")
    }
}

/// Per-accelerator information in the compatibility dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    /// Backend-assigned ID, dense and unique within one backend.
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub uuid: String,
    /// Target architecture in the backend's dialect, e.g. `gfx90a`, `sm_90`.
    pub arch: String,
    /// Compiler backend tag the architecture belongs to, e.g. `hip`, `cuda`.
    pub backend: String,
    pub warp_size: u32,
    /// PTX ISA version; 0 means unconstrained.
    #[serde(default)]
    pub ptx_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_capability: Option<u32>,
    #[serde(default)]
    pub memory_total_mb: u64,
}

/// Human-facing device summary, informational only — vendor and driver
/// strings never gate a compatibility decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: String,
    pub driver_version: String,
    pub product_name: String,
}

/// Data every backend variant carries once probed.
#[derive(Debug, Clone)]
pub struct DeviceData {
    pub name: String,
    pub device_type: DeviceType,
    pub hw_type: String,
    pub infos: Vec<AcceleratorInfo>,
    pub summaries: Vec<DeviceSummary>,
}

/// Shared capability surface of all backend variants.
pub trait Probe {
    fn data(&self) -> &DeviceData;

    /// Release backend resources. Returns whether shutdown was clean.
    fn shutdown(&mut self) -> bool {
        true
    }

    fn name(&self) -> &str {
        &self.data().name
    }

    fn device_type(&self) -> DeviceType {
        self.data().device_type
    }

    fn hw_type(&self) -> &str {
        &self.data().hw_type
    }

    fn gpu_info(&self, id: u32) -> Result<AcceleratorInfo> {
        self.data()
            .infos
            .get(id as usize)
            .cloned()
            .ok_or_else(|| anyhow!("invalid GPU ID {id}"))
    }

    fn summary(&self, id: u32) -> Result<DeviceSummary> {
        self.data()
            .summaries
            .get(id as usize)
            .cloned()
            .ok_or_else(|| anyhow!("invalid GPU ID {id}"))
    }

    fn all_gpu_info(&self) -> Vec<AcceleratorInfo> {
        self.data().infos.clone()
    }

    fn all_summaries(&self) -> Vec<DeviceSummary> {
        self.data().summaries.clone()
    }
}

/// A probed accelerator backend.
pub enum Device {
    Mock(MockDevice),
    Amd(AmdDevice),
    Nvml(NvmlDevice),
    Rocm(RocmDevice),
    Static(StaticDevice),
}

impl Device {
    fn probe(&self) -> &dyn Probe {
        match self {
            Device::Mock(d) => d,
            Device::Amd(d) => d,
            Device::Nvml(d) => d,
            Device::Rocm(d) => d,
            Device::Static(d) => d,
        }
    }

    fn probe_mut(&mut self) -> &mut dyn Probe {
        match self {
            Device::Mock(d) => d,
            Device::Amd(d) => d,
            Device::Nvml(d) => d,
            Device::Rocm(d) => d,
            Device::Static(d) => d,
        }
    }

    /// Reconstruct a device of the given variant from snapshot data,
    /// without re-probing the hardware.
    pub fn from_data(device_type: DeviceType, data: DeviceData) -> Self {
        match device_type {
            DeviceType::Mock => Device::Mock(MockDevice::from_data(data)),
            DeviceType::Amd => Device::Amd(AmdDevice::from_data(data)),
            DeviceType::Nvml => Device::Nvml(NvmlDevice::from_data(data)),
            DeviceType::Rocm => Device::Rocm(RocmDevice::from_data(data)),
            DeviceType::Static => Device::Static(StaticDevice::from_data(data)),
        }
    }

    pub fn name(&self) -> &str {
        self.probe().name()
    }

    pub fn device_type(&self) -> DeviceType {
        self.probe().device_type()
    }

    pub fn hw_type(&self) -> &str {
        self.probe().hw_type()
    }

    pub fn gpu_info(&self, id: u32) -> Result<AcceleratorInfo> {
        self.probe().gpu_info(id)
    }

    pub fn summary(&self, id: u32) -> Result<DeviceSummary> {
        self.probe().summary(id)
    }

    pub fn all_gpu_info(&self) -> Vec<AcceleratorInfo> {
        self.probe().all_gpu_info()
    }

    pub fn all_summaries(&self) -> Vec<DeviceSummary> {
        self.probe().all_summaries()
    }

    pub fn shutdown(&mut self) -> bool {
        self.probe_mut().shutdown()
    }
}

/// Scoped device acquisition: shutdown runs on every exit path.
pub struct DeviceHandle {
    device: Option<Device>,
}

impl DeviceHandle {
    pub fn new(device: Device) -> Self {
        Self {
            device: Some(device),
        }
    }
}

impl std::ops::Deref for DeviceHandle {
    type Target = Device;

    fn deref(&self) -> &Device {
        self.device.as_ref().expect("device present until drop")
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            let device_type = device.device_type();
            if !device.shutdown() {
                tracing::warn!("unclean shutdown of {device_type} device");
            }
        }
    }
}
