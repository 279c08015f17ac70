// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! AMD backend, probed through `rocminfo` agent enumeration.
//!
//! Preferred over the rocm-smi fallback when the HSA runtime is loadable:
//! rocminfo reports the gfx target and wavefront size directly, which are
//! exactly the fields the compatibility oracle needs.

use crate::device::{
    AcceleratorInfo, Device, DeviceData, DeviceSummary, DeviceType, Probe, HW_GPU,
};
use anyhow::{bail, Context, Result};
use std::process::Command;

const ROCMINFO_BIN: &str = "rocminfo";
const AMDGPU_DRIVER_VERSION_PATH: &str = "/sys/module/amdgpu/version";

pub struct AmdDevice {
    data: DeviceData,
}

impl AmdDevice {
    /// Whether the HSA userspace runtime is loadable on this host.
    pub fn library_present() -> bool {
        Command::new(ROCMINFO_BIN)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    pub fn probe() -> Result<Device> {
        let output = Command::new(ROCMINFO_BIN)
            .output()
            .context("failed to execute rocminfo; ensure the ROCm stack is installed")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            bail!("rocminfo failed: {stderr}");
        }
        let stdout = String::from_utf8(output.stdout).context("rocminfo output was not UTF-8")?;
        let driver_version = read_driver_version();
        let (infos, summaries) = parse_rocminfo(&stdout, &driver_version)?;
        if infos.is_empty() {
            bail!("rocminfo reported no GPU agents");
        }
        Ok(Device::Amd(Self {
            data: DeviceData {
                name: "AMD".to_string(),
                device_type: DeviceType::Amd,
                hw_type: HW_GPU.to_string(),
                infos,
                summaries,
            },
        }))
    }

    pub fn from_data(data: DeviceData) -> Self {
        Self { data }
    }
}

impl Probe for AmdDevice {
    fn data(&self) -> &DeviceData {
        &self.data
    }
}

fn read_driver_version() -> String {
    std::fs::read_to_string(AMDGPU_DRIVER_VERSION_PATH)
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Parse `rocminfo` agent blocks. CPU agents (no `gfx*` name) are skipped;
/// GPU IDs are assigned densely in listing order.
fn parse_rocminfo(
    raw: &str,
    driver_version: &str,
) -> Result<(Vec<AcceleratorInfo>, Vec<DeviceSummary>)> {
    let mut infos = Vec::new();
    let mut summaries = Vec::new();

    let mut name = String::new();
    let mut uuid = String::new();
    let mut marketing = String::new();
    let mut wavefront: Option<u32> = None;

    let mut flush = |name: &mut String,
                     uuid: &mut String,
                     marketing: &mut String,
                     wavefront: &mut Option<u32>| {
        if name.starts_with("gfx") {
            let id = infos.len() as u32;
            infos.push(AcceleratorInfo {
                id,
                name: format!("card{id}"),
                uuid: std::mem::take(uuid),
                arch: name.clone(),
                backend: "hip".to_string(),
                warp_size: wavefront.unwrap_or(64),
                ptx_version: 0,
                compute_capability: None,
                memory_total_mb: 0,
            });
            summaries.push(DeviceSummary {
                id: id.to_string(),
                driver_version: driver_version.to_string(),
                product_name: std::mem::take(marketing),
            });
        }
        name.clear();
        uuid.clear();
        marketing.clear();
        *wavefront = None;
    };

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Agent ") {
            flush(&mut name, &mut uuid, &mut marketing, &mut wavefront);
        } else if let Some(value) = field(trimmed, "Name:") {
            // Pool/ISA sections repeat `Name:`; only the first one per agent
            // is the agent name.
            if name.is_empty() {
                name = value.to_string();
            }
        } else if let Some(value) = field(trimmed, "Uuid:") {
            uuid = value.to_string();
        } else if let Some(value) = field(trimmed, "Marketing Name:") {
            marketing = value.to_string();
        } else if let Some(value) = field(trimmed, "Wavefront Size:") {
            let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
            wavefront = Some(
                digits
                    .parse()
                    .with_context(|| format!("invalid wavefront size '{value}'"))?,
            );
        }
    }
    flush(&mut name, &mut uuid, &mut marketing, &mut wavefront);

    Ok((infos, summaries))
}

fn field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    line.strip_prefix(key).map(str::trim)
}
