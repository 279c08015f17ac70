// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! NVIDIA backend, probed through `nvidia-smi`.

use crate::device::{
    AcceleratorInfo, Device, DeviceData, DeviceSummary, DeviceType, Probe, HW_GPU,
};
use anyhow::{bail, Context, Result};
use std::process::Command;

const SMI_BIN: &str = "nvidia-smi";
const CUDA_WARP_SIZE: u32 = 32;

pub struct NvmlDevice {
    data: DeviceData,
}

impl NvmlDevice {
    /// Whether the NVIDIA userspace stack is loadable on this host.
    pub fn library_present() -> bool {
        Command::new(SMI_BIN)
            .arg("--list-gpus")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    pub fn probe() -> Result<Device> {
        let output = Command::new(SMI_BIN)
            .args([
                "--query-gpu=index,name,uuid,memory.total,compute_cap,driver_version",
                "--format=csv,noheader,nounits",
            ])
            .output()
            .context("failed to execute nvidia-smi; ensure NVIDIA drivers are installed")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            bail!("nvidia-smi query failed: {stderr}");
        }
        let stdout =
            String::from_utf8(output.stdout).context("nvidia-smi output was not UTF-8")?;
        let (infos, summaries) = parse_query_output(&stdout)?;
        if infos.is_empty() {
            bail!("nvidia-smi reported no devices");
        }
        Ok(Device::Nvml(Self {
            data: DeviceData {
                name: "NVIDIA".to_string(),
                device_type: DeviceType::Nvml,
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

impl Probe for NvmlDevice {
    fn data(&self) -> &DeviceData {
        &self.data
    }
}

fn parse_query_output(raw: &str) -> Result<(Vec<AcceleratorInfo>, Vec<DeviceSummary>)> {
    let mut infos = Vec::new();
    let mut summaries = Vec::new();
    for (line_idx, raw_line) in raw.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        let columns: Vec<&str> = line.split(',').map(str::trim).collect();
        // Trailing fields are fixed; the product name may itself contain commas.
        if columns.len() < 6 {
            bail!(
                "unexpected nvidia-smi output at line {}: '{line}'",
                line_idx + 1
            );
        }
        let tail = columns.len() - 4;
        let index: u32 = columns[0]
            .parse()
            .with_context(|| format!("invalid GPU index '{}' at line {}", columns[0], line_idx + 1))?;
        let name = columns[1..tail].join(",").trim().to_string();
        let uuid = columns[tail].to_string();
        let memory_total_mb: u64 = columns[tail + 1].parse().with_context(|| {
            format!(
                "invalid GPU memory value '{}' at line {}",
                columns[tail + 1],
                line_idx + 1
            )
        })?;
        let compute_capability = parse_compute_cap(columns[tail + 2]).with_context(|| {
            format!(
                "invalid compute capability '{}' at line {}",
                columns[tail + 2],
                line_idx + 1
            )
        })?;
        let driver_version = columns[tail + 3].to_string();

        infos.push(AcceleratorInfo {
            id: index,
            name: name.clone(),
            uuid,
            arch: format!("sm_{compute_capability}"),
            backend: "cuda".to_string(),
            warp_size: CUDA_WARP_SIZE,
            ptx_version: 0,
            compute_capability: Some(compute_capability),
            memory_total_mb,
        });
        summaries.push(DeviceSummary {
            id: index.to_string(),
            driver_version,
            product_name: name,
        });
    }
    Ok((infos, summaries))
}

/// `compute_cap` is reported as `major.minor`, e.g. `9.0` for sm_90.
fn parse_compute_cap(raw: &str) -> Result<u32> {
    let (major, minor) = raw
        .split_once('.')
        .with_context(|| format!("expected major.minor, got '{raw}'"))?;
    let major: u32 = major.parse()?;
    let minor: u32 = minor.parse()?;
    Ok(major * 10 + minor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_devices() {
        let (infos, summaries) = parse_query_output(
            "0, NVIDIA H100 80GB HBM3, GPU-11111111-2222, 81559, 9.0, 550.54.15\n\
             1, NVIDIA A100-SXM4-80GB, GPU-33333333-4444, 81920, 8.0, 550.54.15\n",
        )
        .unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].arch, "sm_90");
        assert_eq!(infos[0].warp_size, 32);
        assert_eq!(infos[0].memory_total_mb, 81559);
        assert_eq!(infos[1].arch, "sm_80");
        assert_eq!(infos[1].compute_capability, Some(80));
        assert_eq!(summaries[1].driver_version, "550.54.15");
    }

    #[test]
    fn product_names_with_commas_survive() {
        let (infos, _) = parse_query_output(
            "0, NVIDIA GeForce RTX 4090, Founders Edition, GPU-aaaa, 24564, 8.9, 545.29\n",
        )
        .unwrap();
        assert_eq!(infos[0].name, "NVIDIA GeForce RTX 4090, Founders Edition");
        assert_eq!(infos[0].arch, "sm_89");
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(parse_query_output("abc, RTX, GPU-x, 8192, 8.0, 545\n").is_err());
        assert!(parse_query_output("0, RTX\n").is_err());
    }
}
