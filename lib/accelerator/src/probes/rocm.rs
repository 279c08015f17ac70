// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! ROCm fallback backend, probed through `rocm-smi --json`.
//!
//! Registered only when the AMD/HSA probe is unavailable. rocm-smi exposes
//! less than rocminfo (no wavefront size), so CDNA defaults are assumed.

use crate::device::{
    AcceleratorInfo, Device, DeviceData, DeviceSummary, DeviceType, Probe, HW_GPU,
};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::process::Command;

const ROCM_SMI_BIN: &str = "rocm-smi";

pub struct RocmDevice {
    data: DeviceData,
}

impl RocmDevice {
    pub fn library_present() -> bool {
        Command::new(ROCM_SMI_BIN)
            .arg("--version")
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    pub fn probe() -> Result<Device> {
        let output = Command::new(ROCM_SMI_BIN)
            .args([
                "--showid",
                "--showproductname",
                "--showdriverversion",
                "--showuniqueid",
                "--json",
            ])
            .output()
            .context("failed to execute rocm-smi")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            bail!("rocm-smi query failed: {stderr}");
        }
        let stdout = String::from_utf8(output.stdout).context("rocm-smi output was not UTF-8")?;
        let (infos, summaries) = parse_smi_json(&stdout)?;
        if infos.is_empty() {
            bail!("rocm-smi reported no devices");
        }
        Ok(Device::Rocm(Self {
            data: DeviceData {
                name: "ROCM".to_string(),
                device_type: DeviceType::Rocm,
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

impl Probe for RocmDevice {
    fn data(&self) -> &DeviceData {
        &self.data
    }
}

fn parse_smi_json(raw: &str) -> Result<(Vec<AcceleratorInfo>, Vec<DeviceSummary>)> {
    let doc: Value = serde_json::from_str(raw).context("rocm-smi emitted invalid JSON")?;
    let Value::Object(map) = &doc else {
        bail!("rocm-smi emitted a non-object document");
    };

    let driver_version = map
        .get("system")
        .and_then(|s| s.get("Driver version"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    let mut cards: Vec<(&String, &Value)> = map
        .iter()
        .filter(|(key, _)| key.starts_with("card"))
        .collect();
    cards.sort_by_key(|(key, _)| key.trim_start_matches("card").parse::<u32>().unwrap_or(u32::MAX));

    let mut infos = Vec::new();
    let mut summaries = Vec::new();
    for (key, card) in cards {
        let id = infos.len() as u32;
        let arch = find_gfx_value(card).unwrap_or_else(|| "unknown".to_string());
        let product = card
            .get("Card series")
            .or_else(|| card.get("Card SKU"))
            .or_else(|| card.get("Card model"))
            .and_then(Value::as_str)
            .unwrap_or(key)
            .to_string();
        let uuid = card
            .get("Unique ID")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        infos.push(AcceleratorInfo {
            id,
            name: key.clone(),
            uuid,
            arch,
            backend: "hip".to_string(),
            warp_size: 64,
            ptx_version: 0,
            compute_capability: None,
            memory_total_mb: 0,
        });
        summaries.push(DeviceSummary {
            id: id.to_string(),
            driver_version: driver_version.clone(),
            product_name: product,
        });
    }
    Ok((infos, summaries))
}

/// The gfx target hides under version-dependent keys; match on the value.
fn find_gfx_value(card: &Value) -> Option<String> {
    let Value::Object(fields) = card else {
        return None;
    };
    fields.values().find_map(|v| {
        v.as_str()
            .filter(|s| s.starts_with("gfx") && s.len() > 3)
            .map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"{
        "card0": {"GPU ID": "0x740f", "Card series": "Instinct MI210", "GFX Version": "gfx90a", "Unique ID": "0xdaff740f"},
        "card1": {"GPU ID": "0x740f", "Card series": "Instinct MI210", "GFX Version": "gfx90a", "Unique ID": "0xacff740f"},
        "system": {"Driver version": "6.2.4"}
    }"#;

    #[test]
    fn parses_cards_and_driver() {
        let (infos, summaries) = parse_smi_json(FIXTURE).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].arch, "gfx90a");
        assert_eq!(infos[1].id, 1);
        assert_eq!(summaries[0].driver_version, "6.2.4");
        assert_eq!(summaries[0].product_name, "Instinct MI210");
    }

    #[test]
    fn missing_gfx_key_degrades_to_unknown() {
        let (infos, _) =
            parse_smi_json(r#"{"card0": {"Card series": "Instinct MI210"}}"#).unwrap();
        assert_eq!(infos[0].arch, "unknown");
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(parse_smi_json("not json").is_err());
    }
}
