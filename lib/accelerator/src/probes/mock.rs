// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Mock backend used in stub mode. Presents a fixed two-card MI210 host.

use crate::device::{
    AcceleratorInfo, Device, DeviceData, DeviceSummary, DeviceType, Probe, HW_GPU,
};

pub struct MockDevice {
    data: DeviceData,
}

impl MockDevice {
    pub fn probe() -> Device {
        let infos = (0..2)
            .map(|id| AcceleratorInfo {
                id,
                name: format!("card{id}"),
                uuid: format!("daff740f-0000-1000-8062-01650389{id:04}"),
                arch: "gfx90a".to_string(),
                backend: "hip".to_string(),
                warp_size: 64,
                ptx_version: 0,
                compute_capability: None,
                memory_total_mb: 65520,
            })
            .collect();
        let summaries = (0..2)
            .map(|id| DeviceSummary {
                id: id.to_string(),
                driver_version: "6.12.10".to_string(),
                product_name: "STUBBED Aldebaran/MI200 [Instinct MI210]".to_string(),
            })
            .collect();
        Device::Mock(Self {
            data: DeviceData {
                name: "STUBBED AMD".to_string(),
                device_type: DeviceType::Mock,
                hw_type: HW_GPU.to_string(),
                infos,
                summaries,
            },
        })
    }

    pub fn from_data(data: DeviceData) -> Self {
        Self { data }
    }
}

impl Probe for MockDevice {
    fn data(&self) -> &DeviceData {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_ids_are_dense_and_unique() {
        let device = MockDevice::probe();
        let ids: Vec<u32> = device.all_gpu_info().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }
}
