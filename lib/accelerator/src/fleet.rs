// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! GPU fleet summary for `--gpu-info`.

use crate::device::DeviceSummary;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuGroup {
    pub gpu_type: String,
    pub driver_version: String,
    pub ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FleetSummary {
    pub gpus: Vec<GpuGroup>,
}

/// Coalesce per-device summaries by `(product, driver)`, with IDs ascending
/// within each group and groups sorted by product then driver.
pub fn summarize_fleet(summaries: &[DeviceSummary]) -> FleetSummary {
    let mut groups: Vec<GpuGroup> = Vec::new();
    for summary in summaries {
        let id: u32 = summary.id.parse().unwrap_or(0);
        match groups.iter_mut().find(|g| {
            g.gpu_type == summary.product_name && g.driver_version == summary.driver_version
        }) {
            Some(group) => group.ids.push(id),
            None => groups.push(GpuGroup {
                gpu_type: summary.product_name.clone(),
                driver_version: summary.driver_version.clone(),
                ids: vec![id],
            }),
        }
    }
    for group in &mut groups {
        group.ids.sort_unstable();
    }
    groups.sort_by(|a, b| {
        (&a.gpu_type, &a.driver_version).cmp(&(&b.gpu_type, &b.driver_version))
    });
    FleetSummary { gpus: groups }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str, product: &str, driver: &str) -> DeviceSummary {
        DeviceSummary {
            id: id.to_string(),
            driver_version: driver.to_string(),
            product_name: product.to_string(),
        }
    }

    #[test]
    fn groups_by_product_and_driver() {
        let fleet = summarize_fleet(&[
            summary("1", "MI210", "6.12"),
            summary("0", "MI210", "6.12"),
            summary("2", "H100", "550.54"),
        ]);
        assert_eq!(fleet.gpus.len(), 2);
        assert_eq!(fleet.gpus[0].gpu_type, "H100");
        assert_eq!(fleet.gpus[1].ids, vec![0, 1]);
    }

    #[test]
    fn same_product_different_driver_splits_groups() {
        let fleet = summarize_fleet(&[
            summary("0", "MI210", "6.12"),
            summary("1", "MI210", "6.13"),
        ]);
        assert_eq!(fleet.gpus.len(), 2);
        assert_eq!(fleet.gpus[0].driver_version, "6.12");
    }

    #[test]
    fn empty_input_is_an_empty_fleet() {
        assert!(summarize_fleet(&[]).gpus.is_empty());
    }
}
