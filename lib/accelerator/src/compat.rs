// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The compatibility oracle: which local accelerators can run the kernels
//! an image carries?

use crate::device::AcceleratorInfo;
use tcv_cache::summary::{Summary, SummaryGroup};

/// Partition local device IDs into (matched, unmatched) against an image's
/// compatibility summary.
///
/// A device matches when at least one summary tuple agrees with it on
/// `(arch, backend)`; warp size and PTX version gate only when both sides
/// report a non-zero value. An empty summary means the image constrains
/// nothing and every device matches. An empty device set yields two empty
/// partitions with a warning.
pub fn check_compatibility(
    summary: &Summary,
    devices: &[AcceleratorInfo],
) -> (Vec<u32>, Vec<u32>) {
    if devices.is_empty() {
        tracing::warn!("no local accelerators to check compatibility against");
        return (Vec::new(), Vec::new());
    }
    if summary.is_empty() {
        tracing::debug!("image carries no compatibility constraints, all devices match");
        return (devices.iter().map(|d| d.id).collect(), Vec::new());
    }

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for device in devices {
        if summary.groups.iter().any(|g| tuple_matches(g, device)) {
            matched.push(device.id);
        } else {
            unmatched.push(device.id);
        }
    }
    (matched, unmatched)
}

fn tuple_matches(group: &SummaryGroup, device: &AcceleratorInfo) -> bool {
    if group.arch != device.arch || group.backend != device.backend {
        return false;
    }
    if group.warp_size != 0 && device.warp_size != 0 && group.warp_size != device.warp_size {
        return false;
    }
    if group.ptx_version != 0
        && device.ptx_version != 0
        && group.ptx_version != device.ptx_version
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(arch: &str, backend: &str, warp: u32, ptx: u32) -> SummaryGroup {
        SummaryGroup {
            arch: arch.into(),
            backend: backend.into(),
            warp_size: warp,
            ptx_version: ptx,
            count: 1,
        }
    }

    fn device(id: u32, arch: &str, backend: &str, warp: u32) -> AcceleratorInfo {
        AcceleratorInfo {
            id,
            name: format!("card{id}"),
            uuid: String::new(),
            arch: arch.into(),
            backend: backend.into(),
            warp_size: warp,
            ptx_version: 0,
            compute_capability: None,
            memory_total_mb: 0,
        }
    }

    #[test]
    fn matches_on_arch_and_backend() {
        let summary = Summary {
            groups: vec![group("gfx90a", "hip", 64, 0)],
        };
        let devices = vec![
            device(0, "gfx90a", "hip", 64),
            device(1, "sm_80", "cuda", 32),
        ];
        let (matched, unmatched) = check_compatibility(&summary, &devices);
        assert_eq!(matched, vec![0]);
        assert_eq!(unmatched, vec![1]);
    }

    #[test]
    fn mismatched_arch_leaves_nothing_matched() {
        let summary = Summary {
            groups: vec![group("sm_90", "cuda", 32, 0)],
        };
        let devices = vec![device(0, "gfx90a", "hip", 64)];
        let (matched, unmatched) = check_compatibility(&summary, &devices);
        assert!(matched.is_empty());
        assert_eq!(unmatched, vec![0]);
    }

    #[test]
    fn zero_warp_or_ptx_is_unconstrained() {
        let summary = Summary {
            groups: vec![group("gfx90a", "hip", 0, 0)],
        };
        let devices = vec![device(0, "gfx90a", "hip", 64)];
        let (matched, _) = check_compatibility(&summary, &devices);
        assert_eq!(matched, vec![0]);
    }

    #[test]
    fn nonzero_warp_mismatch_blocks() {
        let summary = Summary {
            groups: vec![group("gfx90a", "hip", 32, 0)],
        };
        let devices = vec![device(0, "gfx90a", "hip", 64)];
        let (matched, unmatched) = check_compatibility(&summary, &devices);
        assert!(matched.is_empty());
        assert_eq!(unmatched, vec![0]);
    }

    #[test]
    fn empty_device_set_yields_empty_partitions() {
        let summary = Summary {
            groups: vec![group("gfx90a", "hip", 64, 0)],
        };
        let (matched, unmatched) = check_compatibility(&summary, &[]);
        assert!(matched.is_empty());
        assert!(unmatched.is_empty());
    }

    #[test]
    fn empty_summary_matches_everything() {
        let summary = Summary::default();
        let devices = vec![device(0, "gfx90a", "hip", 64), device(1, "sm_80", "cuda", 32)];
        let (matched, unmatched) = check_compatibility(&summary, &devices);
        assert_eq!(matched, vec![0, 1]);
        assert!(unmatched.is_empty());
    }

    #[test]
    fn any_matching_tuple_counts() {
        let summary = Summary {
            groups: vec![
                group("sm_90", "cuda", 32, 84),
                group("gfx90a", "hip", 64, 0),
            ],
        };
        let devices = vec![device(0, "gfx90a", "hip", 64)];
        let (matched, _) = check_compatibility(&summary, &devices);
        assert_eq!(matched, vec![0]);
    }

    #[test]
    fn partitions_are_disjoint_and_cover_all_ids() {
        let summary = Summary {
            groups: vec![group("gfx90a", "hip", 64, 0)],
        };
        let devices = vec![
            device(0, "gfx90a", "hip", 64),
            device(1, "sm_80", "cuda", 32),
            device(2, "gfx90a", "hip", 64),
        ];
        let (matched, unmatched) = check_compatibility(&summary, &devices);
        let mut all: Vec<u32> = matched.iter().chain(unmatched.iter()).copied().collect();
        all.sort();
        assert_eq!(all, vec![0, 1, 2]);
        assert!(matched.iter().all(|id| !unmatched.contains(id)));
    }
}
