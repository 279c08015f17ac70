// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Compatibility summary: the compact grouping embedded as an image
//! annotation so consumers can decide compatibility without pulling layers.

use crate::manifest::KernelEntry;
use serde::{Deserialize, Serialize};

/// One distinct hardware tuple and the number of entries targeting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryGroup {
    pub arch: String,
    pub backend: String,
    pub warp_size: u32,
    pub ptx_version: u32,
    pub count: usize,
}

/// Distinct `(arch, backend, warp_size, ptx_version)` tuples in the cache.
///
/// Groups are kept in a vector, sorted lexicographically by `(arch, backend)`
/// then numerically by `(warp_size, ptx_version)`, so the serialized form is
/// deterministic and round-trips without reordering.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub groups: Vec<SummaryGroup>,
}

impl Summary {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Group entries by hardware tuple, deterministically ordered.
pub fn build_summary<'a>(entries: impl IntoIterator<Item = &'a KernelEntry>) -> Summary {
    let mut groups: Vec<SummaryGroup> = Vec::new();
    for entry in entries {
        let md = &entry.metadata;
        match groups.iter_mut().find(|g| {
            g.arch == md.arch
                && g.backend == md.backend
                && g.warp_size == md.warp_size
                && g.ptx_version == md.ptx_version
        }) {
            Some(group) => group.count += 1,
            None => groups.push(SummaryGroup {
                arch: md.arch.clone(),
                backend: md.backend.clone(),
                warp_size: md.warp_size,
                ptx_version: md.ptx_version,
                count: 1,
            }),
        }
    }
    groups.sort_by(|a, b| {
        (&a.arch, &a.backend, a.warp_size, a.ptx_version)
            .cmp(&(&b.arch, &b.backend, b.warp_size, b.ptx_version))
    });
    Summary { groups }
}
