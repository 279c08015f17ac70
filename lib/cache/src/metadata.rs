// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Per-kernel metadata parsing.
//!
//! Triton writes one metadata JSON per compiled kernel. The layout differs
//! between releases and backends: newer files nest the hardware target under
//! a `target` object, older ones keep the fields flat; the CUDA backend
//! stores `arch` as an integer compute capability while HIP stores a `gfx*`
//! string. Everything is normalized here so the rest of the system works
//! with a single dialect.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

/// The compatibility vector of one compiled kernel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMetadata {
    /// Kernel name, recovered from the metadata file stem.
    pub name: String,
    /// Target architecture, e.g. `gfx90a` or `sm_90`.
    pub arch: String,
    /// Compiler backend tag, e.g. `hip` or `cuda`.
    pub backend: String,
    /// Threads per warp/wavefront on the target.
    pub warp_size: u32,
    /// PTX ISA version, 0 when inapplicable.
    #[serde(default)]
    pub ptx_version: u32,
    /// Numeric compute capability, when the backend exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_capability: Option<u32>,
}

impl KernelMetadata {
    /// Parse a Triton metadata file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read metadata file {}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in metadata file {}", path.display()))?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_value(name, &doc)
    }

    /// Parse an already-deserialized metadata document.
    pub fn from_value(name: String, doc: &Value) -> Result<Self> {
        // Hardware fields live under `target` in newer files, flat in older ones.
        let target = doc.get("target").unwrap_or(doc);

        let backend = target
            .get("backend")
            .and_then(Value::as_str)
            .context("metadata is missing a backend tag")?
            .to_string();

        let (arch, compute_capability) = match target.get("arch") {
            Some(Value::String(s)) if !s.is_empty() => (s.clone(), None),
            Some(Value::Number(n)) => {
                let cc = n
                    .as_u64()
                    .context("metadata arch is not a non-negative integer")?
                    as u32;
                (normalize_numeric_arch(&backend, cc), Some(cc))
            }
            _ => bail!("metadata is missing a target arch"),
        };

        let warp_size = target
            .get("warp_size")
            .or_else(|| doc.get("warp_size"))
            .and_then(Value::as_u64)
            .context("metadata is missing a warp size")? as u32;

        let ptx_version = doc
            .get("ptx_version")
            .or_else(|| target.get("ptx_version"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32;

        Ok(Self {
            name,
            arch,
            backend,
            warp_size,
            ptx_version,
            compute_capability,
        })
    }

    /// The grouping key used by the summarizer.
    pub fn tuple(&self) -> (&str, &str, u32, u32) {
        (&self.arch, &self.backend, self.warp_size, self.ptx_version)
    }
}

/// CUDA metadata stores arch as a bare compute capability; devices report
/// `sm_<cc>`. Fold both onto the device form so equality works.
fn normalize_numeric_arch(backend: &str, cc: u32) -> String {
    if backend == "cuda" {
        format!("sm_{cc}")
    } else {
        cc.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_hip_target() {
        let doc = json!({
            "target": {"backend": "hip", "arch": "gfx90a", "warp_size": 64},
            "ptx_version": null,
            "num_warps": 4
        });
        let md = KernelMetadata::from_value("matmul_kernel".into(), &doc).unwrap();
        assert_eq!(md.arch, "gfx90a");
        assert_eq!(md.backend, "hip");
        assert_eq!(md.warp_size, 64);
        assert_eq!(md.ptx_version, 0);
        assert_eq!(md.compute_capability, None);
    }

    #[test]
    fn parses_flat_cuda_layout_and_normalizes_arch() {
        let doc = json!({
            "backend": "cuda", "arch": 90, "warp_size": 32, "ptx_version": 84
        });
        let md = KernelMetadata::from_value("attn".into(), &doc).unwrap();
        assert_eq!(md.arch, "sm_90");
        assert_eq!(md.ptx_version, 84);
        assert_eq!(md.compute_capability, Some(90));
    }

    #[test]
    fn missing_backend_is_an_error() {
        let doc = json!({"target": {"arch": "gfx90a", "warp_size": 64}});
        assert!(KernelMetadata::from_value("k".into(), &doc).is_err());
    }

    #[test]
    fn roundtrips_through_json() {
        let md = KernelMetadata {
            name: "k".into(),
            arch: "sm_80".into(),
            backend: "cuda".into(),
            warp_size: 32,
            ptx_version: 80,
            compute_capability: Some(80),
        };
        let text = serde_json::to_string(&md).unwrap();
        let back: KernelMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(md, back);
    }
}
