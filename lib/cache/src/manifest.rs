// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! The cache manifest written into the image's manifest layer.
//!
//! A manifest is produced once by analysis, embedded into the image, read
//! once on the consumer side, and never mutated. Maps are `BTreeMap` so the
//! serialized form has stable, lexicographic key order.

use crate::metadata::KernelMetadata;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One file belonging to a kernel entry, with the digest recorded at
/// analysis time. The extractor verifies these digests after unpacking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the cache root.
    pub path: String,
    pub size: u64,
    pub sha256: String,
}

/// A single compiled kernel inside the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelEntry {
    /// Content-addressed hash directory name, 32 lowercase hex chars.
    pub hash: String,
    pub metadata: KernelMetadata,
    pub files: Vec<FileRecord>,
}

impl KernelEntry {
    /// Payload bytes, excluding the metadata and group-index files.
    pub fn payload_bytes(&self) -> u64 {
        self.files
            .iter()
            .filter(|f| !is_bookkeeping_file(&f.path))
            .map(|f| f.size)
            .sum()
    }
}

/// True for files that describe the entry rather than constitute its
/// compiled payload: the metadata JSON and `__grp__` index files.
pub(crate) fn is_bookkeeping_file(rel_path: &str) -> bool {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    name.ends_with(".json")
}

/// The manifest document: entry identity to metadata and constituent files,
/// with one extra level of outer-hash grouping for wrapped caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "flavor", rename_all = "lowercase")]
pub enum CacheManifest {
    Triton {
        entries: BTreeMap<String, KernelEntry>,
    },
    Vllm {
        groups: BTreeMap<String, BTreeMap<String, KernelEntry>>,
    },
}

impl CacheManifest {
    /// Flavor tag, matching the serialized `flavor` field.
    pub fn flavor(&self) -> &'static str {
        match self {
            CacheManifest::Triton { .. } => "triton",
            CacheManifest::Vllm { .. } => "vllm",
        }
    }

    /// All kernel entries, flattened across outer groups.
    pub fn flat_entries(&self) -> Vec<&KernelEntry> {
        match self {
            CacheManifest::Triton { entries } => entries.values().collect(),
            CacheManifest::Vllm { groups } => {
                groups.values().flat_map(|inner| inner.values()).collect()
            }
        }
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write manifest {}", path.display()))
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read manifest {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid manifest JSON in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str) -> KernelEntry {
        KernelEntry {
            hash: hash.to_string(),
            metadata: KernelMetadata {
                name: "k".into(),
                arch: "gfx90a".into(),
                backend: "hip".into(),
                warp_size: 64,
                ptx_version: 0,
                compute_capability: None,
            },
            files: vec![
                FileRecord {
                    path: format!("{hash}/k.hsaco"),
                    size: 42,
                    sha256: "ab".into(),
                },
                FileRecord {
                    path: format!("{hash}/k.json"),
                    size: 7,
                    sha256: "cd".into(),
                },
            ],
        }
    }

    #[test]
    fn payload_bytes_skips_bookkeeping_files() {
        assert_eq!(entry("0123456789abcdef0123456789abcdef").payload_bytes(), 42);
    }

    #[test]
    fn manifest_roundtrip_preserves_flavor_and_entries() {
        let hash = "0123456789abcdef0123456789abcdef";
        let mut entries = BTreeMap::new();
        entries.insert(hash.to_string(), entry(hash));
        let manifest = CacheManifest::Triton { entries };

        let text = serde_json::to_string(&manifest).unwrap();
        assert!(text.contains("\"flavor\":\"triton\""));
        let back: CacheManifest = serde_json::from_str(&text).unwrap();
        assert_eq!(manifest, back);
    }

    #[test]
    fn wrapped_manifest_flattens_across_groups() {
        let h1 = "0123456789abcdef0123456789abcdef";
        let h2 = "fedcba9876543210fedcba9876543210";
        let mut inner1 = BTreeMap::new();
        inner1.insert(h1.to_string(), entry(h1));
        let mut inner2 = BTreeMap::new();
        inner2.insert(h2.to_string(), entry(h2));
        let mut groups = BTreeMap::new();
        groups.insert("outerhash0".to_string(), inner1);
        groups.insert("outerhash1".to_string(), inner2);

        let manifest = CacheManifest::Vllm { groups };
        assert_eq!(manifest.flat_entries().len(), 2);
        assert_eq!(manifest.flavor(), "vllm");
    }
}
