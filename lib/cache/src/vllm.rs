// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wrapped (vLLM-style) compile cache detection.
//!
//! A wrapped cache is a torch compile cache whose outer-hash directories
//! each contain a nested plain Triton cache under a `triton_cache`
//! directory. The outer hashes are opaque to the compatibility oracle; the
//! nested caches are delegated to the plain reader.

use crate::constants::{VLLM_CACHE_PREFIX, VLLM_LABEL_PREFIX, VLLM_MANIFEST_PREFIX};
use crate::manifest::{CacheManifest, KernelEntry};
use crate::summary::{build_summary, Summary};
use crate::triton::{labels_for, TritonCache};
use crate::Cache;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const TORCH_COMPILE_CACHE_DIR: &str = "torch_compile_cache";
const NESTED_CACHE_DIR: &str = "triton_cache";

/// A detected wrapped compile cache.
pub struct VllmCache {
    root: PathBuf,
    /// Outer hash to inner kernel entries, across all detected groups.
    groups: BTreeMap<String, BTreeMap<String, KernelEntry>>,
    /// Number of outer-hash directories, including ones with no usable
    /// inner cache.
    outer_count: usize,
    /// Entries of the last inner cache that was detected; the image summary
    /// is built from these alone.
    last_inner: Vec<KernelEntry>,
}

impl VllmCache {
    /// Detect a wrapped cache under `root`.
    ///
    /// Detection looks for the compile-cache sentinels (a
    /// `*vllm_compile_cache.py` file, or an `inductor_cache`/`fxgraph` path
    /// component); `vendor` and hidden directories are not descended into.
    /// Returns `Ok(None)` when no sentinel is present or no outer group
    /// exists.
    pub fn detect(root: &Path) -> Result<Option<Self>> {
        if !root.is_dir() {
            return Ok(None);
        }
        if !Self::has_sentinel(root)? {
            return Ok(None);
        }

        let torch_root = root.join(TORCH_COMPILE_CACHE_DIR);
        if !torch_root.is_dir() {
            tracing::warn!(
                "torch compile cache path does not exist: {}",
                torch_root.display()
            );
            return Ok(None);
        }

        let mut groups = BTreeMap::new();
        let mut outer_count = 0usize;
        let mut last_inner = Vec::new();

        let mut outer_dirs: Vec<_> = std::fs::read_dir(&torch_root)
            .with_context(|| format!("failed to read {}", torch_root.display()))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| e.path())
            .collect();
        outer_dirs.sort();

        for outer in outer_dirs {
            outer_count += 1;
            let outer_hash = outer
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let Some(nested) = find_nested_cache(&outer) else {
                tracing::warn!("no nested Triton cache for group {outer_hash}");
                continue;
            };
            tracing::debug!("inspecting nested Triton cache at {}", nested.display());
            let Some(inner) = TritonCache::detect(&nested)? else {
                tracing::warn!("failed to detect Triton cache at {}", nested.display());
                continue;
            };

            // File paths come out relative to the nested cache; re-anchor
            // them to the wrapped root so the manifest describes one tree.
            let nested_rel = nested
                .strip_prefix(root)
                .unwrap_or(&nested)
                .to_string_lossy()
                .into_owned();
            let entries: BTreeMap<String, KernelEntry> = inner
                .entries()
                .map(|e| {
                    let mut entry = e.clone();
                    for record in &mut entry.files {
                        record.path = format!("{nested_rel}/{}", record.path);
                    }
                    (entry.hash.clone(), entry)
                })
                .collect();
            last_inner = entries.values().cloned().collect();
            groups.insert(outer_hash, entries);
        }

        if outer_count == 0 {
            return Ok(None);
        }
        Ok(Some(Self {
            root: root.to_path_buf(),
            groups,
            outer_count,
            last_inner,
        }))
    }

    fn has_sentinel(root: &Path) -> Result<bool> {
        let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir() && (name == "vendor" || name.starts_with('.')))
        });
        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
            let name = entry.file_name().to_string_lossy();
            let path = entry.path().to_string_lossy();
            if name.ends_with("vllm_compile_cache.py")
                || path.contains("inductor_cache")
                || path.contains("fxgraph")
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn groups(&self) -> &BTreeMap<String, BTreeMap<String, KernelEntry>> {
        &self.groups
    }
}

/// Locate the nested `triton_cache` directory under one outer-hash group.
fn find_nested_cache(outer: &Path) -> Option<PathBuf> {
    WalkDir::new(outer)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_dir() && e.file_name() == NESTED_CACHE_DIR)
        .map(|e| e.into_path())
}

impl Cache for VllmCache {
    fn name(&self) -> &'static str {
        "vllm"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn entry_count(&self) -> usize {
        self.outer_count
    }

    fn size_bytes(&self) -> u64 {
        // Wrapped caches account the whole tree, not just kernel payloads;
        // the inductor artifacts outside triton_cache are part of the cache.
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    fn summary(&self) -> Summary {
        build_summary(self.last_inner.iter())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        labels_for(
            VLLM_LABEL_PREFIX,
            self.entry_count(),
            self.size_bytes(),
            &self.summary(),
        )
    }

    fn manifest(&self) -> CacheManifest {
        CacheManifest::Vllm {
            groups: self.groups.clone(),
        }
    }

    fn cache_prefix(&self) -> &'static str {
        VLLM_CACHE_PREFIX
    }

    fn manifest_prefix(&self) -> &'static str {
        VLLM_MANIFEST_PREFIX
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triton::tests::write_fixture_entry;
    use tempfile::TempDir;

    const OUTER: &str = "f00dfacef00dfacef00dfacef00dface";
    const INNER: &str = "0123456789abcdef0123456789abcdef";

    fn write_wrapped_fixture(root: &Path) {
        // Sentinel file that marks the tree as a vLLM compile cache.
        std::fs::write(root.join("vllm_compile_cache.py"), "# factors").unwrap();
        let nested = root
            .join(TORCH_COMPILE_CACHE_DIR)
            .join(OUTER)
            .join("rank0_0")
            .join(NESTED_CACHE_DIR);
        std::fs::create_dir_all(&nested).unwrap();
        write_fixture_entry(&nested, INNER, "gfx90a", "hip");
    }

    #[test]
    fn detects_wrapped_cache_with_one_group() {
        let tmp = TempDir::new().unwrap();
        write_wrapped_fixture(tmp.path());

        let cache = VllmCache::detect(tmp.path()).unwrap().unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.groups().len(), 1);
        let inner = &cache.groups()[OUTER];
        assert!(inner.contains_key(INNER));
        assert_eq!(cache.cache_prefix(), "io.vllm.cache");
    }

    #[test]
    fn manifest_nests_groups_by_outer_hash() {
        let tmp = TempDir::new().unwrap();
        write_wrapped_fixture(tmp.path());

        let cache = VllmCache::detect(tmp.path()).unwrap().unwrap();
        match cache.manifest() {
            CacheManifest::Vllm { groups } => {
                assert_eq!(groups.len(), 1);
                assert_eq!(groups[OUTER].len(), 1);
            }
            CacheManifest::Triton { .. } => panic!("expected a wrapped manifest"),
        }
    }

    #[test]
    fn summary_comes_from_last_inner_cache() {
        let tmp = TempDir::new().unwrap();
        write_wrapped_fixture(tmp.path());

        // A second group, lexicographically later, with a different target.
        let nested = tmp
            .path()
            .join(TORCH_COMPILE_CACHE_DIR)
            .join("ffffffffffffffffffffffffffffffff")
            .join(NESTED_CACHE_DIR);
        std::fs::create_dir_all(&nested).unwrap();
        write_fixture_entry(&nested, INNER, "sm_90", "cuda");

        let cache = VllmCache::detect(tmp.path()).unwrap().unwrap();
        let summary = cache.summary();
        assert_eq!(summary.groups.len(), 1);
        assert_eq!(summary.groups[0].backend, "cuda");
    }

    #[test]
    fn plain_cache_is_not_wrapped() {
        let tmp = TempDir::new().unwrap();
        write_fixture_entry(tmp.path(), INNER, "gfx90a", "hip");
        assert!(VllmCache::detect(tmp.path()).unwrap().is_none());
    }
}
