// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Plain Triton JIT cache detection and analysis.
//!
//! A plain cache is a directory whose children are 32-hex-char hash
//! directories, each holding one metadata JSON plus the compiled payload
//! files for a single kernel.

use crate::constants::{
    TRITON_CACHE_PREFIX, TRITON_LABEL_PREFIX, TRITON_MANIFEST_PREFIX,
};
use crate::manifest::{CacheManifest, FileRecord, KernelEntry};
use crate::metadata::KernelMetadata;
use crate::summary::{build_summary, Summary};
use crate::{canonical, Cache};
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Hash-directory name pattern shared by plain and wrapped caches.
pub static HASH_DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{32}$").expect("hash dir regex"));

/// A detected plain Triton cache.
pub struct TritonCache {
    root: PathBuf,
    entries: BTreeMap<String, KernelEntry>,
}

impl TritonCache {
    /// Walk `root` and parse every valid kernel entry.
    ///
    /// Returns `Ok(None)` when no valid entry exists — a missing cache is
    /// not an error. Entries with unparseable metadata are skipped with a
    /// warning.
    pub fn detect(root: &Path) -> Result<Option<Self>> {
        if !root.is_dir() {
            return Ok(None);
        }
        let mut entries = BTreeMap::new();
        let dir = std::fs::read_dir(root)
            .with_context(|| format!("failed to read cache root {}", root.display()))?;
        for item in dir {
            let item = item?;
            if !item.file_type()?.is_dir() {
                continue;
            }
            let name = item.file_name().to_string_lossy().into_owned();
            if !HASH_DIR_RE.is_match(&name) {
                continue;
            }
            match read_entry(&item.path(), &name) {
                Ok(Some(entry)) => {
                    entries.insert(name, entry);
                }
                Ok(None) => {
                    tracing::debug!("hash dir {name} has no metadata file, skipping");
                }
                Err(err) => {
                    tracing::warn!("skipping cache entry {name}: {err:#}");
                }
            }
        }
        if entries.is_empty() {
            tracing::debug!("no Triton cache found under {}", root.display());
            return Ok(None);
        }
        Ok(Some(Self {
            root: root.to_path_buf(),
            entries,
        }))
    }

    pub fn entries(&self) -> impl Iterator<Item = &KernelEntry> {
        self.entries.values()
    }
}

impl Cache for TritonCache {
    fn name(&self) -> &'static str {
        "triton"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn size_bytes(&self) -> u64 {
        self.entries.values().map(KernelEntry::payload_bytes).sum()
    }

    fn summary(&self) -> Summary {
        build_summary(self.entries.values())
    }

    fn labels(&self) -> BTreeMap<String, String> {
        labels_for(TRITON_LABEL_PREFIX, self.entry_count(), self.size_bytes(), &self.summary())
    }

    fn manifest(&self) -> CacheManifest {
        CacheManifest::Triton {
            entries: self.entries.clone(),
        }
    }

    fn cache_prefix(&self) -> &'static str {
        TRITON_CACHE_PREFIX
    }

    fn manifest_prefix(&self) -> &'static str {
        TRITON_MANIFEST_PREFIX
    }
}

/// Build the standard image labels for a cache flavor.
pub(crate) fn labels_for(
    prefix: &str,
    entry_count: usize,
    size_bytes: u64,
    summary: &Summary,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (format!("{prefix}/entry-count"), entry_count.to_string()),
        (format!("{prefix}/cache-size-bytes"), size_bytes.to_string()),
        (format!("{prefix}/summary"), summary.to_json()),
    ])
}

/// Parse one hash directory into a [`KernelEntry`].
///
/// The metadata file is the first JSON that is not a group index and parses
/// as kernel metadata. Every regular file in the directory is recorded with
/// its size and sha256 digest.
fn read_entry(dir: &Path, hash: &str) -> Result<Option<KernelEntry>> {
    let mut names: Vec<String> = Vec::new();
    for item in std::fs::read_dir(dir)? {
        let item = item?;
        if item.file_type()?.is_file() {
            names.push(item.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();

    let mut metadata = None;
    for name in &names {
        if !name.ends_with(".json") || canonical::is_group_index(name) {
            continue;
        }
        match KernelMetadata::from_file(&dir.join(name)) {
            Ok(md) => {
                metadata = Some(md);
                break;
            }
            Err(err) => {
                tracing::debug!("unreadable metadata {hash}/{name}: {err:#}");
            }
        }
    }
    let Some(metadata) = metadata else {
        if names.iter().any(|n| n.ends_with(".json")) {
            bail!("no parseable metadata file");
        }
        return Ok(None);
    };

    let mut files = Vec::with_capacity(names.len());
    for name in &names {
        let path = dir.join(name);
        let data = std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        files.push(FileRecord {
            path: format!("{hash}/{name}"),
            size: data.len() as u64,
            sha256: hex::encode(Sha256::digest(&data)),
        });
    }

    Ok(Some(KernelEntry {
        hash: hash.to_string(),
        metadata,
        files,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    pub(crate) const HASH: &str = "0123456789abcdef0123456789abcdef";

    pub(crate) fn write_fixture_entry(root: &Path, hash: &str, arch: &str, backend: &str) {
        let dir = root.join(hash);
        std::fs::create_dir_all(&dir).unwrap();
        let metadata = json!({
            "target": {"backend": backend, "arch": arch, "warp_size": if backend == "hip" { 64 } else { 32 }},
            "ptx_version": if backend == "cuda" { json!(84) } else { json!(null) },
        });
        std::fs::write(
            dir.join("kernel.json"),
            serde_json::to_string(&metadata).unwrap(),
        )
        .unwrap();
        std::fs::write(dir.join("kernel.hsaco"), vec![0u8; 42]).unwrap();
    }

    #[test]
    fn detects_single_entry_cache() {
        let tmp = TempDir::new().unwrap();
        write_fixture_entry(tmp.path(), HASH, "gfx90a", "hip");

        let cache = TritonCache::detect(tmp.path()).unwrap().unwrap();
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.size_bytes(), 42);

        let entry = cache.entries().next().unwrap();
        assert!(HASH_DIR_RE.is_match(&entry.hash));
        assert_eq!(entry.metadata.arch, "gfx90a");
        assert_eq!(entry.files.len(), 2);
    }

    #[test]
    fn labels_carry_count_size_and_summary() {
        let tmp = TempDir::new().unwrap();
        write_fixture_entry(tmp.path(), HASH, "gfx90a", "hip");

        let cache = TritonCache::detect(tmp.path()).unwrap().unwrap();
        let labels = cache.labels();
        assert_eq!(labels["io.triton.cache.image/entry-count"], "1");
        assert_eq!(labels["io.triton.cache.image/cache-size-bytes"], "42");
        let summary: Summary =
            serde_json::from_str(&labels["io.triton.cache.image/summary"]).unwrap();
        assert_eq!(summary.groups.len(), 1);
        assert_eq!(summary.groups[0].count, 1);
    }

    #[test]
    fn empty_root_is_no_cache_not_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(TritonCache::detect(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn non_hash_dirs_are_ignored() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir(tmp.path().join("not-a-hash")).unwrap();
        assert!(TritonCache::detect(tmp.path()).unwrap().is_none());
    }

    #[test]
    fn corrupt_metadata_skips_entry_but_keeps_others() {
        let tmp = TempDir::new().unwrap();
        write_fixture_entry(tmp.path(), HASH, "gfx90a", "hip");

        let bad = tmp.path().join("fedcba9876543210fedcba9876543210");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("kernel.json"), "{broken").unwrap();

        let cache = TritonCache::detect(tmp.path()).unwrap().unwrap();
        assert_eq!(cache.entry_count(), 1);
    }
}
