// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Image extraction: pull, filter by prefix, restore layout, verify.

use crate::client::RegistryClient;
use crate::reference::ImageName;
use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};
use tcv_cache::constants::{
    MANIFEST_FILE_NAME, TRITON_CACHE_PREFIX, TRITON_MANIFEST_PREFIX, VLLM_CACHE_PREFIX,
    VLLM_MANIFEST_PREFIX,
};
use tcv_cache::{canonical, CacheManifest};
use thiserror::Error;

/// Where retained layer entries land on disk.
pub struct ExtractTargets {
    /// Destination for plain Triton cache entries.
    pub triton_root: PathBuf,
    /// Destination for wrapped (vLLM) cache entries.
    pub vllm_root: PathBuf,
    /// Destination for the extracted manifest.
    pub manifest_root: PathBuf,
}

impl ExtractTargets {
    /// Standard destinations, with `cache_override` replacing both cache
    /// roots when given (the `--dir` flag).
    pub fn new(cache_override: Option<&Path>) -> Self {
        match cache_override {
            Some(dir) => Self {
                triton_root: dir.to_path_buf(),
                vllm_root: dir.to_path_buf(),
                manifest_root: tcv_cache::constants::extract_manifest_dir(),
            },
            None => Self {
                triton_root: tcv_cache::constants::triton_cache_dir(),
                vllm_root: tcv_cache::constants::vllm_cache_dir(),
                manifest_root: tcv_cache::constants::extract_manifest_dir(),
            },
        }
    }
}

/// Aggregate per-entry integrity failure.
#[derive(Debug, Error)]
#[error("integrity check failed for {} cache entries: {}", .offenders.len(), .offenders.join(", "))]
pub struct IntegrityError {
    pub offenders: Vec<String>,
}

/// Which cache flavors a set of layers actually delivered.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub wrote_triton: bool,
    pub wrote_vllm: bool,
    pub files_written: usize,
}

/// Pull `image` and restore its cache under the configured targets.
///
/// After unpacking, group-index paths are restored against the extraction
/// root and every entry is verified against the manifest digests.
pub async fn extract_image(
    client: &RegistryClient,
    image: &ImageName,
    targets: &ExtractTargets,
) -> Result<ExtractReport> {
    let layers = client.pull_layers(image).await?;
    tracing::debug!("pulled {} layer(s) for {image}", layers.len());

    let mut report = ExtractReport::default();
    for layer in &layers {
        unpack_layer(layer, targets, &mut report)?;
    }
    finish_extraction(targets, &report)?;
    Ok(report)
}

/// Post-unpack fixup and verification, shared by the network path and the
/// offline tests.
pub fn finish_extraction(targets: &ExtractTargets, report: &ExtractReport) -> Result<()> {
    if report.wrote_triton {
        canonical::restore_tree(&targets.triton_root)?;
    }
    if report.wrote_vllm {
        canonical::restore_tree(&targets.vllm_root)?;
    }

    let manifest_path = targets.manifest_root.join(MANIFEST_FILE_NAME);
    if !manifest_path.is_file() {
        tracing::debug!("image carried no manifest, skipping integrity verification");
        return Ok(());
    }
    let manifest = CacheManifest::read_from(&manifest_path)?;
    let cache_root = match &manifest {
        CacheManifest::Triton { .. } => &targets.triton_root,
        CacheManifest::Vllm { .. } => &targets.vllm_root,
    };
    verify_integrity(&manifest, cache_root)?;
    Ok(())
}

/// Unpack one gzip-tar layer, retaining only recognized prefixes.
pub fn unpack_layer(
    gz_data: &[u8],
    targets: &ExtractTargets,
    report: &mut ExtractReport,
) -> Result<()> {
    let mut archive = Archive::new(GzDecoder::new(gz_data));
    for entry in archive.entries().context("failed to read layer as tar.gz")? {
        let mut entry = entry.context("error reading tar archive")?;
        let name = entry.path()?.to_string_lossy().into_owned();

        let Some(target) = map_entry_path(&name, targets, report) else {
            continue;
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let mode = entry.header().mode().unwrap_or(0o644) & 0o777;
        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&target)
                    .with_context(|| format!("failed to create directory {}", target.display()))?;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
            }
            EntryType::Regular => {
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut data)?;
                std::fs::write(&target, &data)
                    .with_context(|| format!("failed to write file {}", target.display()))?;
                std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
                report.files_written += 1;
            }
            other => {
                tracing::debug!("skipping unsupported tar entry type {other:?} for {name}");
            }
        }
    }
    Ok(())
}

/// Map an in-tar path onto its extraction target, or `None` to skip it.
fn map_entry_path(
    name: &str,
    targets: &ExtractTargets,
    report: &mut ExtractReport,
) -> Option<PathBuf> {
    let triton_manifest_prefix = format!("{TRITON_MANIFEST_PREFIX}/");
    let vllm_cache_prefix = format!("{VLLM_CACHE_PREFIX}/");
    let vllm_manifest_literal = format!("{VLLM_MANIFEST_PREFIX}/{MANIFEST_FILE_NAME}");

    if let Some(rel) = name.strip_prefix(TRITON_CACHE_PREFIX) {
        if rel.is_empty() {
            return None;
        }
        let target = safe_join(&targets.triton_root, rel)?;
        report.wrote_triton = true;
        return Some(target);
    }
    if let Some(rel) = name.strip_prefix(&triton_manifest_prefix) {
        if rel.is_empty() {
            return None;
        }
        return safe_join(&targets.manifest_root, rel);
    }
    if let Some(rel) = name.strip_prefix(&vllm_cache_prefix) {
        if rel.is_empty() {
            return None;
        }
        let target = safe_join(&targets.vllm_root, rel)?;
        report.wrote_vllm = true;
        return Some(target);
    }
    if name.starts_with(&vllm_manifest_literal) {
        return Some(targets.manifest_root.join(MANIFEST_FILE_NAME));
    }
    None
}

/// Join a layer-entry remainder onto its extraction root, refusing names
/// that would land outside it.
///
/// Layers come from the registry and are untrusted; a crafted entry like
/// `io.triton.cache/../../etc/cron.d/evil` or `io.triton.cache//etc/passwd`
/// must not escape the target root, so any remainder carrying a `..`, root,
/// or prefix component is dropped with a warning.
fn safe_join(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel_path = Path::new(rel);
    let escapes = rel_path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        tracing::warn!("skipping layer entry with unsafe path: {rel}");
        return None;
    }
    Some(root.join(rel_path))
}

/// Verify every manifest entry against the extracted tree.
///
/// Regular files must match their recorded sha256; group-index files are
/// rewritten during extraction, so for them each referenced child path must
/// resolve instead. Offending entries are aggregated into one error.
pub fn verify_integrity(manifest: &CacheManifest, cache_root: &Path) -> Result<(), IntegrityError> {
    let mut offenders = BTreeSet::new();

    for entry in manifest.flat_entries() {
        for record in &entry.files {
            let path = cache_root.join(&record.path);
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let ok = if canonical::is_group_index(&file_name) {
                group_paths_resolve(&path, cache_root)
            } else {
                file_digest_matches(&path, &record.sha256)
            };
            if !ok {
                tracing::warn!(
                    "integrity violation in entry {}: {}",
                    entry.hash,
                    record.path
                );
                offenders.insert(entry.hash.clone());
            }
        }
    }

    if offenders.is_empty() {
        Ok(())
    } else {
        Err(IntegrityError {
            offenders: offenders.into_iter().collect(),
        })
    }
}

fn file_digest_matches(path: &Path, expected: &str) -> bool {
    match std::fs::read(path) {
        Ok(data) => hex::encode(Sha256::digest(&data)) == expected,
        Err(_) => false,
    }
}

/// Every child path a group index references under the cache root must
/// exist after extraction.
fn group_paths_resolve(path: &Path, cache_root: &Path) -> bool {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return false;
    };
    let Ok(doc) = serde_json::from_str::<Value>(&raw) else {
        return false;
    };
    let root = cache_root.to_string_lossy();
    collect_strings(&doc)
        .into_iter()
        .filter(|s| s.starts_with(root.as_ref()))
        .all(|s| Path::new(&s).exists())
}

fn collect_strings(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(collect_strings).collect(),
        Value::Object(map) => map.values().flat_map(collect_strings).collect(),
        _ => Vec::new(),
    }
}
