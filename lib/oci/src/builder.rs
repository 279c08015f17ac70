// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Scratch-image assembly.
//!
//! Staging happens under the build root: the cache is copied, its group
//! indexes are canonicalized, and the manifest is written next to it. The
//! staged trees are encoded into two deterministic layers and the commit is
//! delegated to the registry client. Staging directories are removed on all
//! exit paths.

use crate::client::RegistryClient;
use crate::layer::{build_layer, BuiltLayer};
use crate::reference::ImageName;
use crate::{ANNOTATION_CACHE_FLAVOR, ANNOTATION_CACHE_PREFIX, ANNOTATION_IMAGE_TITLE};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tcv_cache::constants::{BUILD_ROOT, CACHE_DIR, MANIFEST_DIR, MANIFEST_FILE_NAME};
use tcv_cache::{canonical, detect_cache};
use walkdir::WalkDir;

/// A fully staged image, ready for commit.
pub struct StagedImage {
    /// Cache layer then manifest layer.
    pub layers: Vec<BuiltLayer>,
    pub labels: BTreeMap<String, String>,
    /// OCI image config blob (scratch base: labels and diff_ids only).
    pub config_json: Vec<u8>,
    /// Image manifest annotations; mirror the labels so consumers can read
    /// them without fetching the config.
    pub annotations: BTreeMap<String, String>,
    pub flavor: &'static str,
}

#[derive(Serialize)]
struct ImageConfig<'a> {
    architecture: &'a str,
    os: &'a str,
    config: ConfigSection<'a>,
    rootfs: RootFs<'a>,
}

#[derive(Serialize)]
struct ConfigSection<'a> {
    #[serde(rename = "Labels")]
    labels: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct RootFs<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    diff_ids: Vec<&'a str>,
}

/// Removes the staging trees on drop, success or failure alike.
struct StageGuard {
    paths: Vec<PathBuf>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(err) = std::fs::remove_dir_all(path) {
                if path.exists() {
                    tracing::warn!("failed to clean staging dir {}: {err}", path.display());
                }
            }
        }
    }
}

/// Analyze `cache_dir` and stage it as image content under the standard
/// build root.
///
/// This is the whole pre-commit contract of the builder; the push itself is
/// the registry client's business.
pub fn stage_image(image: &ImageName, cache_dir: &Path) -> Result<StagedImage> {
    stage_image_at(image, cache_dir, Path::new(BUILD_ROOT))
}

/// [`stage_image`] with an explicit build root.
pub fn stage_image_at(
    image: &ImageName,
    cache_dir: &Path,
    build_root: &Path,
) -> Result<StagedImage> {
    let cache = detect_cache(cache_dir)?
        .with_context(|| format!("no kernel cache found under {}", cache_dir.display()))?;
    tracing::info!(
        "detected {} cache with {} entries ({} bytes)",
        cache.name(),
        cache.entry_count(),
        cache.size_bytes()
    );

    let cache_stage = build_root.join(CACHE_DIR).join(cache.name());
    let manifest_stage = build_root.join(MANIFEST_DIR).join(cache.name());
    let _guard = StageGuard {
        paths: vec![cache_stage.clone(), manifest_stage.clone()],
    };

    recreate_dir(&cache_stage)?;
    recreate_dir(&manifest_stage)?;

    copy_tree(cache.root(), &cache_stage)?;
    canonical::canonicalize_tree(&cache_stage, cache.root())?;

    let manifest = cache.manifest();
    manifest.write_to(&manifest_stage.join(MANIFEST_FILE_NAME))?;

    let flavor = cache.name();
    let layer_annotations = BTreeMap::from([
        (ANNOTATION_CACHE_FLAVOR.to_string(), flavor.to_string()),
        (
            ANNOTATION_CACHE_PREFIX.to_string(),
            cache.cache_prefix().to_string(),
        ),
    ]);
    let cache_layer = build_layer(&cache_stage, cache.cache_prefix(), layer_annotations)?;
    let manifest_layer = build_layer(
        &manifest_stage,
        cache.manifest_prefix(),
        BTreeMap::from([(ANNOTATION_CACHE_FLAVOR.to_string(), flavor.to_string())]),
    )?;

    let mut labels = cache.labels();
    labels.insert(ANNOTATION_IMAGE_TITLE.to_string(), image.title().to_string());

    let config = ImageConfig {
        architecture: "amd64",
        os: "linux",
        config: ConfigSection { labels: &labels },
        rootfs: RootFs {
            kind: "layers",
            diff_ids: vec![&cache_layer.diff_id, &manifest_layer.diff_id],
        },
    };
    let config_json = serde_json::to_vec(&config)?;

    Ok(StagedImage {
        layers: vec![cache_layer, manifest_layer],
        annotations: labels.clone(),
        labels,
        config_json,
        flavor,
    })
}

/// Build and push a cache image.
pub async fn create_image(
    client: &RegistryClient,
    image: &ImageName,
    cache_dir: &Path,
) -> Result<()> {
    if !cache_dir.is_dir() {
        bail!("cache directory {} does not exist", cache_dir.display());
    }
    let staged = stage_image(image, cache_dir)?;
    let manifest_url = client.push_image(image, &staged).await?;
    tracing::info!("pushed {} cache image to {manifest_url}", staged.flavor);
    Ok(())
}

fn recreate_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("failed to clear staging dir {}", path.display()))?;
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("failed to create staging dir {}", path.display()))
}

/// Copy a tree preserving file modes; symlinks and special files are
/// skipped with a debug log, matching what the layer encoder accepts.
fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("failed to walk {}", src.display()))?;
        let rel = entry.path().strip_prefix(src).expect("walked path under src");
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("failed to copy {}", entry.path().display()))?;
        } else {
            tracing::debug!("skipping non-regular file {}", entry.path().display());
        }
    }
    Ok(())
}
