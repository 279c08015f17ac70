// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Kernel cache analysis and manifest generation.
//!
//! This crate walks an on-disk JIT kernel cache (either a plain Triton cache
//! or a vLLM-style compile cache wrapping nested Triton caches), parses the
//! per-kernel metadata, canonicalizes host-specific paths into a portable
//! form, and produces the manifest and compatibility summary that get
//! embedded into the cache image.

pub mod canonical;
pub mod constants;
pub mod manifest;
pub mod metadata;
pub mod summary;
pub mod triton;
pub mod vllm;

pub use canonical::{canonicalize_tree, restore_tree, PATH_SENTINEL};
pub use manifest::{CacheManifest, FileRecord, KernelEntry};
pub use metadata::KernelMetadata;
pub use summary::{Summary, SummaryGroup};
pub use triton::TritonCache;
pub use vllm::VllmCache;

use std::collections::BTreeMap;
use std::path::Path;

/// A detected kernel cache, ready to be packaged.
///
/// Implemented by [`TritonCache`] (plain JIT cache) and [`VllmCache`]
/// (wrapped compile cache). The image builder only sees this surface.
pub trait Cache {
    /// Cache flavor name, `"triton"` or `"vllm"`.
    fn name(&self) -> &'static str;

    /// Root directory the cache was detected under.
    fn root(&self) -> &Path;

    /// Number of entries (inner kernels for plain caches, outer groups for
    /// wrapped caches).
    fn entry_count(&self) -> usize;

    /// Total payload size in bytes.
    fn size_bytes(&self) -> u64;

    /// Compatibility summary for the image annotation.
    fn summary(&self) -> Summary;

    /// Image-level labels: entry count, byte size, and the summary JSON.
    fn labels(&self) -> BTreeMap<String, String>;

    /// The full cache manifest.
    fn manifest(&self) -> CacheManifest;

    /// In-tar path prefix for the cache layer.
    fn cache_prefix(&self) -> &'static str;

    /// In-tar path prefix for the manifest layer.
    fn manifest_prefix(&self) -> &'static str;
}

/// Detect a cache under `root`, preferring the wrapped flavor.
///
/// A wrapped compile cache contains nested plain caches, so it must be
/// checked first; probing for a plain cache inside a wrapped tree would
/// misclassify it. Returns `Ok(None)` when neither flavor is present.
pub fn detect_cache(root: &Path) -> anyhow::Result<Option<Box<dyn Cache>>> {
    if let Some(vllm) = VllmCache::detect(root)? {
        return Ok(Some(Box::new(vllm)));
    }
    if let Some(triton) = TritonCache::detect(root)? {
        return Ok(Some(Box::new(triton)));
    }
    Ok(None)
}
