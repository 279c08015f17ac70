// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Fixed on-disk paths, layer prefixes, and environment keys.
//!
//! The layer prefixes are wire contracts shared with existing images; they
//! are intentionally inconsistent about trailing slashes and must not be
//! normalized.

use std::path::PathBuf;

/// Scratch root for build staging and extracted manifests.
pub const BUILD_ROOT: &str = "/tmp/.mcv";
/// Staged-manifest subdirectory under [`BUILD_ROOT`].
pub const MANIFEST_DIR: &str = "manifest";
/// Staged-layer-content subdirectory under [`BUILD_ROOT`].
pub const CACHE_DIR: &str = "cache";
/// File name of the manifest inside the manifest layer.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// In-tar prefix of the cache layer for plain Triton caches.
pub const TRITON_CACHE_PREFIX: &str = "io.triton.cache/";
/// In-tar prefix of the manifest layer for plain Triton caches.
pub const TRITON_MANIFEST_PREFIX: &str = "io.triton.manifest";
/// In-tar prefix of the cache layer for wrapped (vLLM) caches.
pub const VLLM_CACHE_PREFIX: &str = "io.vllm.cache";
/// In-tar prefix of the manifest layer for wrapped (vLLM) caches.
pub const VLLM_MANIFEST_PREFIX: &str = "io.vllm.manifest";

/// Image-label prefix for plain Triton cache images.
pub const TRITON_LABEL_PREFIX: &str = "io.triton.cache.image";
/// Image-label prefix for wrapped cache images.
pub const VLLM_LABEL_PREFIX: &str = "cache.vllm.image";

/// Overrides the Triton cache location, producer and consumer side alike.
pub const ENV_TRITON_CACHE_DIR: &str = "TRITON_CACHE_DIR";
/// Overrides the static device-config path consulted in stub mode.
pub const ENV_DEVICE_CONFIG: &str = "TCV_DEVICE_CONFIG";

/// User home directory, falling back to `/tmp` when it cannot be determined.
pub fn home_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            tracing::warn!("failed to determine user home dir, falling back to /tmp");
            PathBuf::from("/tmp")
        }
    }
}

/// The Triton cache directory: `$TRITON_CACHE_DIR` or `~/.triton/cache`.
pub fn triton_cache_dir() -> PathBuf {
    match std::env::var_os(ENV_TRITON_CACHE_DIR) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => home_dir().join(".triton").join("cache"),
    }
}

/// The vLLM compile cache directory, `~/.cache/vllm`.
pub fn vllm_cache_dir() -> PathBuf {
    home_dir().join(".cache").join("vllm")
}

/// Extraction target for manifests, `/tmp/.mcv/manifest`.
pub fn extract_manifest_dir() -> PathBuf {
    PathBuf::from(BUILD_ROOT).join(MANIFEST_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixes_are_verbatim() {
        // Wire contract: the trailing-slash inconsistency is deliberate.
        assert_eq!(TRITON_CACHE_PREFIX, "io.triton.cache/");
        assert_eq!(VLLM_CACHE_PREFIX, "io.vllm.cache");
        assert_eq!(TRITON_MANIFEST_PREFIX, "io.triton.manifest");
        assert_eq!(VLLM_MANIFEST_PREFIX, "io.vllm.manifest");
    }

    #[test]
    fn extract_manifest_dir_is_under_build_root() {
        assert!(extract_manifest_dir().starts_with(BUILD_ROOT));
    }
}
