// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Path canonicalization for group-index files.
//!
//! Triton's `__grp__*.json` files embed absolute paths of the host that
//! produced the cache. Before packaging, every path under the cache root is
//! rewritten to start with the sentinel token; after extraction the sentinel
//! is replaced with the consumer's cache root. Both rewrites are idempotent,
//! and files that fail to parse are left untouched with a warning so one bad
//! entry cannot sink the whole analysis.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use walkdir::WalkDir;

/// Token substituted for the producing host's cache root.
pub const PATH_SENTINEL: &str = "${TRITON_CACHE_DIR}";

const GROUP_FILE_PREFIX: &str = "__grp__";
const GROUP_FILE_SUFFIX: &str = ".json";

/// Whether a file name designates a group-index file.
pub fn is_group_index(name: &str) -> bool {
    name.starts_with(GROUP_FILE_PREFIX) && name.ends_with(GROUP_FILE_SUFFIX)
}

/// Rewrite one group-index file so paths under `cache_root` start with the
/// sentinel. Returns the number of rewritten values.
pub fn canonicalize_group_file(path: &Path, cache_root: &Path) -> Result<usize> {
    let from = cache_root.to_string_lossy().into_owned();
    rewrite_group_file(path, &from, PATH_SENTINEL)
}

/// Reverse of [`canonicalize_group_file`]: substitute `new_root` for the
/// sentinel token.
pub fn restore_group_file(path: &Path, new_root: &Path) -> Result<usize> {
    let to = new_root.to_string_lossy().into_owned();
    rewrite_group_file(path, PATH_SENTINEL, &to)
}

fn rewrite_group_file(path: &Path, from: &str, to: &str) -> Result<usize> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read group index {}", path.display()))?;
    let mut doc: Value = serde_json::from_str(&raw)
        .with_context(|| format!("invalid JSON in group index {}", path.display()))?;

    let rewritten = rewrite_value(&mut doc, from, to);
    if rewritten > 0 {
        let text = serde_json::to_string(&doc)?;
        std::fs::write(path, text)
            .with_context(|| format!("failed to write group index {}", path.display()))?;
    }
    Ok(rewritten)
}

// Rewrites every string value with a matching leading prefix, wherever it
// sits in the document. Schema-agnostic, so unknown fields survive.
fn rewrite_value(value: &mut Value, from: &str, to: &str) -> usize {
    match value {
        Value::String(s) => {
            if let Some(tail) = s.strip_prefix(from) {
                *s = format!("{to}{tail}");
                1
            } else {
                0
            }
        }
        Value::Array(items) => items.iter_mut().map(|v| rewrite_value(v, from, to)).sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|v| rewrite_value(v, from, to))
            .sum(),
        _ => 0,
    }
}

/// Canonicalize every group-index file under `tree`, rewriting paths that
/// start with `cache_root` — the root of the cache as the producing host
/// knows it, which differs from `tree` when the cache was copied into a
/// staging area first. Malformed files are skipped with a warning.
pub fn canonicalize_tree(tree: &Path, cache_root: &Path) -> Result<()> {
    for_each_group_file(tree, |path| {
        if let Err(err) = canonicalize_group_file(path, cache_root) {
            tracing::warn!("skipping group index {}: {err:#}", path.display());
        }
    })
}

/// Restore every group-index file under `root`, substituting `root` itself
/// for the sentinel token.
pub fn restore_tree(root: &Path) -> Result<()> {
    for_each_group_file(root, |path| {
        if let Err(err) = restore_group_file(path, root) {
            tracing::warn!("failed to restore full paths in {}: {err:#}", path.display());
        }
    })
}

fn for_each_group_file(root: &Path, mut f: impl FnMut(&Path)) -> Result<()> {
    for entry in WalkDir::new(root) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if is_group_index(&entry.file_name().to_string_lossy()) {
            f(entry.path());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write_group(dir: &Path, name: &str, doc: &Value) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, serde_json::to_string(doc).unwrap()).unwrap();
        path
    }

    #[test]
    fn group_index_name_pattern() {
        assert!(is_group_index("__grp__kernel.json"));
        assert!(!is_group_index("kernel.json"));
        assert!(!is_group_index("__grp__kernel.txt"));
    }

    #[test]
    fn canonicalize_then_restore_is_identity() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let doc = json!({
            "child_paths": {
                "kernel.hsaco": format!("{}/0123/kernel.hsaco", root.display()),
                "kernel.json": format!("{}/0123/kernel.json", root.display())
            },
            "other": 3
        });
        let path = write_group(root, "__grp__kernel.json", &doc);

        canonicalize_group_file(&path, root).unwrap();
        let canonical: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            canonical["child_paths"]["kernel.hsaco"],
            json!(format!("{PATH_SENTINEL}/0123/kernel.hsaco"))
        );
        // Untouched fields survive.
        assert_eq!(canonical["other"], json!(3));

        restore_group_file(&path, root).unwrap();
        let restored: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let doc = json!({
            "child_paths": {"a": format!("{}/x/a.bin", root.display())}
        });
        let path = write_group(root, "__grp__a.json", &doc);

        canonicalize_group_file(&path, root).unwrap();
        let once = std::fs::read_to_string(&path).unwrap();
        canonicalize_group_file(&path, root).unwrap();
        let twice = std::fs::read_to_string(&path).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn staged_copy_canonicalizes_against_original_root() {
        let tmp = TempDir::new().unwrap();
        let original = tmp.path().join("original");
        let staged = tmp.path().join("staged");
        std::fs::create_dir_all(&staged).unwrap();

        let doc = json!({
            "child_paths": {"a": format!("{}/x/a.bin", original.display())}
        });
        let path = write_group(&staged, "__grp__a.json", &doc);

        canonicalize_tree(&staged, &original).unwrap();
        let canonical: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            canonical["child_paths"]["a"],
            json!(format!("{PATH_SENTINEL}/x/a.bin"))
        );
    }

    #[test]
    fn malformed_group_file_is_left_untouched() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let path = root.join("__grp__bad.json");
        std::fs::write(&path, "{not json").unwrap();

        // Tree-level walk warns and continues.
        canonicalize_tree(root, root).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }
}
