// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Deterministic gzip-tar layer encoding.
//!
//! Building the same staged tree twice must produce byte-identical layers:
//! entries are appended in sorted path order with zeroed mtimes and
//! ownership, and only the file mode survives from the source metadata.

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::{EntryType, Header};
use walkdir::WalkDir;

/// One encoded layer, ready for push.
pub struct BuiltLayer {
    /// gzip-compressed tar bytes.
    pub gz_data: Vec<u8>,
    /// `sha256:` digest of the uncompressed tar, for the config's diff_ids.
    pub diff_id: String,
    /// Layer descriptor annotations.
    pub annotations: BTreeMap<String, String>,
}

/// Encode the tree under `src_root` as a gzip tar whose entry paths start
/// with `prefix`.
///
/// The prefix is used verbatim when it already ends with a separator;
/// otherwise one is inserted. This preserves the historical prefix literals,
/// which disagree about trailing slashes.
pub fn build_layer(
    src_root: &Path,
    prefix: &str,
    annotations: BTreeMap<String, String>,
) -> Result<BuiltLayer> {
    let mut tar_data = Vec::new();
    {
        let mut builder = tar::Builder::new(&mut tar_data);

        let mut paths: Vec<_> = WalkDir::new(src_root)
            .min_depth(1)
            .into_iter()
            .collect::<walkdir::Result<Vec<_>>>()
            .with_context(|| format!("failed to walk {}", src_root.display()))?
            .into_iter()
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        for path in paths {
            let rel = path
                .strip_prefix(src_root)
                .expect("walked path is under root")
                .to_string_lossy()
                .into_owned();
            let name = join_prefix(prefix, &rel);
            let metadata = std::fs::symlink_metadata(&path)
                .with_context(|| format!("failed to stat {}", path.display()))?;

            let mut header = Header::new_gnu();
            header.set_mode(metadata.permissions().mode() & 0o777);
            header.set_uid(0);
            header.set_gid(0);
            header.set_mtime(0);

            if metadata.is_dir() {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, format!("{name}/"), std::io::empty())?;
            } else if metadata.is_file() {
                let data = std::fs::read(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                header.set_entry_type(EntryType::Regular);
                header.set_size(data.len() as u64);
                builder.append_data(&mut header, &name, data.as_slice())?;
            } else {
                tracing::debug!("skipping non-regular entry {}", path.display());
            }
        }
        builder.finish()?;
    }

    let diff_id = format!("sha256:{}", hex::encode(Sha256::digest(&tar_data)));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_data)?;
    let gz_data = encoder.finish()?;

    Ok(BuiltLayer {
        gz_data,
        diff_id,
        annotations,
    })
}

/// Join an in-tar prefix and a relative path without doubling separators.
pub(crate) fn join_prefix(prefix: &str, rel: &str) -> String {
    if prefix.ends_with('/') {
        format!("{prefix}{rel}")
    } else {
        format!("{prefix}/{rel}")
    }
}
