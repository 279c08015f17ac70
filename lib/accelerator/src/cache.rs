// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Persisted device snapshot with a TTL.
//!
//! Probing vendor stacks is slow enough to be worth caching across the
//! short-lived CLI invocations on one host. The snapshot is shared between
//! processes; writers serialize through an atomic write-to-temp-then-rename,
//! and a partially written or stale file simply reads as a miss.

use crate::device::{AcceleratorInfo, Device, DeviceSummary, DeviceType};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Snapshot location for live probes.
pub const DEVICE_CACHE_PATH: &str = "/tmp/device_cache.json";
/// Snapshot location in stub mode, kept apart so fixtures never pollute
/// production state.
pub const STUBBED_DEVICE_CACHE_PATH: &str = "/tmp/stubbed_device_cache.json";
/// Snapshots older than this must not be used.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Why a cache read did not produce a usable snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheMiss {
    #[error("device cache not present")]
    NotPresent,
    #[error("device cache expired")]
    Expired,
    #[error("device cache corrupt: {0}")]
    Corrupt(String),
}

/// Serialized form of one probed device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDevice {
    pub name: String,
    pub device_type: DeviceType,
    pub hw_type: String,
    #[serde(default)]
    pub gpu_info: Vec<AcceleratorInfo>,
    #[serde(default)]
    pub summaries: Vec<DeviceSummary>,
}

impl CachedDevice {
    pub fn from_device(device: &Device) -> Self {
        Self {
            name: device.name().to_string(),
            device_type: device.device_type(),
            hw_type: device.hw_type().to_string(),
            gpu_info: device.all_gpu_info(),
            summaries: device.all_summaries(),
        }
    }
}

/// The on-disk snapshot: probe time plus one entry per hardware class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCache {
    pub timestamp: DateTime<Utc>,
    pub devices: BTreeMap<String, CachedDevice>,
}

impl DeviceCache {
    /// Snapshot a single freshly probed device, stamped now.
    pub fn single(hw_type: &str, device: &Device) -> Self {
        let mut devices = BTreeMap::new();
        devices.insert(hw_type.to_string(), CachedDevice::from_device(device));
        Self {
            timestamp: Utc::now(),
            devices,
        }
    }
}

/// Load the snapshot at `path`, or report why it cannot be used.
pub fn load_device_cache(path: &Path, ttl: Duration) -> Result<DeviceCache, CacheMiss> {
    if !path.exists() {
        return Err(CacheMiss::NotPresent);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| CacheMiss::Corrupt(e.to_string()))?;
    let cache: DeviceCache =
        serde_json::from_str(&raw).map_err(|e| CacheMiss::Corrupt(e.to_string()))?;

    let age = Utc::now().signed_duration_since(cache.timestamp);
    if age.num_seconds() < 0 || age.to_std().map_or(true, |age| age > ttl) {
        return Err(CacheMiss::Expired);
    }
    tracing::debug!("loaded device cache with {} device(s)", cache.devices.len());
    Ok(cache)
}

/// Write the snapshot atomically so concurrent readers never observe a
/// partial file.
pub fn save_device_cache(path: &Path, cache: &DeviceCache) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(serde_json::to_string(cache)?.as_bytes())
        .context("failed to write device cache")?;
    tmp.persist(path)
        .with_context(|| format!("failed to persist device cache {}", path.display()))?;
    tracing::debug!("wrote device cache to {}", path.display());
    Ok(())
}
