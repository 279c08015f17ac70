// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Device registry: maps `(hw_type, backend)` to a startup function.
//!
//! The registry is an explicit value owned by the caller, not process-global
//! state; tests build their own. Backend preference is a priority table
//! consulted at registration time, so registration order can never change
//! the outcome.

use crate::cache::{load_device_cache, save_device_cache, DeviceCache};
use crate::device::{Device, DeviceData, DeviceHandle, DeviceType, HW_GPU};
use crate::probes::amd::AmdDevice;
use crate::probes::mock::MockDevice;
use crate::probes::nvml::NvmlDevice;
use crate::probes::rocm::RocmDevice;
use crate::probes::statik::{self, StaticDevice};
use anyhow::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

type StartupFn = Box<dyn Fn() -> Result<Device> + Send + Sync>;

/// Startup order per hardware class. The static config is authoritative,
/// the mock replaces live probes in stub mode, and among live backends the
/// HSA-based AMD probe outranks the rocm-smi fallback.
const GPU_PRIORITY: &[DeviceType] = &[
    DeviceType::Static,
    DeviceType::Mock,
    DeviceType::Amd,
    DeviceType::Nvml,
    DeviceType::Rocm,
];

/// Backends that describe the same hardware through different stacks; only
/// the highest-priority registered member survives.
const GPU_EXCLUSIVE: &[DeviceType] = &[DeviceType::Amd, DeviceType::Rocm];

fn priority(device_type: DeviceType) -> usize {
    GPU_PRIORITY
        .iter()
        .position(|d| *d == device_type)
        .unwrap_or(GPU_PRIORITY.len())
}

#[derive(Default)]
pub struct Registry {
    backends: BTreeMap<String, BTreeMap<DeviceType, StartupFn>>,
}

impl Registry {
    /// An empty registry with nothing registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry populated per the standard registration rules.
    pub fn with_defaults(stub: bool) -> Self {
        let mut registry = Self::new();
        registry.register_all(stub);
        registry
    }

    /// Apply the standard registration rules to an existing registry.
    pub fn register_all(&mut self, stub: bool) {
        if stub {
            tracing::debug!("running in stubbed mode, loading static device config");
            let config = statik::config_path();
            if config.is_file() {
                self.must_register(
                    HW_GPU,
                    DeviceType::Static,
                    Box::new(move || StaticDevice::from_config(&config)),
                );
            }
            self.must_register(HW_GPU, DeviceType::Mock, Box::new(|| Ok(MockDevice::probe())));
            return;
        }

        if AmdDevice::library_present() {
            self.must_register(HW_GPU, DeviceType::Amd, Box::new(AmdDevice::probe));
        }
        if NvmlDevice::library_present() {
            self.must_register(HW_GPU, DeviceType::Nvml, Box::new(NvmlDevice::probe));
        }
        if RocmDevice::library_present() {
            self.must_register(HW_GPU, DeviceType::Rocm, Box::new(RocmDevice::probe));
        }
        if self.backends.is_empty() {
            tracing::warn!("no hardware accelerator backend could be loaded");
        }
    }

    /// Register a startup function for `(hw_type, device_type)`.
    ///
    /// Re-registering the same backend is a silent no-op. Registering a
    /// member of an exclusion group removes any lower-priority member and is
    /// itself refused when a higher-priority member is already present.
    pub fn must_register(&mut self, hw_type: &str, device_type: DeviceType, startup: StartupFn) {
        let entry = self.backends.entry(hw_type.to_string()).or_default();
        if entry.contains_key(&device_type) {
            tracing::debug!("device type {device_type} already registered for {hw_type}");
            return;
        }

        if GPU_EXCLUSIVE.contains(&device_type) {
            let rival = entry
                .keys()
                .copied()
                .find(|d| GPU_EXCLUSIVE.contains(d) && *d != device_type);
            if let Some(rival) = rival {
                if priority(rival) < priority(device_type) {
                    tracing::debug!("{rival} already registered, skipping {device_type}");
                    return;
                }
                tracing::debug!("{device_type} outranks {rival}, replacing it");
                entry.remove(&rival);
            }
        }

        tracing::debug!("registering device [{hw_type}][{device_type}]");
        entry.insert(device_type, startup);
    }

    pub fn is_registered(&self, hw_type: &str, device_type: DeviceType) -> bool {
        self.backends
            .get(hw_type)
            .is_some_and(|m| m.contains_key(&device_type))
    }

    /// Registered backends for a hardware class, in startup priority order.
    pub fn backend_types(&self, hw_type: &str) -> Vec<DeviceType> {
        let Some(entry) = self.backends.get(hw_type) else {
            return Vec::new();
        };
        let mut types: Vec<DeviceType> = entry.keys().copied().collect();
        types.sort_by_key(|d| priority(*d));
        types
    }

    /// All hardware classes with at least one registered backend.
    pub fn hw_types(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }

    fn get(&self, hw_type: &str, device_type: DeviceType) -> Option<&StartupFn> {
        self.backends.get(hw_type)?.get(&device_type)
    }
}

/// Where startup reads and writes the device snapshot.
pub struct StartupOptions {
    pub cache_path: PathBuf,
    pub ttl: Duration,
}

impl StartupOptions {
    pub fn new(stub: bool) -> Self {
        let cache_path = if stub {
            crate::cache::STUBBED_DEVICE_CACHE_PATH
        } else {
            crate::cache::DEVICE_CACHE_PATH
        };
        Self {
            cache_path: PathBuf::from(cache_path),
            ttl: crate::cache::DEFAULT_CACHE_TTL,
        }
    }
}

/// Resolve a device for `hw_type`.
///
/// Resolution order: static config (authoritative, bypasses the cache) →
/// fresh device cache whose recorded backend is still registered → live
/// probes in priority order, where the first success wins and refreshes the
/// cache. Returns `None` when no backend can produce a device.
pub fn startup(registry: &Registry, hw_type: &str, opts: &StartupOptions) -> Option<DeviceHandle> {
    tracing::debug!("starting up device of type {hw_type}");

    if let Some(run) = registry.get(hw_type, DeviceType::Static) {
        match run() {
            Ok(device) => return Some(DeviceHandle::new(device)),
            Err(err) => tracing::warn!("static device config failed: {err:#}"),
        }
    }

    match load_device_cache(&opts.cache_path, opts.ttl) {
        Ok(cache) => {
            if let Some(cached) = cache.devices.get(hw_type) {
                if registry.is_registered(hw_type, cached.device_type) {
                    tracing::debug!("using cached {} configuration for {hw_type}", cached.device_type);
                    let data = DeviceData {
                        name: cached.name.clone(),
                        device_type: cached.device_type,
                        hw_type: cached.hw_type.clone(),
                        infos: cached.gpu_info.clone(),
                        summaries: cached.summaries.clone(),
                    };
                    return Some(DeviceHandle::new(Device::from_data(cached.device_type, data)));
                }
                tracing::debug!(
                    "cached device type {} has no registered startup, re-probing",
                    cached.device_type
                );
            }
        }
        Err(miss) => tracing::debug!("device cache miss: {miss}"),
    }

    for device_type in registry.backend_types(hw_type) {
        if device_type == DeviceType::Static {
            continue;
        }
        let Some(run) = registry.get(hw_type, device_type) else {
            continue;
        };
        tracing::debug!("starting up {device_type}");
        match run() {
            Ok(device) => {
                let snapshot = DeviceCache::single(hw_type, &device);
                if let Err(err) = save_device_cache(&opts.cache_path, &snapshot) {
                    tracing::warn!("failed to save device cache: {err:#}");
                }
                return Some(DeviceHandle::new(device));
            }
            Err(err) => {
                tracing::warn!("{device_type} startup failed: {err:#}");
            }
        }
    }

    tracing::debug!("no device available for {hw_type}");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheMiss;
    use tempfile::TempDir;

    fn mock_startup() -> StartupFn {
        Box::new(|| Ok(MockDevice::probe()))
    }

    fn opts_in(dir: &TempDir) -> StartupOptions {
        StartupOptions {
            cache_path: dir.path().join("device_cache.json"),
            ttl: crate::cache::DEFAULT_CACHE_TTL,
        }
    }

    #[test]
    fn amd_outranks_rocm_in_either_registration_order() {
        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Amd, mock_startup());
        registry.must_register(HW_GPU, DeviceType::Rocm, mock_startup());
        assert_eq!(registry.backend_types(HW_GPU), vec![DeviceType::Amd]);

        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Rocm, mock_startup());
        registry.must_register(HW_GPU, DeviceType::Amd, mock_startup());
        assert_eq!(registry.backend_types(HW_GPU), vec![DeviceType::Amd]);
    }

    #[test]
    fn static_outranks_mock_in_priority_order() {
        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Mock, mock_startup());
        registry.must_register(HW_GPU, DeviceType::Static, mock_startup());
        assert_eq!(
            registry.backend_types(HW_GPU),
            vec![DeviceType::Static, DeviceType::Mock]
        );
    }

    #[test]
    fn duplicate_registration_is_a_no_op() {
        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Nvml, mock_startup());
        registry.must_register(HW_GPU, DeviceType::Nvml, mock_startup());
        assert_eq!(registry.backend_types(HW_GPU), vec![DeviceType::Nvml]);
    }

    #[test]
    fn nvml_registers_independently_of_the_amd_stack() {
        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Amd, mock_startup());
        registry.must_register(HW_GPU, DeviceType::Nvml, mock_startup());
        assert_eq!(
            registry.backend_types(HW_GPU),
            vec![DeviceType::Amd, DeviceType::Nvml]
        );
    }

    #[test]
    fn startup_probes_and_writes_cache() {
        let tmp = TempDir::new().unwrap();
        let opts = opts_in(&tmp);

        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Mock, mock_startup());

        let handle = startup(&registry, HW_GPU, &opts).unwrap();
        assert_eq!(handle.device_type(), DeviceType::Mock);

        let cache = load_device_cache(&opts.cache_path, opts.ttl).unwrap();
        let cached = &cache.devices[HW_GPU];
        assert_eq!(cached.hw_type, HW_GPU);
        let age = chrono::Utc::now().signed_duration_since(cache.timestamp);
        assert!(age.num_seconds().abs() <= 1);
    }

    #[test]
    fn expired_cache_triggers_reprobe_and_overwrite() {
        let tmp = TempDir::new().unwrap();
        let opts = opts_in(&tmp);

        let device = MockDevice::probe();
        let mut stale = DeviceCache::single(HW_GPU, &device);
        stale.timestamp = chrono::Utc::now() - chrono::Duration::minutes(11);
        save_device_cache(&opts.cache_path, &stale).unwrap();
        assert_eq!(
            load_device_cache(&opts.cache_path, opts.ttl).unwrap_err(),
            CacheMiss::Expired
        );

        let mut registry = Registry::new();
        registry.must_register(HW_GPU, DeviceType::Mock, mock_startup());
        let _handle = startup(&registry, HW_GPU, &opts).unwrap();

        let refreshed = load_device_cache(&opts.cache_path, opts.ttl).unwrap();
        assert!(refreshed.timestamp > stale.timestamp);
    }

    #[test]
    fn fresh_cache_is_served_without_reprobe() {
        let tmp = TempDir::new().unwrap();
        let opts = opts_in(&tmp);

        let device = MockDevice::probe();
        let snapshot = DeviceCache::single(HW_GPU, &device);
        save_device_cache(&opts.cache_path, &snapshot).unwrap();
        let written = std::fs::read_to_string(&opts.cache_path).unwrap();

        let mut registry = Registry::new();
        let probed = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = probed.clone();
        registry.must_register(
            HW_GPU,
            DeviceType::Mock,
            Box::new(move || {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(MockDevice::probe())
            }),
        );

        let handle = startup(&registry, HW_GPU, &opts).unwrap();
        assert_eq!(handle.device_type(), DeviceType::Mock);
        assert!(!probed.load(std::sync::atomic::Ordering::SeqCst));
        // Cache-hit path must not rewrite the snapshot.
        assert_eq!(std::fs::read_to_string(&opts.cache_path).unwrap(), written);
    }

    #[test]
    fn empty_registry_yields_no_device() {
        let tmp = TempDir::new().unwrap();
        let registry = Registry::new();
        assert!(startup(&registry, HW_GPU, &opts_in(&tmp)).is_none());
    }

    #[test]
    fn static_config_bypasses_cache() {
        let tmp = TempDir::new().unwrap();
        let opts = opts_in(&tmp);
        let config = tmp.path().join("devices.json");
        std::fs::write(
            &config,
            r#"{"name": "fixture", "hw_type": "gpu",
                "gpu_info": [{"id": 0, "name": "card0", "uuid": "u", "arch": "gfx90a",
                              "backend": "hip", "warp_size": 64, "ptx_version": 0,
                              "memory_total_mb": 1}],
                "summaries": [{"id": "0", "driver_version": "d", "product_name": "p"}]}"#,
        )
        .unwrap();

        let mut registry = Registry::new();
        let config_path = config.clone();
        registry.must_register(
            HW_GPU,
            DeviceType::Static,
            Box::new(move || StaticDevice::from_config(&config_path)),
        );

        let handle = startup(&registry, HW_GPU, &opts).unwrap();
        assert_eq!(handle.device_type(), DeviceType::Static);
        assert!(!opts.cache_path.exists());
    }
}
