// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Accelerator discovery and compatibility.
//!
//! This crate answers two questions: "which accelerators does this host
//! have?" (a pluggable device registry with vendor probes and a TTL'd
//! on-disk snapshot) and "which of them can run the kernels in a given
//! image?" (the compatibility oracle).
//!
//! Probes are best-effort: a host without any loadable vendor stack is not
//! an error, it is simply a host with no accelerators.

pub mod cache;
pub mod compat;
pub mod device;
pub mod fleet;
pub mod probes;
pub mod registry;

pub use cache::{
    load_device_cache, save_device_cache, CacheMiss, CachedDevice, DeviceCache,
    DEFAULT_CACHE_TTL, DEVICE_CACHE_PATH, STUBBED_DEVICE_CACHE_PATH,
};
pub use compat::check_compatibility;
pub use device::{AcceleratorInfo, Device, DeviceData, DeviceHandle, DeviceSummary, DeviceType, HW_GPU};
pub use fleet::{summarize_fleet, FleetSummary, GpuGroup};
pub use registry::{startup, Registry, StartupOptions};
