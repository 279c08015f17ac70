// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! OCI packaging and extraction for kernel caches.
//!
//! The produce side stages a canonicalized copy of the cache plus its
//! manifest, encodes them as deterministic gzip-tar layers under the
//! reserved path prefixes, and pushes a scratch image. The consume side
//! pulls the image, filters layer entries by prefix, restores the on-disk
//! layout, and verifies per-entry integrity against the manifest digests.

pub mod builder;
pub mod client;
pub mod extract;
pub mod layer;
pub mod reference;

pub use builder::{create_image, stage_image, stage_image_at, StagedImage};
pub use client::RegistryClient;
pub use extract::{extract_image, ExtractTargets, IntegrityError};
pub use layer::BuiltLayer;
pub use reference::{ImageName, ReferenceError};

/// Layer annotation naming the cache flavor carried by the layer.
pub const ANNOTATION_CACHE_FLAVOR: &str = "io.tcv.cache.flavor";
/// Layer annotation naming the in-tar path prefix of the layer.
pub const ANNOTATION_CACHE_PREFIX: &str = "io.tcv.cache.prefix";
/// Standard OCI image title annotation/label.
pub const ANNOTATION_IMAGE_TITLE: &str = "org.opencontainers.image.title";
