// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Validated image-name newtype.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

static IMAGE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^([a-z0-9]+([._-][a-z0-9]+)*(:[0-9]+)?/)?[a-z0-9]+([._-][a-z0-9]+)*(/[a-z0-9]+([._-][a-z0-9]+)*)*(?::[\w][\w.-]{0,127})?$",
    )
    .expect("image name regex")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("--image is required")]
    Empty,
    #[error("invalid image name: {0}. Ensure it is a valid Docker or Quay image URL")]
    Invalid(String),
}

/// An OCI image reference that passed name validation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageName {
    name: String,
}

impl ImageName {
    pub fn parse(name: impl Into<String>) -> Result<Self, ReferenceError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if !IMAGE_NAME_RE.is_match(&name) {
            return Err(ReferenceError::Invalid(name));
        }
        Ok(Self { name })
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// The bare image name: last path segment, tag stripped. Used for the
    /// `org.opencontainers.image.title` label.
    pub fn title(&self) -> &str {
        let last = self.name.rsplit('/').next().unwrap_or(&self.name);
        last.split(':').next().unwrap_or(last)
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_common_references() {
        for name in [
            "ubuntu",
            "library/ubuntu:24.04",
            "quay.io/org/cache-image:v1",
            "localhost:5000/team/kernels:latest",
            "registry.example.com/a/b/c",
        ] {
            assert!(ImageName::parse(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_invalid_references() {
        for name in ["", "UPPER/case", "has space", "bad::tag", "-leading"] {
            assert!(ImageName::parse(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn title_strips_registry_path_and_tag() {
        let image = ImageName::parse("quay.io/org/cache-image:v1").unwrap();
        assert_eq!(image.title(), "cache-image");
        let image = ImageName::parse("plain").unwrap();
        assert_eq!(image.title(), "plain");
    }
}
