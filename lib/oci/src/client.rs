// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Thin wrapper over the OCI registry client.
//!
//! Everything registry-shaped (auth, blob upload, manifest negotiation)
//! belongs to the `oci-client` crate; this module only adapts staged images
//! and extraction inputs to its API. Credentials come from
//! `TCV_REGISTRY_USER`/`TCV_REGISTRY_PASSWORD`, and plain-HTTP registries
//! can be allow-listed via `TCV_INSECURE_REGISTRIES` (comma-separated
//! hosts).

use crate::builder::StagedImage;
use crate::reference::ImageName;
use anyhow::{Context, Result};
use oci_client::client::{Client, ClientConfig, ClientProtocol, Config, ImageLayer};
use oci_client::manifest::{self, OciImageManifest};
use oci_client::secrets::RegistryAuth;
use oci_client::Reference;
use std::collections::BTreeMap;

const ENV_REGISTRY_USER: &str = "TCV_REGISTRY_USER";
const ENV_REGISTRY_PASSWORD: &str = "TCV_REGISTRY_PASSWORD";
const ENV_INSECURE_REGISTRIES: &str = "TCV_INSECURE_REGISTRIES";

pub struct RegistryClient {
    client: Client,
    auth: RegistryAuth,
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryClient {
    pub fn new() -> Self {
        let config = ClientConfig {
            protocol: protocol_from_env(),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth: auth_from_env(),
        }
    }

    /// Push a staged image. Returns the manifest URL reported by the
    /// registry.
    pub async fn push_image(&self, image: &ImageName, staged: &StagedImage) -> Result<String> {
        let reference = parse_reference(image)?;

        let layers: Vec<ImageLayer> = staged
            .layers
            .iter()
            .map(|layer| {
                ImageLayer::new(
                    layer.gz_data.clone(),
                    manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE.to_string(),
                    Some(layer.annotations.clone()),
                )
            })
            .collect();
        let config = Config::oci_v1(staged.config_json.clone(), None);

        let image_manifest =
            OciImageManifest::build(&layers, &config, Some(staged.annotations.clone()));

        let response = self
            .client
            .push(&reference, &layers, config, &self.auth, Some(image_manifest))
            .await
            .with_context(|| format!("failed to push image {image}"))?;
        Ok(response.manifest_url)
    }

    /// Pull the image and return its layer blobs, in manifest order.
    pub async fn pull_layers(&self, image: &ImageName) -> Result<Vec<Vec<u8>>> {
        let reference = parse_reference(image)?;
        let accepted = vec![
            manifest::IMAGE_LAYER_GZIP_MEDIA_TYPE,
            manifest::IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE,
        ];
        let image_data = self
            .client
            .pull(&reference, &self.auth, accepted)
            .await
            .with_context(|| format!("failed to pull image {image}"))?;
        Ok(image_data.layers.into_iter().map(|l| l.data).collect())
    }

    /// Fetch image labels and manifest annotations without pulling layers.
    ///
    /// Manifest annotations win on key collisions; they are written by the
    /// builder as a mirror of the labels.
    pub async fn fetch_labels(&self, image: &ImageName) -> Result<BTreeMap<String, String>> {
        let reference = parse_reference(image)?;
        let (image_manifest, _digest, config_json) = self
            .client
            .pull_manifest_and_config(&reference, &self.auth)
            .await
            .with_context(|| format!("failed to fetch manifest for {image}"))?;

        let mut labels = BTreeMap::new();
        let config: serde_json::Value =
            serde_json::from_str(&config_json).context("image config is not valid JSON")?;
        if let Some(config_labels) = config
            .get("config")
            .and_then(|c| c.get("Labels"))
            .and_then(|l| l.as_object())
        {
            for (key, value) in config_labels {
                if let Some(value) = value.as_str() {
                    labels.insert(key.clone(), value.to_string());
                }
            }
        }
        if let Some(annotations) = image_manifest.annotations {
            labels.extend(annotations);
        }
        Ok(labels)
    }
}

fn parse_reference(image: &ImageName) -> Result<Reference> {
    Reference::try_from(image.as_str())
        .with_context(|| format!("unparseable image reference {image}"))
}

fn auth_from_env() -> RegistryAuth {
    match (
        std::env::var(ENV_REGISTRY_USER),
        std::env::var(ENV_REGISTRY_PASSWORD),
    ) {
        (Ok(user), Ok(password)) if !user.is_empty() => RegistryAuth::Basic(user, password),
        _ => RegistryAuth::Anonymous,
    }
}

fn protocol_from_env() -> ClientProtocol {
    match std::env::var(ENV_INSECURE_REGISTRIES) {
        Ok(hosts) if !hosts.is_empty() => ClientProtocol::HttpsExcept(
            hosts.split(',').map(|h| h.trim().to_string()).collect(),
        ),
        _ => ClientProtocol::Https,
    }
}
