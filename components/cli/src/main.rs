// SPDX-FileCopyrightText: Copyright (c) 2025-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! `tcv` — package GPU kernel caches as OCI images and re-hydrate them on
//! compatible hosts.

use clap::Parser;
use std::path::PathBuf;
use tcv_accelerator::{
    check_compatibility, startup, AcceleratorInfo, CachedDevice, DeviceHandle, Registry,
    StartupOptions, HW_GPU,
};
use tcv_cache::constants::{TRITON_LABEL_PREFIX, VLLM_LABEL_PREFIX};
use tcv_cache::Summary;
use tcv_oci::{create_image, extract_image, ExtractTargets, ImageName, RegistryClient};

const EXIT_NORMAL: i32 = 0;
const EXIT_EXTRACT_ERROR: i32 = 1;
const EXIT_CREATE_ERROR: i32 = 2;
const EXIT_CONFIG_ERROR: i32 = 3;

#[derive(Parser, Debug, Default)]
#[command(
    name = "tcv",
    about = "A GPU kernel cache container image management utility"
)]
struct Args {
    /// OCI image name
    #[arg(short = 'i', long)]
    image: Option<String>,

    /// Kernel cache directory
    #[arg(short = 'd', long)]
    dir: Option<PathBuf>,

    /// Set the logging verbosity level: debug, info, warning or error
    #[arg(short = 'l', long)]
    log_level: Option<String>,

    /// Create an OCI image from a kernel cache
    #[arg(short = 'c', long)]
    create: bool,

    /// Extract a kernel cache from an OCI image
    #[arg(short = 'e', long)]
    extract: bool,

    /// Run detailed baremetal preflight checks
    #[arg(short = 'b', long)]
    baremetal: bool,

    /// Disable GPU logic
    #[arg(long)]
    no_gpu: bool,

    /// Display system hardware info
    #[arg(long)]
    hw_info: bool,

    /// Display GPU info
    #[arg(long)]
    gpu_info: bool,

    /// Check local GPU compatibility with a given image
    #[arg(long)]
    check_compat: bool,

    /// Serve device info from the static stub config instead of live probes
    #[arg(long)]
    stub: bool,
}

/// The one action a validated invocation performs.
#[derive(Debug, PartialEq)]
enum Action {
    Create { image: ImageName, dir: PathBuf },
    Extract { image: ImageName, dir: Option<PathBuf> },
    HwInfo { stub: bool },
    GpuInfo { stub: bool },
    CheckCompat { image: ImageName },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(err) = init_logging(args.log_level.as_deref()) {
        eprintln!("error configuring logging: {err}");
        std::process::exit(EXIT_CONFIG_ERROR);
    }

    let action = match validate(&args) {
        Ok(action) => action,
        Err(message) => {
            tracing::error!("{message}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    let baremetal = args.baremetal;
    let no_gpu = args.no_gpu;
    let code = match action {
        Action::HwInfo { stub } => run_hw_info(stub),
        Action::GpuInfo { stub } => run_gpu_info(stub),
        Action::CheckCompat { image } => run_check_compat(&image).await,
        Action::Create { image, dir } => run_create(&image, &dir).await,
        Action::Extract { image, dir } => {
            run_extract(&image, dir.as_deref(), no_gpu, baremetal).await
        }
    };
    std::process::exit(code);
}

fn init_logging(level: Option<&str>) -> Result<(), String> {
    let directive = match level {
        None => None,
        Some("debug") => Some("debug"),
        Some("info") => Some("info"),
        Some("warning") => Some("warn"),
        Some("error") => Some("error"),
        Some(other) => {
            return Err(format!(
                "invalid log level '{other}': expected debug, info, warning or error"
            ))
        }
    };

    let filter = match directive {
        Some(directive) => tracing_subscriber::EnvFilter::new(directive),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn validate(args: &Args) -> Result<Action, String> {
    let actions = [
        args.create,
        args.extract,
        args.hw_info,
        args.gpu_info,
        args.check_compat,
    ];
    if actions.iter().filter(|a| **a).count() != 1 {
        return Err(
            "exactly one of --create, --extract, --hw-info, --gpu-info or --check-compat is required"
                .to_string(),
        );
    }
    if args.stub && !(args.hw_info || args.gpu_info) {
        return Err("--stub is only valid with --hw-info or --gpu-info".to_string());
    }

    if args.hw_info {
        return Ok(Action::HwInfo { stub: args.stub });
    }
    if args.gpu_info {
        return Ok(Action::GpuInfo { stub: args.stub });
    }

    let image = match &args.image {
        Some(name) => ImageName::parse(name.clone()).map_err(|e| e.to_string())?,
        None => return Err("--image is required with --create, --extract or --check-compat".to_string()),
    };

    if args.check_compat {
        return Ok(Action::CheckCompat { image });
    }
    if args.create {
        let dir = args
            .dir
            .clone()
            .ok_or_else(|| "--dir is required with --create".to_string())?;
        return Ok(Action::Create { image, dir });
    }
    Ok(Action::Extract {
        image,
        dir: args.dir.clone(),
    })
}

/// Resolve a local device through the registry, probe or cache or stub.
fn probe_devices(stub: bool) -> Option<DeviceHandle> {
    let registry = Registry::with_defaults(stub);
    let opts = StartupOptions::new(stub);
    startup(&registry, HW_GPU, &opts)
}

fn run_hw_info(stub: bool) -> i32 {
    match probe_devices(stub) {
        Some(handle) => {
            let info = CachedDevice::from_device(&handle);
            match serde_json::to_string_pretty(&info) {
                Ok(text) => {
                    println!("{text}");
                    EXIT_NORMAL
                }
                Err(err) => {
                    tracing::error!("failed to render hardware info: {err}");
                    EXIT_CONFIG_ERROR
                }
            }
        }
        None => {
            println!("No hardware accelerator found.");
            EXIT_NORMAL
        }
    }
}

fn run_gpu_info(stub: bool) -> i32 {
    match probe_devices(stub) {
        Some(handle) => {
            let fleet = tcv_accelerator::summarize_fleet(&handle.all_summaries());
            match serde_json::to_string_pretty(&fleet) {
                Ok(text) => {
                    println!("{text}");
                    EXIT_NORMAL
                }
                Err(err) => {
                    tracing::error!("failed to render GPU summary: {err}");
                    EXIT_CONFIG_ERROR
                }
            }
        }
        None => {
            println!("No hardware accelerator found.");
            EXIT_NORMAL
        }
    }
}

async fn run_check_compat(image: &ImageName) -> i32 {
    let client = RegistryClient::new();
    let labels = match client.fetch_labels(image).await {
        Ok(labels) => labels,
        Err(err) => {
            tracing::error!("preflight check failed: {err:#}");
            return EXIT_EXTRACT_ERROR;
        }
    };
    let summary = summary_from_labels(&labels);
    let devices = local_devices();

    let (matched, unmatched) = check_compatibility(&summary, &devices);
    if !matched.is_empty() {
        tracing::info!("compatible GPU(s) found ({}): {matched:?}", matched.len());
    } else {
        tracing::warn!("No compatible GPUs found for the image.");
    }
    if !unmatched.is_empty() {
        tracing::debug!("incompatible GPU(s) found ({}): {unmatched:?}", unmatched.len());
    }

    if matched.is_empty() {
        EXIT_EXTRACT_ERROR
    } else {
        EXIT_NORMAL
    }
}

async fn run_create(image: &ImageName, dir: &std::path::Path) -> i32 {
    if !dir.is_dir() {
        tracing::error!("cache directory {} does not exist", dir.display());
        return EXIT_CREATE_ERROR;
    }
    let client = RegistryClient::new();
    match create_image(&client, image, dir).await {
        Ok(()) => {
            tracing::info!("OCI image created successfully.");
            EXIT_NORMAL
        }
        Err(err) => {
            tracing::error!("failed to create the OCI image: {err:#}");
            EXIT_CREATE_ERROR
        }
    }
}

async fn run_extract(
    image: &ImageName,
    dir: Option<&std::path::Path>,
    no_gpu: bool,
    baremetal: bool,
) -> i32 {
    let client = RegistryClient::new();

    if no_gpu {
        tracing::debug!("GPU checks disabled: running in no-GPU mode");
    } else {
        match probe_devices(false) {
            Some(handle) => {
                let devices = handle.all_gpu_info();
                log_devices(&devices, baremetal);
                let labels = match client.fetch_labels(image).await {
                    Ok(labels) => labels,
                    Err(err) => {
                        tracing::error!("failed to read image compatibility labels: {err:#}");
                        return EXIT_EXTRACT_ERROR;
                    }
                };
                let summary = summary_from_labels(&labels);
                let (matched, _) = check_compatibility(&summary, &devices);
                if matched.is_empty() {
                    tracing::warn!("no compatible GPUs found for the image, refusing to extract");
                    return EXIT_EXTRACT_ERROR;
                }
            }
            None => {
                tracing::warn!("No hardware accelerator found. GPU support will be disabled.");
            }
        }
    }

    let targets = ExtractTargets::new(dir);
    match extract_image(&client, image, &targets).await {
        Ok(report) => {
            tracing::info!("extracted {} file(s) from {image}", report.files_written);
            EXIT_NORMAL
        }
        Err(err) => {
            tracing::error!("error extracting image: {err:#}");
            EXIT_EXTRACT_ERROR
        }
    }
}

fn local_devices() -> Vec<AcceleratorInfo> {
    probe_devices(false)
        .map(|handle| handle.all_gpu_info())
        .unwrap_or_default()
}

fn log_devices(devices: &[AcceleratorInfo], baremetal: bool) {
    for device in devices {
        if baremetal {
            tracing::info!(
                "accelerator {}: {} arch={} backend={} warp={} mem={}MB uuid={}",
                device.id,
                device.name,
                device.arch,
                device.backend,
                device.warp_size,
                device.memory_total_mb,
                device.uuid
            );
        } else {
            tracing::debug!("accelerator {}: {} ({})", device.id, device.name, device.arch);
        }
    }
}

/// Read the compatibility summary from image labels; either flavor prefix
/// may carry it. A missing or unreadable summary constrains nothing.
fn summary_from_labels(labels: &std::collections::BTreeMap<String, String>) -> Summary {
    for prefix in [TRITON_LABEL_PREFIX, VLLM_LABEL_PREFIX] {
        if let Some(raw) = labels.get(&format!("{prefix}/summary")) {
            match serde_json::from_str(raw) {
                Ok(summary) => return summary,
                Err(err) => {
                    tracing::warn!("unreadable compatibility summary under {prefix}: {err}");
                }
            }
        }
    }
    Summary::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args::default()
    }

    #[test]
    fn exactly_one_action_is_required() {
        let args = base_args();
        assert!(validate(&args).is_err());

        let mut args = base_args();
        args.create = true;
        args.extract = true;
        assert!(validate(&args).is_err());
    }

    #[test]
    fn create_requires_image_and_dir() {
        let mut args = base_args();
        args.create = true;
        assert!(validate(&args).is_err());

        args.image = Some("quay.io/org/kernels:v1".to_string());
        assert!(validate(&args).is_err());

        args.dir = Some(PathBuf::from("/tmp/cache"));
        assert!(matches!(validate(&args), Ok(Action::Create { .. })));
    }

    #[test]
    fn invalid_image_name_is_rejected() {
        let mut args = base_args();
        args.extract = true;
        args.image = Some("NOT_A_VALID::image".to_string());
        assert!(validate(&args).is_err());
    }

    #[test]
    fn stub_is_only_valid_with_info_actions() {
        let mut args = base_args();
        args.extract = true;
        args.image = Some("kernels".to_string());
        args.stub = true;
        assert!(validate(&args).is_err());

        let mut args = base_args();
        args.hw_info = true;
        args.stub = true;
        assert_eq!(validate(&args).unwrap(), Action::HwInfo { stub: true });
    }

    #[test]
    fn extract_dir_is_optional() {
        let mut args = base_args();
        args.extract = true;
        args.image = Some("kernels".to_string());
        assert!(matches!(
            validate(&args),
            Ok(Action::Extract { dir: None, .. })
        ));
    }

    #[test]
    fn check_compat_requires_image() {
        let mut args = base_args();
        args.check_compat = true;
        assert!(validate(&args).is_err());

        args.image = Some("kernels:v2".to_string());
        assert!(matches!(validate(&args), Ok(Action::CheckCompat { .. })));
    }

    #[test]
    fn summary_label_parsing_prefers_known_prefixes() {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(
            "io.triton.cache.image/summary".to_string(),
            r#"{"groups":[{"arch":"gfx90a","backend":"hip","warp_size":64,"ptx_version":0,"count":1}]}"#
                .to_string(),
        );
        let summary = summary_from_labels(&labels);
        assert_eq!(summary.groups.len(), 1);

        let empty = summary_from_labels(&std::collections::BTreeMap::new());
        assert!(empty.is_empty());
    }
}
