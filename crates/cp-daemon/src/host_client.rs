// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin client against the execution host's own status endpoints, plus the
//! concrete [`HostInfoProvider`] the orchestrator needs to compose its
//! system-status snapshot.
//!
//! GPU and installed-operator inventory discovery sit outside the core
//! (spec §1 Non-goals); this module is the one piece of genuinely
//! host-specific glue the daemon supplies on top of it. Every method
//! degrades to an empty/default result on any failure rather than failing
//! the request it is composing a prompt for — the host may simply not
//! support a given endpoint.

use async_trait::async_trait;
use cp_orchestrator::{CustomNodeInventory, GpuDevice, GpuInfo, HostInfoProvider, ModelInventory, NodeCapabilities};
use cp_registry::OperatorRegistry;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Model classes the execution host ships out of the box. Anything else
/// reported by the registry is treated as coming from an installed custom
/// node pack — there is no dedicated "which pack owns this class" endpoint,
/// so this is the same spirit of defensive, table-driven classification
/// `cp_registry` uses for malformed `object_info` entries.
const CORE_CLASS_NAMES: &[&str] = &[
    "KSampler",
    "KSamplerAdvanced",
    "CheckpointLoaderSimple",
    "CLIPTextEncode",
    "EmptyLatentImage",
    "LatentUpscale",
    "VAEDecode",
    "VAEEncode",
    "VAELoader",
    "SaveImage",
    "LoadImage",
    "LoraLoader",
    "ControlNetApply",
    "ControlNetLoader",
    "ConditioningCombine",
    "ImageScale",
];

/// Substring → capability bucket. First match wins; checked in order.
const CAPABILITY_TABLE: &[(&str, CapabilityBucket)] = &[
    ("AnimateDiff", CapabilityBucket::Video),
    ("Wan", CapabilityBucket::Video),
    ("VideoCombine", CapabilityBucket::Video),
    ("FaceDetailer", CapabilityBucket::Face),
    ("ReActor", CapabilityBucket::Face),
    ("FaceRestore", CapabilityBucket::Face),
    ("Upscale", CapabilityBucket::Upscale),
    ("ESRGAN", CapabilityBucket::Upscale),
    ("ControlNet", CapabilityBucket::Controlnet),
    ("T2IAdapter", CapabilityBucket::Controlnet),
];

#[derive(Clone, Copy)]
enum CapabilityBucket {
    Video,
    Face,
    Upscale,
    Controlnet,
}

/// Errors surfaced while talking to the execution host. Never propagated
/// past this module — callers receive defaulted data instead.
#[derive(Debug, thiserror::Error)]
pub enum HostClientError {
    #[error("request to execution host failed: {0}")]
    Request(String),
    #[error("execution host response could not be parsed: {0}")]
    Decode(String),
}

/// Talks to the execution host's `/system_stats` and model-folder listing
/// endpoints, and cross-references the already-fetched [`OperatorRegistry`]
/// to approximate installed custom-node capability coverage.
#[derive(Clone)]
pub struct HostClient {
    base_url: String,
    http: reqwest::Client,
    registry: Arc<OperatorRegistry>,
}

#[derive(Debug, Deserialize)]
struct SystemStatsResponse {
    #[serde(default)]
    devices: Vec<SystemStatsDevice>,
}

#[derive(Debug, Deserialize)]
struct SystemStatsDevice {
    name: String,
    #[serde(default)]
    vram_total: u64,
    #[serde(default)]
    vram_free: u64,
}

impl HostClient {
    pub fn new(base_url: impl Into<String>, registry: Arc<OperatorRegistry>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("host client"),
            registry,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, HostClientError> {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), path);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HostClientError::Request(e.to_string()))?;
        resp.json::<T>()
            .await
            .map_err(|e| HostClientError::Decode(e.to_string()))
    }

    async fn model_folder(&self, folder: &str) -> Vec<String> {
        match self.get_json::<Vec<String>>(&format!("/models/{folder}")).await {
            Ok(names) => names,
            Err(err) => {
                warn!(folder, error = %err, "failed to list model folder");
                Vec::new()
            }
        }
    }
}

fn capability_bucket(class_name: &str) -> Option<CapabilityBucket> {
    CAPABILITY_TABLE
        .iter()
        .find(|(needle, _)| class_name.contains(needle))
        .map(|(_, bucket)| *bucket)
}

#[async_trait]
impl HostInfoProvider for HostClient {
    async fn gpu_info(&self) -> GpuInfo {
        match self.get_json::<SystemStatsResponse>("/system_stats").await {
            Ok(stats) => {
                let gpus = stats
                    .devices
                    .into_iter()
                    .map(|d| GpuDevice {
                        name: d.name,
                        vram_free_mb: d.vram_free / BYTES_PER_MB,
                        vram_total_mb: d.vram_total / BYTES_PER_MB,
                    })
                    .collect::<Vec<_>>();
                GpuInfo {
                    available: !gpus.is_empty(),
                    gpus,
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to fetch system stats");
                GpuInfo::default()
            }
        }
    }

    async fn available_models(&self) -> ModelInventory {
        let (checkpoints, loras, controlnets) = tokio::join!(
            self.model_folder("checkpoints"),
            self.model_folder("loras"),
            self.model_folder("controlnet"),
        );
        ModelInventory {
            checkpoints,
            loras,
            controlnets,
        }
    }

    async fn installed_custom_nodes(&self) -> CustomNodeInventory {
        if !self.registry.is_loaded() {
            return CustomNodeInventory::default();
        }

        let mut capabilities = NodeCapabilities::default();
        let mut custom_count = 0u32;

        for class_name in self.registry.all_class_names() {
            if !CORE_CLASS_NAMES.contains(&class_name.as_str()) {
                custom_count += 1;
            }
            match capability_bucket(&class_name) {
                Some(CapabilityBucket::Video) => capabilities.video.push(class_name),
                Some(CapabilityBucket::Face) => capabilities.face.push(class_name),
                Some(CapabilityBucket::Upscale) => capabilities.upscale.push(class_name),
                Some(CapabilityBucket::Controlnet) => capabilities.controlnet.push(class_name),
                None => {}
            }
        }

        CustomNodeInventory {
            found: custom_count > 0,
            total_count: custom_count,
            capabilities,
        }
    }
}
