// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host status types and the snapshot text injected into the system prompt.
//!
//! Discovery of GPU and installed-operator inventory lives outside the
//! core (§1 Non-goals); [`HostInfoProvider`] is the seam a caller plugs an
//! implementation into, mirroring the way the teacher keeps host discovery
//! behind a trait rather than baked into the orchestrator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One GPU device's memory state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuDevice {
    pub name: String,
    pub vram_free_mb: u64,
    pub vram_total_mb: u64,
}

/// GPU discovery result; `available=false` means no usable device was found.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuInfo {
    pub available: bool,
    pub gpus: Vec<GpuDevice>,
}

/// Installed model inventory on the execution host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelInventory {
    pub checkpoints: Vec<String>,
    pub loras: Vec<String>,
    pub controlnets: Vec<String>,
}

/// Capability packs contributed by installed custom operator nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeCapabilities {
    pub video: Vec<String>,
    pub face: Vec<String>,
    pub upscale: Vec<String>,
    pub controlnet: Vec<String>,
}

/// Installed custom-node inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomNodeInventory {
    pub found: bool,
    pub total_count: u32,
    pub capabilities: NodeCapabilities,
}

/// Host discovery seam: GPU memory, model inventory, and installed
/// operator packs. Implementations talk to the execution host; the
/// orchestrator only consumes the result.
#[async_trait]
pub trait HostInfoProvider: Send + Sync {
    async fn gpu_info(&self) -> GpuInfo;
    async fn available_models(&self) -> ModelInventory;
    async fn installed_custom_nodes(&self) -> CustomNodeInventory;
}

fn vram_tier(vram_free_mb: u64) -> &'static str {
    if vram_free_mb < 6_000 {
        "Low VRAM: recommend SD 1.5, fp8 models, tiled VAE"
    } else if vram_free_mb < 10_000 {
        "Medium VRAM: SDXL OK, video with fewer frames"
    } else if vram_free_mb < 16_000 {
        "Good VRAM: FLUX fp8 OK, most video workflows"
    } else {
        "High VRAM: all models supported"
    }
}

/// Render the host status section of the system prompt: GPU memory class
/// with a recommended model tier, a sample of available models, and
/// installed-operator capability coverage with gaps called out.
pub async fn build_host_snapshot(provider: &dyn HostInfoProvider) -> String {
    let mut lines = vec!["## CURRENT SYSTEM STATUS".to_string()];

    let gpu = provider.gpu_info().await;
    match gpu.gpus.first().filter(|_| gpu.available) {
        Some(device) => {
            lines.push(format!(
                "**GPU**: {}, {}MB VRAM free of {}MB",
                device.name, device.vram_free_mb, device.vram_total_mb
            ));
            lines.push(format!("  → {}", vram_tier(device.vram_free_mb)));
        }
        None => lines.push("**GPU**: information unavailable".to_string()),
    }

    let models = provider.available_models().await;
    if !models.checkpoints.is_empty() {
        let shown: Vec<&str> = models.checkpoints.iter().take(5).map(String::as_str).collect();
        lines.push(format!("\n**Available checkpoints**: {}", shown.join(", ")));
        if models.checkpoints.len() > 5 {
            lines.push(format!("  ... and {} more", models.checkpoints.len() - 5));
        }
    }
    if !models.loras.is_empty() {
        lines.push(format!("**LoRAs**: {} available", models.loras.len()));
    }
    if !models.controlnets.is_empty() {
        let shown: Vec<&str> = models.controlnets.iter().take(3).map(String::as_str).collect();
        lines.push(format!("**ControlNets**: {}", shown.join(", ")));
    }

    let custom_nodes = provider.installed_custom_nodes().await;
    if custom_nodes.found {
        lines.push(format!("\n**Custom nodes installed**: {} packs", custom_nodes.total_count));
        let caps = &custom_nodes.capabilities;
        if !caps.video.is_empty() {
            lines.push(format!("  - Video: {}", caps.video.join(", ")));
        }
        if !caps.face.is_empty() {
            lines.push(format!("  - Face processing: {}", caps.face.join(", ")));
        }
        if !caps.upscale.is_empty() {
            lines.push(format!("  - Upscaling: {}", caps.upscale.join(", ")));
        }
        if !caps.controlnet.is_empty() {
            lines.push(format!("  - ControlNet: {}", caps.controlnet.join(", ")));
        }

        let mut missing = Vec::new();
        if caps.video.is_empty() {
            missing.push("video generation (AnimateDiff/WAN)");
        }
        if caps.face.is_empty() {
            missing.push("face processing");
        }
        if caps.controlnet.is_empty() {
            missing.push("ControlNet preprocessors");
        }
        if !missing.is_empty() {
            lines.push(format!("\n  **Missing for full capability**: {}", missing.join(", ")));
            lines.push("  → suggest installation if the user needs these features".to_string());
        }
    }

    lines.join("\n")
}
