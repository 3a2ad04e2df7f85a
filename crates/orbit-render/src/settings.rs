// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;

use crate::swapchain::SwapchainConfig;

/// Backend-independent knobs handed to a renderer at creation.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub app_name: String,
    pub swapchain: SwapchainConfig,
    pub clear_color: [f32; 4],
    /// How long the CPU waits on a frame's fence before giving up (fatal).
    pub fence_timeout_ns: u64,
    /// Upper bound for multisampling; the device may support less.
    pub max_msaa_samples: u32,
    pub validation: bool,
    /// Directory holding `scene.vert.spv` and `scene.frag.spv`.
    pub shader_dir: PathBuf,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            app_name: "orbit".to_owned(),
            swapchain: SwapchainConfig::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            fence_timeout_ns: u64::MAX,
            max_msaa_samples: 8,
            validation: cfg!(debug_assertions),
            shader_dir: PathBuf::from("shaders"),
        }
    }
}
