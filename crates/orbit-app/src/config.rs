// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use ash::vk;
use clap::ValueEnum;
use orbit_render::{RenderSettings, SwapchainConfig};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "snake_case")]
pub enum VsyncMode {
    Fifo,
    #[default]
    Mailbox,
}

impl VsyncMode {
    pub fn present_mode(self) -> vk::PresentModeKHR {
        match self {
            VsyncMode::Fifo => vk::PresentModeKHR::FIFO,
            VsyncMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowCfg {
    fn default() -> Self {
        Self {
            title: "orbit".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync_mode: VsyncMode,
    /// Unset means "on in debug builds".
    pub validation: Option<bool>,
    pub max_msaa_samples: u32,
    /// Unset means wait forever.
    pub fence_timeout_ms: Option<u64>,
    pub shader_dir: PathBuf,
}

impl Default for RenderCfg {
    fn default() -> Self {
        Self {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            vsync_mode: VsyncMode::default(),
            validation: None,
            max_msaa_samples: 8,
            fence_timeout_ms: None,
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(src: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(src)
    }

    /// A missing file is normal; a malformed one is reported and ignored.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => Self::parse(&s).unwrap_or_else(|e| {
                warn!("ignoring {}: {e}", path.display());
                Self::default()
            }),
            Err(e) => {
                debug!("no config at {} ({e}), using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn render_settings(&self) -> RenderSettings {
        let defaults = RenderSettings::default();
        RenderSettings {
            app_name: self.window.title.clone(),
            swapchain: SwapchainConfig {
                preferred_present_mode: self.render.vsync_mode.present_mode(),
                ..SwapchainConfig::default()
            },
            clear_color: self.render.clear_color,
            fence_timeout_ns: self
                .render
                .fence_timeout_ms
                .map_or(u64::MAX, |ms| ms.saturating_mul(1_000_000)),
            max_msaa_samples: self.render.max_msaa_samples,
            validation: self.render.validation.unwrap_or(defaults.validation),
            shader_dir: self.render.shader_dir.clone(),
        }
    }
}
