// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: instance/device bring-up, the scene's GPU objects and the
//! glue that runs them through the frame scheduler.
use anyhow::Result;
use orbit_render::assets::{Mesh, PixelBuffer};
use orbit_render::{
    FrameScheduler, FrameStatus, RenderSettings, Renderer, ResizeSignal, SchedulerConfig,
    WindowExtent, MAX_FRAMES_IN_FLIGHT,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{error, info};

pub mod buffer;
pub mod context;
pub mod device;
pub mod pipeline;
pub mod scene;
pub mod texture;

use context::Context;
use device::VkDevice;
use pipeline::ShaderBlobs;
use scene::SceneRecorder;

const TEXTURE_SIZE: u32 = 512;
const TEXTURE_CELL: u32 = 64;

pub struct VkRenderer {
    scheduler: FrameScheduler<VkDevice, Box<dyn WindowExtent>>,
    scene: SceneRecorder,
}

impl VkRenderer {
    pub fn scheduler(&self) -> &FrameScheduler<VkDevice, Box<dyn WindowExtent>> {
        &self.scheduler
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        extent: Box<dyn WindowExtent>,
        settings: RenderSettings,
    ) -> Result<Self> {
        let shaders = ShaderBlobs::resolve(&settings.shader_dir)?;
        let ctx = Context::new(
            window,
            display,
            &settings.app_name,
            settings.validation,
            settings.max_msaa_samples,
        )?;
        let device = VkDevice::new(ctx, &settings.swapchain)?;

        let config = SchedulerConfig {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            fence_timeout_ns: settings.fence_timeout_ns,
            swapchain: settings.swapchain,
            ..Default::default()
        };
        let mut scheduler = FrameScheduler::initialize(device, extent, config)?;

        let pixels = PixelBuffer::checkerboard(
            TEXTURE_SIZE,
            TEXTURE_SIZE,
            TEXTURE_CELL,
            [235, 235, 235, 255],
            [40, 90, 160, 255],
        );
        let scene = match SceneRecorder::new(
            scheduler.device(),
            config.frames_in_flight,
            &shaders,
            &Mesh::stacked_quads(),
            &pixels,
            settings.clear_color,
        ) {
            Ok(scene) => scene,
            Err(e) => {
                scheduler.shutdown()?;
                return Err(e);
            }
        };

        if let Ok(sc) = scheduler.swapchain().current() {
            info!(
                "Vulkan renderer ready ({}x{}, {:?}, {:?}, {} images)",
                sc.extent().width,
                sc.extent().height,
                sc.format().format,
                sc.present_mode(),
                sc.image_count()
            );
        }
        Ok(Self { scheduler, scene })
    }

    fn resize_signal(&self) -> ResizeSignal {
        self.scheduler.resize_signal()
    }

    fn render(&mut self) -> Result<FrameStatus> {
        self.scheduler
            .render_frame(&mut self.scene)
            .map_err(|e| anyhow::Error::new(e).context("render frame"))
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.scene.set_clear_color(rgba);
    }
}

// STRICT ORDER: idle + swapchain/frames, then scene objects, then the device
// (dropped with the scheduler), then surface/instance (dropped with the device).
impl Drop for VkRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.scheduler.shutdown() {
            error!("frame scheduler shutdown failed: {e}");
        }
        self.scene.destroy(self.scheduler.device());
    }
}
