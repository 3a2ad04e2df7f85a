// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic frame lifecycle: frames in flight, swapchain generations
//! and the recovery path for a stale surface.
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod assets;
pub mod barrier;
pub mod device;
pub mod error;
pub mod frames;
pub mod memory;
pub mod recreate;
pub mod resize;
pub mod scheduler;
pub mod settings;
pub mod swapchain;

#[cfg(test)]
pub(crate) mod fake;

pub use device::{
    AcquireOutcome, FenceStatus, FrameDevice, FrameSubmission, PresentOutcome, SurfaceSupport,
    SwapchainDesc, SwapchainDevice, WindowExtent,
};
pub use error::{RenderError, RenderResult, VkResultExt};
pub use frames::{FrameResourceSet, FrameResources, MAX_FRAMES_IN_FLIGHT};
pub use recreate::{Invalidation, RecreationTrigger};
pub use resize::ResizeSignal;
pub use scheduler::{
    FrameContext, FrameRecorder, FrameScheduler, FrameState, FrameStatus, SchedulerConfig,
};
pub use settings::RenderSettings;
pub use swapchain::{SwapchainConfig, SwapchainManager, SwapchainState};

pub trait Renderer {
    /// `extent` is polled for the drawable size whenever the swapchain is
    /// (re)built and is asked to pump events while the window is minimised.
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        extent: Box<dyn WindowExtent>,
        settings: RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    /// Shared flag the window layer sets on every resize.
    fn resize_signal(&self) -> ResizeSignal;
    fn render(&mut self) -> Result<FrameStatus>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
