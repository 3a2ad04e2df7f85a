// SPDX-License-Identifier: CEPL-1.0
//! Device-side operations the frame lifecycle depends on.
//!
//! Handles are plain `ash::vk` handles; a backend owns whatever loaders and
//! pools are needed to service the calls. All methods take `&self`: the frame
//! core drives a device from a single thread and never re-enters it.
use ash::vk;

use crate::error::RenderResult;

/// What the surface currently supports, queried fresh for every swapchain.
#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Fully resolved parameters for one swapchain generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainDesc {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is ready (`suboptimal` images are still rendered and presented).
    Ready { image_index: u32, suboptimal: bool },
    /// The chain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FenceStatus {
    Signaled,
    TimedOut,
}

/// One graphics-queue submission for a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Synchronisation primitives, command buffers and the graphics queue.
pub trait FrameDevice {
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence>;
    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>>;

    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<FenceStatus>;
    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()>;
    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RenderResult<()>;

    fn submit(&self, submission: &FrameSubmission) -> RenderResult<()>;
    fn wait_idle(&self) -> RenderResult<()>;
}

/// Surface queries, the presentable chain and everything sized to it.
pub trait SwapchainDevice {
    /// Extent-dependent render targets shared by every framebuffer of one
    /// generation (depth, multisampled colour, ...).
    type Attachments;

    fn surface_support(&self) -> RenderResult<SurfaceSupport>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format)
        -> RenderResult<vk::ImageView>;
    fn create_attachments(&self, desc: &SwapchainDesc) -> RenderResult<Self::Attachments>;
    fn create_framebuffer(
        &self,
        view: vk::ImageView,
        attachments: &Self::Attachments,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer>;

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn destroy_attachments(&self, attachments: Self::Attachments);
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome>;

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome>;
}

/// The window side of the surface: its framebuffer size and a way to let
/// window events through while waiting for a usable size.
pub trait WindowExtent {
    fn framebuffer_size(&self) -> vk::Extent2D;
    /// Called between size polls while the window has zero area. It may only
    /// yield; the wait does not time out, so a window whose size never
    /// becomes nonzero keeps the caller here.
    fn wait_events(&self);
}

impl<W: WindowExtent + ?Sized> WindowExtent for Box<W> {
    fn framebuffer_size(&self) -> vk::Extent2D {
        (**self).framebuffer_size()
    }

    fn wait_events(&self) {
        (**self).wait_events()
    }
}
