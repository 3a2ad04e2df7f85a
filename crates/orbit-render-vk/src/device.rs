// SPDX-License-Identifier: CEPL-1.0
//! Logical device plus everything the frame core asks of it.
use anyhow::{Context as _, Result};
use ash::khr::swapchain;
use ash::vk;
use orbit_render::barrier::ImageTransition;
use orbit_render::memory::find_memory_type;
use orbit_render::swapchain::choose_surface_format;
use orbit_render::{
    AcquireOutcome, FenceStatus, FrameDevice, FrameSubmission, PresentOutcome, RenderError,
    RenderResult, SurfaceSupport, SwapchainConfig, SwapchainDesc, SwapchainDevice, VkResultExt,
};
use tracing::{debug, info};

use crate::context::{has_stencil_component, Context};
use crate::pipeline::create_render_pass;

/// An image with its own memory and a single view.
#[derive(Clone, Copy, Debug, Default)]
pub struct ImageAlloc {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

#[derive(Clone, Copy, Debug)]
pub struct ImageSpec {
    pub extent: vk::Extent2D,
    pub mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
}

/// Extent-sized render targets shared by all framebuffers of one swapchain.
#[derive(Debug)]
pub struct Attachments {
    /// Multisampled colour target, absent when rendering single-sampled.
    pub color: Option<ImageAlloc>,
    pub depth: ImageAlloc,
}

pub struct VkDevice {
    pub device: ash::Device,
    pub swapchain_loader: swapchain::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub cmd_pool: vk::CommandPool,
    /// Colour format the render pass was built for.
    pub color_format: vk::Format,
    pub render_pass: vk::RenderPass,
    // Declared last: dropped after the logical device.
    pub ctx: Context,
}

impl VkDevice {
    pub fn new(ctx: Context, swapchain_cfg: &SwapchainConfig) -> Result<Self> {
        unsafe {
            let priorities = [1.0_f32];
            let qinfos: Vec<_> = ctx
                .queues
                .unique()
                .into_iter()
                .map(|family| vk::DeviceQueueCreateInfo {
                    s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
                    queue_family_index: family,
                    queue_count: 1,
                    p_queue_priorities: priorities.as_ptr(),
                    ..Default::default()
                })
                .collect();
            let features = vk::PhysicalDeviceFeatures {
                sampler_anisotropy: vk::TRUE,
                ..Default::default()
            };
            let exts = [swapchain::NAME.as_ptr()];
            let dinfo = vk::DeviceCreateInfo {
                s_type: vk::StructureType::DEVICE_CREATE_INFO,
                queue_create_info_count: qinfos.len() as u32,
                p_queue_create_infos: qinfos.as_ptr(),
                enabled_extension_count: exts.len() as u32,
                pp_enabled_extension_names: exts.as_ptr(),
                p_enabled_features: &features,
                ..Default::default()
            };
            let device = ctx
                .instance
                .create_device(ctx.phys, &dinfo, None)
                .context("create_device")?;

            let mut this = Self {
                swapchain_loader: swapchain::Device::new(&ctx.instance, &device),
                graphics_queue: device.get_device_queue(ctx.queues.graphics, 0),
                present_queue: device.get_device_queue(ctx.queues.present, 0),
                device,
                cmd_pool: vk::CommandPool::null(),
                color_format: vk::Format::UNDEFINED,
                render_pass: vk::RenderPass::null(),
                ctx,
            };

            let pool_info = vk::CommandPoolCreateInfo {
                s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                queue_family_index: this.ctx.queues.graphics,
                flags: vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                ..Default::default()
            };
            this.cmd_pool = this
                .device
                .create_command_pool(&pool_info, None)
                .context("create_command_pool")?;

            // The swapchain manager applies the same selection, so the render
            // pass matches every generation built for this surface.
            let support = this.surface_support()?;
            this.color_format =
                choose_surface_format(&support.formats, swapchain_cfg.preferred_format)?.format;
            this.render_pass = create_render_pass(
                &this.device,
                this.color_format,
                this.ctx.depth_format,
                this.ctx.msaa_samples,
            )
            .context("create_render_pass")?;

            info!(
                "logical device ready: color {:?}, depth {:?}, samples {:?}",
                this.color_format, this.ctx.depth_format, this.ctx.msaa_samples
            );
            Ok(this)
        }
    }

    pub fn raw(&self) -> &ash::Device {
        &self.device
    }

    pub fn msaa_samples(&self) -> vk::SampleCountFlags {
        self.ctx.msaa_samples
    }

    pub fn memory_type(
        &self,
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    ) -> RenderResult<u32> {
        find_memory_type(&self.ctx.memory_props, type_bits, required)
    }

    /// Records `record` into a throwaway command buffer, submits it on the
    /// graphics queue and waits for the queue to drain.
    pub fn one_time_submit<F>(&self, record: F) -> RenderResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        unsafe {
            let ai = vk::CommandBufferAllocateInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                command_pool: self.cmd_pool,
                level: vk::CommandBufferLevel::PRIMARY,
                command_buffer_count: 1,
                ..Default::default()
            };
            let cmd = self
                .device
                .allocate_command_buffers(&ai)
                .during("vkAllocateCommandBuffers")?[0];

            let result = (|| {
                let bi = vk::CommandBufferBeginInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                    flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                    ..Default::default()
                };
                self.device
                    .begin_command_buffer(cmd, &bi)
                    .during("vkBeginCommandBuffer")?;
                record(&self.device, cmd);
                self.device
                    .end_command_buffer(cmd)
                    .during("vkEndCommandBuffer")?;

                let si = vk::SubmitInfo {
                    s_type: vk::StructureType::SUBMIT_INFO,
                    command_buffer_count: 1,
                    p_command_buffers: &cmd,
                    ..Default::default()
                };
                self.device
                    .queue_submit(self.graphics_queue, std::slice::from_ref(&si), vk::Fence::null())
                    .during("vkQueueSubmit")?;
                self.device
                    .queue_wait_idle(self.graphics_queue)
                    .during("vkQueueWaitIdle")
            })();

            self.device
                .free_command_buffers(self.cmd_pool, std::slice::from_ref(&cmd));
            result
        }
    }

    /// Records a layout transition from the barrier table.
    pub fn cmd_transition(
        &self,
        cmd: vk::CommandBuffer,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> RenderResult<()> {
        let t = ImageTransition::between(old, new)?;
        let barrier = t.image_barrier(image, range);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                t.src_stage,
                t.dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                std::slice::from_ref(&barrier),
            );
        }
        Ok(())
    }

    pub fn create_image(&self, spec: &ImageSpec) -> RenderResult<ImageAlloc> {
        unsafe {
            let ci = vk::ImageCreateInfo {
                s_type: vk::StructureType::IMAGE_CREATE_INFO,
                image_type: vk::ImageType::TYPE_2D,
                format: spec.format,
                extent: vk::Extent3D {
                    width: spec.extent.width,
                    height: spec.extent.height,
                    depth: 1,
                },
                mip_levels: spec.mip_levels,
                array_layers: 1,
                samples: spec.samples,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: spec.usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                initial_layout: vk::ImageLayout::UNDEFINED,
                ..Default::default()
            };
            let mut alloc = ImageAlloc {
                image: self.device.create_image(&ci, None).during("vkCreateImage")?,
                ..Default::default()
            };

            let result = (|| {
                let req = self.device.get_image_memory_requirements(alloc.image);
                let mai = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index: self
                        .memory_type(req.memory_type_bits, vk::MemoryPropertyFlags::DEVICE_LOCAL)?,
                    ..Default::default()
                };
                alloc.memory = self
                    .device
                    .allocate_memory(&mai, None)
                    .during("vkAllocateMemory")?;
                self.device
                    .bind_image_memory(alloc.image, alloc.memory, 0)
                    .during("vkBindImageMemory")?;
                alloc.view =
                    self.create_view(alloc.image, spec.format, spec.aspect, spec.mip_levels)?;
                Ok(())
            })();

            match result {
                Ok(()) => Ok(alloc),
                Err(e) => {
                    self.destroy_image(alloc);
                    Err(e)
                }
            }
        }
    }

    pub fn create_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> RenderResult<vk::ImageView> {
        let ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: mip_levels,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe { self.device.create_image_view(&ci, None) }.during("vkCreateImageView")
    }

    /// Null members are skipped, so partially built images can be released.
    pub fn destroy_image(&self, alloc: ImageAlloc) {
        unsafe {
            if alloc.view != vk::ImageView::null() {
                self.device.destroy_image_view(alloc.view, None);
            }
            if alloc.image != vk::Image::null() {
                self.device.destroy_image(alloc.image, None);
            }
            if alloc.memory != vk::DeviceMemory::null() {
                self.device.free_memory(alloc.memory, None);
            }
        }
    }

    fn depth_aspect(&self) -> vk::ImageAspectFlags {
        if has_stencil_component(self.ctx.depth_format) {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        } else {
            vk::ImageAspectFlags::DEPTH
        }
    }
}

impl FrameDevice for VkDevice {
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        let ci = vk::SemaphoreCreateInfo::default();
        unsafe { self.device.create_semaphore(&ci, None) }.during("vkCreateSemaphore")
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: if signaled {
                vk::FenceCreateFlags::SIGNALED
            } else {
                vk::FenceCreateFlags::empty()
            },
            ..Default::default()
        };
        unsafe { self.device.create_fence(&ci, None) }.during("vkCreateFence")
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.cmd_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: count,
            ..Default::default()
        };
        unsafe { self.device.allocate_command_buffers(&ai) }.during("vkAllocateCommandBuffers")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        unsafe { self.device.free_command_buffers(self.cmd_pool, buffers) }
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout_ns: u64) -> RenderResult<FenceStatus> {
        match unsafe { self.device.wait_for_fences(&[fence], true, timeout_ns) } {
            Ok(()) => Ok(FenceStatus::Signaled),
            Err(vk::Result::TIMEOUT) => Ok(FenceStatus::TimedOut),
            Err(result) => Err(RenderError::Resource {
                op: "vkWaitForFences",
                result,
            }),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }.during("vkResetFences")
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())
        }
        .during("vkResetCommandBuffer")
    }

    fn submit(&self, s: &FrameSubmission) -> RenderResult<()> {
        let si = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &s.wait,
            p_wait_dst_stage_mask: &s.wait_stage,
            command_buffer_count: 1,
            p_command_buffers: &s.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &s.signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&si), s.fence)
        }
        .during("vkQueueSubmit")
    }

    fn wait_idle(&self) -> RenderResult<()> {
        unsafe { self.device.device_wait_idle() }.during("vkDeviceWaitIdle")
    }
}

impl SwapchainDevice for VkDevice {
    type Attachments = Attachments;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        let (phys, surface, loader) = (self.ctx.phys, self.ctx.surface, &self.ctx.surface_loader);
        unsafe {
            Ok(SurfaceSupport {
                capabilities: loader
                    .get_physical_device_surface_capabilities(phys, surface)
                    .during("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?,
                formats: loader
                    .get_physical_device_surface_formats(phys, surface)
                    .during("vkGetPhysicalDeviceSurfaceFormatsKHR")?,
                present_modes: loader
                    .get_physical_device_surface_present_modes(phys, surface)
                    .during("vkGetPhysicalDeviceSurfacePresentModesKHR")?,
            })
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let families = [self.ctx.queues.graphics, self.ctx.queues.present];
        let (sharing_mode, family_count) = if self.ctx.queues.is_shared() {
            (vk::SharingMode::EXCLUSIVE, 0)
        } else {
            (vk::SharingMode::CONCURRENT, families.len() as u32)
        };

        let ci = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.ctx.surface,
            min_image_count: desc.image_count,
            image_format: desc.format.format,
            image_color_space: desc.format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_count,
            p_queue_family_indices: families.as_ptr(),
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            // the previous generation is destroyed before a new one is built
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        unsafe { self.swapchain_loader.create_swapchain(&ci, None) }.during("vkCreateSwapchainKHR")
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        unsafe { self.swapchain_loader.get_swapchain_images(swapchain) }
            .during("vkGetSwapchainImagesKHR")
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> RenderResult<vk::ImageView> {
        self.create_view(image, format, vk::ImageAspectFlags::COLOR, 1)
    }

    fn create_attachments(&self, desc: &SwapchainDesc) -> RenderResult<Attachments> {
        if desc.format.format != self.color_format {
            return Err(RenderError::InvalidUsage(format!(
                "swapchain format {:?} does not match render pass format {:?}",
                desc.format.format, self.color_format
            )));
        }

        let samples = self.ctx.msaa_samples;
        let color = if samples != vk::SampleCountFlags::TYPE_1 {
            Some(self.create_image(&ImageSpec {
                extent: desc.extent,
                mip_levels: 1,
                samples,
                format: self.color_format,
                usage: vk::ImageUsageFlags::TRANSIENT_ATTACHMENT
                    | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                aspect: vk::ImageAspectFlags::COLOR,
            })?)
        } else {
            None
        };

        let aspect = self.depth_aspect();
        let depth = self
            .create_image(&ImageSpec {
                extent: desc.extent,
                mip_levels: 1,
                samples,
                format: self.ctx.depth_format,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                aspect,
            })
            .and_then(|depth| {
                let range = vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                };
                let mut barrier = Ok(());
                let submitted = self.one_time_submit(|_, cmd| {
                    barrier = self.cmd_transition(
                        cmd,
                        depth.image,
                        range,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
                    );
                });
                match submitted.and(barrier) {
                    Ok(()) => Ok(depth),
                    Err(e) => {
                        self.destroy_image(depth);
                        Err(e)
                    }
                }
            });

        match depth {
            Ok(depth) => {
                debug!(
                    "attachments {}x{}: depth {:?}, msaa colour {}",
                    desc.extent.width,
                    desc.extent.height,
                    self.ctx.depth_format,
                    color.is_some()
                );
                Ok(Attachments { color, depth })
            }
            Err(e) => {
                if let Some(c) = color {
                    self.destroy_image(c);
                }
                Err(e)
            }
        }
    }

    fn create_framebuffer(
        &self,
        view: vk::ImageView,
        attachments: &Attachments,
        extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        // Order matches the render pass: [colour, depth, resolve] or [colour, depth].
        let views: Vec<vk::ImageView> = match attachments.color {
            Some(msaa) => vec![msaa.view, attachments.depth.view, view],
            None => vec![view, attachments.depth.view],
        };
        let ci = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: self.render_pass,
            attachment_count: views.len() as u32,
            p_attachments: views.as_ptr(),
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe { self.device.create_framebuffer(&ci, None) }.during("vkCreateFramebuffer")
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn destroy_attachments(&self, attachments: Attachments) {
        self.destroy_image(attachments.depth);
        if let Some(c) = attachments.color {
            self.destroy_image(c);
        }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome> {
        let r = unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, timeout_ns, signal, vk::Fence::null())
        };
        match r {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(result) => Err(RenderError::Resource {
                op: "vkAcquireNextImageKHR",
                result,
            }),
        }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let pi = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        match unsafe { self.swapchain_loader.queue_present(self.present_queue, &pi) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::Resource {
                op: "vkQueuePresentKHR",
                result,
            }),
        }
    }
}

// STRICT TEARDOWN ORDER:
// - Scene objects and the swapchain are released by the renderer before this runs
// - device_wait_idle() so nothing still references the pool or render pass
// - Render pass and command pool BEFORE the device
// - Device BEFORE surface/instance (`ctx` drops after this body)
impl Drop for VkDevice {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            if self.render_pass != vk::RenderPass::null() {
                self.device.destroy_render_pass(self.render_pass, None);
            }
            if self.cmd_pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.cmd_pool, None);
            }
            self.device.destroy_device(None);
        }
    }
}
