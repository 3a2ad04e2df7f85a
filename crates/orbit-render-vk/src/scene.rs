// SPDX-License-Identifier: CEPL-1.0
//! The textured, spinning quads: everything that outlives a swapchain
//! generation and the per-frame recording that uses it.
use std::time::Instant;

use anyhow::{Context as _, Result};
use ash::vk;
use orbit_math::{aspect_ratio, CameraUbo};
use orbit_render::assets::{Mesh, PixelBuffer};
use orbit_render::{FrameContext, FrameRecorder, RenderError, RenderResult, VkResultExt};
use tracing::debug;

use crate::buffer::{BufferAlloc, UniformBuffers};
use crate::device::VkDevice;
use crate::pipeline::{create_pipeline, create_scene_set_layout, ShaderBlobs};
use crate::texture::Texture;

pub fn clear_values(rgba: [f32; 4]) -> [vk::ClearValue; 2] {
    [
        vk::ClearValue {
            color: vk::ClearColorValue { float32: rgba },
        },
        vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        },
    ]
}

pub fn full_viewport(extent: vk::Extent2D) -> (vk::Viewport, vk::Rect2D) {
    (
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        },
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        },
    )
}

/// One uniform buffer and one sampler descriptor per frame in flight.
pub fn descriptor_pool_sizes(frames: u32) -> [vk::DescriptorPoolSize; 2] {
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: frames,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: frames,
        },
    ]
}

pub struct SceneRecorder {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    vertices: BufferAlloc,
    indices: BufferAlloc,
    index_count: u32,
    texture: Option<Texture>,
    ubos: UniformBuffers,
    desc_pool: vk::DescriptorPool,
    /// Indexed by frame slot, never by swapchain image.
    desc_sets: Vec<vk::DescriptorSet>,
    clear_color: [f32; 4],
    started: Instant,
}

impl SceneRecorder {
    pub fn new(
        device: &VkDevice,
        frames_in_flight: usize,
        shaders: &ShaderBlobs,
        mesh: &Mesh,
        pixels: &PixelBuffer,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        mesh.validate()?;
        let mut scene = Self {
            set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            vertices: BufferAlloc::default(),
            indices: BufferAlloc::default(),
            index_count: mesh.indices.len() as u32,
            texture: None,
            ubos: UniformBuffers::empty(),
            desc_pool: vk::DescriptorPool::null(),
            desc_sets: Vec::new(),
            clear_color,
            started: Instant::now(),
        };
        match scene.build(device, frames_in_flight, shaders, mesh, pixels) {
            Ok(()) => {
                debug!(
                    "scene ready: {} indices, {} descriptor sets",
                    scene.index_count,
                    scene.desc_sets.len()
                );
                Ok(scene)
            }
            Err(e) => {
                scene.destroy(device);
                Err(e)
            }
        }
    }

    fn build(
        &mut self,
        device: &VkDevice,
        frames: usize,
        shaders: &ShaderBlobs,
        mesh: &Mesh,
        pixels: &PixelBuffer,
    ) -> Result<()> {
        let raw = device.raw();
        unsafe {
            self.set_layout = create_scene_set_layout(raw)?;
            (self.pipeline_layout, self.pipeline) = create_pipeline(
                raw,
                device.render_pass,
                device.msaa_samples(),
                self.set_layout,
                shaders,
            )?;
        }

        self.vertices = device
            .upload_via_staging(&mesh.vertices, vk::BufferUsageFlags::VERTEX_BUFFER)
            .context("vertex buffer")?;
        self.indices = device
            .upload_via_staging(&mesh.indices, vk::BufferUsageFlags::INDEX_BUFFER)
            .context("index buffer")?;
        self.texture = Some(Texture::upload(device, pixels).context("texture")?);
        self.ubos = UniformBuffers::new(
            device,
            frames,
            std::mem::size_of::<CameraUbo>() as vk::DeviceSize,
        )?;

        self.create_descriptors(device, frames)?;
        Ok(())
    }

    fn create_descriptors(&mut self, device: &VkDevice, frames: usize) -> RenderResult<()> {
        let raw = device.raw();
        let sizes = descriptor_pool_sizes(frames as u32);
        let pool_info = vk::DescriptorPoolCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_POOL_CREATE_INFO,
            max_sets: frames as u32,
            pool_size_count: sizes.len() as u32,
            p_pool_sizes: sizes.as_ptr(),
            ..Default::default()
        };
        self.desc_pool =
            unsafe { raw.create_descriptor_pool(&pool_info, None) }.during("vkCreateDescriptorPool")?;

        let layouts = vec![self.set_layout; frames];
        let alloc_info = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.desc_pool,
            descriptor_set_count: layouts.len() as u32,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        self.desc_sets =
            unsafe { raw.allocate_descriptor_sets(&alloc_info) }.during("vkAllocateDescriptorSets")?;

        let (view, sampler) = match &self.texture {
            Some(t) => (t.image.view, t.sampler),
            None => (vk::ImageView::null(), vk::Sampler::null()),
        };
        for (i, &set) in self.desc_sets.iter().enumerate() {
            let ubo = self.ubos.buffer(i)?;
            let buffer_info = vk::DescriptorBufferInfo {
                buffer: ubo.buffer,
                offset: 0,
                range: ubo.size,
            };
            let image_info = vk::DescriptorImageInfo {
                sampler,
                image_view: view,
                image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            };
            let writes = [
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: 0,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                    p_buffer_info: &buffer_info,
                    ..Default::default()
                },
                vk::WriteDescriptorSet {
                    s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
                    dst_set: set,
                    dst_binding: 1,
                    descriptor_count: 1,
                    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    p_image_info: &image_info,
                    ..Default::default()
                },
            ];
            unsafe { raw.update_descriptor_sets(&writes, &[]) };
        }
        Ok(())
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    /// The device must be idle. Null handles from a partial build are skipped.
    pub fn destroy(&mut self, device: &VkDevice) {
        let raw = device.raw();
        unsafe {
            if self.desc_pool != vk::DescriptorPool::null() {
                // frees the sets with it
                raw.destroy_descriptor_pool(self.desc_pool, None);
                self.desc_pool = vk::DescriptorPool::null();
            }
            self.desc_sets.clear();
            self.ubos.destroy(device);
            if let Some(t) = self.texture.take() {
                t.destroy(device);
            }
            device.destroy_buffer(std::mem::take(&mut self.indices));
            device.destroy_buffer(std::mem::take(&mut self.vertices));
            if self.pipeline != vk::Pipeline::null() {
                raw.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.pipeline_layout != vk::PipelineLayout::null() {
                raw.destroy_pipeline_layout(self.pipeline_layout, None);
                self.pipeline_layout = vk::PipelineLayout::null();
            }
            if self.set_layout != vk::DescriptorSetLayout::null() {
                raw.destroy_descriptor_set_layout(self.set_layout, None);
                self.set_layout = vk::DescriptorSetLayout::null();
            }
        }
    }
}

impl FrameRecorder<VkDevice> for SceneRecorder {
    fn record(&mut self, device: &VkDevice, frame: &FrameContext) -> RenderResult<()> {
        let raw = device.raw();
        let cmd = frame.command_buffer;
        let set = *self
            .desc_sets
            .get(frame.frame_index)
            .ok_or(RenderError::FrameIndexOutOfRange {
                index: frame.frame_index,
                len: self.desc_sets.len(),
            })?;
        let clears = clear_values(self.clear_color);
        let (viewport, scissor) = full_viewport(frame.extent);

        unsafe {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                ..Default::default()
            };
            raw.begin_command_buffer(cmd, &bi)
                .during("vkBeginCommandBuffer")?;

            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass: device.render_pass,
                framebuffer: frame.framebuffer,
                render_area: scissor,
                clear_value_count: clears.len() as u32,
                p_clear_values: clears.as_ptr(),
                ..Default::default()
            };
            raw.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            raw.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            raw.cmd_set_viewport(cmd, 0, &[viewport]);
            raw.cmd_set_scissor(cmd, 0, &[scissor]);
            raw.cmd_bind_vertex_buffers(cmd, 0, &[self.vertices.buffer], &[0]);
            raw.cmd_bind_index_buffer(cmd, self.indices.buffer, 0, vk::IndexType::UINT32);
            raw.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[set],
                &[],
            );
            raw.cmd_draw_indexed(cmd, self.index_count, 1, 0, 0, 0);
            raw.cmd_end_render_pass(cmd);
            raw.end_command_buffer(cmd).during("vkEndCommandBuffer")
        }
    }

    fn update(&mut self, _device: &VkDevice, frame: &FrameContext) -> RenderResult<()> {
        let elapsed = self.started.elapsed().as_secs_f32();
        let ubo = CameraUbo::orbiting(
            elapsed,
            aspect_ratio(frame.extent.width, frame.extent.height),
        );
        self.ubos.write(frame.frame_index, &ubo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_colour_then_far_depth() {
        let [color, depth] = clear_values([0.1, 0.2, 0.3, 1.0]);
        unsafe {
            assert_eq!(color.color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(depth.depth_stencil.depth, 1.0);
            assert_eq!(depth.depth_stencil.stencil, 0);
        }
    }

    #[test]
    fn viewport_covers_extent() {
        let extent = vk::Extent2D {
            width: 1280,
            height: 720,
        };
        let (vp, scissor) = full_viewport(extent);
        assert_eq!((vp.width, vp.height), (1280.0, 720.0));
        assert_eq!((vp.min_depth, vp.max_depth), (0.0, 1.0));
        assert_eq!(scissor.extent, extent);
    }

    #[test]
    fn pool_holds_one_of_each_per_frame() {
        let sizes = descriptor_pool_sizes(2);
        assert!(sizes.iter().all(|s| s.descriptor_count == 2));
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }
}
