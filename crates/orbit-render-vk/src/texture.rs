// SPDX-License-Identifier: CEPL-1.0
//! Sampled texture with a blitted mip chain.
use ash::vk;
use orbit_render::assets::PixelBuffer;
use orbit_render::{RenderError, RenderResult, VkResultExt};
use tracing::debug;

use crate::device::{ImageAlloc, ImageSpec, VkDevice};

pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

pub struct Texture {
    pub image: ImageAlloc,
    pub sampler: vk::Sampler,
    pub mip_levels: u32,
}

fn half(v: i32) -> i32 {
    (v / 2).max(1)
}

/// Blit regions for levels `1..levels`, each halving the previous level.
pub fn mip_blit_regions(width: u32, height: u32, levels: u32) -> Vec<vk::ImageBlit> {
    let (mut w, mut h) = (width as i32, height as i32);
    let mut out = Vec::with_capacity(levels.saturating_sub(1) as usize);
    for level in 1..levels {
        let layer = |mip_level| vk::ImageSubresourceLayers {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level,
            base_array_layer: 0,
            layer_count: 1,
        };
        out.push(vk::ImageBlit {
            src_subresource: layer(level - 1),
            src_offsets: [vk::Offset3D::default(), vk::Offset3D { x: w, y: h, z: 1 }],
            dst_subresource: layer(level),
            dst_offsets: [
                vk::Offset3D::default(),
                vk::Offset3D {
                    x: half(w),
                    y: half(h),
                    z: 1,
                },
            ],
        });
        w = half(w);
        h = half(h);
    }
    out
}

fn level_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

impl Texture {
    pub fn upload(device: &VkDevice, pixels: &PixelBuffer) -> RenderResult<Self> {
        let props = device.ctx.format_properties(TEXTURE_FORMAT);
        if !props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            return Err(RenderError::InvalidUsage(format!(
                "{TEXTURE_FORMAT:?} does not support linear blitting"
            )));
        }

        let mip_levels = pixels.mip_levels();
        let image = device.create_image(&ImageSpec {
            extent: vk::Extent2D {
                width: pixels.width,
                height: pixels.height,
            },
            mip_levels,
            samples: vk::SampleCountFlags::TYPE_1,
            format: TEXTURE_FORMAT,
            usage: vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::SAMPLED,
            aspect: vk::ImageAspectFlags::COLOR,
        })?;

        let filled = Self::fill(device, image.image, pixels, mip_levels)
            .and_then(|()| Self::create_sampler(device, mip_levels));
        match filled {
            Ok(sampler) => {
                debug!(
                    "texture {}x{} with {} mip levels",
                    pixels.width, pixels.height, mip_levels
                );
                Ok(Self {
                    image,
                    sampler,
                    mip_levels,
                })
            }
            Err(e) => {
                device.destroy_image(image);
                Err(e)
            }
        }
    }

    fn fill(
        device: &VkDevice,
        image: vk::Image,
        pixels: &PixelBuffer,
        mip_levels: u32,
    ) -> RenderResult<()> {
        let staging = device.staging_buffer(&pixels.rgba)?;

        let mut recorded = Ok(());
        let submitted = device.one_time_submit(|raw, cmd| {
            recorded = (|| {
                device.cmd_transition(
                    cmd,
                    image,
                    level_range(0, mip_levels),
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )?;
                let copy = vk::BufferImageCopy {
                    buffer_offset: 0,
                    buffer_row_length: 0,
                    buffer_image_height: 0,
                    image_subresource: vk::ImageSubresourceLayers {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        mip_level: 0,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    image_offset: vk::Offset3D::default(),
                    image_extent: vk::Extent3D {
                        width: pixels.width,
                        height: pixels.height,
                        depth: 1,
                    },
                };
                unsafe {
                    raw.cmd_copy_buffer_to_image(
                        cmd,
                        staging.buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy],
                    );
                }

                for blit in mip_blit_regions(pixels.width, pixels.height, mip_levels) {
                    let src = blit.src_subresource.mip_level;
                    device.cmd_transition(
                        cmd,
                        image,
                        level_range(src, 1),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    )?;
                    unsafe {
                        raw.cmd_blit_image(
                            cmd,
                            image,
                            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                            image,
                            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                            &[blit],
                            vk::Filter::LINEAR,
                        );
                    }
                    device.cmd_transition(
                        cmd,
                        image,
                        level_range(src, 1),
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    )?;
                }

                // the last level was only ever a blit destination
                device.cmd_transition(
                    cmd,
                    image,
                    level_range(mip_levels - 1, 1),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )
            })();
        });

        device.destroy_buffer(staging);
        submitted.and(recorded)
    }

    fn create_sampler(device: &VkDevice, mip_levels: u32) -> RenderResult<vk::Sampler> {
        let ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            anisotropy_enable: vk::TRUE,
            max_anisotropy: device.ctx.props.limits.max_sampler_anisotropy,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            compare_op: vk::CompareOp::ALWAYS,
            min_lod: 0.0,
            max_lod: mip_levels as f32,
            ..Default::default()
        };
        unsafe { device.device.create_sampler(&ci, None) }.during("vkCreateSampler")
    }

    pub fn destroy(self, device: &VkDevice) {
        unsafe { device.device.destroy_sampler(self.sampler, None) };
        device.destroy_image(self.image);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_level_needs_no_blits() {
        assert!(mip_blit_regions(64, 64, 1).is_empty());
    }

    #[test]
    fn blits_halve_each_level() {
        let blits = mip_blit_regions(256, 64, 9);
        assert_eq!(blits.len(), 8);
        assert_eq!(blits[0].src_offsets[1], vk::Offset3D { x: 256, y: 64, z: 1 });
        assert_eq!(blits[0].dst_offsets[1], vk::Offset3D { x: 128, y: 32, z: 1 });
        assert_eq!(blits[0].dst_subresource.mip_level, 1);
    }

    #[test]
    fn short_side_clamps_at_one() {
        let blits = mip_blit_regions(256, 64, 9);
        let last = blits.last().unwrap();
        assert_eq!(last.src_subresource.mip_level, 7);
        assert_eq!(last.src_offsets[1], vk::Offset3D { x: 2, y: 1, z: 1 });
        assert_eq!(last.dst_offsets[1], vk::Offset3D { x: 1, y: 1, z: 1 });
    }

    #[test]
    fn chain_length_follows_pixel_buffer() {
        let px = PixelBuffer::checkerboard(300, 200, 10, [0; 4], [255; 4]);
        let blits = mip_blit_regions(px.width, px.height, px.mip_levels());
        assert_eq!(blits.len() as u32 + 1, px.mip_levels());
        assert_eq!(blits.last().unwrap().dst_offsets[1].x, 1);
    }
}
