// SPDX-License-Identifier: CEPL-1.0
//! Access masks and pipeline stages for the image layout transitions the
//! renderer performs. Only the listed pairs are known; anything else is a
//! caller error rather than a guess.
use ash::vk;

use crate::error::{RenderError, RenderResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageTransition {
    pub old_layout: vk::ImageLayout,
    pub new_layout: vk::ImageLayout,
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

impl ImageTransition {
    pub fn between(old: vk::ImageLayout, new: vk::ImageLayout) -> RenderResult<Self> {
        use vk::AccessFlags as A;
        use vk::ImageLayout as L;
        use vk::PipelineStageFlags as S;

        let (src_access, dst_access, src_stage, dst_stage) = match (old, new) {
            (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
                (A::empty(), A::TRANSFER_WRITE, S::TOP_OF_PIPE, S::TRANSFER)
            }
            (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                A::TRANSFER_WRITE,
                A::SHADER_READ,
                S::TRANSFER,
                S::FRAGMENT_SHADER,
            ),
            // mip chain: level i-1 becomes the blit source for level i
            (L::TRANSFER_DST_OPTIMAL, L::TRANSFER_SRC_OPTIMAL) => {
                (A::TRANSFER_WRITE, A::TRANSFER_READ, S::TRANSFER, S::TRANSFER)
            }
            (L::TRANSFER_SRC_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
                A::TRANSFER_READ,
                A::SHADER_READ,
                S::TRANSFER,
                S::FRAGMENT_SHADER,
            ),
            (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => (
                A::empty(),
                A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                S::TOP_OF_PIPE,
                S::EARLY_FRAGMENT_TESTS,
            ),
            _ => return Err(RenderError::UnsupportedTransition { from: old, to: new }),
        };

        Ok(Self {
            old_layout: old,
            new_layout: new,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }

    /// Fills in a barrier for `image`; the caller picks the subresource range.
    pub fn image_barrier(
        &self,
        image: vk::Image,
        range: vk::ImageSubresourceRange,
    ) -> vk::ImageMemoryBarrier<'static> {
        vk::ImageMemoryBarrier {
            s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
            old_layout: self.old_layout,
            new_layout: self.new_layout,
            src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
            image,
            subresource_range: range,
            src_access_mask: self.src_access,
            dst_access_mask: self.dst_access,
            ..Default::default()
        }
    }
}
