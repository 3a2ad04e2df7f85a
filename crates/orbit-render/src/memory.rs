// SPDX-License-Identifier: CEPL-1.0
use ash::vk;

use crate::error::{RenderError, RenderResult};

/// First memory type allowed by `type_bits` whose properties include `required`.
///
/// Bit `i` of `type_bits` must be set for type `i` to qualify.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize]
                    .property_flags
                    .contains(required)
        })
        .ok_or(RenderError::NoMemoryType {
            type_bits,
            required,
        })
}
