// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// A GPU object could not be created, or a queue/device call failed.
    #[error("{op} failed: {result}")]
    Resource {
        op: &'static str,
        result: vk::Result,
    },

    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    #[error("unsupported image layout transition {from:?} -> {to:?}")]
    UnsupportedTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    #[error("no memory type in filter {type_bits:#034b} has {required:?}")]
    NoMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("surface reports no supported formats")]
    NoSurfaceFormats,

    #[error("in-flight fence of frame {frame} not signaled within {timeout_ns} ns")]
    FenceTimeout { frame: usize, timeout_ns: u64 },

    #[error("frame index {index} out of range for {len} frames in flight")]
    FrameIndexOutOfRange { index: usize, len: usize },
}

impl RenderError {
    /// True for caller mistakes, as opposed to the device running out of something.
    pub fn is_invalid_usage(&self) -> bool {
        matches!(
            self,
            RenderError::InvalidUsage(_)
                | RenderError::UnsupportedTransition { .. }
                | RenderError::FrameIndexOutOfRange { .. }
        )
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Tags a raw Vulkan result with the call that produced it.
pub trait VkResultExt<T> {
    fn during(self, op: &'static str) -> RenderResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn during(self, op: &'static str) -> RenderResult<T> {
        self.map_err(|result| RenderError::Resource { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn during_names_the_failing_call() {
        let r: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = r.during("vkAllocateMemory").unwrap_err();
        assert!(matches!(
            err,
            RenderError::Resource {
                op: "vkAllocateMemory",
                result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            }
        ));
        assert!(err.to_string().starts_with("vkAllocateMemory failed"));
        assert!(!err.is_invalid_usage());
    }

    #[test]
    fn layout_errors_count_as_invalid_usage() {
        let err = RenderError::UnsupportedTransition {
            from: vk::ImageLayout::GENERAL,
            to: vk::ImageLayout::PRESENT_SRC_KHR,
        };
        assert!(err.is_invalid_usage());
        assert!(RenderError::InvalidUsage("x".into()).is_invalid_usage());
        assert!(!RenderError::NoSurfaceFormats.is_invalid_usage());
    }
}
