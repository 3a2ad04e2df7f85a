// SPDX-License-Identifier: CEPL-1.0
//! Per-frame synchronisation and command recording targets.
use ash::vk;
use tracing::debug;

use crate::device::FrameDevice;
use crate::error::{RenderError, RenderResult};

/// Frames the CPU may record ahead of GPU completion.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// Everything one frame index needs. Owned by exactly one slot of the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameResources {
    pub command_buffer: vk::CommandBuffer,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

#[derive(Debug)]
pub struct FrameResourceSet {
    slots: Vec<FrameResources>,
}

impl FrameResourceSet {
    /// Creates `count` slots. Fences start signaled so the first wait on each
    /// slot returns immediately.
    pub fn new<D: FrameDevice + ?Sized>(device: &D, count: usize) -> RenderResult<Self> {
        if count == 0 {
            return Err(RenderError::InvalidUsage(
                "frame resource set needs at least one slot".into(),
            ));
        }

        let buffers = device.allocate_command_buffers(count as u32)?;
        let mut set = Self {
            slots: Vec::with_capacity(count),
        };
        let mut spare = buffers.into_iter();

        for _ in 0..count {
            let Some(command_buffer) = spare.next() else {
                break;
            };
            match Self::create_sync(device) {
                Ok((image_available, render_finished, in_flight)) => {
                    set.slots.push(FrameResources {
                        command_buffer,
                        image_available,
                        render_finished,
                        in_flight,
                    });
                }
                Err(e) => {
                    let rest: Vec<_> = std::iter::once(command_buffer).chain(spare).collect();
                    device.free_command_buffers(&rest);
                    set.release(device);
                    return Err(e);
                }
            }
        }

        if set.slots.len() != count {
            let got = set.slots.len();
            set.release(device);
            return Err(RenderError::InvalidUsage(format!(
                "device allocated {got} command buffers, {count} requested"
            )));
        }

        debug!("created {} frame slots", count);
        Ok(set)
    }

    fn create_sync<D: FrameDevice + ?Sized>(
        device: &D,
    ) -> RenderResult<(vk::Semaphore, vk::Semaphore, vk::Fence)> {
        let image_available = device.create_semaphore()?;
        let render_finished = match device.create_semaphore() {
            Ok(s) => s,
            Err(e) => {
                device.destroy_semaphore(image_available);
                return Err(e);
            }
        };
        match device.create_fence(true) {
            Ok(f) => Ok((image_available, render_finished, f)),
            Err(e) => {
                device.destroy_semaphore(render_finished);
                device.destroy_semaphore(image_available);
                Err(e)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, frame_index: usize) -> RenderResult<&FrameResources> {
        self.slots
            .get(frame_index)
            .ok_or(RenderError::FrameIndexOutOfRange {
                index: frame_index,
                len: self.slots.len(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FrameResources> {
        self.slots.iter()
    }

    /// Waits for the device to go idle, then releases every slot.
    pub fn destroy<D: FrameDevice + ?Sized>(mut self, device: &D) -> RenderResult<()> {
        device.wait_idle()?;
        self.release(device);
        Ok(())
    }

    fn release<D: FrameDevice + ?Sized>(&mut self, device: &D) {
        let buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
        for s in self.slots.drain(..) {
            device.destroy_fence(s.in_flight);
            device.destroy_semaphore(s.render_finished);
            device.destroy_semaphore(s.image_available);
        }
        if !buffers.is_empty() {
            device.free_command_buffers(&buffers);
        }
    }
}
