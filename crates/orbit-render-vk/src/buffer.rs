// SPDX-License-Identifier: CEPL-1.0
//! Buffers: host-visible staging, device-local geometry and mapped uniforms.
use std::ffi::c_void;

use ash::vk;
use bytemuck::Pod;
use orbit_render::{RenderError, RenderResult, VkResultExt};

use crate::device::VkDevice;

#[derive(Clone, Copy, Debug, Default)]
pub struct BufferAlloc {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
}

pub const HOST_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

impl VkDevice {
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        props: vk::MemoryPropertyFlags,
    ) -> RenderResult<BufferAlloc> {
        if size == 0 {
            return Err(RenderError::InvalidUsage("zero-sized buffer".into()));
        }
        unsafe {
            let ci = vk::BufferCreateInfo {
                s_type: vk::StructureType::BUFFER_CREATE_INFO,
                size,
                usage,
                sharing_mode: vk::SharingMode::EXCLUSIVE,
                ..Default::default()
            };
            let mut alloc = BufferAlloc {
                buffer: self.device.create_buffer(&ci, None).during("vkCreateBuffer")?,
                size,
                ..Default::default()
            };

            let result = (|| {
                let req = self.device.get_buffer_memory_requirements(alloc.buffer);
                let mai = vk::MemoryAllocateInfo {
                    s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
                    allocation_size: req.size,
                    memory_type_index: self.memory_type(req.memory_type_bits, props)?,
                    ..Default::default()
                };
                alloc.memory = self
                    .device
                    .allocate_memory(&mai, None)
                    .during("vkAllocateMemory")?;
                self.device
                    .bind_buffer_memory(alloc.buffer, alloc.memory, 0)
                    .during("vkBindBufferMemory")
            })();

            match result {
                Ok(()) => Ok(alloc),
                Err(e) => {
                    self.destroy_buffer(alloc);
                    Err(e)
                }
            }
        }
    }

    pub fn destroy_buffer(&self, alloc: BufferAlloc) {
        unsafe {
            if alloc.buffer != vk::Buffer::null() {
                self.device.destroy_buffer(alloc.buffer, None);
            }
            if alloc.memory != vk::DeviceMemory::null() {
                self.device.free_memory(alloc.memory, None);
            }
        }
    }

    /// A host-coherent buffer already holding `bytes`.
    pub fn staging_buffer(&self, bytes: &[u8]) -> RenderResult<BufferAlloc> {
        let staging = self.create_buffer(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            HOST_COHERENT,
        )?;
        let written = unsafe {
            self.device
                .map_memory(staging.memory, 0, staging.size, vk::MemoryMapFlags::empty())
                .during("vkMapMemory")
                .map(|ptr| {
                    std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
                    self.device.unmap_memory(staging.memory);
                })
        };
        match written {
            Ok(()) => Ok(staging),
            Err(e) => {
                self.destroy_buffer(staging);
                Err(e)
            }
        }
    }

    /// Copies `data` into a new device-local buffer through a staging buffer.
    pub fn upload_via_staging<T: Pod>(
        &self,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> RenderResult<BufferAlloc> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let staging = self.staging_buffer(bytes)?;

        let result = self
            .create_buffer(
                staging.size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .and_then(|dst| {
                let region = vk::BufferCopy {
                    src_offset: 0,
                    dst_offset: 0,
                    size: staging.size,
                };
                let copied = self.one_time_submit(|device, cmd| unsafe {
                    device.cmd_copy_buffer(cmd, staging.buffer, dst.buffer, &[region]);
                });
                match copied {
                    Ok(()) => Ok(dst),
                    Err(e) => {
                        self.destroy_buffer(dst);
                        Err(e)
                    }
                }
            });

        self.destroy_buffer(staging);
        result
    }
}

/// One host-coherent uniform buffer per frame in flight, mapped for its
/// whole lifetime. A slot is only written after its frame's fence signalled.
pub struct UniformBuffers {
    slots: Vec<(BufferAlloc, *mut c_void)>,
}

impl UniformBuffers {
    pub fn empty() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn new(device: &VkDevice, count: usize, size: vk::DeviceSize) -> RenderResult<Self> {
        let mut this = Self::empty();
        for _ in 0..count {
            let slot = device
                .create_buffer(size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_COHERENT)
                .and_then(|buf| {
                    unsafe {
                        device
                            .device
                            .map_memory(buf.memory, 0, size, vk::MemoryMapFlags::empty())
                    }
                    .during("vkMapMemory")
                    .map(|ptr| (buf, ptr))
                    .inspect_err(|_| device.destroy_buffer(buf))
                });
            match slot {
                Ok(slot) => this.slots.push(slot),
                Err(e) => {
                    this.destroy(device);
                    return Err(e);
                }
            }
        }
        Ok(this)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn buffer(&self, index: usize) -> RenderResult<&BufferAlloc> {
        self.slots
            .get(index)
            .map(|(b, _)| b)
            .ok_or(RenderError::FrameIndexOutOfRange {
                index,
                len: self.slots.len(),
            })
    }

    pub fn write<T: Pod>(&self, index: usize, value: &T) -> RenderResult<()> {
        let (buf, ptr) = self
            .slots
            .get(index)
            .ok_or(RenderError::FrameIndexOutOfRange {
                index,
                len: self.slots.len(),
            })?;
        let bytes = bytemuck::bytes_of(value);
        if bytes.len() as vk::DeviceSize > buf.size {
            return Err(RenderError::InvalidUsage(format!(
                "{} bytes do not fit a {} byte uniform buffer",
                bytes.len(),
                buf.size
            )));
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len()) };
        Ok(())
    }

    pub fn destroy(&mut self, device: &VkDevice) {
        for (buf, _) in self.slots.drain(..) {
            unsafe { device.device.unmap_memory(buf.memory) };
            device.destroy_buffer(buf);
        }
    }
}
