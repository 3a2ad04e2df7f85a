// SPDX-License-Identifier: CEPL-1.0
//! In-memory device and window used by the frame-core tests.
//!
//! The device tracks which command buffers are still owned by the GPU and
//! records a violation whenever one is reset or re-recorded before its fence
//! has been waited on.
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use ash::vk::{self, Handle};

use crate::device::{
    AcquireOutcome, FenceStatus, FrameDevice, FrameSubmission, PresentOutcome, SurfaceSupport,
    SwapchainDesc, SwapchainDevice, WindowExtent,
};
use crate::error::{RenderError, RenderResult};
use crate::scheduler::{FrameContext, FrameRecorder};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Call {
    CreateSwapchain(vk::SwapchainKHR),
    DestroyFramebuffer(vk::Framebuffer),
    DestroyAttachments(u64),
    DestroyImageView(vk::ImageView),
    DestroySwapchain(vk::SwapchainKHR),
    WaitIdle,
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    Submit {
        submission: FrameSubmission,
        fence: vk::Fence,
    },
    Acquire {
        swapchain: vk::SwapchainKHR,
        semaphore: vk::Semaphore,
    },
    Present {
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    },
    Record {
        frame_index: usize,
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
    },
    Update {
        frame_index: usize,
        command_buffer: vk::CommandBuffer,
    },
}

impl Call {
    pub fn kind(&self) -> &'static str {
        match self {
            Call::CreateSwapchain(_) => "create_swapchain",
            Call::DestroyFramebuffer(_) => "destroy_framebuffer",
            Call::DestroyAttachments(_) => "destroy_attachments",
            Call::DestroyImageView(_) => "destroy_image_view",
            Call::DestroySwapchain(_) => "destroy_swapchain",
            Call::WaitIdle => "wait_idle",
            Call::WaitFence(_) => "wait_fence",
            Call::ResetFence(_) => "reset_fence",
            Call::ResetCommandBuffer(_) => "reset_command_buffer",
            Call::Submit { .. } => "submit",
            Call::Acquire { .. } => "acquire",
            Call::Present { .. } => "present",
            Call::Record { .. } => "record",
            Call::Update { .. } => "update",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Semaphore,
    Fence,
    CommandBuffer,
    Swapchain,
    ImageView,
    Attachments,
    Framebuffer,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted; signals on the next wait unless the GPU is hung.
    Pending,
}

#[derive(Debug)]
pub struct FakeAttachments {
    pub id: u64,
    pub extent: vk::Extent2D,
}

#[derive(Default)]
struct State {
    next_handle: u64,
    live: HashMap<u64, Kind>,
    fences: HashMap<vk::Fence, FenceState>,
    /// Command buffers the GPU still owns, with the fence that releases them.
    busy: HashMap<vk::CommandBuffer, vk::Fence>,
    last_fence: HashMap<vk::CommandBuffer, vk::Fence>,
    swapchain_images: HashMap<vk::SwapchainKHR, u32>,
    next_image: HashMap<vk::SwapchainKHR, u32>,
    log: Vec<Call>,
    violations: Vec<String>,

    support: Option<SurfaceSupport>,
    fence_budget: Option<usize>,
    framebuffer_budget: Option<usize>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    submit_failure: Option<vk::Result>,
    acquire_failure: Option<vk::Result>,
    hung: bool,
}

impl State {
    fn alloc(&mut self, kind: Kind) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        self.next_handle
    }

    fn free(&mut self, raw: u64, kind: Kind) {
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => self
                .violations
                .push(format!("destroyed {raw:#x} as {kind:?}, it is a {k:?}")),
            None => self
                .violations
                .push(format!("destroyed unknown or dead {kind:?} {raw:#x}")),
        }
    }

    fn check_idle(&mut self, cmd: vk::CommandBuffer, what: &str) {
        if self.busy.contains_key(&cmd) {
            self.violations
                .push(format!("{what} on {cmd:?} while the GPU still owns it"));
        }
    }
}

pub fn default_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
            ..Default::default()
        },
        formats: vec![vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }],
        present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE],
    }
}

#[derive(Default)]
pub struct FakeDevice {
    state: RefCell<State>,
}

impl FakeDevice {
    pub fn log(&self) -> Vec<Call> {
        self.state.borrow().log.clone()
    }

    pub fn clear_log(&self) {
        self.state.borrow_mut().log.clear();
    }

    /// Appends a call made on behalf of a recorder.
    pub fn note(&self, call: Call) {
        let mut st = self.state.borrow_mut();
        match call {
            Call::Record { command_buffer, .. } => st.check_idle(command_buffer, "record"),
            Call::Update { command_buffer, .. } => st.check_idle(command_buffer, "update"),
            _ => {}
        }
        st.log.push(call);
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live_objects(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_swapchains(&self) -> usize {
        self.state
            .borrow()
            .live
            .values()
            .filter(|k| **k == Kind::Swapchain)
            .count()
    }

    pub fn fence_is_signaled(&self, fence: vk::Fence) -> bool {
        self.state.borrow().fences.get(&fence) == Some(&FenceState::Signaled)
    }

    /// Fence of the most recent submission of `cmd`, or null.
    pub fn fence_for(&self, cmd: vk::CommandBuffer) -> vk::Fence {
        self.state
            .borrow()
            .last_fence
            .get(&cmd)
            .copied()
            .unwrap_or_else(vk::Fence::null)
    }

    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.borrow_mut().support = Some(support);
    }

    /// The first `n` fences succeed, the next one fails.
    pub fn fail_fence_creation_after(&self, n: usize) {
        self.state.borrow_mut().fence_budget = Some(n);
    }

    pub fn fail_framebuffer_creation_after(&self, n: usize) {
        self.state.borrow_mut().framebuffer_budget = Some(n);
    }

    pub fn script_acquire(&self, outcome: AcquireOutcome) {
        self.state.borrow_mut().acquire_script.push_back(outcome);
    }

    pub fn script_present(&self, outcome: PresentOutcome) {
        self.state.borrow_mut().present_script.push_back(outcome);
    }

    pub fn fail_next_submit(&self, result: vk::Result) {
        self.state.borrow_mut().submit_failure = Some(result);
    }

    pub fn fail_next_acquire(&self, result: vk::Result) {
        self.state.borrow_mut().acquire_failure = Some(result);
    }

    /// Submitted work never completes.
    pub fn hang_gpu(&self) {
        self.state.borrow_mut().hung = true;
    }
}

impl FrameDevice for FakeDevice {
    fn create_semaphore(&self) -> RenderResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(
            self.state.borrow_mut().alloc(Kind::Semaphore),
        ))
    }

    fn create_fence(&self, signaled: bool) -> RenderResult<vk::Fence> {
        let mut st = self.state.borrow_mut();
        if let Some(budget) = st.fence_budget.as_mut() {
            if *budget == 0 {
                return Err(RenderError::Resource {
                    op: "vkCreateFence",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            *budget -= 1;
        }
        let fence = vk::Fence::from_raw(st.alloc(Kind::Fence));
        let state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        st.fences.insert(fence, state);
        Ok(fence)
    }

    fn allocate_command_buffers(&self, count: u32) -> RenderResult<Vec<vk::CommandBuffer>> {
        let mut st = self.state.borrow_mut();
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(st.alloc(Kind::CommandBuffer)))
            .collect())
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state
            .borrow_mut()
            .free(semaphore.as_raw(), Kind::Semaphore);
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut st = self.state.borrow_mut();
        if st.fences.remove(&fence) == Some(FenceState::Pending) {
            st.violations.push(format!("destroyed pending {fence:?}"));
        }
        st.free(fence.as_raw(), Kind::Fence);
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        let mut st = self.state.borrow_mut();
        for &cmd in buffers {
            st.check_idle(cmd, "free");
            st.free(cmd.as_raw(), Kind::CommandBuffer);
        }
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout_ns: u64) -> RenderResult<FenceStatus> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::WaitFence(fence));
        match st.fences.get(&fence).copied() {
            Some(FenceState::Signaled) => Ok(FenceStatus::Signaled),
            Some(FenceState::Pending) if !st.hung => {
                st.fences.insert(fence, FenceState::Signaled);
                st.busy.retain(|_, f| *f != fence);
                Ok(FenceStatus::Signaled)
            }
            Some(_) => Ok(FenceStatus::TimedOut),
            None => Err(RenderError::InvalidUsage(format!("wait on unknown {fence:?}"))),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::ResetFence(fence));
        if st.fences.get(&fence) == Some(&FenceState::Pending) {
            st.violations.push(format!("reset of pending {fence:?}"));
        }
        st.fences.insert(fence, FenceState::Unsignaled);
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: vk::CommandBuffer) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::ResetCommandBuffer(buffer));
        st.check_idle(buffer, "reset");
        Ok(())
    }

    fn submit(&self, submission: &FrameSubmission) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        if let Some(result) = st.submit_failure.take() {
            return Err(RenderError::Resource {
                op: "vkQueueSubmit",
                result,
            });
        }
        let fence = submission.fence;
        st.log.push(Call::Submit {
            submission: *submission,
            fence,
        });
        if st.fences.get(&fence) != Some(&FenceState::Unsignaled) {
            st.violations
                .push(format!("submit with {fence:?} not in the unsignaled state"));
        }
        st.fences.insert(fence, FenceState::Pending);
        st.busy.insert(submission.command_buffer, fence);
        st.last_fence.insert(submission.command_buffer, fence);
        Ok(())
    }

    fn wait_idle(&self) -> RenderResult<()> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::WaitIdle);
        if !st.hung {
            for state in st.fences.values_mut() {
                if *state == FenceState::Pending {
                    *state = FenceState::Signaled;
                }
            }
            st.busy.clear();
        }
        Ok(())
    }
}

impl SwapchainDevice for FakeDevice {
    type Attachments = FakeAttachments;

    fn surface_support(&self) -> RenderResult<SurfaceSupport> {
        Ok(self
            .state
            .borrow()
            .support
            .clone()
            .unwrap_or_else(default_support))
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> RenderResult<vk::SwapchainKHR> {
        let mut st = self.state.borrow_mut();
        let chain = vk::SwapchainKHR::from_raw(st.alloc(Kind::Swapchain));
        st.swapchain_images.insert(chain, desc.image_count);
        st.next_image.insert(chain, 0);
        st.log.push(Call::CreateSwapchain(chain));
        Ok(chain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> RenderResult<Vec<vk::Image>> {
        let st = self.state.borrow();
        let count = st.swapchain_images.get(&swapchain).copied().unwrap_or(0);
        // Images belong to the chain and are not tracked as live objects.
        Ok((0..count)
            .map(|i| vk::Image::from_raw((swapchain.as_raw() << 8) | u64::from(i)))
            .collect())
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> RenderResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(
            self.state.borrow_mut().alloc(Kind::ImageView),
        ))
    }

    fn create_attachments(&self, desc: &SwapchainDesc) -> RenderResult<FakeAttachments> {
        Ok(FakeAttachments {
            id: self.state.borrow_mut().alloc(Kind::Attachments),
            extent: desc.extent,
        })
    }

    fn create_framebuffer(
        &self,
        _view: vk::ImageView,
        _attachments: &FakeAttachments,
        _extent: vk::Extent2D,
    ) -> RenderResult<vk::Framebuffer> {
        let mut st = self.state.borrow_mut();
        if let Some(budget) = st.framebuffer_budget.as_mut() {
            if *budget == 0 {
                return Err(RenderError::Resource {
                    op: "vkCreateFramebuffer",
                    result: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
                });
            }
            *budget -= 1;
        }
        Ok(vk::Framebuffer::from_raw(st.alloc(Kind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DestroyFramebuffer(framebuffer));
        st.free(framebuffer.as_raw(), Kind::Framebuffer);
    }

    fn destroy_attachments(&self, attachments: FakeAttachments) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DestroyAttachments(attachments.id));
        st.free(attachments.id, Kind::Attachments);
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DestroyImageView(view));
        st.free(view.as_raw(), Kind::ImageView);
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::DestroySwapchain(swapchain));
        st.swapchain_images.remove(&swapchain);
        st.next_image.remove(&swapchain);
        st.free(swapchain.as_raw(), Kind::Swapchain);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout_ns: u64,
        signal: vk::Semaphore,
    ) -> RenderResult<AcquireOutcome> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::Acquire {
            swapchain,
            semaphore: signal,
        });
        if let Some(result) = st.acquire_failure.take() {
            return Err(RenderError::Resource {
                op: "vkAcquireNextImageKHR",
                result,
            });
        }
        if let Some(outcome) = st.acquire_script.pop_front() {
            return Ok(outcome);
        }
        let count = st.swapchain_images.get(&swapchain).copied().unwrap_or(0);
        if count == 0 {
            return Err(RenderError::InvalidUsage(format!(
                "acquire on dead {swapchain:?}"
            )));
        }
        let next = st.next_image.entry(swapchain).or_insert(0);
        let image_index = *next;
        *next = (*next + 1) % count;
        Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        })
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> RenderResult<PresentOutcome> {
        let mut st = self.state.borrow_mut();
        st.log.push(Call::Present {
            swapchain,
            image_index,
            wait,
        });
        Ok(st
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Presented))
    }
}

/// A window whose size can be scripted, including a minimised phase.
pub struct FakeWindow {
    size: Cell<vk::Extent2D>,
    restored: Cell<vk::Extent2D>,
    zero_polls: Cell<u32>,
    waits: Cell<u32>,
}

impl FakeWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Cell::new(vk::Extent2D { width, height }),
            restored: Cell::new(vk::Extent2D { width, height }),
            zero_polls: Cell::new(0),
            waits: Cell::new(0),
        }
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.size.set(vk::Extent2D { width, height });
    }

    /// Reports 0x0 until `waits` event waits have passed, then `width`x`height`.
    pub fn minimize_for(&self, waits: u32, width: u32, height: u32) {
        self.zero_polls.set(waits);
        self.restored.set(vk::Extent2D { width, height });
    }

    pub fn waits(&self) -> u32 {
        self.waits.get()
    }
}

impl WindowExtent for FakeWindow {
    fn framebuffer_size(&self) -> vk::Extent2D {
        if self.zero_polls.get() > 0 {
            vk::Extent2D::default()
        } else {
            self.size.get()
        }
    }

    fn wait_events(&self) {
        self.waits.set(self.waits.get() + 1);
        let left = self.zero_polls.get().saturating_sub(1);
        self.zero_polls.set(left);
        if left == 0 {
            self.size.set(self.restored.get());
        }
    }
}

/// Notes every record/update on the device and remembers what it saw.
#[derive(Default)]
pub struct ScriptedRecorder {
    fail: bool,
    recorded: Vec<usize>,
    updated: Vec<usize>,
    framebuffers: Vec<vk::Framebuffer>,
    generations: Vec<u64>,
}

impl ScriptedRecorder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn recorded_frames(&self) -> Vec<usize> {
        self.recorded.clone()
    }

    pub fn updated_frames(&self) -> Vec<usize> {
        self.updated.clone()
    }

    pub fn last_framebuffer(&self) -> Option<vk::Framebuffer> {
        self.framebuffers.last().copied()
    }

    pub fn generations(&self) -> Vec<u64> {
        self.generations.clone()
    }
}

impl FrameRecorder<FakeDevice> for ScriptedRecorder {
    fn record(&mut self, device: &FakeDevice, frame: &FrameContext) -> RenderResult<()> {
        if self.fail {
            return Err(RenderError::InvalidUsage("recorder told to fail".into()));
        }
        device.note(Call::Record {
            frame_index: frame.frame_index,
            command_buffer: frame.command_buffer,
            framebuffer: frame.framebuffer,
        });
        self.recorded.push(frame.frame_index);
        self.framebuffers.push(frame.framebuffer);
        self.generations.push(frame.swapchain_generation);
        Ok(())
    }

    fn update(&mut self, device: &FakeDevice, frame: &FrameContext) -> RenderResult<()> {
        device.note(Call::Update {
            frame_index: frame.frame_index,
            command_buffer: frame.command_buffer,
        });
        self.updated.push(frame.frame_index);
        Ok(())
    }
}
