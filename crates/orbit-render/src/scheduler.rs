// SPDX-License-Identifier: CEPL-1.0
//! Per-frame wait → acquire → record → submit → present cycle.
//!
//! ```text
//! Idle ─▶ Acquiring ─▶ Recording ─▶ Submitting ─▶ Presenting ─▶ Idle
//!              │                                        │
//!              └─ out of date: rebuild, skip frame       └─ stale / resized: rebuild
//! ```
//!
//! The CPU only blocks on the current slot's in-flight fence. Once it is
//! signaled the GPU is done with that slot's command buffer and host-mapped
//! data, so both may be rewritten.
use ash::vk;
use tracing::{debug, trace};

use crate::device::{
    AcquireOutcome, FenceStatus, FrameDevice, FrameSubmission, PresentOutcome, SwapchainDevice,
    WindowExtent,
};
use crate::error::{RenderError, RenderResult};
use crate::frames::{FrameResourceSet, MAX_FRAMES_IN_FLIGHT};
use crate::recreate::{Invalidation, RecreationTrigger};
use crate::resize::ResizeSignal;
use crate::swapchain::{SwapchainConfig, SwapchainManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
}

/// How a `render_frame` call ended. Staleness is never an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, then the swapchain was rebuilt.
    Rebuilt,
    /// Acquire found the chain out of date; it was rebuilt and nothing was drawn.
    Skipped,
}

/// What a recorder gets to work with for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameContext {
    pub frame_index: usize,
    pub image_index: u32,
    pub command_buffer: vk::CommandBuffer,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub swapchain_generation: u64,
}

/// Fills a frame's command buffer and per-frame data.
pub trait FrameRecorder<D: ?Sized> {
    /// Records draw commands into `frame.command_buffer` (already reset).
    fn record(&mut self, device: &D, frame: &FrameContext) -> RenderResult<()>;

    /// Writes per-frame shader inputs owned by `frame.frame_index`.
    fn update(&mut self, _device: &D, _frame: &FrameContext) -> RenderResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub frames_in_flight: usize,
    pub fence_timeout_ns: u64,
    pub acquire_timeout_ns: u64,
    pub swapchain: SwapchainConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: MAX_FRAMES_IN_FLIGHT,
            fence_timeout_ns: u64::MAX,
            acquire_timeout_ns: u64::MAX,
            swapchain: SwapchainConfig::default(),
        }
    }
}

pub struct FrameScheduler<D, W>
where
    D: FrameDevice + SwapchainDevice,
{
    device: D,
    window: W,
    frames: Option<FrameResourceSet>,
    swapchain: SwapchainManager<D::Attachments>,
    trigger: RecreationTrigger,
    resize: ResizeSignal,
    config: SchedulerConfig,
    current_frame: usize,
    state: FrameState,
    presented: u64,
}

impl<D, W> FrameScheduler<D, W>
where
    D: FrameDevice + SwapchainDevice,
    W: WindowExtent,
{
    /// Creates the frame slots and the first swapchain generation.
    pub fn initialize(device: D, window: W, config: SchedulerConfig) -> RenderResult<Self> {
        let frames = FrameResourceSet::new(&device, config.frames_in_flight)?;
        let swapchain = match SwapchainManager::create(config.swapchain, &device, &window) {
            Ok(sc) => sc,
            Err(e) => {
                frames.destroy(&device)?;
                return Err(e);
            }
        };

        debug!(
            "frame scheduler ready: {} frames in flight, {} swapchain images",
            frames.len(),
            swapchain.image_count()
        );

        Ok(Self {
            device,
            window,
            frames: Some(frames),
            swapchain,
            trigger: RecreationTrigger::new(),
            resize: ResizeSignal::new(),
            config,
            current_frame: 0,
            state: FrameState::Idle,
            presented: 0,
        })
    }

    /// Hook for the windowing side; setting it forces a rebuild at the next present.
    pub fn resize_signal(&self) -> ResizeSignal {
        self.resize.clone()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn window(&self) -> &W {
        &self.window
    }

    pub fn swapchain(&self) -> &SwapchainManager<D::Attachments> {
        &self.swapchain
    }

    pub fn frame_index(&self) -> usize {
        self.current_frame
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn frames_presented(&self) -> u64 {
        self.presented
    }

    pub fn rebuilds(&self) -> u64 {
        self.trigger.rebuilds()
    }

    /// Drives one full frame. Must not be called re-entrantly or after `shutdown`.
    pub fn render_frame<R>(&mut self, recorder: &mut R) -> RenderResult<FrameStatus>
    where
        R: FrameRecorder<D> + ?Sized,
    {
        let result = self.drive(recorder);
        self.state = FrameState::Idle;
        result
    }

    fn drive<R>(&mut self, recorder: &mut R) -> RenderResult<FrameStatus>
    where
        R: FrameRecorder<D> + ?Sized,
    {
        let frame_index = self.current_frame;
        let slot = *self
            .frames
            .as_ref()
            .ok_or_else(|| RenderError::InvalidUsage("render_frame after shutdown".into()))?
            .slot(frame_index)?;

        // 1) Wait until the GPU is done with this slot's previous use.
        self.enter(FrameState::Acquiring);
        match self
            .device
            .wait_for_fence(slot.in_flight, self.config.fence_timeout_ns)?
        {
            FenceStatus::Signaled => {}
            FenceStatus::TimedOut => {
                return Err(RenderError::FenceTimeout {
                    frame: frame_index,
                    timeout_ns: self.config.fence_timeout_ns,
                })
            }
        }

        // 2) Acquire. The fence stays signaled if we bail out here.
        let chain = self.swapchain.current()?.handle();
        let image_index = match self.device.acquire_next_image(
            chain,
            self.config.acquire_timeout_ns,
            slot.image_available,
        )? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => {
                if suboptimal {
                    trace!("acquired suboptimal image {}", image_index);
                }
                image_index
            }
            AcquireOutcome::OutOfDate => {
                self.rebuild(Invalidation::OUT_OF_DATE)?;
                return Ok(FrameStatus::Skipped);
            }
        };

        // 3) Record.
        self.enter(FrameState::Recording);
        self.device.reset_fence(slot.in_flight)?;
        self.device.reset_command_buffer(slot.command_buffer)?;

        let state = self.swapchain.current()?;
        let ctx = FrameContext {
            frame_index,
            image_index,
            command_buffer: slot.command_buffer,
            framebuffer: state.framebuffer(image_index)?,
            extent: state.extent(),
            swapchain_generation: state.generation(),
        };
        recorder.record(&self.device, &ctx)?;

        // 4) Per-frame data for this slot only.
        recorder.update(&self.device, &ctx)?;

        // 5) Submit.
        self.enter(FrameState::Submitting);
        self.device.submit(&FrameSubmission {
            command_buffer: slot.command_buffer,
            wait: slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal: slot.render_finished,
            fence: slot.in_flight,
        })?;

        // 6) Present.
        self.enter(FrameState::Presenting);
        let mut cause = match self
            .device
            .present(chain, image_index, slot.render_finished)?
        {
            PresentOutcome::Presented => Invalidation::empty(),
            PresentOutcome::Suboptimal => Invalidation::SUBOPTIMAL,
            PresentOutcome::OutOfDate => Invalidation::OUT_OF_DATE,
        };
        if self.resize.take() {
            cause |= Invalidation::RESIZED;
        }

        let status = if cause.is_empty() {
            FrameStatus::Presented
        } else {
            self.rebuild(cause)?;
            FrameStatus::Rebuilt
        };

        // 7) Next slot.
        self.current_frame = (self.current_frame + 1) % self.config.frames_in_flight;
        self.presented += 1;
        Ok(status)
    }

    fn enter(&mut self, next: FrameState) {
        trace!("frame {}: {:?} → {:?}", self.current_frame, self.state, next);
        self.state = next;
    }

    fn rebuild(&mut self, cause: Invalidation) -> RenderResult<()> {
        self.trigger
            .handle_invalidation(&self.device, &mut self.swapchain, &self.window, cause)
    }

    /// Waits for the GPU, then releases the swapchain and frame slots.
    /// The device stays available for the caller's own teardown.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        let Some(frames) = self.frames.take() else {
            return Ok(());
        };
        self.device.wait_idle()?;
        self.swapchain.destroy(&self.device);
        frames.destroy(&self.device)?;
        debug!("frame scheduler shut down after {} frames", self.presented);
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.frames.is_none()
    }

    /// Hands back the device and window. Call `shutdown` first.
    pub fn into_parts(self) -> (D, W) {
        (self.device, self.window)
    }
}
