// SPDX-License-Identifier: CEPL-1.0
//! The presentable image chain and the per-image resources sized to it.
//!
//! A [`SwapchainState`] is one *generation*: its images are fixed for its
//! lifetime and it is replaced as a whole on recreation. Teardown always runs
//! framebuffers → attachments → views → chain, the reverse of creation.
use ash::vk;
use tracing::{debug, info};

use crate::device::{FrameDevice, SurfaceSupport, SwapchainDesc, SwapchainDevice, WindowExtent};
use crate::error::{RenderError, RenderResult};

/// `current_extent` value meaning "the window decides".
pub const UNDEFINED_EXTENT: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainConfig {
    pub preferred_format: vk::SurfaceFormatKHR,
    pub preferred_present_mode: vk::PresentModeKHR,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            preferred_format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred_present_mode: vk::PresentModeKHR::MAILBOX,
        }
    }
}

/// Exact (format, colour space) match, otherwise the surface's first format.
pub fn choose_surface_format(
    formats: &[vk::SurfaceFormatKHR],
    preferred: vk::SurfaceFormatKHR,
) -> RenderResult<vk::SurfaceFormatKHR> {
    let first = formats.first().ok_or(RenderError::NoSurfaceFormats)?;
    Ok(formats
        .iter()
        .copied()
        .find(|f| *f == preferred)
        .unwrap_or(*first))
}

/// The preferred mode if offered, otherwise FIFO (always available).
pub fn choose_present_mode(
    modes: &[vk::PresentModeKHR],
    preferred: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if modes.contains(&preferred) {
        preferred
    } else {
        vk::PresentModeKHR::FIFO
    }
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != UNDEFINED_EXTENT {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: window
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: window
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 == no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = caps.min_image_count + 1;
    if caps.max_image_count == 0 {
        wanted
    } else {
        wanted.min(caps.max_image_count)
    }
}

/// Resolves everything needed to create a chain from what the surface offers.
pub fn describe(
    support: &SurfaceSupport,
    config: &SwapchainConfig,
    window: vk::Extent2D,
) -> RenderResult<SwapchainDesc> {
    let caps = &support.capabilities;
    Ok(SwapchainDesc {
        format: choose_surface_format(&support.formats, config.preferred_format)?,
        present_mode: choose_present_mode(&support.present_modes, config.preferred_present_mode),
        extent: choose_extent(caps, window),
        image_count: choose_image_count(caps),
        pre_transform: caps.current_transform,
    })
}

#[derive(Debug)]
pub struct SwapchainState<A> {
    handle: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    desc: SwapchainDesc,
    views: Vec<vk::ImageView>,
    attachments: A,
    framebuffers: Vec<vk::Framebuffer>,
    generation: u64,
}

impl<A> SwapchainState<A> {
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> RenderResult<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                RenderError::InvalidUsage(format!(
                    "image index {image_index} out of range for {} swapchain images",
                    self.framebuffers.len()
                ))
            })
    }

    pub fn attachments(&self) -> &A {
        &self.attachments
    }

    pub fn desc(&self) -> &SwapchainDesc {
        &self.desc
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.desc.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.desc.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn build<D>(device: &D, desc: SwapchainDesc, generation: u64) -> RenderResult<Self>
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
    {
        let handle = device.create_swapchain(&desc)?;
        let mut partial = Partial {
            handle,
            views: Vec::new(),
            attachments: None,
            framebuffers: Vec::new(),
        };

        let images = match device.swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => return Err(partial.release(device, e)),
        };

        for &image in &images {
            match device.create_image_view(image, desc.format.format) {
                Ok(view) => partial.views.push(view),
                Err(e) => return Err(partial.release(device, e)),
            }
        }

        let attachments = match device.create_attachments(&desc) {
            Ok(a) => a,
            Err(e) => return Err(partial.release(device, e)),
        };

        let mut framebuffers = Vec::with_capacity(partial.views.len());
        for i in 0..partial.views.len() {
            match device.create_framebuffer(partial.views[i], &attachments, desc.extent) {
                Ok(fb) => framebuffers.push(fb),
                Err(e) => {
                    partial.attachments = Some(attachments);
                    partial.framebuffers = framebuffers;
                    return Err(partial.release(device, e));
                }
            }
        }

        let Partial { handle, views, .. } = partial;

        Ok(Self {
            handle,
            images,
            desc,
            views,
            attachments,
            framebuffers,
            generation,
        })
    }

    fn destroy<D>(self, device: &D)
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
    {
        for fb in self.framebuffers {
            device.destroy_framebuffer(fb);
        }
        device.destroy_attachments(self.attachments);
        for view in self.views {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.handle);
    }
}

/// Objects of a generation whose creation has not finished yet.
struct Partial<A> {
    handle: vk::SwapchainKHR,
    views: Vec<vk::ImageView>,
    attachments: Option<A>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl<A> Partial<A> {
    fn release<D>(self, device: &D, cause: RenderError) -> RenderError
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
    {
        for fb in self.framebuffers {
            device.destroy_framebuffer(fb);
        }
        if let Some(a) = self.attachments {
            device.destroy_attachments(a);
        }
        for view in self.views {
            device.destroy_image_view(view);
        }
        device.destroy_swapchain(self.handle);
        cause
    }
}

#[derive(Debug)]
pub struct SwapchainManager<A> {
    config: SwapchainConfig,
    current: Option<SwapchainState<A>>,
    generations: u64,
}

impl<A> SwapchainManager<A> {
    /// Queries the surface and builds the first generation.
    pub fn create<D, W>(config: SwapchainConfig, device: &D, window: &W) -> RenderResult<Self>
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
        W: WindowExtent + ?Sized,
    {
        let mut manager = Self {
            config,
            current: None,
            generations: 0,
        };
        manager.build(device, window)?;
        Ok(manager)
    }

    pub fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    /// Builds a new generation. Any existing one must have been destroyed.
    pub fn build<D, W>(&mut self, device: &D, window: &W) -> RenderResult<()>
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
        W: WindowExtent + ?Sized,
    {
        if self.current.is_some() {
            return Err(RenderError::InvalidUsage(
                "swapchain built while the previous generation is alive".into(),
            ));
        }

        let support = device.surface_support()?;
        let desc = describe(&support, &self.config, window.framebuffer_size())?;
        let generation = self.generations + 1;
        let state = SwapchainState::build(device, desc, generation)?;
        self.generations = generation;

        info!(
            "swapchain #{}: format {:?} / {:?}, present_mode {:?}, extent {}x{}, images(min={} → picked={} → got={})",
            generation,
            desc.format.format,
            desc.format.color_space,
            desc.present_mode,
            desc.extent.width,
            desc.extent.height,
            support.capabilities.min_image_count,
            desc.image_count,
            state.image_count(),
        );

        self.current = Some(state);
        Ok(())
    }

    /// Releases the current generation, if any. Callers make sure the GPU no
    /// longer references it.
    pub fn destroy<D>(&mut self, device: &D)
    where
        D: SwapchainDevice<Attachments = A> + ?Sized,
    {
        if let Some(state) = self.current.take() {
            debug!("destroying swapchain #{}", state.generation());
            state.destroy(device);
        }
    }

    /// Device idle, destroy, wait for a drawable window, build. Returns the
    /// window size the new generation was built against.
    pub fn recreate<D, W>(&mut self, device: &D, window: &W) -> RenderResult<vk::Extent2D>
    where
        D: FrameDevice + SwapchainDevice<Attachments = A> + ?Sized,
        W: WindowExtent + ?Sized,
    {
        device.wait_idle()?;
        self.destroy(device);
        let size = wait_for_drawable(window);
        self.build(device, window)?;
        Ok(size)
    }

    pub fn state(&self) -> Option<&SwapchainState<A>> {
        self.current.as_ref()
    }

    pub fn current(&self) -> RenderResult<&SwapchainState<A>> {
        self.current
            .as_ref()
            .ok_or_else(|| RenderError::InvalidUsage("no live swapchain".into()))
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.current.as_ref().map(SwapchainState::extent)
    }

    pub fn format(&self) -> Option<vk::SurfaceFormatKHR> {
        self.current.as_ref().map(SwapchainState::format)
    }

    pub fn present_mode(&self) -> Option<vk::PresentModeKHR> {
        self.current.as_ref().map(SwapchainState::present_mode)
    }

    pub fn image_count(&self) -> usize {
        self.current.as_ref().map_or(0, SwapchainState::image_count)
    }

    /// Number of generations built so far.
    pub fn generation(&self) -> u64 {
        self.generations
    }
}

/// Blocks, letting window events through, until the window has nonzero area.
pub fn wait_for_drawable<W: WindowExtent + ?Sized>(window: &W) -> vk::Extent2D {
    let mut size = window.framebuffer_size();
    let mut logged = false;
    while size.width == 0 || size.height == 0 {
        if !logged {
            debug!("window is {}x{}, waiting for a drawable size", size.width, size.height);
            logged = true;
        }
        window.wait_events();
        size = window.framebuffer_size();
    }
    size
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeDevice, FakeWindow};

    fn caps(min: (u32, u32), max: (u32, u32), current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            ..Default::default()
        }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn extent_is_clamped_to_surface_bounds() {
        let c = caps((1, 1), (4096, 4096), (UNDEFINED_EXTENT, UNDEFINED_EXTENT));
        assert_eq!(choose_extent(&c, extent(10000, 10000)), extent(4096, 4096));
        assert_eq!(choose_extent(&c, extent(0, 0)), extent(1, 1));
        assert_eq!(choose_extent(&c, extent(800, 600)), extent(800, 600));
        assert_eq!(choose_extent(&c, extent(0, 5000)), extent(1, 4096));
    }

    #[test]
    fn defined_current_extent_wins_over_window() {
        let c = caps((1, 1), (4096, 4096), (1024, 768));
        assert_eq!(choose_extent(&c, extent(800, 600)), extent(1024, 768));
    }

    #[test]
    fn format_falls_back_to_first_entry() {
        let preferred = SwapchainConfig::default().preferred_format;
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
            },
        ];
        assert_eq!(choose_surface_format(&formats, preferred).unwrap(), formats[0]);
    }

    #[test]
    fn format_prefers_exact_pair() {
        let preferred = SwapchainConfig::default().preferred_format;
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            preferred,
        ];
        assert_eq!(choose_surface_format(&formats, preferred).unwrap(), preferred);
    }

    #[test]
    fn no_formats_is_an_error() {
        let err = choose_surface_format(&[], SwapchainConfig::default().preferred_format);
        assert!(matches!(err, Err(RenderError::NoSurfaceFormats)));
    }

    #[test]
    fn present_mode_falls_back_to_fifo() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::FIFO
        );
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(
            choose_present_mode(&modes, vk::PresentModeKHR::MAILBOX),
            vk::PresentModeKHR::MAILBOX
        );
    }

    #[test]
    fn image_count_is_min_plus_one_within_max() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        c.min_image_count = 2;
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c), 2);
        c.max_image_count = 8;
        assert_eq!(choose_image_count(&c), 3);
    }

    #[test]
    fn create_builds_one_view_and_framebuffer_per_image() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();

        let state = sc.current().unwrap();
        assert_eq!(state.image_count(), 3);
        assert_eq!(state.views().len(), state.images().len());
        assert_eq!(state.framebuffers().len(), state.images().len());
        assert_eq!(state.extent(), extent(800, 600));
        assert_eq!(state.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(sc.generation(), 1);
    }

    #[test]
    fn destroy_runs_in_reverse_dependency_order() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let mut sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();
        dev.clear_log();
        sc.destroy(&dev);

        let kinds: Vec<&str> = dev.log().iter().map(Call::kind).collect();
        let last_fb = kinds.iter().rposition(|k| *k == "destroy_framebuffer").unwrap();
        let att = kinds.iter().position(|k| *k == "destroy_attachments").unwrap();
        let first_view = kinds.iter().position(|k| *k == "destroy_image_view").unwrap();
        let last_view = kinds.iter().rposition(|k| *k == "destroy_image_view").unwrap();
        let chain = kinds.iter().position(|k| *k == "destroy_swapchain").unwrap();
        assert!(last_fb < att);
        assert!(att < first_view);
        assert!(last_view < chain);
        assert!(sc.state().is_none());
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn framebuffer_failure_releases_the_partial_generation() {
        let dev = FakeDevice::default();
        dev.fail_framebuffer_creation_after(1);
        let window = FakeWindow::new(800, 600);
        let err = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap_err();
        assert!(matches!(
            err,
            RenderError::Resource {
                op: "vkCreateFramebuffer",
                ..
            }
        ));
        assert_eq!(dev.live_objects(), 0);
    }

    #[test]
    fn build_refuses_to_leak_a_live_generation() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let mut sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();
        assert!(sc.build(&dev, &window).unwrap_err().is_invalid_usage());
    }

    #[test]
    fn recreate_waits_for_nonzero_window() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let mut sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();

        window.minimize_for(3, 1024, 768);
        let size = sc.recreate(&dev, &window).unwrap();

        assert_eq!(size, extent(1024, 768));
        assert_eq!(window.waits(), 3);
        assert_eq!(sc.extent(), Some(extent(1024, 768)));
        assert_eq!(sc.generation(), 2);
    }

    #[test]
    fn recreate_releases_old_chain_before_polling_window() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let mut sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();
        dev.clear_log();

        window.minimize_for(1, 800, 600);
        sc.recreate(&dev, &window).unwrap();

        let kinds: Vec<&str> = dev.log().iter().map(Call::kind).collect();
        let idle = kinds.iter().position(|k| *k == "wait_idle").unwrap();
        let destroy = kinds.iter().position(|k| *k == "destroy_swapchain").unwrap();
        let create = kinds.iter().position(|k| *k == "create_swapchain").unwrap();
        assert!(idle < destroy && destroy < create);
        assert_eq!(dev.live_swapchains(), 1);
    }

    #[test]
    fn framebuffer_lookup_is_checked() {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();
        let state = sc.current().unwrap();
        assert!(state.framebuffer(2).is_ok());
        assert!(state.framebuffer(3).unwrap_err().is_invalid_usage());
    }
}
