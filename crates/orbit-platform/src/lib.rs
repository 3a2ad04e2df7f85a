// SPDX-License-Identifier: CEPL-1.0
//! Windowing glue: re-exports winit and exposes a window's drawable size to
//! the render core.
use std::cell::Cell;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ash::vk;
use orbit_render::WindowExtent;
use tracing::{debug, warn};
use winit::dpi::PhysicalSize;
use winit::window::Window;

pub use winit;

/// How long `wait_events` yields while the window has no drawable area.
pub const IDLE_POLL: Duration = Duration::from_millis(16);

/// Idle polls between two "still waiting" warnings, about five seconds.
pub const WARN_EVERY: u32 = 300;

pub fn extent_of(size: PhysicalSize<u32>) -> vk::Extent2D {
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

/// A minimised window reports 0x0 on most platforms.
pub fn is_drawable(size: PhysicalSize<u32>) -> bool {
    size.width > 0 && size.height > 0
}

/// Counts consecutive idle polls so a window stuck at zero area gets noticed.
#[derive(Clone, Debug, Default)]
pub struct IdleWait {
    polls: Cell<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleNote {
    Started,
    StillWaiting(u32),
    Quiet,
}

impl IdleWait {
    pub fn tick(&self) -> IdleNote {
        let n = self.polls.get().saturating_add(1);
        self.polls.set(n);
        match n {
            1 => IdleNote::Started,
            n if n % WARN_EVERY == 0 => IdleNote::StillWaiting(n),
            _ => IdleNote::Quiet,
        }
    }

    pub fn reset(&self) {
        self.polls.set(0);
    }

    pub fn polls(&self) -> u32 {
        self.polls.get()
    }
}

/// Shares the window with the event loop; the size is re-queried on every call.
#[derive(Clone)]
pub struct WinitExtent {
    window: Arc<Window>,
    idle: IdleWait,
}

impl WinitExtent {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            idle: IdleWait::default(),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl WindowExtent for WinitExtent {
    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        if is_drawable(size) && self.idle.polls() > 0 {
            debug!(
                "window drawable again after {} idle polls",
                self.idle.polls()
            );
            self.idle.reset();
        }
        extent_of(size)
    }

    // winit 0.30 cannot pump its loop from inside a handler, so this only
    // yields. The wait ends when the OS updates the size `inner_size` reads;
    // a backend that caches it until the next event keeps it going.
    fn wait_events(&self) {
        match self.idle.tick() {
            IdleNote::Started => debug!("window has no drawable area, polling every {IDLE_POLL:?}"),
            IdleNote::StillWaiting(n) => warn!(
                "window still has no drawable area after {n} polls; \
                 the platform may not report a new size until events are pumped"
            ),
            IdleNote::Quiet => {}
        }
        thread::sleep(IDLE_POLL);
    }
}
