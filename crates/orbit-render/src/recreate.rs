// SPDX-License-Identifier: CEPL-1.0
//! Stale-swapchain recovery shared by acquire, present and resize events.
use bitflags::bitflags;
use tracing::{info, warn};

use crate::device::{FrameDevice, SwapchainDevice, WindowExtent};
use crate::error::RenderResult;
use crate::swapchain::SwapchainManager;

bitflags! {
    /// Why the chain is being rebuilt.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Invalidation: u8 {
        const OUT_OF_DATE = 1 << 0;
        const SUBOPTIMAL = 1 << 1;
        const RESIZED = 1 << 2;
    }
}

#[derive(Debug, Default)]
pub struct RecreationTrigger {
    rebuilds: u64,
    last_cause: Invalidation,
}

impl RecreationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device idle → destroy → wait for a nonzero window → build.
    ///
    /// Calling this twice in a row just rebuilds the same chain again.
    pub fn handle_invalidation<D, W>(
        &mut self,
        device: &D,
        swapchain: &mut SwapchainManager<D::Attachments>,
        window: &W,
        cause: Invalidation,
    ) -> RenderResult<()>
    where
        D: FrameDevice + SwapchainDevice + ?Sized,
        W: WindowExtent + ?Sized,
    {
        warn!("swapchain invalidated ({:?}), rebuilding", cause);

        let size = swapchain.recreate(device, window)?;

        self.rebuilds += 1;
        self.last_cause = cause;
        info!(
            "swapchain rebuilt for {}x{} window (rebuild #{})",
            size.width, size.height, self.rebuilds
        );
        Ok(())
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn last_cause(&self) -> Invalidation {
        self.last_cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Call, FakeDevice, FakeWindow};
    use crate::swapchain::SwapchainConfig;

    fn setup() -> (FakeDevice, FakeWindow, SwapchainManager<crate::fake::FakeAttachments>) {
        let dev = FakeDevice::default();
        let window = FakeWindow::new(800, 600);
        let sc = SwapchainManager::create(SwapchainConfig::default(), &dev, &window).unwrap();
        (dev, window, sc)
    }

    #[test]
    fn rebuild_is_idempotent() {
        let (dev, window, mut sc) = setup();
        let mut trigger = RecreationTrigger::new();

        trigger
            .handle_invalidation(&dev, &mut sc, &window, Invalidation::OUT_OF_DATE)
            .unwrap();
        let once = *sc.current().unwrap().desc();
        let once_images = sc.image_count();

        trigger
            .handle_invalidation(&dev, &mut sc, &window, Invalidation::OUT_OF_DATE)
            .unwrap();
        let twice = *sc.current().unwrap().desc();

        assert_eq!(once, twice);
        assert_eq!(once_images, sc.image_count());
        assert_eq!(trigger.rebuilds(), 2);
        assert_eq!(sc.generation(), 3);
    }

    #[test]
    fn waits_idle_before_destroying() {
        let (dev, window, mut sc) = setup();
        dev.clear_log();
        RecreationTrigger::new()
            .handle_invalidation(&dev, &mut sc, &window, Invalidation::RESIZED)
            .unwrap();

        let kinds: Vec<&str> = dev.log().iter().map(Call::kind).collect();
        let idle = kinds.iter().position(|k| *k == "wait_idle").unwrap();
        let destroy = kinds.iter().position(|k| k.starts_with("destroy_")).unwrap();
        let create = kinds.iter().position(|k| *k == "create_swapchain").unwrap();
        assert!(idle < destroy);
        assert!(destroy < create);
    }

    #[test]
    fn polls_minimised_window_until_drawable() {
        let (dev, window, mut sc) = setup();
        window.minimize_for(2, 640, 480);
        dev.clear_log();

        RecreationTrigger::new()
            .handle_invalidation(&dev, &mut sc, &window, Invalidation::RESIZED)
            .unwrap();

        assert_eq!(window.waits(), 2);
        assert_eq!(sc.extent().unwrap().width, 640);
        assert_eq!(dev.live_swapchains(), 1);
    }

    #[test]
    fn remembers_cause() {
        let (dev, window, mut sc) = setup();
        let mut trigger = RecreationTrigger::new();
        trigger
            .handle_invalidation(
                &dev,
                &mut sc,
                &window,
                Invalidation::SUBOPTIMAL | Invalidation::RESIZED,
            )
            .unwrap();
        assert!(trigger.last_cause().contains(Invalidation::RESIZED));
        assert!(!trigger.last_cause().contains(Invalidation::OUT_OF_DATE));
    }
}
