// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Resize-pending flag shared between the window event handler and the
/// frame scheduler.
///
/// In this application both sides run on the event-loop thread, but the flag
/// is atomic so a windowing system that delivers resize callbacks on another
/// thread can hold a clone as well.
#[derive(Clone, Debug, Default)]
pub struct ResizeSignal(Arc<AtomicBool>);

impl ResizeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_pending(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Returns whether a resize was pending and clears the flag.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}
