// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::time::{Duration, Instant};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .try_init();
}

/// Counts presented frames and reports a rate once per sampling window.
#[derive(Debug)]
pub struct FpsCounter {
    window: Duration,
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self::starting_at(window, Instant::now())
    }

    pub fn starting_at(window: Duration, now: Instant) -> Self {
        Self {
            window,
            frames: 0,
            since: now,
        }
    }

    pub fn frame(&mut self) {
        self.frames = self.frames.saturating_add(1);
    }

    /// Drop the frames counted so far, e.g. while the window is minimised.
    pub fn reset(&mut self, now: Instant) {
        self.frames = 0;
        self.since = now;
    }

    /// Returns the frame rate once the window has elapsed, then starts a new window.
    pub fn sample(&mut self, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.since);
        if elapsed < self.window {
            return None;
        }
        let fps = f64::from(self.frames) / elapsed.as_secs_f64();
        tracing::debug!("fps ~ {:.1} over {} frames", fps, self.frames);
        self.reset(now);
        Some(fps)
    }
}
