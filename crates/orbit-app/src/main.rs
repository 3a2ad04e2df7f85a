// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use orbit_core::{init_tracing, FpsCounter};
use orbit_platform::winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};
use orbit_platform::{is_drawable, WinitExtent};
use orbit_render::{FrameStatus, Renderer, ResizeSignal};
use orbit_render_vk::VkRenderer;
use tracing::{debug, error, info};

mod config;

use config::{AppCfg, VsyncMode};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file; missing means defaults
    #[arg(long, default_value = "orbit.toml")]
    config: PathBuf,
    /// Override [render].vsync_mode
    #[arg(long, value_enum)]
    vsync_mode: Option<VsyncMode>,
    /// Force the validation layer on
    #[arg(long)]
    validation: bool,
}

struct App {
    cfg: AppCfg,
    window: Option<Arc<Window>>,
    renderer: Option<VkRenderer>,
    resize: Option<ResizeSignal>,
    paused: bool,
    fps: FpsCounter,
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(cfg: AppCfg) -> Self {
        Self {
            cfg,
            window: None,
            renderer: None,
            resize: None,
            paused: false,
            fps: FpsCounter::new(Duration::from_secs(1)),
            failure: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.cfg.window.title.clone())
            .with_inner_size(LogicalSize::new(self.cfg.window.width, self.cfg.window.height));
        let window = Arc::new(event_loop.create_window(attrs).context("create_window")?);

        let renderer = VkRenderer::new(
            window.as_ref(),
            window.as_ref(),
            Box::new(WinitExtent::new(window.clone())),
            self.cfg.render_settings(),
        )?;

        self.paused = !is_drawable(window.inner_size());
        self.resize = Some(renderer.resize_signal());
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    /// Drops the renderer before the window it presents to.
    fn stop(&mut self, event_loop: &ActiveEventLoop, failure: Option<anyhow::Error>) {
        if let Some(e) = failure {
            error!("{e:#}");
            self.failure = Some(e);
        }
        self.renderer = None;
        self.resize = None;
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        match self.init(event_loop) {
            Ok(()) => {
                info!("resumed, paused={}", self.paused);
                self.fps.reset(Instant::now());
            }
            Err(e) => self.stop(event_loop, Some(e.context("renderer init"))),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.stop(event_loop, None);
            }

            WindowEvent::Resized(size) => {
                if let Some(signal) = &self.resize {
                    signal.notify();
                }
                let paused = !is_drawable(size);
                if paused != self.paused {
                    info!("resized to {}x{} (paused={})", size.width, size.height, paused);
                    self.paused = paused;
                    self.fps.reset(Instant::now());
                } else {
                    debug!("resized to {}x{}", size.width, size.height);
                }
            }

            WindowEvent::RedrawRequested => {
                if self.paused {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.render() {
                    Ok(FrameStatus::Presented) => self.fps.frame(),
                    Ok(status) => debug!("frame {status:?}"),
                    Err(e) => self.stop(event_loop, Some(e)),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(window) = &self.window else {
            return;
        };
        if self.paused {
            event_loop.set_control_flow(ControlFlow::Wait);
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        window.request_redraw();

        if let Some(fps) = self.fps.sample(Instant::now()) {
            window.set_title(&format!("{} - {:.0} fps", self.cfg.window.title, fps));
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut cfg = AppCfg::load(&args.config);
    if let Some(mode) = args.vsync_mode {
        cfg.render.vsync_mode = mode;
    }
    if args.validation {
        cfg.render.validation = Some(true);
    }

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(cfg);
    event_loop.run_app(&mut app)?;

    match app.failure {
        Some(e) => Err(anyhow!("orbit stopped: {e:#}")),
        None => Ok(()),
    }
}
