pub mod surface;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use winit::{
    application::ApplicationHandler,
    dpi::{PhysicalPosition, PhysicalSize},
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    monitor::MonitorHandle,
    window::{Fullscreen, Window, WindowAttributes, WindowId},
};

use crate::{
    config::{Configuration, DisplayMode},
    error::SlideshowError,
    events::{SurfaceSpec, TargetKey},
    gpu::compositor::WgpuBackend,
    playlist::Playlist,
    processing::layout::{Rect, Size},
    tasks::{
        files,
        loader::ImageDecoder,
        slideshow::{PaintOutcome, Slideshow, SlideshowOptions, TickSummary},
    },
};

use self::surface::SurfacePhase;

/// Decoded images are capped here before upload.
const MAX_DECODE_DIMENSION: u32 = 8192;
const WINDOW_TITLE: &str = "Simple Slideshow";

#[derive(Debug)]
enum ViewerEvent {
    Cancelled,
}

/// A window to open plus the surfaces it hosts, in desktop coordinates.
struct WindowPlan {
    attrs: WindowAttributes,
    surfaces: Vec<Rect>,
}

struct HostedWindow {
    key: TargetKey,
    window: Arc<Window>,
}

struct ViewerApp {
    cfg: Configuration,
    cancel: CancellationToken,
    slideshow: Slideshow<ImageDecoder, WgpuBackend>,
    windows: HashMap<WindowId, HostedWindow>,
    specs: Vec<SurfaceSpec>,
    started: bool,
}

impl ViewerApp {
    fn new(cfg: Configuration, playlist: Playlist, cancel: CancellationToken) -> Self {
        let options = SlideshowOptions::from_config(&cfg);
        let decoder = ImageDecoder::new().with_max_dimension(MAX_DECODE_DIMENSION);
        let (folders, extensions, recursive) = (cfg.folders.clone(), cfg.extensions(), cfg.recursive);
        let slideshow = Slideshow::new(playlist, decoder, WgpuBackend::new(), options)
            .with_rescan(move || files::discover_images(&folders, &extensions, recursive));
        Self {
            cfg,
            cancel,
            slideshow,
            windows: HashMap::new(),
            specs: Vec::new(),
            started: false,
        }
    }

    fn plan_windows(&self, event_loop: &ActiveEventLoop) -> Vec<WindowPlan> {
        let monitors: Vec<MonitorHandle> = event_loop.available_monitors().collect();
        let mode = self.cfg.display;
        if mode != DisplayMode::Windowed && monitors.is_empty() {
            warn!(?mode, "no monitors reported; falling back to a window");
            return vec![self.windowed_plan()];
        }
        match mode {
            DisplayMode::Fullscreen => monitors
                .into_iter()
                .map(|monitor| {
                    let bounds = monitor_rect(&monitor);
                    WindowPlan {
                        attrs: WindowAttributes::default()
                            .with_title(WINDOW_TITLE)
                            .with_decorations(false)
                            .with_fullscreen(Some(Fullscreen::Borderless(Some(monitor)))),
                        surfaces: vec![bounds],
                    }
                })
                .collect(),
            DisplayMode::Span => {
                let rects: Vec<Rect> = monitors.iter().map(monitor_rect).collect();
                let Some(desktop) = Rect::union_all(&rects) else {
                    return vec![self.windowed_plan()];
                };
                vec![WindowPlan {
                    attrs: WindowAttributes::default()
                        .with_title(WINDOW_TITLE)
                        .with_decorations(false)
                        .with_position(PhysicalPosition::new(desktop.x as i32, desktop.y as i32))
                        .with_inner_size(desktop_size(&desktop)),
                    surfaces: rects,
                }]
            }
            DisplayMode::Windowed => vec![self.windowed_plan()],
        }
    }

    fn windowed_plan(&self) -> WindowPlan {
        let geometry = self.cfg.window.geometry;
        let attrs = WindowAttributes::default()
            .with_title(WINDOW_TITLE)
            .with_inner_size(PhysicalSize::new(geometry.width, geometry.height))
            .with_position(PhysicalPosition::new(geometry.x, geometry.y))
            .with_decorations(!self.cfg.window.borderless)
            .with_transparent(self.cfg.window_alpha() < u8::MAX);
        WindowPlan {
            attrs,
            surfaces: vec![Rect::new(
                0.0,
                0.0,
                geometry.width as f32,
                geometry.height as f32,
            )],
        }
    }

    fn open_windows(&mut self, event_loop: &ActiveEventLoop) -> Vec<SurfaceSpec> {
        let screensaver = self.cfg.display.is_screensaver();
        let mut specs = Vec::new();
        for (index, plan) in self.plan_windows(event_loop).into_iter().enumerate() {
            let window = match event_loop.create_window(plan.attrs) {
                Ok(window) => Arc::new(window),
                Err(err) => {
                    error!(error = %err, "failed to create slideshow window");
                    continue;
                }
            };
            let key = TargetKey(index as u64);
            if screensaver {
                window.set_cursor_visible(false);
            }
            if self.cfg.display == DisplayMode::Windowed && self.cfg.window.click_through {
                if let Err(err) = window.set_cursor_hittest(false) {
                    warn!(error = %err, "click-through unsupported on this platform");
                }
            }

            let surfaces = if plan.surfaces.len() == 1 {
                // Single-surface windows cover whatever the window manager gave us.
                let size = window.inner_size();
                if size.width > 0 && size.height > 0 {
                    vec![Rect::new(0.0, 0.0, size.width as f32, size.height as f32)]
                } else {
                    plan.surfaces
                }
            } else {
                plan.surfaces
            };
            specs.extend(surfaces.into_iter().map(|bounds| SurfaceSpec {
                target: key,
                bounds,
            }));

            self.slideshow
                .resources_mut()
                .backend_mut()
                .register_window(key, window.clone());
            info!(target_key = %key, mode = ?self.cfg.display, "window opened");
            self.windows.insert(window.id(), HostedWindow { key, window });
        }
        specs
    }

    fn close_window(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId) {
        let Some(hosted) = self.windows.remove(&window_id) else {
            return;
        };
        for id in self.slideshow.surfaces_on(hosted.key) {
            if let Err(err) = self.slideshow.remove_surface(id) {
                warn!(surface = %id, error = %err, "failed to remove surface");
            }
        }
        self.slideshow
            .resources_mut()
            .backend_mut()
            .unregister_window(hosted.key);
        info!(target_key = %hosted.key, remaining = self.windows.len(), "window closed");
        if self.windows.is_empty() {
            self.shutdown(event_loop);
        }
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.started {
            self.slideshow.stop();
            self.started = false;
        }
        event_loop.exit();
    }

    fn report(&mut self, event_loop: &ActiveEventLoop, summary: TickSummary) {
        for shown in &summary.shown {
            info!(surface = %shown.surface, path = %shown.path.display(), "image displayed");
        }
        let mut exhausted = false;
        for failure in &summary.failures {
            match &failure.error {
                SlideshowError::NoUsableImages { .. } => {
                    error!(surface = %failure.surface, error = %failure.error, "surface stopped");
                    exhausted = true;
                }
                SlideshowError::EmptyPlaylist => {
                    debug!(surface = %failure.surface, "playlist empty; surface idle");
                }
                other => {
                    warn!(surface = %failure.surface, error = %other, "image skipped");
                }
            }
        }
        if exhausted {
            let all_failed = self.slideshow.surface_ids().into_iter().all(|id| {
                self.slideshow
                    .surface(id)
                    .is_none_or(|state| state.phase() == SurfacePhase::Failed)
            });
            if all_failed {
                error!("no surface can show an image; exiting");
                self.shutdown(event_loop);
            }
        }
    }

    /// Rescans the folders and starts over on the windows already open.
    fn restart(&mut self, event_loop: &ActiveEventLoop) {
        if !self.started {
            return;
        }
        let specs = self.current_specs();
        info!(surfaces = specs.len(), "restarting slideshow");
        let summary = self.slideshow.start(&specs, Instant::now());
        self.specs = specs;
        self.report(event_loop, summary);
        self.flush_repaints();
    }

    /// Surface specs for a restart. Windows hosting a single surface may
    /// have been resized since they opened.
    fn current_specs(&self) -> Vec<SurfaceSpec> {
        let mut specs = self.specs.clone();
        for hosted in self.windows.values() {
            let mut on_window = specs.iter_mut().filter(|spec| spec.target == hosted.key);
            let (Some(spec), None) = (on_window.next(), on_window.next()) else {
                continue;
            };
            let size = hosted.window.inner_size();
            if size.width > 0 && size.height > 0 {
                spec.bounds = Rect::new(0.0, 0.0, size.width as f32, size.height as f32);
            }
        }
        specs.retain(|spec| self.windows.values().any(|hosted| hosted.key == spec.target));
        specs
    }

    fn flush_repaints(&mut self) {
        for key in self.slideshow.take_repaint_requests() {
            if let Some(hosted) = self.windows.values().find(|hosted| hosted.key == key) {
                hosted.window.request_redraw();
            }
        }
    }
}

impl ApplicationHandler<ViewerEvent> for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.cancel.is_cancelled() {
            event_loop.exit();
            return;
        }
        if self.started {
            for hosted in self.windows.values() {
                hosted.window.request_redraw();
            }
            return;
        }

        let specs = self.open_windows(event_loop);
        if specs.is_empty() {
            error!("no slideshow window could be opened");
            event_loop.exit();
            return;
        }
        self.started = true;
        let summary = self.slideshow.start(&specs, Instant::now());
        self.specs = specs;
        self.report(event_loop, summary);
        self.flush_repaints();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(key) = self.windows.get(&window_id).map(|hosted| hosted.key) else {
            return;
        };

        match event {
            WindowEvent::CloseRequested => {
                info!(target_key = %key, "window close requested");
                self.close_window(event_loop, window_id);
            }
            WindowEvent::Resized(size) => {
                if size.width == 0 || size.height == 0 {
                    self.slideshow.set_target_visible(key, false);
                } else {
                    self.slideshow.set_target_visible(key, true);
                    self.slideshow
                        .resize_target(key, Size::new(size.width, size.height));
                }
            }
            WindowEvent::Occluded(occluded) => {
                self.slideshow.set_target_visible(key, !occluded);
            }
            WindowEvent::RedrawRequested => match self.slideshow.paint(key) {
                PaintOutcome::Presented | PaintOutcome::Hidden | PaintOutcome::NoSurfaces => {}
                PaintOutcome::DeviceLost => debug!(target_key = %key, "repaint queued after device loss"),
                PaintOutcome::Failed => debug!(target_key = %key, "frame dropped"),
            },
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        state: ElementState::Pressed,
                        logical_key,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                let escape = logical_key == Key::Named(NamedKey::Escape);
                if escape || self.cfg.display.is_screensaver() {
                    info!(target_key = %key, "key press; exiting");
                    self.shutdown(event_loop);
                } else if logical_key == Key::Named(NamedKey::F5) {
                    self.restart(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if !self.started {
            return;
        }
        let summary = self.slideshow.poll(Instant::now());
        if !summary.is_empty() {
            self.report(event_loop, summary);
        }
        self.flush_repaints();
        match self.slideshow.next_deadline() {
            Some(deadline) => event_loop.set_control_flow(ControlFlow::WaitUntil(deadline)),
            None => event_loop.set_control_flow(ControlFlow::Wait),
        }
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: ViewerEvent) {
        match event {
            ViewerEvent::Cancelled => {
                info!("viewer received cancellation event");
                self.shutdown(event_loop);
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if self.started {
            self.slideshow.stop();
            self.started = false;
        }
    }
}

fn monitor_rect(monitor: &MonitorHandle) -> Rect {
    let position = monitor.position();
    let size = monitor.size();
    Rect::new(
        position.x as f32,
        position.y as f32,
        size.width as f32,
        size.height as f32,
    )
}

fn desktop_size(desktop: &Rect) -> PhysicalSize<u32> {
    PhysicalSize::new(
        desktop.width.round().max(1.0) as u32,
        desktop.height.round().max(1.0) as u32,
    )
}

/// Runs the slideshow on the current thread until every window closes or
/// `cancel` fires.
pub fn run(cfg: Configuration, playlist: Playlist, cancel: CancellationToken) -> Result<()> {
    let event_loop = EventLoop::<ViewerEvent>::with_user_event()
        .build()
        .context("failed to build viewer event loop")?;
    let proxy = event_loop.create_proxy();

    let cancel_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = proxy.send_event(ViewerEvent::Cancelled);
        })
    };

    let mut app = ViewerApp::new(cfg, playlist, cancel);
    let run_result = event_loop.run_app(&mut app);
    cancel_task.abort();

    run_result.context("viewer event loop failed")
}
