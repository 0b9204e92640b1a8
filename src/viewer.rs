//! Interactive native window.
//!
//! Drag to orbit (right or middle button pans), scroll to zoom.
//! `R` toggles auto-rotate, `[` and `]` step bloom, `H` goes back to the idle
//! background, `P` saves a screenshot, `Esc` quits.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use winit::dpi::{LogicalSize, PhysicalPosition};
use winit::event::{ElementState, Event, KeyEvent, MouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::EventLoop;
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use crate::cli::{mount, ContentSelection};
use crate::config::RuntimeConfig;
use crate::frame_driver::{FrameRequest, FrameScheduler};
use crate::gpu::backends::SurfaceBackend;
use crate::gpu::capture::CaptureQueue;
use crate::input::PointerButton;
use crate::surface::{Dimensions, HostSurface};
use crate::visualiser::Visualiser;

const BLOOM_STEP: f32 = 0.1;
/// Pixels per wheel line, so line and pixel deltas dolly alike.
const LINE_HEIGHT: f32 = 100.0;

/// Maps frame requests onto winit redraw requests.
pub struct RedrawScheduler {
    window: Arc<Window>,
    next_id: u64,
    pending: Option<FrameRequest>,
}

impl RedrawScheduler {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            next_id: 0,
            pending: None,
        }
    }

    /// The request a `RedrawRequested` event should be delivered to.
    pub fn take_due(&mut self) -> Option<FrameRequest> {
        self.pending.take()
    }
}

impl FrameScheduler for RedrawScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        self.pending = Some(request);
        self.window.request_redraw();
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if self.pending == Some(request) {
            self.pending = None;
        }
    }
}

fn dimensions(window: &Window) -> Dimensions {
    let size = window.inner_size();
    Dimensions {
        width: size.width.max(1),
        height: size.height.max(1),
        pixel_ratio: window.scale_factor() as f32,
    }
}

fn screenshot_path(dir: &std::path::Path) -> PathBuf {
    dir.join(format!(
        "principia-{}.png",
        chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f")
    ))
}

fn handle_key(
    visualiser: &mut Visualiser<RedrawScheduler>,
    key: &Key,
    captures: &CaptureQueue,
    screenshots: &std::path::Path,
) {
    match key {
        Key::Character(c) => match c.as_str() {
            "r" | "R" => {
                let mut settings = *visualiser.settings();
                settings.auto_rotate = !settings.auto_rotate;
                visualiser.set_view_settings(settings);
                log::info!("Auto-rotate {}", if settings.auto_rotate { "on" } else { "off" });
            }
            "[" | "]" => {
                let mut settings = *visualiser.settings();
                let step = if c.as_str() == "]" { BLOOM_STEP } else { -BLOOM_STEP };
                settings.bloom_strength = (settings.bloom_strength + step).max(0.0);
                visualiser.set_view_settings(settings);
                log::info!("Bloom strength {:.1}", visualiser.settings().bloom_strength);
            }
            "h" | "H" => {
                if let Err(e) = visualiser.return_to_idle() {
                    log::error!("{}", e);
                }
            }
            "p" | "P" => captures.request(screenshot_path(screenshots)),
            _ => {}
        },
        _ => {}
    }
}

pub fn run(
    config: RuntimeConfig,
    selection: ContentSelection,
    width: u32,
    height: u32,
    screenshots: PathBuf,
) -> Result<()> {
    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Principia")
            .with_inner_size(LogicalSize::new(width, height))
            .build(&event_loop)?,
    );

    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance.create_surface(window.clone())?;
    let (adapter, device, queue) = pollster::block_on(crate::gpu::request_device(
        &instance,
        Some(&surface),
        wgpu::Limits::downlevel_defaults(),
    ))?;

    let dims = dimensions(&window);
    let captures = CaptureQueue::new();
    let backend = SurfaceBackend::new(surface, &adapter, device, queue, dims.width, dims.height)?
        .with_captures(captures.clone());
    let mut visualiser = mount(
        config,
        &selection,
        HostSurface::new(dims),
        Box::new(backend),
        RedrawScheduler::new(window.clone()),
    )?;

    let started = Instant::now();
    let mut cursor = PhysicalPosition::new(0.0f64, 0.0f64);

    event_loop.run(move |event, elwt| {
        let Event::WindowEvent { event, window_id } = event else {
            return;
        };
        if window_id != window.id() {
            return;
        }
        match event {
            WindowEvent::CloseRequested => {
                visualiser.unmount();
                elwt.exit();
            }
            WindowEvent::Resized(_) | WindowEvent::ScaleFactorChanged { .. } => {
                visualiser.resize(dimensions(&window));
                window.request_redraw();
            }
            WindowEvent::RedrawRequested => {
                let timestamp = started.elapsed().as_secs_f64();
                match visualiser.scheduler_mut().take_due() {
                    Some(request) => {
                        visualiser.on_frame(request, timestamp);
                    }
                    // Loop halted or idle between requests: keep the last frame on screen.
                    None if !visualiser.context().is_disposed() => {
                        if let Err(e) = visualiser.context_mut().render() {
                            log::warn!("Redraw failed: {}", e);
                        }
                    }
                    None => {}
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if logical_key == Key::Named(NamedKey::Escape) {
                    visualiser.unmount();
                    elwt.exit();
                    return;
                }
                handle_key(&mut visualiser, &logical_key, &captures, &screenshots);
                window.request_redraw();
            }
            WindowEvent::CursorMoved { position, .. } => {
                cursor = position;
                visualiser.pointer_move(position.x as f32, position.y as f32);
                if !visualiser.driver().is_running() {
                    window.request_redraw();
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let button = match button {
                    MouseButton::Left => PointerButton::Primary,
                    MouseButton::Right => PointerButton::Secondary,
                    MouseButton::Middle => PointerButton::Middle,
                    _ => return,
                };
                match state {
                    ElementState::Pressed => {
                        visualiser.pointer_down(button, cursor.x as f32, cursor.y as f32)
                    }
                    ElementState::Released => visualiser.pointer_up(),
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                // winit reports scrolling up as positive; browsers the opposite.
                let delta_y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => -y * LINE_HEIGHT,
                    MouseScrollDelta::PixelDelta(p) => -p.y as f32,
                };
                visualiser.wheel(delta_y);
                window.request_redraw();
            }
            _ => {}
        }
    })?;
    Ok(())
}
