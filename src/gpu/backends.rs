//! wgpu implementations of [`RenderBackend`].

use crate::backend::{FrameInput, RenderBackend, RenderError};
use crate::context::ContextError;
use crate::gpu::renderer::SceneRenderer;
use crate::resources::ResourceId;

#[cfg(not(target_arch = "wasm32"))]
use crate::gpu::capture::{save_target, CaptureQueue, OffscreenTarget};

/// Draws into a window or canvas surface.
pub struct SurfaceBackend {
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    renderer: SceneRenderer,
    #[cfg(not(target_arch = "wasm32"))]
    captures: Option<CaptureQueue>,
    disposed: bool,
}

impl SurfaceBackend {
    pub fn new(
        surface: wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        width: u32,
        height: u32,
    ) -> Result<Self, ContextError> {
        let caps = surface.get_capabilities(adapter);
        let format = super::pick_surface_format(&caps).ok_or(ContextError::UnsupportedSurface)?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: caps
                .present_modes
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo),
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);
        log::info!("Surface configured: {:?} {}x{}", format, config.width, config.height);

        let renderer = SceneRenderer::new(device, queue, format, config.width, config.height);
        Ok(Self {
            surface,
            config,
            renderer,
            #[cfg(not(target_arch = "wasm32"))]
            captures: None,
            disposed: false,
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_captures(mut self, captures: CaptureQueue) -> Self {
        self.captures = Some(captures);
        self
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    fn reconfigure(&self) {
        self.surface.configure(self.renderer.device(), &self.config);
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn fulfil_capture(&mut self, frame: &FrameInput<'_>) {
        let Some(captures) = self.captures.clone() else {
            return;
        };
        let Some(path) = captures.next() else {
            return;
        };
        // Surface textures are not copyable, so the frame is drawn again offscreen.
        let target = OffscreenTarget::new(
            self.renderer.device(),
            self.config.width,
            self.config.height,
            self.config.format,
        );
        self.renderer.render(frame, &target.view);
        let result = save_target(self.renderer.device(), self.renderer.queue(), &target, &path);
        captures.finish(path, result);
    }
}

impl RenderBackend for SurfaceBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        if !self.disposed {
            self.reconfigure();
        }
        self.renderer.resize(width, height);
    }

    fn render(&mut self, frame: &FrameInput<'_>) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Timeout) => return Err(RenderError::Timeout),
            Err(wgpu::SurfaceError::OutOfMemory) => return Err(RenderError::OutOfMemory),
            Err(e) => {
                log::warn!("Surface error ({}), reconfiguring", e);
                self.reconfigure();
                return Err(RenderError::SurfaceLost);
            }
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.renderer.render(frame, &view);
        output.present();

        #[cfg(not(target_arch = "wasm32"))]
        self.fulfil_capture(frame);
        Ok(())
    }

    fn release(&mut self, resources: &[ResourceId]) {
        self.renderer.release(resources);
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.renderer.clear();
            self.disposed = true;
        }
    }

    fn name(&self) -> &'static str {
        "wgpu-surface"
    }
}

/// Draws into a texture with no window. Used by `principia render`.
#[cfg(not(target_arch = "wasm32"))]
pub struct OffscreenBackend {
    renderer: SceneRenderer,
    target: OffscreenTarget,
    captures: CaptureQueue,
    disposed: bool,
}

#[cfg(not(target_arch = "wasm32"))]
impl OffscreenBackend {
    pub const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

    pub fn new(width: u32, height: u32) -> Result<Self, ContextError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
        let (_adapter, device, queue) = pollster::block_on(super::request_device(
            &instance,
            None,
            wgpu::Limits::downlevel_defaults(),
        ))?;
        let target = OffscreenTarget::new(&device, width, height, Self::FORMAT);
        let renderer = SceneRenderer::new(device, queue, Self::FORMAT, target.width, target.height);
        Ok(Self {
            renderer,
            target,
            captures: CaptureQueue::new(),
            disposed: false,
        })
    }

    pub fn captures(&self) -> CaptureQueue {
        self.captures.clone()
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl RenderBackend for OffscreenBackend {
    fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if (width, height) != (self.target.width, self.target.height) {
            self.target = OffscreenTarget::new(self.renderer.device(), width, height, Self::FORMAT);
            self.renderer.resize(width, height);
        }
    }

    fn render(&mut self, frame: &FrameInput<'_>) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        self.renderer.render(frame, &self.target.view);
        if let Some(path) = self.captures.next() {
            let result = save_target(
                self.renderer.device(),
                self.renderer.queue(),
                &self.target,
                &path,
            );
            self.captures.finish(path, result);
        }
        Ok(())
    }

    fn release(&mut self, resources: &[ResourceId]) {
        self.renderer.release(resources);
    }

    fn dispose(&mut self) {
        if !self.disposed {
            self.renderer.clear();
            self.disposed = true;
        }
    }

    fn name(&self) -> &'static str {
        "wgpu-offscreen"
    }
}
