//! Long-lived rendering context for one mounted surface.
//!
//! A [`SceneContext`] owns the camera, the orbit controller, the post chain and
//! the render backend for as long as the surface exists. Payload swaps only
//! replace scene content; the context itself is rebuilt only on remount.

use glam::Vec3;

use crate::backend::{FrameInput, RenderBackend, RenderError};
use crate::camera::PerspectiveCamera;
use crate::config::SceneConfig;
use crate::orbit::OrbitController;
use crate::post_processing::PostChain;
use crate::reclaimer::{reclaim, ReclaimPolicy, ReclaimReport};
use crate::scene_graph::{Fog, Light, LightKind, NodeId, NodeKind, NodeOrigin, Transform};
use crate::stage::{RendererInfo, Stage};
use crate::surface::{Dimensions, HostSurface, ResizeListener};
use crate::view_settings::ViewSettings;

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("scene context has been disposed")]
    Disposed,
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("surface reports no usable texture format")]
    UnsupportedSurface,
    #[error("failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),
    #[error("failed to create GPU device: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
}

pub struct SceneContext {
    stage: Stage,
    controls: OrbitController,
    post: PostChain,
    backend: Box<dyn RenderBackend>,
    surface: HostSurface,
    listener: Option<ResizeListener>,
    default_lights: Vec<NodeId>,
    config: SceneConfig,
    disposed: bool,
}

impl SceneContext {
    /// Build the camera, controller, post chain and default lights for `surface`.
    pub fn initialize(
        surface: HostSurface,
        mut backend: Box<dyn RenderBackend>,
        settings: &ViewSettings,
        config: &SceneConfig,
    ) -> Self {
        let dims = surface.dimensions();
        let settings = settings.sanitized();

        let mut camera = PerspectiveCamera::new(dims.aspect());
        camera.fov = config.fov;
        camera.near = config.near;
        camera.far = config.far;
        camera.position = Vec3::new(0.0, 0.0, settings.zoom_distance);

        let mut renderer = RendererInfo::new(dims.width, dims.height, dims.pixel_ratio);
        renderer.exposure = config.exposure;

        let stage = Stage::new(camera, renderer);
        {
            let mut scene = stage.scene.borrow_mut();
            scene.background = config.background;
            scene.fog = Some(Fog {
                color: config.background,
                density: config.fog_density,
            });
        }

        let mut controls = OrbitController::new();
        controls.damping_factor = config.damping_factor;
        controls.set_auto_rotate(settings.auto_rotate, config.payload_auto_rotate_speed);

        let mut post = PostChain::new(dims.width, dims.height, settings.bloom_strength);
        post.bloom.radius = config.bloom_radius;
        post.bloom.threshold = config.bloom_threshold;
        post.exposure = config.exposure;

        backend.resize(dims.width, dims.height);
        let listener = surface.listen();

        let mut context = Self {
            stage,
            controls,
            post,
            backend,
            surface,
            listener: Some(listener),
            default_lights: Vec::new(),
            config: config.clone(),
            disposed: false,
        };
        context.install_default_lights();
        log::info!(
            "Scene context ready ({}x{}, backend: {})",
            dims.width,
            dims.height,
            context.backend.name()
        );
        context
    }

    /// Name, light and transform of each default light as configured.
    fn default_light_specs(&self) -> [(&'static str, Light, Transform); 2] {
        let ambient = Light {
            kind: LightKind::Ambient,
            color: self.config.ambient_color,
            intensity: self.config.ambient_intensity,
        };
        let directional = Light {
            kind: LightKind::Directional,
            color: self.config.directional_color,
            intensity: self.config.directional_intensity,
        };
        let aimed = Transform {
            position: Vec3::from(self.config.directional_position),
            ..Transform::default()
        };
        [
            ("default_ambient", ambient, Transform::default()),
            ("default_directional", directional, aimed),
        ]
    }

    fn install_default_lights(&mut self) {
        let specs = self.default_light_specs();
        let mut scene = self.stage.scene.borrow_mut();
        let mut ids = Vec::with_capacity(specs.len());
        for (name, light, transform) in specs {
            let id = scene.create_named(name, NodeKind::Light(light));
            if let Some(node) = scene.get_mut(id) {
                node.transform = transform;
                node.origin = NodeOrigin::Context;
            }
            scene.add(id);
            ids.push(id);
        }
        drop(scene);
        self.default_lights = ids;
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    pub fn controls(&self) -> &OrbitController {
        &self.controls
    }

    pub fn controls_mut(&mut self) -> &mut OrbitController {
        &mut self.controls
    }

    pub fn post(&self) -> &PostChain {
        &self.post
    }

    pub fn post_mut(&mut self) -> &mut PostChain {
        &mut self.post
    }

    pub fn surface(&self) -> &HostSurface {
        &self.surface
    }

    pub fn default_lights(&self) -> &[NodeId] {
        &self.default_lights
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn camera_position(&self) -> Vec3 {
        self.stage.camera.borrow().position
    }

    /// Apply new surface dimensions to the camera, every post stage and the backend.
    pub fn resize(&mut self, dims: Dimensions) {
        if self.disposed {
            return;
        }
        let width = dims.width.max(1);
        let height = dims.height.max(1);
        self.stage.camera.borrow_mut().set_aspect(width, height);
        {
            let mut renderer = self.stage.renderer.borrow_mut();
            renderer.width = width;
            renderer.height = height;
            renderer.pixel_ratio = dims.pixel_ratio;
        }
        self.post.set_size(width, height);
        self.backend.resize(width, height);
    }

    /// Apply the latest size delivered by the surface, if any.
    pub fn apply_pending_resize(&mut self) -> bool {
        let pending = self.listener.as_ref().and_then(ResizeListener::take);
        match pending {
            Some(dims) => {
                self.resize(dims);
                true
            }
            None => false,
        }
    }

    /// Advance the orbit controller by one frame.
    pub fn update_controls(&mut self, dt: f32) {
        if self.disposed {
            return;
        }
        let mut camera = self.stage.camera.borrow_mut();
        self.controls.update(&mut camera, dt);
    }

    /// Draw the current scene through the post chain.
    pub fn render(&mut self) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        self.apply_pending_resize();

        let released = self.stage.resources.borrow_mut().take_released();
        if !released.is_empty() {
            self.backend.release(&released);
        }

        self.post.exposure = self.stage.renderer.borrow().exposure;
        let scene = self.stage.scene.borrow();
        let resources = self.stage.resources.borrow();
        let camera = self.stage.camera.borrow();
        let frame = FrameInput {
            scene: &scene,
            resources: &resources,
            camera: &camera,
            post: &self.post,
        };
        self.backend.render(&frame)?;
        self.stage.renderer.borrow_mut().frames_rendered += 1;
        Ok(())
    }

    /// Free all non-default content and hand the freed handles to the backend.
    pub fn reclaim(&mut self, policy: &ReclaimPolicy) -> ReclaimReport {
        let report = {
            let mut scene = self.stage.scene.borrow_mut();
            let mut resources = self.stage.resources.borrow_mut();
            reclaim(&mut scene, &mut resources, policy)
        };
        // A payload may have detached a default light; put it back.
        {
            let mut scene = self.stage.scene.borrow_mut();
            for id in &self.default_lights {
                if scene.exists(*id) && !scene.is_attached(*id) {
                    scene.add(*id);
                }
            }
        }
        let released = self.stage.resources.borrow_mut().take_released();
        if !released.is_empty() && !self.disposed {
            self.backend.release(&released);
        }
        report
    }

    /// Restore background, fog, exposure and the default lights to the
    /// configured values.
    pub fn restore_environment(&mut self) {
        let specs = self.default_light_specs();
        let mut scene = self.stage.scene.borrow_mut();
        scene.background = self.config.background;
        scene.fog = Some(Fog {
            color: self.config.background,
            density: self.config.fog_density,
        });
        for (id, (name, light, transform)) in self.default_lights.iter().zip(specs) {
            if let Some(node) = scene.get_mut(*id) {
                node.name = name.to_string();
                node.kind = NodeKind::Light(light);
                node.transform = transform;
                node.visible = true;
            }
        }
        drop(scene);
        self.stage.renderer.borrow_mut().exposure = self.config.exposure;
    }

    /// Put the camera at its resting pose `(0, 0, distance)` facing the origin.
    pub fn reset_camera(&mut self, distance: f32) {
        let mut camera = self.stage.camera.borrow_mut();
        camera.fov = self.config.fov;
        camera.near = self.config.near;
        camera.far = self.config.far;
        camera.up = Vec3::Y;
        self.controls.reset(&mut camera, distance);
    }

    /// Release GPU resources and detach from the surface. Safe to call twice.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        if let Some(listener) = self.listener.take() {
            self.surface.unlisten(listener.id());
        }
        let freed = self.stage.resources.borrow_mut().dispose_all();
        self.stage.resources.borrow_mut().take_released();
        self.backend.dispose();
        log::info!("Scene context disposed ({} resources freed)", freed);
    }
}

impl Drop for SceneContext {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::resources::{Geometry, Material, MaterialKind, ResourceId};
    use crate::scene_graph::Renderable;
    use crate::view_settings::DEFAULT_VIEW_SETTINGS;

    fn context() -> (SceneContext, HostSurface, std::rc::Rc<std::cell::RefCell<crate::backend::HeadlessLog>>) {
        let surface = HostSurface::new(Dimensions::new(800, 600));
        let backend = HeadlessBackend::new(800, 600);
        let log = backend.log();
        let ctx = SceneContext::initialize(
            surface.clone(),
            Box::new(backend),
            &DEFAULT_VIEW_SETTINGS,
            &SceneConfig::default(),
        );
        (ctx, surface, log)
    }

    #[test]
    fn test_initialize_defaults() {
        let (ctx, surface, _) = context();
        let camera = ctx.stage().camera.borrow();
        assert_eq!(camera.fov, 75.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 12.0));
        assert!((camera.aspect - 800.0 / 600.0).abs() < 1e-6);
        drop(camera);
        assert_eq!(ctx.default_lights().len(), 2);
        assert_eq!(ctx.stage().scene.borrow().content_count(), 0);
        assert_eq!(ctx.post().bloom.strength, 0.8);
        assert_eq!(ctx.controls().damping_factor, 0.05);
        assert_eq!(surface.listener_count(), 1);
    }

    #[test]
    fn test_resize_through_surface() {
        let (mut ctx, surface, log) = context();
        surface.notify_resize(Dimensions::new(1600, 400));
        ctx.render().unwrap();
        assert!((ctx.stage().camera.borrow().aspect - 4.0).abs() < 1e-6);
        assert_eq!(ctx.post().bloom.size.width, 1600);
        assert_eq!(log.borrow().width, 1600);
        assert_eq!(ctx.stage().renderer.borrow().height, 400);
    }

    #[test]
    fn test_dispose_idempotent_and_detaches() {
        let (mut ctx, surface, log) = context();
        ctx.dispose();
        ctx.dispose();
        assert!(ctx.is_disposed());
        assert_eq!(surface.listener_count(), 0);
        assert_eq!(log.borrow().dispose_calls, 1);
        assert!(matches!(ctx.render(), Err(RenderError::Disposed)));
        drop(ctx);
        assert_eq!(log.borrow().dispose_calls, 1);
    }

    #[test]
    fn test_reclaim_releases_backend_copies() {
        let (mut ctx, _, log) = context();
        let (g, m) = {
            let mut resources = ctx.stage().resources.borrow_mut();
            (
                resources.add_geometry(Geometry::default()),
                resources.add_material(Material::new(MaterialKind::Basic)),
            )
        };
        {
            let mut scene = ctx.stage().scene.borrow_mut();
            let id = scene.create(NodeKind::Mesh(Renderable {
                geometry: g,
                materials: vec![m],
            }));
            scene.add(id);
            // a payload that removed a default light
            let light = ctx.default_lights()[0];
            scene.detach(light);
        }
        let report = ctx.reclaim(&ReclaimPolicy::default());
        assert_eq!(report.geometries, 1);
        assert!(log.borrow().released.contains(&ResourceId::Geometry(g)));
        let scene = ctx.stage().scene.borrow();
        assert!(ctx.default_lights().iter().all(|id| scene.is_attached(*id)));
    }

    #[test]
    fn test_restore_environment_resets_default_lights() {
        let (mut ctx, _, _) = context();
        let [ambient, directional] = [ctx.default_lights()[0], ctx.default_lights()[1]];
        {
            let mut scene = ctx.stage().scene.borrow_mut();
            let node = scene.get_mut(ambient).unwrap();
            node.name = "stolen".into();
            if let NodeKind::Light(light) = &mut node.kind {
                light.intensity = 9.0;
                light.color = crate::color::Rgb::from_hex(0xff0000);
            }
            scene.get_mut(directional).unwrap().transform.position = Vec3::ZERO;
        }
        ctx.restore_environment();

        let scene = ctx.stage().scene.borrow();
        let node = scene.get(ambient).unwrap();
        assert_eq!(node.name, "default_ambient");
        let light = node.kind.light().copied().unwrap();
        assert_eq!(light.kind, LightKind::Ambient);
        assert_eq!(light.intensity, 2.0);
        assert_eq!(light.color.to_hex(), 0x404040);
        assert_eq!(
            scene.get(directional).unwrap().transform.position,
            Vec3::new(5.0, 10.0, 7.0)
        );
    }

    #[test]
    fn test_reset_camera() {
        let (mut ctx, _, _) = context();
        ctx.stage().camera.borrow_mut().position = Vec3::new(3.0, 3.0, 3.0);
        ctx.reset_camera(20.0);
        assert_eq!(ctx.camera_position(), Vec3::new(0.0, 0.0, 20.0));
    }
}
