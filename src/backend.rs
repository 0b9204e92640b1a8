//! Render backends the scene context can draw through.
//!
//! A backend consumes one [`FrameInput`] per frame. The wgpu backends live in
//! [`crate::gpu`]; [`HeadlessBackend`] draws nothing and records what it was
//! asked to do, which is what `principia check` and the tests run on.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use glam::Vec3;

use crate::camera::PerspectiveCamera;
use crate::post_processing::PostChain;
use crate::resources::{ResourceId, ResourceRegistry};
use crate::scene_graph::SceneGraph;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render surface lost or outdated")]
    SurfaceLost,
    #[error("render surface timed out")]
    Timeout,
    #[error("GPU out of memory")]
    OutOfMemory,
    #[error("backend has been disposed")]
    Disposed,
    #[error("render failed: {0}")]
    Other(String),
}

/// Everything a backend needs to draw one frame.
pub struct FrameInput<'a> {
    pub scene: &'a SceneGraph,
    pub resources: &'a ResourceRegistry,
    pub camera: &'a PerspectiveCamera,
    pub post: &'a PostChain,
}

impl FrameInput<'_> {
    /// Attached, visible nodes whose geometry is still live.
    pub fn drawable_count(&self) -> usize {
        self.scene
            .attached()
            .into_iter()
            .filter(|id| self.scene.is_visible(*id))
            .filter_map(|id| self.scene.get(id))
            .filter_map(|node| node.kind.renderable())
            .filter(|r| self.resources.geometry(r.geometry).is_some())
            .count()
    }
}

pub trait RenderBackend {
    fn resize(&mut self, width: u32, height: u32);

    fn render(&mut self, frame: &FrameInput<'_>) -> Result<(), RenderError>;

    /// Drop GPU copies of resources the registry has disposed.
    fn release(&mut self, resources: &[ResourceId]);

    /// Release every GPU object. Must tolerate repeated calls.
    fn dispose(&mut self);

    fn name(&self) -> &'static str;
}

/// What the headless backend saw.
#[derive(Debug, Clone, Default)]
pub struct HeadlessLog {
    pub frames: u64,
    pub width: u32,
    pub height: u32,
    pub resize_calls: u32,
    pub last_drawables: usize,
    pub last_bloom_strength: f32,
    pub last_camera_position: Vec3,
    pub last_background: u32,
    pub released: BTreeSet<ResourceId>,
    pub dispose_calls: u32,
    /// Frames rejected because the backend was already disposed.
    pub rejected_frames: u64,
}

/// Backend that renders nothing. Its log is shared so it can be inspected
/// after the backend has been boxed into a context.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    log: Rc<RefCell<HeadlessLog>>,
    disposed: bool,
    fail_next: Option<RenderError>,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        let log = HeadlessLog {
            width,
            height,
            ..Default::default()
        };
        Self {
            log: Rc::new(RefCell::new(log)),
            disposed: false,
            fail_next: None,
        }
    }

    pub fn log(&self) -> Rc<RefCell<HeadlessLog>> {
        self.log.clone()
    }

    /// Make the next render call fail with `error`.
    pub fn fail_next_frame(&mut self, error: RenderError) {
        self.fail_next = Some(error);
    }
}

impl RenderBackend for HeadlessBackend {
    fn resize(&mut self, width: u32, height: u32) {
        let mut log = self.log.borrow_mut();
        log.width = width;
        log.height = height;
        log.resize_calls += 1;
    }

    fn render(&mut self, frame: &FrameInput<'_>) -> Result<(), RenderError> {
        if self.disposed {
            self.log.borrow_mut().rejected_frames += 1;
            return Err(RenderError::Disposed);
        }
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        let mut log = self.log.borrow_mut();
        log.frames += 1;
        log.last_drawables = frame.drawable_count();
        log.last_bloom_strength = frame.post.bloom.strength;
        log.last_camera_position = frame.camera.position;
        log.last_background = frame.scene.background.to_hex();
        Ok(())
    }

    fn release(&mut self, resources: &[ResourceId]) {
        self.log.borrow_mut().released.extend(resources.iter().copied());
    }

    fn dispose(&mut self) {
        self.disposed = true;
        self.log.borrow_mut().dispose_calls += 1;
    }

    fn name(&self) -> &'static str {
        "headless"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{Geometry, Material, MaterialKind};
    use crate::scene_graph::{NodeKind, Renderable};

    #[test]
    fn test_headless_records_frames() {
        let mut backend = HeadlessBackend::new(800, 600);
        let log = backend.log();

        let mut scene = SceneGraph::new();
        let mut resources = ResourceRegistry::new();
        let g = resources.add_geometry(Geometry::default());
        let m = resources.add_material(Material::new(MaterialKind::Basic));
        let id = scene.create(NodeKind::Mesh(Renderable {
            geometry: g,
            materials: vec![m],
        }));
        scene.add(id);
        let camera = PerspectiveCamera::default();
        let post = PostChain::new(800, 600, 0.8);

        let frame = FrameInput {
            scene: &scene,
            resources: &resources,
            camera: &camera,
            post: &post,
        };
        backend.render(&frame).unwrap();
        assert_eq!(log.borrow().frames, 1);
        assert_eq!(log.borrow().last_drawables, 1);
        assert_eq!(log.borrow().last_bloom_strength, 0.8);

        backend.dispose();
        assert!(matches!(backend.render(&frame), Err(RenderError::Disposed)));
        assert_eq!(log.borrow().rejected_frames, 1);
    }
}
