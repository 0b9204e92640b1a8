//! Shared handles to the objects payload code may touch.
//!
//! The scene context owns a [`Stage`] and lends clones of it to the script
//! bindings and the idle generator. Everything on the stage is single-threaded
//! and reference counted; the GPU side never appears here.

use std::cell::RefCell;
use std::rc::Rc;

use crate::camera::PerspectiveCamera;
use crate::resources::ResourceRegistry;
use crate::scene_graph::SceneGraph;

/// Renderer facts and knobs visible to payload code.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    /// Tone-mapping exposure.
    pub exposure: f32,
    pub frames_rendered: u64,
}

impl RendererInfo {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        Self {
            width,
            height,
            pixel_ratio,
            exposure: 1.0,
            frames_rendered: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub scene: Rc<RefCell<SceneGraph>>,
    pub resources: Rc<RefCell<ResourceRegistry>>,
    pub camera: Rc<RefCell<PerspectiveCamera>>,
    pub renderer: Rc<RefCell<RendererInfo>>,
}

impl Stage {
    pub fn new(camera: PerspectiveCamera, renderer: RendererInfo) -> Self {
        Self {
            scene: Rc::new(RefCell::new(SceneGraph::new())),
            resources: Rc::new(RefCell::new(ResourceRegistry::new())),
            camera: Rc::new(RefCell::new(camera)),
            renderer: Rc::new(RefCell::new(renderer)),
        }
    }
}
