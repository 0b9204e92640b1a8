//! Per-frame draw and light lists, built from the scene graph on the CPU.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

use crate::backend::FrameInput;
use crate::gpu::pipeline::{BlendMode, PipelineKey, Primitive};
use crate::resources::{GeometryHandle, Material, MaterialKind, TextureHandle};
use crate::scene_graph::{LightKind, NodeId, NodeKind};

pub const MAX_LIGHTS: usize = 8;
pub const MAX_DRAWS: usize = 1024;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct LightUniform {
    pub position: [f32; 4],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct FrameUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
    pub ambient: [f32; 4],
    pub fog: [f32; 4],
    pub viewport: [f32; 4],
    pub lights: [LightUniform; MAX_LIGHTS],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct DrawUniforms {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub emissive: [f32; 4],
    pub flags: [f32; 4],
}

impl DrawUniforms {
    pub fn new(model: Mat4, material: &Material, lit: bool) -> Self {
        let [r, g, b] = material.color.to_linear();
        let [er, eg, eb] = material.emissive.to_linear();
        let k = material.emissive_intensity.max(0.0);
        let flag = |on: bool| if on { 1.0 } else { 0.0 };
        Self {
            model: model.to_cols_array_2d(),
            color: [r, g, b, material.opacity.clamp(0.0, 1.0)],
            emissive: [er * k, eg * k, eb * k, material.size.max(0.0)],
            flags: [
                flag(lit),
                flag(material.vertex_colors),
                flag(material.map.is_some()),
                flag(material.emissive_map.is_some()),
            ],
        }
    }
}

/// One draw call's worth of state.
#[derive(Debug, Clone)]
pub struct DrawItem {
    pub node: NodeId,
    pub geometry: GeometryHandle,
    pub key: PipelineKey,
    pub textures: (Option<TextureHandle>, Option<TextureHandle>),
    pub uniforms: DrawUniforms,
    /// Distance from the camera to the node's origin.
    pub depth: f32,
}

/// Attached, visible renderables with live resources. Opaque draws keep
/// scene order; transparent draws follow, farthest first.
pub fn collect_draws(frame: &FrameInput<'_>) -> Vec<DrawItem> {
    let eye = frame.camera.position;
    let mut opaque = Vec::new();
    let mut transparent = Vec::new();

    for id in frame.scene.attached() {
        if !frame.scene.is_visible(id) {
            continue;
        }
        let Some(node) = frame.scene.get(id) else {
            continue;
        };
        let Some(renderable) = node.kind.renderable() else {
            continue;
        };
        if frame.resources.geometry(renderable.geometry).is_none() {
            continue;
        }
        // Multi-material nodes draw with their first material.
        let Some(material) = renderable
            .materials
            .first()
            .and_then(|m| frame.resources.material(*m))
        else {
            continue;
        };

        let primitive = match node.kind {
            NodeKind::Mesh(_) if material.wireframe => Primitive::Wireframe,
            NodeKind::Mesh(_) => Primitive::Triangles,
            NodeKind::Points(_) => Primitive::Points,
            _ => Primitive::LineStrip,
        };
        let key = PipelineKey {
            primitive,
            blend: BlendMode::for_material(material),
            depth_write: material.depth_write,
        };
        let lit = material.kind == MaterialKind::Standard && primitive == Primitive::Triangles;
        let model = frame.scene.world_matrix(id);
        let item = DrawItem {
            node: id,
            geometry: renderable.geometry,
            key,
            textures: (
                material.map.filter(|t| frame.resources.texture(*t).is_some()),
                material
                    .emissive_map
                    .filter(|t| frame.resources.texture(*t).is_some()),
            ),
            uniforms: DrawUniforms::new(model, material, lit),
            depth: model.w_axis.truncate().distance(eye),
        };
        if key.is_transparent() {
            transparent.push(item);
        } else {
            opaque.push(item);
        }
    }

    transparent.sort_by(|a, b| b.depth.total_cmp(&a.depth));
    opaque.extend(transparent);
    if opaque.len() > MAX_DRAWS {
        log::warn!(
            "Too many drawables ({} > {}), some will not be rendered",
            opaque.len(),
            MAX_DRAWS
        );
        opaque.truncate(MAX_DRAWS);
    }
    opaque
}

/// Summed ambient light plus up to [`MAX_LIGHTS`] directional and point lights.
pub fn collect_lights(frame: &FrameInput<'_>) -> ([f32; 3], Vec<LightUniform>) {
    let mut ambient = Vec3::ZERO;
    let mut lights = Vec::new();

    for id in frame.scene.attached() {
        if !frame.scene.is_visible(id) {
            continue;
        }
        let Some(light) = frame.scene.get(id).and_then(|n| n.kind.light()) else {
            continue;
        };
        let color = Vec3::from(light.color.to_linear()) * light.intensity.max(0.0);
        let position = frame.scene.world_matrix(id).w_axis.truncate();
        match light.kind {
            LightKind::Ambient => ambient += color,
            LightKind::Directional | LightKind::Point => {
                if lights.len() == MAX_LIGHTS {
                    continue;
                }
                // Directional lights shine from their position towards the origin.
                let (xyz, w) = match light.kind {
                    LightKind::Point => (position, 1.0),
                    _ if position.length_squared() > 0.0 => (position, 0.0),
                    _ => (Vec3::Y, 0.0),
                };
                lights.push(LightUniform {
                    position: xyz.extend(w).to_array(),
                    color: color.extend(1.0).to_array(),
                });
            }
        }
    }
    (ambient.to_array(), lights)
}

pub fn frame_uniforms(frame: &FrameInput<'_>, width: u32, height: u32) -> FrameUniforms {
    let camera = frame.camera.uniforms();
    let (ambient, collected) = collect_lights(frame);
    let mut lights = [LightUniform::default(); MAX_LIGHTS];
    lights[..collected.len()].copy_from_slice(&collected);

    let fog = match frame.scene.fog {
        Some(fog) => {
            let [r, g, b] = fog.color.to_linear();
            [r, g, b, fog.density.max(0.0)]
        }
        None => [0.0; 4],
    };

    FrameUniforms {
        view: camera.view,
        proj: camera.proj,
        eye: camera.eye,
        ambient: [ambient[0], ambient[1], ambient[2], 1.0],
        fog,
        viewport: [width as f32, height as f32, collected.len() as f32, 1.0],
        lights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::PerspectiveCamera;
    use crate::color::Rgb;
    use crate::post_processing::PostChain;
    use crate::resources::{Blending, Geometry, ResourceRegistry};
    use crate::scene_graph::{Light, Renderable, SceneGraph};

    struct Fixture {
        scene: SceneGraph,
        resources: ResourceRegistry,
        camera: PerspectiveCamera,
        post: PostChain,
    }

    impl Fixture {
        fn new() -> Self {
            let mut camera = PerspectiveCamera::default();
            camera.position = Vec3::new(0.0, 0.0, 10.0);
            Self {
                scene: SceneGraph::new(),
                resources: ResourceRegistry::new(),
                camera,
                post: PostChain::new(64, 64, 0.0),
            }
        }

        fn mesh(&mut self, material: Material, z: f32) -> NodeId {
            let geometry = self
                .resources
                .add_geometry(Geometry::from_positions(vec![[0.0; 3]; 3]));
            let material = self.resources.add_material(material);
            let id = self.scene.create(NodeKind::Mesh(Renderable {
                geometry,
                materials: vec![material],
            }));
            if let Some(node) = self.scene.get_mut(id) {
                node.transform.position.z = z;
            }
            self.scene.add(id);
            id
        }

        fn frame(&self) -> FrameInput<'_> {
            FrameInput {
                scene: &self.scene,
                resources: &self.resources,
                camera: &self.camera,
                post: &self.post,
            }
        }
    }

    fn glass() -> Material {
        let mut material = Material::new(MaterialKind::Basic);
        material.transparent = true;
        material.opacity = 0.5;
        material
    }

    #[test]
    fn test_transparent_drawn_last_far_to_near() {
        let mut fx = Fixture::new();
        let near = fx.mesh(glass(), 5.0);
        let solid = fx.mesh(Material::new(MaterialKind::Standard), 0.0);
        let far = fx.mesh(glass(), -5.0);

        let order: Vec<NodeId> = collect_draws(&fx.frame()).iter().map(|d| d.node).collect();
        assert_eq!(order, vec![solid, far, near]);
    }

    #[test]
    fn test_hidden_and_disposed_are_skipped() {
        let mut fx = Fixture::new();
        let hidden = fx.mesh(Material::new(MaterialKind::Basic), 0.0);
        if let Some(node) = fx.scene.get_mut(hidden) {
            node.visible = false;
        }
        let disposed = fx.mesh(Material::new(MaterialKind::Basic), 0.0);
        let geometry = fx.scene.get(disposed).and_then(|n| n.kind.renderable()).unwrap().geometry;
        fx.resources.dispose(crate::resources::ResourceId::Geometry(geometry));
        let kept = fx.mesh(Material::new(MaterialKind::Basic), 0.0);

        let draws = collect_draws(&fx.frame());
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].node, kept);
    }

    #[test]
    fn test_primitive_and_lighting_flags() {
        let mut fx = Fixture::new();
        let mut wire = Material::new(MaterialKind::Standard);
        wire.wireframe = true;
        wire.blending = Blending::Additive;
        fx.mesh(wire, 0.0);
        fx.mesh(Material::new(MaterialKind::Standard), 0.0);

        let draws = collect_draws(&fx.frame());
        let solid = &draws[0];
        assert_eq!(solid.key.primitive, Primitive::Triangles);
        assert_eq!(solid.uniforms.flags[0], 1.0);
        let wire = &draws[1];
        assert_eq!(wire.key.primitive, Primitive::Wireframe);
        assert_eq!(wire.key.blend, BlendMode::Additive);
        assert_eq!(wire.uniforms.flags[0], 0.0);
    }

    #[test]
    fn test_collect_lights() {
        let mut fx = Fixture::new();
        let ambient = fx.scene.create(NodeKind::Light(Light {
            kind: LightKind::Ambient,
            color: Rgb::WHITE,
            intensity: 0.5,
        }));
        fx.scene.add(ambient);
        let sun = fx.scene.create(NodeKind::Light(Light {
            kind: LightKind::Directional,
            color: Rgb::WHITE,
            intensity: 1.0,
        }));
        fx.scene.add(sun);
        if let Some(node) = fx.scene.get_mut(sun) {
            node.transform.position = Vec3::new(5.0, 5.0, 5.0);
        }

        let (ambient, lights) = collect_lights(&fx.frame());
        assert_eq!(ambient, [0.5, 0.5, 0.5]);
        assert_eq!(lights.len(), 1);
        assert_eq!(lights[0].position, [5.0, 5.0, 5.0, 0.0]);

        let uniforms = frame_uniforms(&fx.frame(), 64, 32);
        assert_eq!(uniforms.viewport, [64.0, 32.0, 1.0, 1.0]);
        assert_eq!(uniforms.fog[3], 0.02);

        fx.scene.fog = None;
        let uniforms = frame_uniforms(&fx.frame(), 64, 32);
        assert_eq!(uniforms.fog, [0.0; 4]);
    }

    #[test]
    fn test_uniform_sizes() {
        assert_eq!(std::mem::size_of::<DrawUniforms>(), 112);
        assert_eq!(std::mem::size_of::<FrameUniforms>(), 448);
    }
}
