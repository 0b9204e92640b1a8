//! Host objects visible to payload scripts.
//!
//! Setup code sees `scene`, `camera`, `renderer` and `gfx`; animation code sees
//! the same plus `time` and `params`. Every binding holds a clone of the
//! [`Stage`] and borrows it only for the duration of a single call, so scripts
//! never observe a half-applied mutation.
//!
//! ```rhai
//! let orb = gfx.mesh(gfx.sphere(1.5), gfx.standard_material(#{ color: gfx.palette.primary }));
//! orb.name = "orb";
//! scene.add(orb);
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use glam::Vec3;
use rand::rngs::StdRng;
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map};

use crate::color::Rgb;
use crate::primitives;
use crate::resources::{
    Blending, Geometry, GeometryHandle, Material, MaterialHandle, MaterialKind, ResourceId,
    Texture, TextureHandle,
};
use crate::scene_graph::{Light, LightKind, NodeId, NodeKind, Renderable};
use crate::stage::Stage;

type ScriptResult<T> = Result<T, Box<EvalAltResult>>;

/// Largest texture edge a script may request.
const MAX_TEXTURE_SIZE: u32 = 1024;

// ============================================================================
// Argument conversion
// ============================================================================

/// Accept an integer or a float as `f32`.
pub fn num(value: &Dynamic, what: &str) -> ScriptResult<f32> {
    if let Ok(f) = value.as_float() {
        return Ok(f);
    }
    if let Ok(i) = value.as_int() {
        return Ok(i as f32);
    }
    Err(format!("{} must be a number, got {}", what, value.type_name()).into())
}

fn count(value: &Dynamic, what: &str) -> ScriptResult<u32> {
    let n = num(value, what)?;
    if !n.is_finite() || n < 0.0 {
        return Err(format!("{} must be a non-negative number", what).into());
    }
    Ok(n as u32)
}

/// Accept `0xrrggbb`, `"#rrggbb"`, a `Color` or `#{ r, g, b }`.
pub fn color_arg(value: &Dynamic) -> ScriptResult<Rgb> {
    if let Some(color) = value.clone().try_cast::<Rgb>() {
        return Ok(color);
    }
    if let Ok(i) = value.as_int() {
        if !(0..=0xff_ffff).contains(&i) {
            return Err(format!("invalid color 0x{:x}", i).into());
        }
        return Ok(Rgb::from_hex(i as u32));
    }
    if let Ok(s) = value.clone().into_string() {
        return s.parse::<Rgb>().map_err(|e| e.to_string().into());
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let channel = |key: &str| -> ScriptResult<f32> {
            match map.get(key) {
                Some(v) => num(v, key),
                None => Ok(0.0),
            }
        };
        return Ok(Rgb::new(channel("r")?, channel("g")?, channel("b")?));
    }
    Err(format!("invalid color value of type {}", value.type_name()).into())
}

fn vec3_arg(value: &Dynamic) -> ScriptResult<Vec3> {
    if let Some(v) = value.clone().try_cast::<Vec3>() {
        return Ok(v);
    }
    if let Some(arr) = value.clone().try_cast::<Array>() {
        if arr.len() == 3 {
            return Ok(Vec3::new(num(&arr[0], "x")?, num(&arr[1], "y")?, num(&arr[2], "z")?));
        }
    }
    if let Some(map) = value.clone().try_cast::<Map>() {
        let axis = |key: &str| map.get(key).map_or(Ok(0.0), |v| num(v, key));
        return Ok(Vec3::new(axis("x")?, axis("y")?, axis("z")?));
    }
    // A single number means a uniform vector, which is what `scale = 2` wants.
    if let Ok(n) = num(value, "vector") {
        return Ok(Vec3::splat(n));
    }
    Err(format!("invalid vector value of type {}", value.type_name()).into())
}

/// Flatten `[x, y, z, x, y, z, ...]` or `[vec3, vec3, ...]` into triples.
fn triples(values: &Array, what: &str) -> ScriptResult<Vec<[f32; 3]>> {
    if values.iter().all(|v| v.is_float() || v.is_int()) {
        if values.len() % 3 != 0 {
            return Err(format!("{} length must be a multiple of 3", what).into());
        }
        let mut out = Vec::with_capacity(values.len() / 3);
        for chunk in values.chunks(3) {
            out.push([num(&chunk[0], what)?, num(&chunk[1], what)?, num(&chunk[2], what)?]);
        }
        return Ok(out);
    }
    values
        .iter()
        .map(|v| vec3_arg(v).map(|v| v.to_array()))
        .collect()
}

fn color_triples(values: &Array) -> ScriptResult<Vec<[f32; 3]>> {
    if values.iter().all(|v| v.is_float()) {
        return triples(values, "colors");
    }
    values
        .iter()
        .map(|v| color_arg(v).map(Rgb::to_array))
        .collect()
}

// ============================================================================
// Handles
// ============================================================================

#[derive(Clone)]
pub struct SceneApi {
    stage: Stage,
}

#[derive(Clone)]
pub struct NodeRef {
    stage: Stage,
    id: NodeId,
}

#[derive(Clone)]
pub struct GeometryRef {
    stage: Stage,
    handle: GeometryHandle,
}

#[derive(Clone)]
pub struct MaterialRef {
    stage: Stage,
    handle: MaterialHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    handle: TextureHandle,
}

#[derive(Clone)]
pub struct CameraApi {
    stage: Stage,
}

#[derive(Clone)]
pub struct RendererApi {
    stage: Stage,
}

/// The `gfx` namespace: geometry, material, texture and node factories.
#[derive(Clone)]
pub struct GfxApi {
    stage: Stage,
    palette: (Rgb, Rgb),
    rng: Rc<RefCell<StdRng>>,
}

impl NodeRef {
    pub fn new(stage: Stage, id: NodeId) -> Self {
        Self { stage, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    fn with_node<T>(&self, f: impl FnOnce(&mut crate::scene_graph::Node) -> T) -> ScriptResult<T> {
        let mut scene = self.stage.scene.borrow_mut();
        match scene.get_mut(self.id) {
            Some(node) => Ok(f(node)),
            None => Err(format!("node {} no longer exists", self.id.0).into()),
        }
    }

    fn renderable(&self) -> ScriptResult<Renderable> {
        self.with_node(|node| node.kind.renderable().cloned())?
            .ok_or_else(|| "node has no geometry".into())
    }

    fn light_mut<T>(&self, f: impl FnOnce(&mut Light) -> T) -> ScriptResult<T> {
        self.with_node(|node| match &mut node.kind {
            NodeKind::Light(light) => Some(f(light)),
            _ => None,
        })?
        .ok_or_else(|| "node is not a light".into())
    }
}

impl GeometryRef {
    fn with_geometry<T>(&self, f: impl FnOnce(&mut Geometry) -> T) -> ScriptResult<T> {
        let mut resources = self.stage.resources.borrow_mut();
        match resources.geometry_mut(self.handle) {
            Some(geometry) => Ok(f(geometry)),
            None => Err("invalid geometry: already disposed".into()),
        }
    }

    fn vertex_index(&self, index: i64) -> ScriptResult<usize> {
        let len = self.with_geometry(|g| g.vertex_count())?;
        if index < 0 || index as usize >= len {
            return Err(format!("vertex index {} out of range (count {})", index, len).into());
        }
        Ok(index as usize)
    }
}

impl MaterialRef {
    fn with_material<T>(&self, f: impl FnOnce(&mut Material) -> T) -> ScriptResult<T> {
        let mut resources = self.stage.resources.borrow_mut();
        match resources.material_mut(self.handle) {
            Some(material) => Ok(f(material)),
            None => Err("invalid material: already disposed".into()),
        }
    }

    fn set_texture(&self, value: &Dynamic, emissive: bool) -> ScriptResult<()> {
        let texture = if value.is_unit() {
            None
        } else {
            let texture = value
                .clone()
                .try_cast::<TextureRef>()
                .ok_or_else(|| -> Box<EvalAltResult> { "map must be a texture or ()".into() })?;
            if !self
                .stage
                .resources
                .borrow()
                .is_live(ResourceId::Texture(texture.handle))
            {
                return Err("invalid texture: already disposed".into());
            }
            Some(texture.handle)
        };
        self.with_material(|m| {
            if emissive {
                m.emissive_map = texture;
            } else {
                m.map = texture;
            }
        })
    }
}

impl GfxApi {
    pub fn new(stage: Stage, palette: (Rgb, Rgb), rng: Rc<RefCell<StdRng>>) -> Self {
        Self { stage, palette, rng }
    }

    fn add_geometry(&self, geometry: Geometry) -> GeometryRef {
        let handle = self.stage.resources.borrow_mut().add_geometry(geometry);
        GeometryRef {
            stage: self.stage.clone(),
            handle,
        }
    }

    fn material(&self, kind: MaterialKind, options: &Map) -> ScriptResult<MaterialRef> {
        let mut material = Material::new(kind);
        for (key, value) in options {
            apply_material_option(&self.stage, &mut material, key.as_str(), value)?;
        }
        let handle = self.stage.resources.borrow_mut().add_material(material);
        Ok(MaterialRef {
            stage: self.stage.clone(),
            handle,
        })
    }

    fn renderable(&self, geometry: &GeometryRef, materials: &Dynamic) -> ScriptResult<Renderable> {
        let resources = self.stage.resources.borrow();
        if !resources.is_live(ResourceId::Geometry(geometry.handle)) {
            return Err("invalid geometry: already disposed".into());
        }
        let mut handles = Vec::new();
        let list: Array = match materials.clone().try_cast::<Array>() {
            Some(arr) => arr,
            None => vec![materials.clone()],
        };
        for item in list {
            let material = item.try_cast::<MaterialRef>().ok_or_else(
                || -> Box<EvalAltResult> { "expected a material or an array of materials".into() },
            )?;
            if !resources.is_live(ResourceId::Material(material.handle)) {
                return Err("invalid material: already disposed".into());
            }
            handles.push(material.handle);
        }
        if handles.is_empty() {
            return Err("at least one material is required".into());
        }
        Ok(Renderable {
            geometry: geometry.handle,
            materials: handles,
        })
    }

    fn node(&self, kind: NodeKind) -> NodeRef {
        let id = self.stage.scene.borrow_mut().create(kind);
        NodeRef::new(self.stage.clone(), id)
    }

    fn light(&self, kind: LightKind, color: &Dynamic, intensity: &Dynamic) -> ScriptResult<NodeRef> {
        let light = Light {
            kind,
            color: color_arg(color)?,
            intensity: num(intensity, "intensity")?,
        };
        Ok(self.node(NodeKind::Light(light)))
    }

    fn texture(&self, texture: Texture) -> TextureRef {
        let handle = self.stage.resources.borrow_mut().add_texture(texture);
        TextureRef { handle }
    }

    fn random(&self) -> f32 {
        self.rng.borrow_mut().gen::<f32>()
    }
}

fn apply_material_option(
    stage: &Stage,
    material: &mut Material,
    key: &str,
    value: &Dynamic,
) -> ScriptResult<()> {
    match key {
        "color" => material.color = color_arg(value)?,
        "emissive" => material.emissive = color_arg(value)?,
        "emissive_intensity" => material.emissive_intensity = num(value, key)?,
        "opacity" => {
            material.opacity = num(value, key)?.clamp(0.0, 1.0);
            if material.opacity < 1.0 {
                material.transparent = true;
            }
        }
        "transparent" => material.transparent = bool_arg(value, key)?,
        "size" => material.size = num(value, key)?.max(0.0),
        "wireframe" => material.wireframe = bool_arg(value, key)?,
        "vertex_colors" => material.vertex_colors = bool_arg(value, key)?,
        "depth_write" => material.depth_write = bool_arg(value, key)?,
        "blending" => material.blending = blending_arg(value)?,
        "map" | "emissive_map" => {
            let texture = value.clone().try_cast::<TextureRef>().ok_or_else(
                || -> Box<EvalAltResult> { format!("{} must be a texture", key).into() },
            )?;
            if !stage.resources.borrow().is_live(ResourceId::Texture(texture.handle)) {
                return Err("invalid texture: already disposed".into());
            }
            if key == "map" {
                material.map = Some(texture.handle);
            } else {
                material.emissive_map = Some(texture.handle);
            }
        }
        other => return Err(format!("invalid material option '{}'", other).into()),
    }
    Ok(())
}

fn bool_arg(value: &Dynamic, what: &str) -> ScriptResult<bool> {
    value
        .as_bool()
        .map_err(|_| format!("{} must be true or false", what).into())
}

fn blending_arg(value: &Dynamic) -> ScriptResult<Blending> {
    let name = value
        .clone()
        .into_string()
        .map_err(|_| -> Box<EvalAltResult> { "blending must be a string".into() })?;
    match name.as_str() {
        "normal" => Ok(Blending::Normal),
        "additive" => Ok(Blending::Additive),
        other => Err(format!("invalid blending '{}'", other).into()),
    }
}

fn node_or_unit(stage: &Stage, id: Option<NodeId>) -> Dynamic {
    match id {
        Some(id) => Dynamic::from(NodeRef::new(stage.clone(), id)),
        None => Dynamic::UNIT,
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Register every binding type with `engine`.
pub fn register_api(engine: &mut Engine) {
    register_math(engine);
    register_scene(engine);
    register_node(engine);
    register_geometry(engine);
    register_material(engine);
    register_camera(engine);
    register_renderer(engine);
    register_gfx(engine);
}

/// Push the setup-time bindings into `scope`.
pub fn push_bindings(scope: &mut rhai::Scope<'_>, stage: &Stage, gfx: &GfxApi) {
    scope.push("scene", SceneApi { stage: stage.clone() });
    scope.push("camera", CameraApi { stage: stage.clone() });
    scope.push("renderer", RendererApi { stage: stage.clone() });
    scope.push("gfx", gfx.clone());
}

fn register_math(engine: &mut Engine) {
    engine.register_type_with_name::<Vec3>("Vec3");
    engine.register_get("x", |v: &mut Vec3| v.x);
    engine.register_set("x", |v: &mut Vec3, x: Dynamic| -> ScriptResult<()> {
        v.x = num(&x, "x")?;
        Ok(())
    });
    engine.register_get("y", |v: &mut Vec3| v.y);
    engine.register_set("y", |v: &mut Vec3, y: Dynamic| -> ScriptResult<()> {
        v.y = num(&y, "y")?;
        Ok(())
    });
    engine.register_get("z", |v: &mut Vec3| v.z);
    engine.register_set("z", |v: &mut Vec3, z: Dynamic| -> ScriptResult<()> {
        v.z = num(&z, "z")?;
        Ok(())
    });
    engine.register_fn("+", |a: Vec3, b: Vec3| a + b);
    engine.register_fn("-", |a: Vec3, b: Vec3| a - b);
    engine.register_fn("*", |a: Vec3, s: f32| a * s);
    engine.register_fn("*", |s: f32, a: Vec3| a * s);
    engine.register_fn("length", |v: &mut Vec3| v.length());
    engine.register_fn("normalize", |v: &mut Vec3| v.normalize_or_zero());
    engine.register_fn("dot", |a: &mut Vec3, b: Vec3| a.dot(b));
    engine.register_fn("cross", |a: &mut Vec3, b: Vec3| a.cross(b));
    engine.register_fn("to_string", |v: &mut Vec3| format!("({}, {}, {})", v.x, v.y, v.z));
    engine.register_fn("to_debug", |v: &mut Vec3| format!("Vec3({}, {}, {})", v.x, v.y, v.z));

    engine.register_type_with_name::<Rgb>("Color");
    engine.register_get("r", |c: &mut Rgb| c.r);
    engine.register_get("g", |c: &mut Rgb| c.g);
    engine.register_get("b", |c: &mut Rgb| c.b);
    engine.register_get("hex", |c: &mut Rgb| c.to_hex() as i64);
    engine.register_fn("lerp", |a: &mut Rgb, b: Rgb, t: Dynamic| -> ScriptResult<Rgb> {
        Ok(a.lerp(b, num(&t, "t")?))
    });
    engine.register_fn("to_string", |c: &mut Rgb| c.to_string());
    engine.register_fn("to_debug", |c: &mut Rgb| format!("Color({})", c));
}

fn register_scene(engine: &mut Engine) {
    engine.register_type_with_name::<SceneApi>("Scene");

    engine.register_fn("add", |s: &mut SceneApi, node: NodeRef| -> ScriptResult<()> {
        if s.stage.scene.borrow_mut().add(node.id) {
            Ok(())
        } else {
            Err(format!("node {} no longer exists", node.id.0).into())
        }
    });
    engine.register_fn("remove", |s: &mut SceneApi, node: NodeRef| {
        s.stage.scene.borrow_mut().detach(node.id)
    });
    engine.register_fn("get", |s: &mut SceneApi, name: &str| {
        let id = s.stage.scene.borrow().get_by_name(name);
        node_or_unit(&s.stage, id)
    });
    engine.register_fn("has", |s: &mut SceneApi, name: &str| {
        s.stage.scene.borrow().get_by_name(name).is_some()
    });
    engine.register_get("children", |s: &mut SceneApi| -> Array {
        let ids = s.stage.scene.borrow().root_children().to_vec();
        ids.into_iter()
            .map(|id| Dynamic::from(NodeRef::new(s.stage.clone(), id)))
            .collect()
    });
    engine.register_get("background", |s: &mut SceneApi| s.stage.scene.borrow().background);
    engine.register_set("background", |s: &mut SceneApi, value: Dynamic| -> ScriptResult<()> {
        let color = color_arg(&value)?;
        let mut scene = s.stage.scene.borrow_mut();
        scene.background = color;
        if let Some(fog) = scene.fog.as_mut() {
            fog.color = color;
        }
        Ok(())
    });
    engine.register_get("fog_density", |s: &mut SceneApi| {
        s.stage.scene.borrow().fog.map_or(0.0, |f| f.density)
    });
    engine.register_set("fog_density", |s: &mut SceneApi, value: Dynamic| -> ScriptResult<()> {
        let density = num(&value, "fog_density")?.max(0.0);
        let mut scene = s.stage.scene.borrow_mut();
        let color = scene.background;
        scene.fog = if density > 0.0 {
            Some(crate::scene_graph::Fog { color, density })
        } else {
            None
        };
        Ok(())
    });
}

fn register_node(engine: &mut Engine) {
    engine.register_type_with_name::<NodeRef>("Node");

    engine.register_get("id", |n: &mut NodeRef| n.id.0 as i64);
    engine.register_get("kind", |n: &mut NodeRef| -> ScriptResult<String> {
        n.with_node(|node| node.kind.type_name().to_string())
    });
    engine.register_get("name", |n: &mut NodeRef| -> ScriptResult<String> {
        n.with_node(|node| node.name.clone())
    });
    engine.register_set("name", |n: &mut NodeRef, name: &str| -> ScriptResult<()> {
        n.with_node(|node| node.name = name.to_string())
    });
    engine.register_get("visible", |n: &mut NodeRef| -> ScriptResult<bool> {
        n.with_node(|node| node.visible)
    });
    engine.register_set("visible", |n: &mut NodeRef, visible: bool| -> ScriptResult<()> {
        n.with_node(|node| node.visible = visible)
    });

    engine.register_get("position", |n: &mut NodeRef| -> ScriptResult<Vec3> {

        n.with_node(|node| node.transform.position)

    });
    engine.register_set("position", |n: &mut NodeRef, v: Dynamic| -> ScriptResult<()> {
        let v = vec3_arg(&v)?;
        n.with_node(|node| node.transform.position = v)
    });
    engine.register_get("rotation", |n: &mut NodeRef| -> ScriptResult<Vec3> {
        n.with_node(|node| node.transform.rotation)
    });
    engine.register_set("rotation", |n: &mut NodeRef, v: Dynamic| -> ScriptResult<()> {
        let v = vec3_arg(&v)?;
        n.with_node(|node| node.transform.rotation = v)
    });
    engine.register_get("scale", |n: &mut NodeRef| -> ScriptResult<Vec3> {
        n.with_node(|node| node.transform.scale)
    });
    engine.register_set("scale", |n: &mut NodeRef, v: Dynamic| -> ScriptResult<()> {
        let v = vec3_arg(&v)?;
        n.with_node(|node| node.transform.scale = v)
    });
    engine.register_fn(
        "set_position",
        |n: &mut NodeRef, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let v = Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?);
            n.with_node(|node| node.transform.position = v)
        },
    );
    engine.register_fn(
        "set_rotation",
        |n: &mut NodeRef, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let v = Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?);
            n.with_node(|node| node.transform.rotation = v)
        },
    );
    engine.register_fn(
        "set_scale",
        |n: &mut NodeRef, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let v = Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?);
            n.with_node(|node| node.transform.scale = v)
        },
    );

    engine.register_fn("add", |n: &mut NodeRef, child: NodeRef| -> ScriptResult<()> {
        if n.stage.scene.borrow_mut().add_child(n.id, child.id) {
            Ok(())
        } else {
            Err("invalid child: missing node or cycle".into())
        }
    });
    engine.register_fn("remove", |n: &mut NodeRef, child: NodeRef| {
        let mut scene = n.stage.scene.borrow_mut();
        let is_child = scene.get(child.id).and_then(|c| c.parent()) == Some(n.id);
        is_child && scene.detach(child.id)
    });
    engine.register_get("children", |n: &mut NodeRef| -> ScriptResult<Array> {
        let ids = n.with_node(|node| node.children().to_vec())?;
        Ok(ids
            .into_iter()
            .map(|id| Dynamic::from(NodeRef::new(n.stage.clone(), id)))
            .collect())
    });
    engine.register_fn("child", |n: &mut NodeRef, name: &str| -> ScriptResult<Dynamic> {
        let ids = n.with_node(|node| node.children().to_vec())?;
        let scene = n.stage.scene.borrow();
        let found = ids
            .into_iter()
            .find(|id| scene.get(*id).is_some_and(|c| c.name == name));
        Ok(node_or_unit(&n.stage, found))
    });

    engine.register_get("geometry", |n: &mut NodeRef| -> ScriptResult<GeometryRef> {
        let r = n.renderable()?;
        Ok(GeometryRef {
            stage: n.stage.clone(),
            handle: r.geometry,
        })
    });
    engine.register_get("material", |n: &mut NodeRef| -> ScriptResult<MaterialRef> {
        let r = n.renderable()?;
        let handle = r
            .materials
            .first()
            .copied()
            .ok_or_else(|| -> Box<EvalAltResult> { "node has no material".into() })?;
        Ok(MaterialRef {
            stage: n.stage.clone(),
            handle,
        })
    });

    engine.register_get("intensity", |n: &mut NodeRef| -> ScriptResult<f32> {

        n.light_mut(|l| l.intensity)

    });
    engine.register_set("intensity", |n: &mut NodeRef, v: Dynamic| -> ScriptResult<()> {
        let v = num(&v, "intensity")?;
        n.light_mut(|l| l.intensity = v)
    });
    engine.register_get("color", |n: &mut NodeRef| -> ScriptResult<Rgb> {
        n.light_mut(|l| l.color)
    });
    engine.register_set("color", |n: &mut NodeRef, v: Dynamic| -> ScriptResult<()> {
        let c = color_arg(&v)?;
        n.light_mut(|l| l.color = c)
    });
}

fn register_geometry(engine: &mut Engine) {
    engine.register_type_with_name::<GeometryRef>("Geometry");

    engine.register_get("count", |g: &mut GeometryRef| -> ScriptResult<i64> {
        g.with_geometry(|geo| geo.vertex_count() as i64)
    });
    engine.register_fn("get_position", |g: &mut GeometryRef, i: i64| -> ScriptResult<Vec3> {
        let i = g.vertex_index(i)?;
        g.with_geometry(|geo| Vec3::from(geo.positions[i]))
    });
    engine.register_fn(
        "set_position",
        |g: &mut GeometryRef, i: i64, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let i = g.vertex_index(i)?;
            let p = [num(&x, "x")?, num(&y, "y")?, num(&z, "z")?];
            g.with_geometry(|geo| {
                geo.positions[i] = p;
                geo.touch();
            })
        },
    );
    engine.register_fn(
        "set_position",
        |g: &mut GeometryRef, i: i64, v: Vec3| -> ScriptResult<()> {
            let i = g.vertex_index(i)?;
            g.with_geometry(|geo| {
                geo.positions[i] = v.to_array();
                geo.touch();
            })
        },
    );
    engine.register_fn(
        "set_color",
        |g: &mut GeometryRef, i: i64, color: Dynamic| -> ScriptResult<()> {
            let i = g.vertex_index(i)?;
            let c = color_arg(&color)?.to_array();
            g.with_geometry(|geo| {
                if geo.colors.len() != geo.positions.len() {
                    geo.colors = vec![[1.0, 1.0, 1.0]; geo.positions.len()];
                }
                geo.colors[i] = c;
                geo.touch();
            })
        },
    );
    engine.register_fn("compute_normals", |g: &mut GeometryRef| -> ScriptResult<()> {
        g.with_geometry(|geo| {
            geo.normals.clear();
            geo.ensure_normals();
            geo.touch();
        })
    });
    engine.register_fn("dispose", |g: &mut GeometryRef| {
        g.stage
            .resources
            .borrow_mut()
            .dispose(ResourceId::Geometry(g.handle))
    });
}

fn register_material(engine: &mut Engine) {
    engine.register_type_with_name::<MaterialRef>("Material");
    engine.register_type_with_name::<TextureRef>("Texture");

    engine.register_get("color", |m: &mut MaterialRef| -> ScriptResult<Rgb> {

        m.with_material(|mat| mat.color)

    });
    engine.register_set("color", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        let c = color_arg(&v)?;
        m.with_material(|mat| mat.color = c)
    });
    engine.register_get("emissive", |m: &mut MaterialRef| -> ScriptResult<Rgb> {
        m.with_material(|mat| mat.emissive)
    });
    engine.register_set("emissive", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        let c = color_arg(&v)?;
        m.with_material(|mat| mat.emissive = c)
    });
    engine.register_get("emissive_intensity", |m: &mut MaterialRef| -> ScriptResult<f32> {
        m.with_material(|mat| mat.emissive_intensity)
    });
    engine.register_set("emissive_intensity", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        let v = num(&v, "emissive_intensity")?;
        m.with_material(|mat| mat.emissive_intensity = v)
    });
    engine.register_get("opacity", |m: &mut MaterialRef| -> ScriptResult<f32> {
        m.with_material(|mat| mat.opacity)
    });
    engine.register_set("opacity", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        let v = num(&v, "opacity")?.clamp(0.0, 1.0);
        m.with_material(|mat| {
            mat.opacity = v;
            if v < 1.0 {
                mat.transparent = true;
            }
        })
    });
    engine.register_get("size", |m: &mut MaterialRef| -> ScriptResult<f32> {
        m.with_material(|mat| mat.size)
    });
    engine.register_set("size", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        let v = num(&v, "size")?.max(0.0);
        m.with_material(|mat| mat.size = v)
    });
    engine.register_get("wireframe", |m: &mut MaterialRef| -> ScriptResult<bool> {
        m.with_material(|mat| mat.wireframe)
    });
    engine.register_set("wireframe", |m: &mut MaterialRef, v: bool| -> ScriptResult<()> {
        m.with_material(|mat| mat.wireframe = v)
    });
    engine.register_set("map", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        m.set_texture(&v, false)
    });
    engine.register_set("emissive_map", |m: &mut MaterialRef, v: Dynamic| -> ScriptResult<()> {
        m.set_texture(&v, true)
    });
    engine.register_fn("dispose", |m: &mut MaterialRef| {
        m.stage
            .resources
            .borrow_mut()
            .dispose(ResourceId::Material(m.handle))
    });
}

fn register_camera(engine: &mut Engine) {
    engine.register_type_with_name::<CameraApi>("Camera");

    engine.register_get("position", |c: &mut CameraApi| c.stage.camera.borrow().position);
    engine.register_set("position", |c: &mut CameraApi, v: Dynamic| -> ScriptResult<()> {
        c.stage.camera.borrow_mut().position = vec3_arg(&v)?;
        Ok(())
    });
    engine.register_fn(
        "set_position",
        |c: &mut CameraApi, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            c.stage.camera.borrow_mut().position =
                Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?);
            Ok(())
        },
    );
    engine.register_fn(
        "look_at",
        |c: &mut CameraApi, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<()> {
            let target = Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?);
            c.stage.camera.borrow_mut().look_at(target);
            Ok(())
        },
    );
    engine.register_fn("look_at", |c: &mut CameraApi, target: Vec3| {
        c.stage.camera.borrow_mut().look_at(target);
    });
    engine.register_get("fov", |c: &mut CameraApi| c.stage.camera.borrow().fov);
    engine.register_set("fov", |c: &mut CameraApi, v: Dynamic| -> ScriptResult<()> {
        c.stage.camera.borrow_mut().fov = num(&v, "fov")?.clamp(1.0, 179.0);
        Ok(())
    });
    engine.register_get("aspect", |c: &mut CameraApi| c.stage.camera.borrow().aspect);
}

fn register_renderer(engine: &mut Engine) {
    engine.register_type_with_name::<RendererApi>("Renderer");

    engine.register_get("width", |r: &mut RendererApi| r.stage.renderer.borrow().width as i64);
    engine.register_get("height", |r: &mut RendererApi| r.stage.renderer.borrow().height as i64);
    engine.register_get("pixel_ratio", |r: &mut RendererApi| {
        r.stage.renderer.borrow().pixel_ratio
    });
    engine.register_get("frame", |r: &mut RendererApi| {
        r.stage.renderer.borrow().frames_rendered as i64
    });
    engine.register_get("exposure", |r: &mut RendererApi| r.stage.renderer.borrow().exposure);
    engine.register_set("exposure", |r: &mut RendererApi, v: Dynamic| -> ScriptResult<()> {
        r.stage.renderer.borrow_mut().exposure = num(&v, "exposure")?.max(0.0);
        Ok(())
    });
}

fn register_gfx(engine: &mut Engine) {
    engine.register_type_with_name::<GfxApi>("Gfx");

    // Geometry
    engine.register_fn(
        "box",
        |g: &mut GfxApi, w: Dynamic, h: Dynamic, d: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::box_geometry(num(&w, "width")?, num(&h, "height")?, num(&d, "depth")?);
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn("sphere", |g: &mut GfxApi, r: Dynamic| -> ScriptResult<GeometryRef> {
        Ok(g.add_geometry(primitives::sphere_geometry(num(&r, "radius")?, 32, 16)))
    });
    engine.register_fn(
        "sphere",
        |g: &mut GfxApi, r: Dynamic, ws: Dynamic, hs: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::sphere_geometry(
                num(&r, "radius")?,
                count(&ws, "width_segments")?,
                count(&hs, "height_segments")?,
            );
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn(
        "torus",
        |g: &mut GfxApi, r: Dynamic, tube: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::torus_geometry(num(&r, "radius")?, num(&tube, "tube")?, 16, 64);
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn(
        "torus",
        |g: &mut GfxApi, r: Dynamic, tube: Dynamic, rs: Dynamic, ts: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::torus_geometry(
                num(&r, "radius")?,
                num(&tube, "tube")?,
                count(&rs, "radial_segments")?,
                count(&ts, "tubular_segments")?,
            );
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn(
        "plane",
        |g: &mut GfxApi, w: Dynamic, h: Dynamic| -> ScriptResult<GeometryRef> {
            Ok(g.add_geometry(primitives::plane_geometry(num(&w, "width")?, num(&h, "height")?, 1, 1)))
        },
    );
    engine.register_fn(
        "plane",
        |g: &mut GfxApi, w: Dynamic, h: Dynamic, ws: Dynamic, hs: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::plane_geometry(
                num(&w, "width")?,
                num(&h, "height")?,
                count(&ws, "width_segments")?,
                count(&hs, "height_segments")?,
            );
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn(
        "cylinder",
        |g: &mut GfxApi, top: Dynamic, bottom: Dynamic, h: Dynamic| -> ScriptResult<GeometryRef> {
            let geo = primitives::cylinder_geometry(
                num(&top, "radius_top")?,
                num(&bottom, "radius_bottom")?,
                num(&h, "height")?,
                32,
            );
            Ok(g.add_geometry(geo))
        },
    );
    engine.register_fn(
        "buffer_geometry",
        |g: &mut GfxApi, positions: Array| -> ScriptResult<GeometryRef> {
            Ok(g.add_geometry(Geometry::from_positions(triples(&positions, "positions")?)))
        },
    );
    engine.register_fn(
        "buffer_geometry",
        |g: &mut GfxApi, positions: Array, colors: Array| -> ScriptResult<GeometryRef> {
            let mut geo = Geometry::from_positions(triples(&positions, "positions")?);
            let colors = color_triples(&colors)?;
            if colors.len() != geo.positions.len() {
                return Err(format!(
                    "invalid colors: {} entries for {} positions",
                    colors.len(),
                    geo.positions.len()
                )
                .into());
            }
            geo.colors = colors;
            Ok(g.add_geometry(geo))
        },
    );

    // Materials
    for (name, kind) in [
        ("basic_material", MaterialKind::Basic),
        ("standard_material", MaterialKind::Standard),
        ("points_material", MaterialKind::Points),
        ("line_material", MaterialKind::Line),
    ] {
        engine.register_fn(name, move |g: &mut GfxApi, options: Map| -> ScriptResult<MaterialRef> {
            g.material(kind, &options)
        });
        engine.register_fn(name, move |g: &mut GfxApi| -> ScriptResult<MaterialRef> {
            g.material(kind, &Map::new())
        });
    }

    // Nodes
    engine.register_fn(
        "mesh",
        |g: &mut GfxApi, geometry: GeometryRef, materials: Dynamic| -> ScriptResult<NodeRef> {
            let r = g.renderable(&geometry, &materials)?;
            Ok(g.node(NodeKind::Mesh(r)))
        },
    );
    engine.register_fn(
        "points",
        |g: &mut GfxApi, geometry: GeometryRef, materials: Dynamic| -> ScriptResult<NodeRef> {
            let r = g.renderable(&geometry, &materials)?;
            Ok(g.node(NodeKind::Points(r)))
        },
    );
    engine.register_fn(
        "line",
        |g: &mut GfxApi, geometry: GeometryRef, materials: Dynamic| -> ScriptResult<NodeRef> {
            let r = g.renderable(&geometry, &materials)?;
            Ok(g.node(NodeKind::Line(r)))
        },
    );
    engine.register_fn("group", |g: &mut GfxApi| g.node(NodeKind::Group));
    engine.register_fn(
        "ambient_light",
        |g: &mut GfxApi, color: Dynamic, intensity: Dynamic| -> ScriptResult<NodeRef> {
            g.light(LightKind::Ambient, &color, &intensity)
        },
    );
    engine.register_fn(
        "directional_light",
        |g: &mut GfxApi, color: Dynamic, intensity: Dynamic| -> ScriptResult<NodeRef> {
            g.light(LightKind::Directional, &color, &intensity)
        },
    );
    engine.register_fn(
        "point_light",
        |g: &mut GfxApi, color: Dynamic, intensity: Dynamic| -> ScriptResult<NodeRef> {
            g.light(LightKind::Point, &color, &intensity)
        },
    );

    // Textures
    engine.register_fn(
        "gradient_texture",
        |g: &mut GfxApi, from: Dynamic, to: Dynamic| -> ScriptResult<TextureRef> {
            Ok(g.texture(Texture::gradient(color_arg(&from)?, color_arg(&to)?, 256)))
        },
    );
    engine.register_fn(
        "checker_texture",
        |g: &mut GfxApi, a: Dynamic, b: Dynamic, cells: Dynamic| -> ScriptResult<TextureRef> {
            let cells = count(&cells, "cells")?.clamp(1, 64);
            let size = (cells * 32).min(MAX_TEXTURE_SIZE);
            Ok(g.texture(Texture::checker(color_arg(&a)?, color_arg(&b)?, size, cells)))
        },
    );

    // Helpers
    engine.register_fn("color", |_: &mut GfxApi, value: Dynamic| color_arg(&value));
    engine.register_fn(
        "rgb",
        |_: &mut GfxApi, r: Dynamic, g: Dynamic, b: Dynamic| -> ScriptResult<Rgb> {
            Ok(Rgb::new(num(&r, "r")?, num(&g, "g")?, num(&b, "b")?))
        },
    );
    engine.register_fn(
        "vec3",
        |_: &mut GfxApi, x: Dynamic, y: Dynamic, z: Dynamic| -> ScriptResult<Vec3> {
            Ok(Vec3::new(num(&x, "x")?, num(&y, "y")?, num(&z, "z")?))
        },
    );
    engine.register_fn("random", |g: &mut GfxApi| g.random());
    engine.register_fn(
        "random",
        |g: &mut GfxApi, min: Dynamic, max: Dynamic| -> ScriptResult<f32> {
            let (min, max) = (num(&min, "min")?, num(&max, "max")?);
            Ok(min + (max - min) * g.random())
        },
    );
    engine.register_get("palette", |g: &mut GfxApi| -> Map {
        let mut map = Map::new();
        map.insert("primary".into(), Dynamic::from(g.palette.0));
        map.insert("secondary".into(), Dynamic::from(g.palette.1));
        map
    });
}
