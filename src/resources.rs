//! Registry of disposable GPU-side resources.
//!
//! Scene nodes refer to geometry, materials and textures by handle. The registry
//! owns the CPU copies and tracks which handles are live. Disposing a handle
//! drops its data, records it for the render backend to free its buffers, and
//! is a no-op if the handle was already disposed.

use std::collections::HashMap;

use crate::color::Rgb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// Any handle the registry hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceId {
    Geometry(GeometryHandle),
    Material(MaterialHandle),
    Texture(TextureHandle),
}

/// Vertex data for meshes, point clouds and lines.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Option<Vec<u32>>,
    /// Bumped on every mutation so the backend knows to re-upload.
    pub revision: u64,
}

impl Geometry {
    pub fn from_positions(positions: Vec<[f32; 3]>) -> Self {
        Self {
            positions,
            ..Default::default()
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty() && self.colors.len() == self.positions.len()
    }

    pub fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Fill `normals` with area-weighted vertex normals when they are missing.
    pub fn ensure_normals(&mut self) {
        if self.normals.len() == self.positions.len() {
            return;
        }
        let mut normals = vec![glam::Vec3::ZERO; self.positions.len()];
        let triangle_count = match &self.indices {
            Some(indices) => indices.len() / 3,
            None => self.positions.len() / 3,
        };
        for t in 0..triangle_count {
            let [a, b, c] = match &self.indices {
                Some(indices) => [
                    indices[t * 3] as usize,
                    indices[t * 3 + 1] as usize,
                    indices[t * 3 + 2] as usize,
                ],
                None => [t * 3, t * 3 + 1, t * 3 + 2],
            };
            if a >= normals.len() || b >= normals.len() || c >= normals.len() {
                continue;
            }
            let pa = glam::Vec3::from(self.positions[a]);
            let pb = glam::Vec3::from(self.positions[b]);
            let pc = glam::Vec3::from(self.positions[c]);
            let n = (pb - pa).cross(pc - pa);
            normals[a] += n;
            normals[b] += n;
            normals[c] += n;
        }
        self.normals = normals
            .into_iter()
            .map(|n| n.try_normalize().unwrap_or(glam::Vec3::Y).to_array())
            .collect();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Unlit flat color.
    Basic,
    /// Lit by the scene's ambient and directional lights.
    Standard,
    Points,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Blending {
    #[default]
    Normal,
    Additive,
}

#[derive(Debug, Clone)]
pub struct Material {
    pub kind: MaterialKind,
    pub color: Rgb,
    pub emissive: Rgb,
    pub emissive_intensity: f32,
    pub opacity: f32,
    pub transparent: bool,
    pub blending: Blending,
    pub vertex_colors: bool,
    pub depth_write: bool,
    /// Point size in world units.
    pub size: f32,
    pub wireframe: bool,
    pub map: Option<TextureHandle>,
    pub emissive_map: Option<TextureHandle>,
}

impl Material {
    pub fn new(kind: MaterialKind) -> Self {
        Self {
            kind,
            color: Rgb::WHITE,
            emissive: Rgb::BLACK,
            emissive_intensity: 1.0,
            opacity: 1.0,
            transparent: false,
            blending: Blending::Normal,
            vertex_colors: false,
            depth_write: true,
            size: 0.1,
            wireframe: false,
            map: None,
            emissive_map: None,
        }
    }

    /// Every texture reachable from this material's fields.
    pub fn textures(&self) -> impl Iterator<Item = TextureHandle> + '_ {
        self.map.into_iter().chain(self.emissive_map)
    }
}

/// RGBA8 image data.
#[derive(Debug, Clone)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<[u8; 4]>,
}

impl Texture {
    /// Horizontal gradient between two colors.
    pub fn gradient(from: Rgb, to: Rgb, width: u32) -> Self {
        let width = width.clamp(2, 1024);
        let pixels = (0..width)
            .map(|x| {
                let c = from.lerp(to, x as f32 / (width - 1) as f32);
                let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
                [byte(c.r), byte(c.g), byte(c.b), 255]
            })
            .collect();
        Self {
            width,
            height: 1,
            pixels,
        }
    }

    /// Square checkerboard, handy for debugging UVs.
    pub fn checker(a: Rgb, b: Rgb, size: u32, cells: u32) -> Self {
        let size = size.clamp(2, 1024);
        let cells = cells.clamp(1, size);
        let cell = (size / cells).max(1);
        let to_bytes = |c: Rgb| {
            let byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            [byte(c.r), byte(c.g), byte(c.b), 255]
        };
        let pixels = (0..size * size)
            .map(|i| {
                let (x, y) = (i % size, i / size);
                if ((x / cell) + (y / cell)) % 2 == 0 {
                    to_bytes(a)
                } else {
                    to_bytes(b)
                }
            })
            .collect();
        Self {
            width: size,
            height: size,
            pixels,
        }
    }
}

#[derive(Debug)]
enum Slot<T> {
    Live(T),
    Disposed,
}

impl<T> Slot<T> {
    fn live(&self) -> Option<&T> {
        match self {
            Slot::Live(v) => Some(v),
            Slot::Disposed => None,
        }
    }

    fn live_mut(&mut self) -> Option<&mut T> {
        match self {
            Slot::Live(v) => Some(v),
            Slot::Disposed => None,
        }
    }
}

/// Counts of live resources by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ResourceCounts {
    pub geometries: usize,
    pub materials: usize,
    pub textures: usize,
}

impl ResourceCounts {
    pub fn total(&self) -> usize {
        self.geometries + self.materials + self.textures
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    next_id: u64,
    geometries: HashMap<GeometryHandle, Slot<Geometry>>,
    materials: HashMap<MaterialHandle, Slot<Material>>,
    textures: HashMap<TextureHandle, Slot<Texture>>,
    dispose_counts: HashMap<ResourceId, u32>,
    released: Vec<ResourceId>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub fn add_geometry(&mut self, geometry: Geometry) -> GeometryHandle {
        let handle = GeometryHandle(self.alloc_id());
        self.geometries.insert(handle, Slot::Live(geometry));
        handle
    }

    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        let handle = MaterialHandle(self.alloc_id());
        self.materials.insert(handle, Slot::Live(material));
        handle
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureHandle {
        let handle = TextureHandle(self.alloc_id());
        self.textures.insert(handle, Slot::Live(texture));
        handle
    }

    pub fn geometry(&self, handle: GeometryHandle) -> Option<&Geometry> {
        self.geometries.get(&handle).and_then(Slot::live)
    }

    pub fn geometry_mut(&mut self, handle: GeometryHandle) -> Option<&mut Geometry> {
        self.geometries.get_mut(&handle).and_then(Slot::live_mut)
    }

    pub fn material(&self, handle: MaterialHandle) -> Option<&Material> {
        self.materials.get(&handle).and_then(Slot::live)
    }

    pub fn material_mut(&mut self, handle: MaterialHandle) -> Option<&mut Material> {
        self.materials.get_mut(&handle).and_then(Slot::live_mut)
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&Texture> {
        self.textures.get(&handle).and_then(Slot::live)
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        match id {
            ResourceId::Geometry(h) => self.geometry(h).is_some(),
            ResourceId::Material(h) => self.material(h).is_some(),
            ResourceId::Texture(h) => self.texture(h).is_some(),
        }
    }

    /// Dispose a resource. Returns `true` only if this call freed it.
    pub fn dispose(&mut self, id: ResourceId) -> bool {
        let freed = match id {
            ResourceId::Geometry(h) => Self::dispose_slot(&mut self.geometries, h),
            ResourceId::Material(h) => Self::dispose_slot(&mut self.materials, h),
            ResourceId::Texture(h) => Self::dispose_slot(&mut self.textures, h),
        };
        if freed {
            *self.dispose_counts.entry(id).or_insert(0) += 1;
            self.released.push(id);
        }
        freed
    }

    fn dispose_slot<K: std::hash::Hash + Eq, T>(map: &mut HashMap<K, Slot<T>>, key: K) -> bool {
        match map.get_mut(&key) {
            Some(slot @ Slot::Live(_)) => {
                *slot = Slot::Disposed;
                true
            }
            _ => false,
        }
    }

    /// How many times a resource has actually been freed (0 or 1).
    pub fn dispose_count(&self, id: ResourceId) -> u32 {
        self.dispose_counts.get(&id).copied().unwrap_or(0)
    }

    /// Handles freed since the last call, for the backend to drop GPU copies.
    pub fn take_released(&mut self) -> Vec<ResourceId> {
        std::mem::take(&mut self.released)
    }

    pub fn live_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .geometries
            .iter()
            .filter(|(_, s)| s.live().is_some())
            .map(|(h, _)| ResourceId::Geometry(*h))
            .chain(
                self.materials
                    .iter()
                    .filter(|(_, s)| s.live().is_some())
                    .map(|(h, _)| ResourceId::Material(*h)),
            )
            .chain(
                self.textures
                    .iter()
                    .filter(|(_, s)| s.live().is_some())
                    .map(|(h, _)| ResourceId::Texture(*h)),
            )
            .collect();
        ids.sort();
        ids
    }

    pub fn live_counts(&self) -> ResourceCounts {
        ResourceCounts {
            geometries: self.geometries.values().filter(|s| s.live().is_some()).count(),
            materials: self.materials.values().filter(|s| s.live().is_some()).count(),
            textures: self.textures.values().filter(|s| s.live().is_some()).count(),
        }
    }

    /// Dispose everything still live.
    pub fn dispose_all(&mut self) -> usize {
        self.live_ids()
            .into_iter()
            .filter(|id| self.dispose(*id))
            .count()
    }
}
