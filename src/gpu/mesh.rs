use std::collections::HashSet;

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::resources::Geometry;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub color: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    const ATTRIBS: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x3,
        3 => Float32x2,
    ];

    pub fn desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBS,
        }
    }

    /// Same layout stepped per instance; point clouds draw one quad per vertex.
    pub fn instance_desc<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            step_mode: wgpu::VertexStepMode::Instance,
            ..Self::desc()
        }
    }
}

/// Interleave a geometry's attributes. Missing attributes get neutral values.
pub fn build_vertices(geometry: &Geometry) -> Vec<Vertex> {
    let has_colors = geometry.has_colors();
    geometry
        .positions
        .iter()
        .enumerate()
        .map(|(i, position)| Vertex {
            position: *position,
            normal: geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]),
            color: if has_colors {
                let [r, g, b] = geometry.colors[i];
                crate::color::Rgb::new(r, g, b).to_linear()
            } else {
                [1.0, 1.0, 1.0]
            },
            uv: geometry.uvs.get(i).copied().unwrap_or([0.0, 0.0]),
        })
        .collect()
}

/// Triangle indices for a geometry, dropping any that point past the vertex data.
pub fn triangle_indices(geometry: &Geometry) -> Vec<u32> {
    let count = geometry.vertex_count() as u32;
    match &geometry.indices {
        Some(indices) => indices
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|i| *i < count))
            .flatten()
            .copied()
            .collect(),
        None => (0..count - count % 3).collect(),
    }
}

/// Unique edges of a triangle list, as a line list.
pub fn extract_edges(indices: &[u32]) -> Vec<u32> {
    let mut seen = HashSet::new();
    let mut edges = Vec::new();
    for tri in indices.chunks_exact(3) {
        for (a, b) in [(tri[0], tri[1]), (tri[1], tri[2]), (tri[2], tri[0])] {
            let key = (a.min(b), a.max(b));
            if seen.insert(key) {
                edges.push(a);
                edges.push(b);
            }
        }
    }
    edges
}

/// A geometry uploaded to the GPU.
pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub vertex_count: u32,
    pub index_buffer: Option<wgpu::Buffer>,
    pub index_count: u32,
    pub edge_buffer: Option<wgpu::Buffer>,
    pub edge_count: u32,
    pub revision: u64,
}

impl GpuGeometry {
    /// Returns `None` for geometries with no vertices.
    pub fn upload(device: &wgpu::Device, geometry: &Geometry, label: &str) -> Option<Self> {
        let vertices = build_vertices(geometry);
        if vertices.is_empty() {
            return None;
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let indices = triangle_indices(geometry);
        let edges = extract_edges(&indices);
        let index_buffer = (!indices.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Geometry Index Buffer"),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });
        let edge_buffer = (!edges.is_empty()).then(|| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Geometry Edge Buffer"),
                contents: bytemuck::cast_slice(&edges),
                usage: wgpu::BufferUsages::INDEX,
            })
        });

        Some(Self {
            vertex_buffer,
            vertex_count: vertices.len() as u32,
            index_buffer,
            index_count: indices.len() as u32,
            edge_buffer,
            edge_count: edges.len() as u32,
            revision: geometry.revision,
        })
    }
}
