//! Procedural geometry builders exposed to payload scripts through `gfx`.
//!
//! All shapes are centered at the origin with Y up and carry positions,
//! normals, uvs and indices.

use std::f32::consts::{PI, TAU};

use crate::resources::Geometry;

/// Segment counts are clamped to this to keep a single call from exhausting memory.
pub const MAX_SEGMENTS: u32 = 512;

fn clamp_segments(value: u32, min: u32) -> u32 {
    value.clamp(min, MAX_SEGMENTS)
}

#[derive(Default)]
struct Builder {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    uvs: Vec<[f32; 2]>,
    indices: Vec<u32>,
}

impl Builder {
    fn vertex(&mut self, position: [f32; 3], normal: [f32; 3], uv: [f32; 2]) -> u32 {
        self.positions.push(position);
        self.normals.push(normal);
        self.uvs.push(uv);
        (self.positions.len() - 1) as u32
    }

    fn quad(&mut self, a: u32, b: u32, c: u32, d: u32) {
        self.indices.extend_from_slice(&[a, b, d, b, c, d]);
    }

    /// Indices for a grid of `(cols + 1) * (rows + 1)` vertices starting at `first`.
    fn grid_indices(&mut self, first: u32, cols: u32, rows: u32) {
        for row in 0..rows {
            for col in 0..cols {
                let a = first + row * (cols + 1) + col;
                let b = a + cols + 1;
                self.quad(a, b, b + 1, a + 1);
            }
        }
    }

    fn build(self) -> Geometry {
        Geometry {
            positions: self.positions,
            normals: self.normals,
            uvs: self.uvs,
            indices: Some(self.indices),
            ..Default::default()
        }
    }
}

/// Axis-aligned box with one quad per face.
pub fn box_geometry(width: f32, height: f32, depth: f32) -> Geometry {
    let (hx, hy, hz) = (width * 0.5, height * 0.5, depth * 0.5);
    // (normal, u axis, v axis) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, 1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
    ];
    let half = glam::Vec3::new(hx, hy, hz);

    let mut b = Builder::default();
    for (normal, u, v) in faces {
        let n = glam::Vec3::from(normal);
        let u = glam::Vec3::from(u);
        let v = glam::Vec3::from(v);
        let corner = |su: f32, sv: f32| ((n + u * su + v * sv) * half).to_array();
        let i0 = b.vertex(corner(-1.0, -1.0), normal, [0.0, 1.0]);
        let i1 = b.vertex(corner(1.0, -1.0), normal, [1.0, 1.0]);
        let i2 = b.vertex(corner(1.0, 1.0), normal, [1.0, 0.0]);
        let i3 = b.vertex(corner(-1.0, 1.0), normal, [0.0, 0.0]);
        b.indices.extend_from_slice(&[i0, i1, i2, i2, i3, i0]);
    }
    b.build()
}

/// Plane in XY facing +Z.
pub fn plane_geometry(width: f32, height: f32, width_segments: u32, height_segments: u32) -> Geometry {
    let cols = clamp_segments(width_segments, 1);
    let rows = clamp_segments(height_segments, 1);
    let mut b = Builder::default();
    for row in 0..=rows {
        let v = row as f32 / rows as f32;
        for col in 0..=cols {
            let u = col as f32 / cols as f32;
            b.vertex(
                [(u - 0.5) * width, (0.5 - v) * height, 0.0],
                [0.0, 0.0, 1.0],
                [u, v],
            );
        }
    }
    b.grid_indices(0, cols, rows);
    b.build()
}

/// UV sphere.
pub fn sphere_geometry(radius: f32, width_segments: u32, height_segments: u32) -> Geometry {
    let lon = clamp_segments(width_segments, 3);
    let lat = clamp_segments(height_segments, 2);
    let mut b = Builder::default();
    for y in 0..=lat {
        let v = y as f32 / lat as f32;
        let theta = v * PI;
        for x in 0..=lon {
            let u = x as f32 / lon as f32;
            let phi = u * TAU;
            let normal = [
                -phi.cos() * theta.sin(),
                theta.cos(),
                phi.sin() * theta.sin(),
            ];
            b.vertex(
                [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                normal,
                [u, v],
            );
        }
    }
    b.grid_indices(0, lon, lat);
    b.build()
}

/// Torus around the Z axis.
pub fn torus_geometry(radius: f32, tube: f32, radial_segments: u32, tubular_segments: u32) -> Geometry {
    let radial = clamp_segments(radial_segments, 3);
    let tubular = clamp_segments(tubular_segments, 3);
    let mut b = Builder::default();
    for j in 0..=radial {
        let v = j as f32 / radial as f32 * TAU;
        for i in 0..=tubular {
            let u = i as f32 / tubular as f32 * TAU;
            let position = glam::Vec3::new(
                (radius + tube * v.cos()) * u.cos(),
                (radius + tube * v.cos()) * u.sin(),
                tube * v.sin(),
            );
            let center = glam::Vec3::new(radius * u.cos(), radius * u.sin(), 0.0);
            let normal = (position - center).normalize_or_zero();
            b.vertex(
                position.to_array(),
                normal.to_array(),
                [i as f32 / tubular as f32, j as f32 / radial as f32],
            );
        }
    }
    b.grid_indices(0, tubular, radial);
    b.build()
}

/// Open-ended cylinder side plus caps along Y.
pub fn cylinder_geometry(radius_top: f32, radius_bottom: f32, height: f32, radial_segments: u32) -> Geometry {
    let radial = clamp_segments(radial_segments, 3);
    let half = height * 0.5;
    let slope = (radius_bottom - radius_top) / height.max(f32::EPSILON);
    let mut b = Builder::default();

    for row in 0..=1u32 {
        let v = row as f32;
        let r = radius_top + (radius_bottom - radius_top) * v;
        let y = half - height * v;
        for x in 0..=radial {
            let u = x as f32 / radial as f32;
            let theta = u * TAU;
            let (sin, cos) = theta.sin_cos();
            let normal = glam::Vec3::new(sin, slope, cos).normalize_or_zero();
            b.vertex([r * sin, y, r * cos], normal.to_array(), [u, v]);
        }
    }
    b.grid_indices(0, radial, 1);

    for (y, r, ny) in [(half, radius_top, 1.0f32), (-half, radius_bottom, -1.0)] {
        if r <= 0.0 {
            continue;
        }
        let center = b.vertex([0.0, y, 0.0], [0.0, ny, 0.0], [0.5, 0.5]);
        let first = center + 1;
        for x in 0..=radial {
            let theta = x as f32 / radial as f32 * TAU;
            let (sin, cos) = theta.sin_cos();
            b.vertex(
                [r * sin, y, r * cos],
                [0.0, ny, 0.0],
                [0.5 + 0.5 * sin, 0.5 + 0.5 * cos],
            );
        }
        for x in 0..radial {
            if ny > 0.0 {
                b.indices.extend_from_slice(&[first + x, first + x + 1, center]);
            } else {
                b.indices.extend_from_slice(&[first + x + 1, first + x, center]);
            }
        }
    }
    b.build()
}
