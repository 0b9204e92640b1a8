//! Perspective camera owned by the scene context.
//!
//! The camera keeps an explicit orientation so that both the orbit controller
//! (which re-aims it at its target every frame) and payload scripts (which may
//! move or re-aim it directly) can drive it.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};

pub const DEFAULT_FOV_DEGREES: f32 = 75.0;
pub const DEFAULT_NEAR: f32 = 0.1;
pub const DEFAULT_FAR: f32 = 1000.0;

#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveCamera {
    pub position: Vec3,
    pub orientation: Quat,
    pub up: Vec3,
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl PerspectiveCamera {
    pub fn new(aspect: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 5.0),
            orientation: Quat::IDENTITY,
            up: Vec3::Y,
            fov: DEFAULT_FOV_DEGREES,
            aspect: sanitize_aspect(aspect),
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
        }
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = sanitize_aspect(width as f32 / height.max(1) as f32);
    }

    /// Aim the camera at a point, keeping `up` as the reference up vector.
    pub fn look_at(&mut self, target: Vec3) {
        let forward = target - self.position;
        if forward.length_squared() < f32::EPSILON {
            return;
        }
        let view = Mat4::look_at_rh(self.position, target, self.up);
        // look_at_rh yields world->view; the orientation is its inverse rotation.
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        self.orientation = rotation.normalize();
    }

    /// Reset orientation so the camera looks down -Z.
    pub fn clear_rotation(&mut self) {
        self.orientation = Quat::IDENTITY;
    }

    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::NEG_Z
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.orientation, self.position).inverse()
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn uniforms(&self) -> CameraUniforms {
        CameraUniforms {
            view: self.view_matrix().to_cols_array_2d(),
            proj: self.projection_matrix().to_cols_array_2d(),
            eye: self.position.extend(1.0).to_array(),
        }
    }
}

fn sanitize_aspect(aspect: f32) -> f32 {
    if aspect.is_finite() && aspect > 0.0 {
        aspect
    } else {
        1.0
    }
}

/// Camera matrices as laid out in the scene shaders.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_camera() {
        let camera = PerspectiveCamera::default();
        assert_eq!(camera.fov, 75.0);
        assert_eq!(camera.near, 0.1);
        assert_eq!(camera.far, 1000.0);
    }

    #[test]
    fn test_uniform_size() {
        assert_eq!(std::mem::size_of::<CameraUniforms>(), 144);
    }

    #[test]
    fn test_look_at_points_forward_at_target() {
        let mut camera = PerspectiveCamera::default();
        camera.position = Vec3::new(3.0, 4.0, 5.0);
        camera.look_at(Vec3::ZERO);
        let expected = (Vec3::ZERO - camera.position).normalize();
        assert!((camera.forward() - expected).length() < 1e-4);

        // The target lands in the middle of the view.
        let clip = camera.view_projection_matrix().project_point3(Vec3::ZERO);
        assert!(clip.x.abs() < 1e-4);
        assert!(clip.y.abs() < 1e-4);
    }

    #[test]
    fn test_set_aspect_guards_zero_height() {
        let mut camera = PerspectiveCamera::default();
        camera.set_aspect(800, 0);
        assert_eq!(camera.aspect, 800.0);
        camera.set_aspect(800, 400);
        assert_eq!(camera.aspect, 2.0);
    }
}
