//! Orbit camera controller with damping, zoom, pan and auto-rotate.
//!
//! The controller does not own the camera. Each `update` reads the camera's
//! current offset from the target, applies pending rotation/zoom/pan deltas,
//! writes the position back and re-aims the camera. Camera moves made by a
//! payload script between frames are therefore kept.

use std::f32::consts::PI;

use glam::Vec3;

use crate::camera::PerspectiveCamera;

pub const DEFAULT_DAMPING_FACTOR: f32 = 0.05;
/// Auto-rotate speed used for generated content.
pub const PAYLOAD_AUTO_ROTATE_SPEED: f32 = 2.0;
/// Auto-rotate speed used for the idle background.
pub const IDLE_AUTO_ROTATE_SPEED: f32 = 0.5;

const POLAR_EPSILON: f32 = 1e-6;
const MIN_RADIUS: f32 = 1e-4;
/// Frame deltas above this are treated as a pause, not a jump.
const MAX_FRAME_DELTA: f32 = 0.25;

/// Spherical coordinates with +Y as the polar axis.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Spherical {
    radius: f32,
    /// Polar angle from +Y.
    phi: f32,
    /// Azimuth around +Y, measured from +Z towards +X.
    theta: f32,
}

impl Spherical {
    fn from_offset(offset: Vec3) -> Self {
        let radius = offset.length();
        if radius == 0.0 {
            return Self {
                radius: 0.0,
                phi: 0.0,
                theta: 0.0,
            };
        }
        Self {
            radius,
            theta: offset.x.atan2(offset.z),
            phi: (offset.y / radius).clamp(-1.0, 1.0).acos(),
        }
    }

    fn to_offset(self) -> Vec3 {
        let sin_phi_radius = self.phi.sin() * self.radius;
        Vec3::new(
            sin_phi_radius * self.theta.sin(),
            self.phi.cos() * self.radius,
            sin_phi_radius * self.theta.cos(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct OrbitController {
    pub target: Vec3,
    pub enable_damping: bool,
    pub damping_factor: f32,
    pub enable_zoom: bool,
    pub enable_pan: bool,
    pub auto_rotate: bool,
    pub auto_rotate_speed: f32,
    pub min_distance: f32,
    pub max_distance: f32,
    pub zoom_speed: f32,
    pub rotate_speed: f32,
    delta_theta: f32,
    delta_phi: f32,
    scale: f32,
    pan_offset: Vec3,
}

impl Default for OrbitController {
    fn default() -> Self {
        Self::new()
    }
}

impl OrbitController {
    pub fn new() -> Self {
        Self {
            target: Vec3::ZERO,
            enable_damping: true,
            damping_factor: DEFAULT_DAMPING_FACTOR,
            enable_zoom: true,
            enable_pan: true,
            auto_rotate: false,
            auto_rotate_speed: PAYLOAD_AUTO_ROTATE_SPEED,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
            zoom_speed: 1.0,
            rotate_speed: 1.0,
            delta_theta: 0.0,
            delta_phi: 0.0,
            scale: 1.0,
            pan_offset: Vec3::ZERO,
        }
    }

    pub fn set_auto_rotate(&mut self, enabled: bool, speed: f32) {
        self.auto_rotate = enabled;
        self.auto_rotate_speed = speed;
    }

    /// Orbit around the target horizontally (radians).
    pub fn rotate_left(&mut self, angle: f32) {
        self.delta_theta -= angle;
    }

    /// Orbit around the target vertically (radians).
    pub fn rotate_up(&mut self, angle: f32) {
        self.delta_phi -= angle;
    }

    /// Zoom factor for one wheel notch.
    fn zoom_scale(&self) -> f32 {
        0.95_f32.powf(self.zoom_speed)
    }

    /// Move towards the target by one wheel notch.
    pub fn dolly_in(&mut self) {
        if self.enable_zoom {
            self.scale *= self.zoom_scale();
        }
    }

    /// Move away from the target by one wheel notch.
    pub fn dolly_out(&mut self) {
        if self.enable_zoom {
            self.scale /= self.zoom_scale();
        }
    }

    /// Pan by a screen-space drag in pixels.
    pub fn pan(&mut self, camera: &PerspectiveCamera, dx: f32, dy: f32, viewport_height: f32) {
        if !self.enable_pan || viewport_height <= 0.0 {
            return;
        }
        let distance = (camera.position - self.target).length();
        // Half the visible height at the target distance.
        let target_distance = distance * (camera.fov.to_radians() / 2.0).tan();
        let right = camera.orientation * Vec3::X;
        let up = camera.orientation * Vec3::Y;
        self.pan_offset += right * (-2.0 * dx * target_distance / viewport_height);
        self.pan_offset += up * (2.0 * dy * target_distance / viewport_height);
    }

    fn auto_rotation_angle(&self, dt: f32) -> f32 {
        2.0 * PI / 60.0 * self.auto_rotate_speed * dt
    }

    /// Apply pending deltas and auto-rotation, then re-aim the camera.
    pub fn update(&mut self, camera: &mut PerspectiveCamera, dt: f32) {
        let dt = if dt.is_finite() {
            dt.clamp(0.0, MAX_FRAME_DELTA)
        } else {
            0.0
        };
        let offset = camera.position - self.target;
        let mut spherical = Spherical::from_offset(offset);

        if self.auto_rotate {
            self.rotate_left(self.auto_rotation_angle(dt));
        }

        if self.enable_damping {
            spherical.theta += self.delta_theta * self.damping_factor;
            spherical.phi += self.delta_phi * self.damping_factor;
            self.target += self.pan_offset * self.damping_factor;
        } else {
            spherical.theta += self.delta_theta;
            spherical.phi += self.delta_phi;
            self.target += self.pan_offset;
        }

        spherical.phi = spherical.phi.clamp(POLAR_EPSILON, PI - POLAR_EPSILON);
        spherical.radius = (spherical.radius * self.scale)
            .clamp(self.min_distance, self.max_distance)
            .max(MIN_RADIUS);

        camera.position = self.target + spherical.to_offset();
        camera.look_at(self.target);

        if self.enable_damping {
            self.delta_theta *= 1.0 - self.damping_factor;
            self.delta_phi *= 1.0 - self.damping_factor;
            self.pan_offset *= 1.0 - self.damping_factor;
        } else {
            self.delta_theta = 0.0;
            self.delta_phi = 0.0;
            self.pan_offset = Vec3::ZERO;
        }
        self.scale = 1.0;
    }

    /// Drop pending motion and put the camera at `(0, 0, distance)` facing the origin.
    pub fn reset(&mut self, camera: &mut PerspectiveCamera, distance: f32) {
        self.target = Vec3::ZERO;
        self.delta_theta = 0.0;
        self.delta_phi = 0.0;
        self.scale = 1.0;
        self.pan_offset = Vec3::ZERO;
        camera.position = Vec3::new(0.0, 0.0, distance);
        camera.clear_rotation();
    }

    /// Move the camera to `distance` from the target, keeping its direction.
    pub fn set_distance(&self, camera: &mut PerspectiveCamera, distance: f32) {
        let direction = (camera.position - self.target)
            .try_normalize()
            .unwrap_or(Vec3::Z);
        camera.position = self.target + direction * distance;
    }

    pub fn distance(&self, camera: &PerspectiveCamera) -> f32 {
        (camera.position - self.target).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera_at(position: Vec3) -> PerspectiveCamera {
        let mut camera = PerspectiveCamera::default();
        camera.position = position;
        camera.look_at(Vec3::ZERO);
        camera
    }

    #[test]
    fn test_spherical_round_trip() {
        let offset = Vec3::new(3.0, -2.0, 5.0);
        let back = Spherical::from_offset(offset).to_offset();
        assert_relative_eq!(back.x, offset.x, epsilon = 1e-4);
        assert_relative_eq!(back.y, offset.y, epsilon = 1e-4);
        assert_relative_eq!(back.z, offset.z, epsilon = 1e-4);
    }

    #[test]
    fn test_update_without_input_keeps_position() {
        let mut controller = OrbitController::new();
        let mut camera = camera_at(Vec3::new(0.0, 3.0, 10.0));
        let before = camera.position;
        controller.update(&mut camera, 1.0 / 60.0);
        assert!((camera.position - before).length() < 1e-4);
    }

    #[test]
    fn test_auto_rotate_preserves_distance() {
        let mut controller = OrbitController::new();
        controller.set_auto_rotate(true, IDLE_AUTO_ROTATE_SPEED);
        let mut camera = camera_at(Vec3::new(0.0, 0.0, 12.0));
        for _ in 0..120 {
            controller.update(&mut camera, 1.0 / 60.0);
        }
        assert_relative_eq!(controller.distance(&camera), 12.0, epsilon = 1e-3);
        assert!(camera.position.x.abs() > 1e-3);
    }

    #[test]
    fn test_damping_eases_rotation() {
        let mut controller = OrbitController::new();
        let mut camera = camera_at(Vec3::new(0.0, 0.0, 10.0));
        controller.rotate_left(1.0);
        controller.update(&mut camera, 1.0 / 60.0);
        let first = Spherical::from_offset(camera.position).theta;
        // Only the damping fraction is applied on the first frame.
        assert_relative_eq!(first.abs(), 0.05, epsilon = 1e-4);
    }

    #[test]
    fn test_dolly_changes_distance() {
        let mut controller = OrbitController::new();
        let mut camera = camera_at(Vec3::new(0.0, 0.0, 10.0));
        controller.dolly_in();
        controller.update(&mut camera, 0.0);
        assert_relative_eq!(controller.distance(&camera), 9.5, epsilon = 1e-4);

        controller.enable_zoom = false;
        controller.dolly_out();
        controller.update(&mut camera, 0.0);
        assert_relative_eq!(controller.distance(&camera), 9.5, epsilon = 1e-4);
    }

    #[test]
    fn test_set_distance_keeps_direction() {
        let controller = OrbitController::new();
        let mut camera = camera_at(Vec3::new(4.0, 4.0, 2.0));
        let direction = camera.position.normalize();
        controller.set_distance(&mut camera, 30.0);
        assert_relative_eq!(camera.position.length(), 30.0, epsilon = 1e-4);
        assert!((camera.position.normalize() - direction).length() < 1e-5);
    }

    #[test]
    fn test_reset_restores_rest_pose() {
        let mut controller = OrbitController::new();
        let mut camera = camera_at(Vec3::new(5.0, 1.0, 1.0));
        controller.rotate_left(2.0);
        controller.target = Vec3::new(1.0, 1.0, 1.0);
        controller.reset(&mut camera, 12.0);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 12.0));
        assert_eq!(controller.target, Vec3::ZERO);
        controller.update(&mut camera, 1.0 / 60.0);
        assert!((camera.position - Vec3::new(0.0, 0.0, 12.0)).length() < 1e-4);
    }
}
