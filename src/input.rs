//! Pointer input mapped onto the orbit controller.
//!
//! Primary drag orbits, secondary or middle drag pans, the wheel dollies.
//! Rotation is scaled by the viewport height so a full-height drag turns the
//! camera by one revolution, independent of window size.

use std::f32::consts::TAU;

use glam::Vec2;

use crate::camera::PerspectiveCamera;
use crate::orbit::OrbitController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragMode {
    Rotate,
    Pan,
}

#[derive(Debug, Clone, Default)]
pub struct PointerState {
    drag: Option<(DragMode, Vec2)>,
}

impl PointerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn press(&mut self, button: PointerButton, x: f32, y: f32) {
        let mode = match button {
            PointerButton::Primary => DragMode::Rotate,
            PointerButton::Secondary | PointerButton::Middle => DragMode::Pan,
        };
        self.drag = Some((mode, Vec2::new(x, y)));
    }

    pub fn release(&mut self) {
        self.drag = None;
    }

    /// Feed a pointer position; only has an effect while a button is held.
    pub fn moved(
        &mut self,
        x: f32,
        y: f32,
        controls: &mut OrbitController,
        camera: &PerspectiveCamera,
        viewport_height: f32,
    ) {
        let Some((mode, last)) = self.drag else {
            return;
        };
        let current = Vec2::new(x, y);
        let delta = current - last;
        self.drag = Some((mode, current));
        if viewport_height <= 0.0 {
            return;
        }

        match mode {
            DragMode::Rotate => {
                controls.rotate_left(TAU * delta.x / viewport_height * controls.rotate_speed);
                controls.rotate_up(TAU * delta.y / viewport_height * controls.rotate_speed);
            }
            DragMode::Pan => controls.pan(camera, delta.x, delta.y, viewport_height),
        }
    }

    /// Positive `delta_y` scrolls away from the target, as browsers report it.
    pub fn wheel(&self, delta_y: f32, controls: &mut OrbitController) {
        if delta_y > 0.0 {
            controls.dolly_out();
        } else if delta_y < 0.0 {
            controls.dolly_in();
        }
    }
}
