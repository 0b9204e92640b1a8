//! Applies changed view settings to a live context without rebuilding it.

use crate::context::SceneContext;
use crate::view_settings::ViewSettings;

/// Which settings a reconcile actually touched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ViewChanges {
    pub zoom: bool,
    pub auto_rotate: bool,
    pub bloom: bool,
    /// Palette changed; takes effect at the next install.
    pub palette: bool,
}

impl ViewChanges {
    pub fn any(&self) -> bool {
        self.zoom || self.auto_rotate || self.bloom || self.palette
    }
}

/// Push the difference between `previous` and `next` into `context`.
pub fn reconcile(context: &mut SceneContext, previous: &ViewSettings, next: &ViewSettings) -> ViewChanges {
    let next = next.sanitized();
    let mut changes = ViewChanges::default();

    if next.zoom_distance != previous.zoom_distance {
        let camera = context.stage().camera.clone();
        context
            .controls()
            .set_distance(&mut camera.borrow_mut(), next.zoom_distance);
        changes.zoom = true;
    }

    if next.auto_rotate != previous.auto_rotate {
        let speed = context.config().payload_auto_rotate_speed;
        context.controls_mut().set_auto_rotate(next.auto_rotate, speed);
        changes.auto_rotate = true;
    }

    if next.bloom_strength != previous.bloom_strength {
        context.post_mut().bloom.set_strength(next.bloom_strength);
        changes.bloom = true;
    }

    if next.primary_color != previous.primary_color || next.secondary_color != previous.secondary_color {
        changes.palette = true;
    }

    if changes.any() {
        log::debug!("View settings reconciled: {:?}", changes);
    }
    changes
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use glam::Vec3;

    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::color::Rgb;
    use crate::config::SceneConfig;
    use crate::surface::{Dimensions, HostSurface};

    fn context() -> SceneContext {
        SceneContext::initialize(
            HostSurface::new(Dimensions::new(400, 300)),
            Box::new(HeadlessBackend::new(400, 300)),
            &ViewSettings::default(),
            &SceneConfig::default(),
        )
    }

    #[test]
    fn test_zoom_preserves_direction() {
        let mut ctx = context();
        ctx.stage().camera.borrow_mut().position = Vec3::new(3.0, 4.0, 5.0);
        let before = ctx.camera_position().normalize();

        let previous = ViewSettings::default();
        let next = ViewSettings {
            zoom_distance: 30.0,
            ..previous.clone()
        };
        let changes = reconcile(&mut ctx, &previous, &next);
        assert!(changes.zoom);

        let after = ctx.camera_position();
        assert_relative_eq!(after.length(), 30.0, epsilon = 1e-4);
        assert_relative_eq!(after.normalize().dot(before), 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_auto_rotate_and_bloom() {
        let mut ctx = context();
        let previous = ViewSettings::default();
        let next = ViewSettings {
            auto_rotate: true,
            bloom_strength: 2.5,
            ..previous.clone()
        };
        let changes = reconcile(&mut ctx, &previous, &next);
        assert!(changes.auto_rotate && changes.bloom && !changes.zoom);
        assert!(ctx.controls().auto_rotate);
        assert_eq!(ctx.controls().auto_rotate_speed, 2.0);
        assert_eq!(ctx.post().bloom.strength, 2.5);
    }

    #[test]
    fn test_palette_is_deferred() {
        let mut ctx = context();
        let previous = ViewSettings::default();
        let next = ViewSettings {
            primary_color: Rgb::from_hex(0xff0000),
            ..previous.clone()
        };
        let changes = reconcile(&mut ctx, &previous, &next);
        assert_eq!(
            changes,
            ViewChanges {
                palette: true,
                ..Default::default()
            }
        );
        assert_eq!(ctx.post().bloom.strength, previous.bloom_strength);
    }
}
