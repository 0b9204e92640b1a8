//! Procedural particle field shown when no payload is active.

use std::f32::consts::{PI, TAU};

use glam::Vec3;
use rand::Rng;

use crate::config::IdleConfig;
use crate::frame_driver::UpdateCallback;
use crate::params::ParameterState;
use crate::resources::{Blending, Geometry, Material, MaterialKind};
use crate::scene_graph::{NodeKind, Renderable};
use crate::scripting::ScriptError;
use crate::stage::Stage;

/// Name of the idle point cloud node.
pub const IDLE_NODE_NAME: &str = "idle_viz";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdleArchetype {
    /// Uniformly filled sphere.
    QuantumCloud,
    /// Two-armed spiral disc.
    GalacticSpiral,
    HyperTorus,
}

impl IdleArchetype {
    pub const ALL: [IdleArchetype; 3] = [
        IdleArchetype::QuantumCloud,
        IdleArchetype::GalacticSpiral,
        IdleArchetype::HyperTorus,
    ];

    pub fn choose<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Position of point `index` in this archetype.
    pub fn sample<R: Rng + ?Sized>(self, index: usize, rng: &mut R) -> Vec3 {
        match self {
            IdleArchetype::QuantumCloud => {
                let r = 5.0 * rng.gen::<f32>().cbrt();
                let theta = rng.gen::<f32>() * TAU;
                let phi = (2.0 * rng.gen::<f32>() - 1.0).acos();
                Vec3::new(
                    r * phi.sin() * theta.cos(),
                    r * phi.sin() * theta.sin(),
                    r * phi.cos(),
                )
            }
            IdleArchetype::GalacticSpiral => {
                let r = rng.gen::<f32>() * 8.0;
                let arm = if index % 2 == 0 { 0.0 } else { PI };
                let theta = r * 2.0 + (rng.gen::<f32>() - 0.5) + arm;
                let y = (rng.gen::<f32>() - 0.5) * (10.0 - r) * 0.5;
                Vec3::new(r * theta.cos(), y, r * theta.sin())
            }
            IdleArchetype::HyperTorus => {
                let u = rng.gen::<f32>() * TAU;
                let v = rng.gen::<f32>() * TAU;
                let (major, minor) = (5.0, 1.5);
                Vec3::new(
                    (major + minor * v.cos()) * u.cos(),
                    (major + minor * v.cos()) * u.sin(),
                    minor * v.sin() + (rng.gen::<f32>() - 0.5) * 0.5,
                )
            }
        }
    }
}

/// Build the idle cloud into `stage` and return its animation.
pub fn build<R: Rng + ?Sized>(
    stage: &Stage,
    rng: &mut R,
    config: &IdleConfig,
) -> (IdleArchetype, IdleAnimation) {
    let archetype = IdleArchetype::choose(rng);

    let mut positions = Vec::with_capacity(config.point_count);
    let mut colors = Vec::with_capacity(config.point_count);
    for i in 0..config.point_count {
        positions.push(archetype.sample(i, rng).to_array());
        let mix = rng.gen::<f32>();
        colors.push(config.start_color.lerp(config.end_color, mix).to_array());
    }
    let geometry = Geometry {
        positions,
        colors,
        ..Default::default()
    };

    let mut material = Material::new(MaterialKind::Points);
    material.size = config.point_size;
    material.vertex_colors = true;
    material.transparent = true;
    material.opacity = config.opacity;
    material.blending = Blending::Additive;
    material.depth_write = false;

    {
        let mut resources = stage.resources.borrow_mut();
        let geometry = resources.add_geometry(geometry);
        let material = resources.add_material(material);
        let mut scene = stage.scene.borrow_mut();
        let id = scene.create_named(
            IDLE_NODE_NAME,
            NodeKind::Points(Renderable {
                geometry,
                materials: vec![material],
            }),
        );
        scene.add(id);
    }

    log::info!(
        "Idle background: {:?} with {} points",
        archetype,
        config.point_count
    );
    let animation = IdleAnimation {
        stage: stage.clone(),
        spin_y: config.spin_y,
        spin_z: config.spin_z,
    };
    (archetype, animation)
}

/// Slowly spins the idle cloud.
pub struct IdleAnimation {
    stage: Stage,
    spin_y: f32,
    spin_z: f32,
}

impl UpdateCallback for IdleAnimation {
    fn update(&self, elapsed: f32, _params: &ParameterState) -> Result<(), ScriptError> {
        let mut scene = self.stage.scene.borrow_mut();
        let Some(id) = scene.get_by_name(IDLE_NODE_NAME) else {
            return Ok(());
        };
        if let Some(node) = scene.get_mut(id) {
            node.transform.rotation.y = elapsed * self.spin_y;
            node.transform.rotation.z = elapsed * self.spin_z;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "idle"
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::camera::PerspectiveCamera;
    use crate::stage::RendererInfo;

    fn stage() -> Stage {
        Stage::new(PerspectiveCamera::default(), RendererInfo::new(100, 100, 1.0))
    }

    #[test]
    fn test_build_creates_named_cloud() {
        let stage = stage();
        let mut rng = StdRng::seed_from_u64(42);
        build(&stage, &mut rng, &IdleConfig::default());

        let scene = stage.scene.borrow();
        let id = scene.get_by_name(IDLE_NODE_NAME).unwrap();
        let r = scene.get(id).unwrap().kind.renderable().unwrap().clone();
        let resources = stage.resources.borrow();
        let geometry = resources.geometry(r.geometry).unwrap();
        assert_eq!(geometry.vertex_count(), 3000);
        assert!(geometry.has_colors());
        let material = resources.material(r.materials[0]).unwrap();
        assert_eq!(material.blending, Blending::Additive);
        assert!(!material.depth_write);
        assert_eq!(material.size, 0.05);
    }

    #[test]
    fn test_archetype_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        for i in 0..500 {
            let p = IdleArchetype::QuantumCloud.sample(i, &mut rng);
            assert!(p.length() <= 5.0 + 1e-4);
            let p = IdleArchetype::GalacticSpiral.sample(i, &mut rng);
            assert!(Vec3::new(p.x, 0.0, p.z).length() <= 8.0 + 1e-4);
            assert!(p.y.abs() <= 2.5 + 1e-4);
            let p = IdleArchetype::HyperTorus.sample(i, &mut rng);
            let ring = Vec3::new(p.x, p.y, 0.0).length();
            assert!((3.5 - 1e-4..=6.5 + 1e-4).contains(&ring));
        }
    }

    #[test]
    fn test_colors_between_palette_ends() {
        let stage = stage();
        let config = IdleConfig {
            point_count: 200,
            ..Default::default()
        };
        build(&stage, &mut StdRng::seed_from_u64(9), &config);
        let resources = stage.resources.borrow();
        let scene = stage.scene.borrow();
        let id = scene.get_by_name(IDLE_NODE_NAME).unwrap();
        let r = scene.get(id).unwrap().kind.renderable().unwrap().clone();
        for c in &resources.geometry(r.geometry).unwrap().colors {
            // #00f3ff -> #bc13fe: red rises while green falls
            assert!(c[0] >= 0.0 && c[0] <= 188.0 / 255.0 + 1e-4);
            assert!(c[1] >= 19.0 / 255.0 - 1e-4 && c[1] <= 243.0 / 255.0 + 1e-4);
        }
    }

    #[test]
    fn test_animation_spins_and_tolerates_missing_node() {
        let stage = stage();
        let (_, animation) = build(&stage, &mut StdRng::seed_from_u64(1), &IdleConfig::default());
        animation.update(10.0, &ParameterState::new()).unwrap();
        {
            let scene = stage.scene.borrow();
            let node = scene.get(scene.get_by_name(IDLE_NODE_NAME).unwrap()).unwrap();
            assert!((node.transform.rotation.y - 0.5).abs() < 1e-6);
            assert!((node.transform.rotation.z - 0.2).abs() < 1e-6);
        }

        let id = stage.scene.borrow().get_by_name(IDLE_NODE_NAME).unwrap();
        stage.scene.borrow_mut().destroy(id);
        assert!(animation.update(11.0, &ParameterState::new()).is_ok());
    }
}
