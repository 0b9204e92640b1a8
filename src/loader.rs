//! Installs idle or payload content into a scene context.
//!
//! Every install starts from a clean slate: previous content is reclaimed, the
//! background and fog are restored and the camera is put back at its resting
//! pose. Script failures stop at this boundary; they are logged and returned
//! as diagnostics in the [`InstallReport`], never propagated.

use std::cell::RefCell;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use crate::config::RuntimeConfig;
use crate::context::SceneContext;
use crate::frame_driver::UpdateCallback;
use crate::idle::{self, IdleArchetype};
use crate::payload::VisualizationPayload;
use crate::reclaimer::ReclaimReport;
use crate::script_api::GfxApi;
use crate::script_diagnostics::ScriptDiagnostic;
use crate::scripting::{run_setup, ScriptAnimation};
use crate::view_settings::ViewSettings;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum InstallMode {
    Idle { archetype: IdleArchetype },
    Payload { title: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallReport {
    #[serde(flatten)]
    pub mode: InstallMode,
    /// What was freed from the previous content.
    pub reclaimed: ReclaimReport,
    /// Content nodes attached after the install.
    pub content_nodes: usize,
    /// Whether a per-frame callback was produced.
    pub animated: bool,
    pub diagnostics: Vec<ScriptDiagnostic>,
}

impl InstallReport {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub struct Installed {
    pub callback: Option<Box<dyn UpdateCallback>>,
    pub report: InstallReport,
}

pub struct PayloadLoader {
    config: RuntimeConfig,
    rng: StdRng,
}

impl PayloadLoader {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic idle archetypes and `gfx.random()` sequences.
    pub fn with_seed(config: RuntimeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Replace the scene content with `payload`, or with the idle field when `None`.
    pub fn install(
        &mut self,
        context: &mut SceneContext,
        payload: Option<&VisualizationPayload>,
        settings: &ViewSettings,
    ) -> Installed {
        let settings = settings.sanitized();
        let reclaimed = context.reclaim(&self.config.reclaim);
        if reclaimed.disposed() > 0 {
            log::debug!(
                "Reclaimed {} nodes and {} resources",
                reclaimed.nodes_removed,
                reclaimed.disposed()
            );
        }
        context.restore_environment();
        context.reset_camera(settings.zoom_distance);

        let installed = match payload {
            None => self.install_idle(context, reclaimed),
            Some(payload) => self.install_payload(context, payload, &settings, reclaimed),
        };
        log::info!(
            "Installed {} ({} content nodes, animated: {})",
            match &installed.report.mode {
                InstallMode::Idle { .. } => "idle background",
                InstallMode::Payload { title } => title.as_str(),
            },
            installed.report.content_nodes,
            installed.report.animated
        );
        installed
    }

    fn install_idle(&mut self, context: &mut SceneContext, reclaimed: ReclaimReport) -> Installed {
        let (archetype, animation) = idle::build(context.stage(), &mut self.rng, &self.config.idle);
        context
            .controls_mut()
            .set_auto_rotate(true, self.config.idle.auto_rotate_speed);

        Installed {
            callback: Some(Box::new(animation)),
            report: InstallReport {
                mode: InstallMode::Idle { archetype },
                reclaimed,
                content_nodes: context.stage().scene.borrow().content_count(),
                animated: true,
                diagnostics: Vec::new(),
            },
        }
    }

    fn install_payload(
        &mut self,
        context: &mut SceneContext,
        payload: &VisualizationPayload,
        settings: &ViewSettings,
        reclaimed: ReclaimReport,
    ) -> Installed {
        if let Err(err) = payload.validate() {
            log::warn!("Payload '{}' failed validation: {}", payload.title, err);
        }
        context
            .controls_mut()
            .set_auto_rotate(settings.auto_rotate, self.config.scene.payload_auto_rotate_speed);

        let stage = context.stage().clone();
        let rng = Rc::new(RefCell::new(StdRng::seed_from_u64(self.rng.gen())));
        let gfx = GfxApi::new(
            stage,
            (settings.primary_color, settings.secondary_color),
            rng,
        );

        let mut diagnostics = Vec::new();
        let mut callback: Option<Box<dyn UpdateCallback>> = None;

        match run_setup(context.stage(), &gfx, &payload.setup_code, &self.config.scripts) {
            Err(err) => {
                log::error!("Setup of '{}' failed: {}", payload.title, err);
                diagnostics.push(err.diagnostic);
                // Leave nothing half-built behind.
                context.reclaim(&self.config.reclaim);
                context.restore_environment();
            }
            Ok(()) => {
                if let Some(code) = payload.animation() {
                    match ScriptAnimation::compile(code, context.stage(), &gfx, &self.config.scripts) {
                        Ok(animation) => callback = Some(Box::new(animation)),
                        Err(err) => {
                            log::error!("Animation of '{}' failed to compile: {}", payload.title, err);
                            diagnostics.push(err.diagnostic);
                        }
                    }
                }
            }
        }

        Installed {
            report: InstallReport {
                mode: InstallMode::Payload {
                    title: payload.title.clone(),
                },
                reclaimed,
                content_nodes: context.stage().scene.borrow().content_count(),
                animated: callback.is_some(),
                diagnostics,
            },
            callback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::idle::IDLE_NODE_NAME;
    use crate::params::ParameterState;
    use crate::script_diagnostics::ScriptPhase;
    use crate::surface::{Dimensions, HostSurface};
    use glam::Vec3;

    fn context() -> SceneContext {
        SceneContext::initialize(
            HostSurface::new(Dimensions::new(640, 480)),
            Box::new(HeadlessBackend::new(640, 480)),
            &ViewSettings::default(),
            &RuntimeConfig::default().scene,
        )
    }

    fn loader() -> PayloadLoader {
        PayloadLoader::with_seed(RuntimeConfig::default(), 11)
    }

    #[test]
    fn test_idle_install() {
        let mut ctx = context();
        let installed = loader().install(&mut ctx, None, &ViewSettings::default());
        assert!(installed.callback.is_some());
        assert!(matches!(installed.report.mode, InstallMode::Idle { .. }));
        assert_eq!(installed.report.content_nodes, 1);
        assert!(ctx.controls().auto_rotate);
        assert_eq!(ctx.controls().auto_rotate_speed, 0.5);
        assert!(ctx.stage().scene.borrow().get_by_name(IDLE_NODE_NAME).is_some());
    }

    #[test]
    fn test_payload_install_runs_setup() {
        let mut ctx = context();
        let payload = VisualizationPayload::new(
            "Orbit",
            r#"let m = gfx.mesh(gfx.sphere(1), gfx.standard_material(#{ color: gfx.palette.primary })); m.name = "planet"; scene.add(m);"#,
            r#"let p = scene.get("planet"); p.position.x = time;"#,
        );
        let settings = ViewSettings {
            auto_rotate: true,
            ..Default::default()
        };
        let mut loader = loader();
        let installed = loader.install(&mut ctx, Some(&payload), &settings);
        assert!(installed.report.is_clean());
        assert!(installed.report.animated);
        assert_eq!(installed.report.content_nodes, 1);
        assert_eq!(ctx.controls().auto_rotate_speed, 2.0);
        assert!(ctx.controls().auto_rotate);

        let callback = installed.callback.unwrap();
        callback.update(1.5, &ParameterState::new()).unwrap();
        let scene = ctx.stage().scene.borrow();
        let planet = scene.get(scene.get_by_name("planet").unwrap()).unwrap();
        assert_eq!(planet.transform.position.x, 1.5);
    }

    #[test]
    fn test_failed_setup_leaves_scene_empty() {
        let mut ctx = context();
        let payload = VisualizationPayload::new(
            "Broken",
            r#"scene.add(gfx.mesh(gfx.box(1, 1, 1), gfx.basic_material())); scene.background = 0xff0000; throw "nope";"#,
            "",
        );
        let mut loader = loader();
        let installed = loader.install(&mut ctx, Some(&payload), &ViewSettings::default());
        assert!(installed.callback.is_none());
        assert_eq!(installed.report.content_nodes, 0);
        assert_eq!(installed.report.diagnostics[0].phase, ScriptPhase::Setup);
        assert_eq!(ctx.stage().resources.borrow().live_counts().total(), 0);
        assert_eq!(ctx.stage().scene.borrow().background.to_hex(), 0x050510);

        // The runtime is still usable.
        let ok = VisualizationPayload::new("Fine", "scene.add(gfx.group());", "");
        let installed = loader.install(&mut ctx, Some(&ok), &ViewSettings::default());
        assert!(installed.report.is_clean());
        assert_eq!(installed.report.content_nodes, 1);
        assert!(!installed.report.animated);
    }

    #[test]
    fn test_animation_compile_error_reported() {
        let mut ctx = context();
        let payload = VisualizationPayload::new("Half", "scene.add(gfx.group());", "let = ;");
        let installed = loader().install(&mut ctx, Some(&payload), &ViewSettings::default());
        assert!(installed.callback.is_none());
        assert_eq!(installed.report.content_nodes, 1);
        assert_eq!(installed.report.diagnostics[0].phase, ScriptPhase::Compile);
    }

    #[test]
    fn test_install_resets_camera_and_reclaims() {
        let mut ctx = context();
        let mut loader = loader();
        let payload = VisualizationPayload::new(
            "Lit",
            r#"camera.set_position(3, 3, 3); scene.add(gfx.point_light(0xffffff, 2)); scene.add(gfx.mesh(gfx.torus(2, 0.5), gfx.basic_material()));"#,
            "",
        );
        loader.install(&mut ctx, Some(&payload), &ViewSettings::default());
        let settings = ViewSettings {
            zoom_distance: 20.0,
            ..Default::default()
        };
        let installed = loader.install(&mut ctx, None, &settings);
        assert_eq!(installed.report.reclaimed.nodes_removed, 2);
        assert_eq!(installed.report.reclaimed.geometries, 1);
        assert_eq!(installed.report.reclaimed.materials, 1);
        assert_eq!(ctx.camera_position(), Vec3::new(0.0, 0.0, 20.0));
        // Default lights survive.
        assert_eq!(ctx.default_lights().len(), 2);
        let scene = ctx.stage().scene.borrow();
        assert!(ctx.default_lights().iter().all(|id| scene.is_attached(*id)));
    }

    #[test]
    fn test_default_lights_survive_payload_tampering() {
        let mut ctx = context();
        let mut loader = loader();
        let payload = VisualizationPayload::new(
            "Thief",
            r#"
            let rig = gfx.group();
            let ambient = scene.get("default_ambient");
            rig.add(ambient);
            ambient.intensity = 9;
            ambient.color = 0xff0000;
            let sun = scene.get("default_directional");
            sun.position = [0, -3, 0];
            sun.visible = false;
            scene.add(rig);
            "#,
            "",
        );
        let installed = loader.install(&mut ctx, Some(&payload), &ViewSettings::default());
        assert!(installed.report.is_clean());

        let installed = loader.install(&mut ctx, None, &ViewSettings::default());
        assert_eq!(installed.report.reclaimed.lights_kept, 2);
        let scene = ctx.stage().scene.borrow();
        let [ambient, directional] = [ctx.default_lights()[0], ctx.default_lights()[1]];
        assert!(scene.is_attached(ambient));
        assert!(scene.is_attached(directional));
        assert!(scene.root_children().contains(&ambient));

        let light = scene.get(ambient).and_then(|n| n.kind.light().copied()).unwrap();
        assert_eq!(light.intensity, 2.0);
        assert_eq!(light.color.to_hex(), 0x404040);
        let sun = scene.get(directional).unwrap();
        assert!(sun.visible);
        assert_eq!(sun.transform.position, Vec3::new(5.0, 10.0, 7.0));
    }
}
