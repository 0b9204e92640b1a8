//! Host-facing facade over the runtime.
//!
//! A [`Visualiser`] is what a window, a browser canvas or the CLI holds. It
//! owns one scene context for the lifetime of the mounted surface and turns
//! the UI's commands (activate a payload, tweak a parameter, change view
//! settings, go home) into loader installs, driver restarts and bridge
//! reconciles. The frame loop is stopped before any install so a stale frame
//! never runs against half-replaced content.

use crate::backend::RenderBackend;
use crate::config::RuntimeConfig;
use crate::context::{ContextError, SceneContext};
use crate::frame_driver::{FrameDriver, FrameRequest, FrameScheduler, TickOutcome};
use crate::generation::{GenerationError, PayloadSource};
use crate::history::History;
use crate::input::{PointerButton, PointerState};
use crate::loader::{InstallReport, PayloadLoader};
use crate::params::{ParamValue, ParameterHandle, ParameterState};
use crate::payload::{SharedBundle, VisualizationPayload};
use crate::script_diagnostics::ScriptDiagnostic;
use crate::surface::{Dimensions, HostSurface};
use crate::view_bridge::{reconcile, ViewChanges};
use crate::view_settings::{ViewSettings, DEFAULT_VIEW_SETTINGS};

#[derive(Debug, thiserror::Error)]
pub enum VisualiserError {
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error("unknown history entry '{0}'")]
    UnknownHistoryEntry(String),
}

pub struct Visualiser<S: FrameScheduler> {
    context: SceneContext,
    driver: FrameDriver,
    loader: PayloadLoader,
    scheduler: S,
    parameters: ParameterHandle,
    settings: ViewSettings,
    active: Option<VisualizationPayload>,
    history: History,
    last_report: Option<InstallReport>,
    pointer: PointerState,
}

impl<S: FrameScheduler> Visualiser<S> {
    /// Mount on `surface` and start the idle background.
    pub fn new(
        surface: HostSurface,
        backend: Box<dyn RenderBackend>,
        scheduler: S,
        config: RuntimeConfig,
    ) -> Self {
        let loader = PayloadLoader::new(config);
        Self::with_loader(surface, backend, scheduler, loader)
    }

    /// Like [`Visualiser::new`], with reproducible randomness.
    pub fn with_seed(
        surface: HostSurface,
        backend: Box<dyn RenderBackend>,
        scheduler: S,
        config: RuntimeConfig,
        seed: u64,
    ) -> Self {
        let loader = PayloadLoader::with_seed(config, seed);
        Self::with_loader(surface, backend, scheduler, loader)
    }

    fn with_loader(
        surface: HostSurface,
        backend: Box<dyn RenderBackend>,
        scheduler: S,
        loader: PayloadLoader,
    ) -> Self {
        let settings = DEFAULT_VIEW_SETTINGS;
        let context = SceneContext::initialize(surface, backend, &settings, &loader.config().scene);
        let mut visualiser = Self {
            context,
            driver: FrameDriver::new(),
            loader,
            scheduler,
            parameters: ParameterHandle::default(),
            settings,
            active: None,
            history: History::new(),
            last_report: None,
            pointer: PointerState::new(),
        };
        visualiser.install(None);
        visualiser
    }

    fn ensure_mounted(&self) -> Result<(), ContextError> {
        if self.context.is_disposed() {
            Err(ContextError::Disposed)
        } else {
            Ok(())
        }
    }

    fn install(&mut self, payload: Option<VisualizationPayload>) -> &InstallReport {
        self.driver.stop(&mut self.scheduler);
        let installed = self
            .loader
            .install(&mut self.context, payload.as_ref(), &self.settings);
        self.driver
            .start(&mut self.scheduler, installed.callback, self.parameters.clone());
        self.active = payload;
        self.last_report.insert(installed.report)
    }

    /// Show `payload` with its default parameters and the default zoom.
    pub fn activate(&mut self, payload: VisualizationPayload) -> Result<&InstallReport, ContextError> {
        self.ensure_mounted()?;
        self.parameters
            .replace(ParameterState::seeded(&payload.controls));
        self.settings = self.settings.with_default_zoom();
        Ok(self.install(Some(payload)))
    }

    /// Show a shared bundle with its own parameters and view settings.
    pub fn activate_bundle(&mut self, bundle: SharedBundle) -> Result<&InstallReport, ContextError> {
        self.ensure_mounted()?;
        self.parameters.replace(bundle.effective_parameters());
        self.apply_settings(bundle.view_settings);
        Ok(self.install(Some(bundle.payload)))
    }

    /// Drop the active payload and go back to the idle background with default settings.
    pub fn return_to_idle(&mut self) -> Result<&InstallReport, ContextError> {
        self.ensure_mounted()?;
        self.parameters.replace(ParameterState::new());
        self.apply_settings(DEFAULT_VIEW_SETTINGS);
        Ok(self.install(None))
    }

    /// Ask `source` for a payload, record it in history and show it.
    pub fn generate(
        &mut self,
        source: &mut dyn PayloadSource,
        topic: &str,
    ) -> Result<&InstallReport, VisualiserError> {
        self.ensure_mounted()?;
        let payload = source.generate(topic)?;
        let stored = self.history.add(payload).clone();
        Ok(self.activate(stored)?)
    }

    /// Re-show a payload from history without re-recording it.
    pub fn activate_history(&mut self, id: &str) -> Result<&InstallReport, VisualiserError> {
        let payload = self
            .history
            .get(id)
            .cloned()
            .ok_or_else(|| VisualiserError::UnknownHistoryEntry(id.to_string()))?;
        Ok(self.activate(payload)?)
    }

    /// Bundle of the active payload, current parameters and view settings.
    pub fn share(&self) -> Option<SharedBundle> {
        self.active.as_ref().map(|payload| {
            SharedBundle::new(payload.clone(), self.parameters.snapshot(), self.settings)
        })
    }

    /// Update one control value. Returns `false` for ids the active payload does not declare.
    pub fn set_parameter(&mut self, id: &str, value: ParamValue) -> bool {
        let Some(control) = self.active.as_ref().and_then(|p| p.control(id)) else {
            log::warn!("Ignoring value for unknown control '{}'", id);
            return false;
        };
        self.parameters.set(id, control.coerce(value));
        true
    }

    /// Replace the view settings and push the difference into the live scene.
    pub fn set_view_settings(&mut self, settings: ViewSettings) -> ViewChanges {
        self.apply_settings(settings)
    }

    fn apply_settings(&mut self, settings: ViewSettings) -> ViewChanges {
        let next = settings.sanitized();
        let changes = if self.context.is_disposed() {
            ViewChanges::default()
        } else {
            reconcile(&mut self.context, &self.settings, &next)
        };
        self.settings = next;
        changes
    }

    pub fn resize(&mut self, dimensions: Dimensions) {
        self.context.surface().notify_resize(dimensions);
    }

    pub fn pointer_down(&mut self, button: PointerButton, x: f32, y: f32) {
        self.pointer.press(button, x, y);
    }

    pub fn pointer_up(&mut self) {
        self.pointer.release();
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        if !self.pointer.is_dragging() {
            return;
        }
        let height = self.context.stage().renderer.borrow().height as f32;
        let camera = self.context.stage().camera.clone();
        let camera = camera.borrow();
        self.pointer
            .moved(x, y, self.context.controls_mut(), &camera, height);
    }

    pub fn wheel(&mut self, delta_y: f32) {
        self.pointer.wheel(delta_y, self.context.controls_mut());
    }

    /// Run the frame for `request` at host time `timestamp` (seconds).
    pub fn on_frame(&mut self, request: FrameRequest, timestamp: f64) -> TickOutcome {
        self.driver
            .tick(&mut self.context, &mut self.scheduler, request, timestamp)
    }

    /// Stop the loop, then release the context. Safe to repeat.
    pub fn unmount(&mut self) {
        self.driver.stop(&mut self.scheduler);
        self.context.dispose();
    }

    pub fn context(&self) -> &SceneContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut SceneContext {
        &mut self.context
    }

    pub fn driver(&self) -> &FrameDriver {
        &self.driver
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }

    pub fn parameters(&self) -> ParameterState {
        self.parameters.snapshot()
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn active(&self) -> Option<&VisualizationPayload> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    pub fn last_report(&self) -> Option<&InstallReport> {
        self.last_report.as_ref()
    }

    /// Diagnostic of the animation failure that froze the current payload.
    pub fn halted(&self) -> Option<&ScriptDiagnostic> {
        self.driver.halted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::frame_driver::ManualScheduler;
    use crate::loader::InstallMode;
    use crate::payload::ControlSpec;

    fn visualiser() -> Visualiser<ManualScheduler> {
        Visualiser::with_seed(
            HostSurface::new(Dimensions::new(320, 240)),
            Box::new(HeadlessBackend::new(320, 240)),
            ManualScheduler::new(),
            RuntimeConfig::default(),
            5,
        )
    }

    fn run_frame(v: &mut Visualiser<ManualScheduler>, t: f64) -> TickOutcome {
        let request = v.scheduler_mut().next_due().expect("frame requested");
        v.on_frame(request, t)
    }

    fn spinner() -> VisualizationPayload {
        VisualizationPayload::new(
            "Spinner",
            r#"let m = gfx.mesh(gfx.box(1, 1, 1), gfx.basic_material()); m.name = "cube"; scene.add(m);"#,
            r#"let cube = scene.get("cube"); cube.rotation.y = params.speed;"#,
        )
        .with_controls(vec![ControlSpec::range("speed", "Speed", 0.1, 5.0, 0.1, 1.0)])
    }

    fn cube_rotation(v: &Visualiser<ManualScheduler>) -> f32 {
        let scene = v.context().stage().scene.borrow();
        let id = scene.get_by_name("cube").unwrap();
        scene.get(id).unwrap().transform.rotation.y
    }

    #[test]
    fn test_mounts_into_idle() {
        let mut v = visualiser();
        assert!(matches!(
            v.last_report().unwrap().mode,
            InstallMode::Idle { .. }
        ));
        assert!(v.driver().is_running());
        assert_eq!(run_frame(&mut v, 0.0), TickOutcome::Rendered);
    }

    #[test]
    fn test_activate_seeds_and_clamps_parameters() {
        let mut v = visualiser();
        v.activate(spinner()).unwrap();
        assert_eq!(v.parameters().get("speed"), Some(ParamValue::Number(1.0)));

        run_frame(&mut v, 0.0);
        assert_eq!(cube_rotation(&v), 1.0);

        assert!(v.set_parameter("speed", ParamValue::Number(3.0)));
        run_frame(&mut v, 0.016);
        assert_eq!(cube_rotation(&v), 3.0);

        v.set_parameter("speed", ParamValue::Number(50.0));
        assert_eq!(v.parameters().get("speed"), Some(ParamValue::Number(5.0)));
        assert!(!v.set_parameter("missing", ParamValue::Number(1.0)));
    }

    #[test]
    fn test_activate_resets_zoom_only() {
        let mut v = visualiser();
        v.set_view_settings(ViewSettings {
            zoom_distance: 25.0,
            bloom_strength: 2.0,
            ..DEFAULT_VIEW_SETTINGS
        });
        v.activate(spinner()).unwrap();
        assert_eq!(v.settings().zoom_distance, 12.0);
        assert_eq!(v.settings().bloom_strength, 2.0);
        assert_eq!(v.context().camera_position().z, 12.0);
    }

    #[test]
    fn test_return_to_idle_restores_defaults() {
        let mut v = visualiser();
        v.activate(spinner()).unwrap();
        v.set_view_settings(ViewSettings {
            auto_rotate: false,
            bloom_strength: 3.0,
            ..DEFAULT_VIEW_SETTINGS
        });
        v.return_to_idle().unwrap();
        assert_eq!(*v.settings(), DEFAULT_VIEW_SETTINGS);
        assert!(v.active().is_none());
        assert!(v.parameters().is_empty());
        assert!(v.context().controls().auto_rotate);
        assert_eq!(v.context().post().bloom.strength, 0.8);
    }

    #[test]
    fn test_bundle_and_share() {
        let mut v = visualiser();
        v.activate(spinner()).unwrap();
        v.set_parameter("speed", ParamValue::Number(2.5));
        let bundle = v.share().unwrap();

        let mut other = visualiser();
        other.activate_bundle(bundle).unwrap();
        assert_eq!(other.parameters().get("speed"), Some(ParamValue::Number(2.5)));
        assert_eq!(other.active().unwrap().title, "Spinner");
    }

    #[test]
    fn test_swap_cancels_pending_frame() {
        let mut v = visualiser();
        let stale = v.driver().pending().unwrap();
        v.activate(spinner()).unwrap();
        assert_eq!(v.on_frame(stale, 0.0), TickOutcome::Ignored);
        assert_eq!(v.scheduler().pending_count(), 1);
    }

    #[test]
    fn test_unmount_is_final() {
        let mut v = visualiser();
        v.unmount();
        v.unmount();
        assert!(v.context().is_disposed());
        assert!(!v.driver().is_running());
        assert!(matches!(v.activate(spinner()), Err(ContextError::Disposed)));
        assert_eq!(v.context().surface().listener_count(), 0);
    }

    #[test]
    fn test_history_activation() {
        let mut v = visualiser();
        let id = v.history_mut().add(spinner()).id.clone().unwrap();
        v.activate_history(&id).unwrap();
        assert_eq!(v.active().unwrap().title, "Spinner");
        assert!(matches!(
            v.activate_history("nope"),
            Err(VisualiserError::UnknownHistoryEntry(_))
        ));
    }
}
