//! Per-frame loop.
//!
//! The host owns the animation-frame primitive (winit redraw requests, the
//! browser's `requestAnimationFrame`, a plain loop in the CLI) behind
//! [`FrameScheduler`]. The driver asks it for one frame at a time and only
//! acts on the request it is waiting for, so a frame that was cancelled by a
//! stop or a payload swap never touches the scene.

use std::collections::VecDeque;

use crate::context::SceneContext;
use crate::params::{ParameterHandle, ParameterState};
use crate::script_diagnostics::ScriptDiagnostic;
use crate::script_log::reset_frame_log_count;
use crate::scripting::ScriptError;
use crate::backend::RenderError;

/// Longest frame delta fed to the controller, in seconds.
const MAX_FRAME_DELTA: f64 = 0.25;

/// Behavior run once per rendered frame.
///
/// Callbacks keep no state of their own between frames; anything that must
/// persist lives in scene nodes looked up by name.
pub trait UpdateCallback {
    fn update(&self, elapsed: f32, params: &ParameterState) -> Result<(), ScriptError>;

    fn name(&self) -> &'static str {
        "callback"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameRequest;
    fn cancel_frame(&mut self, request: FrameRequest);
}

/// Scheduler driven by hand: the host pops due requests and ticks them.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: VecDeque<FrameRequest>,
    cancelled: u64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest outstanding request, removed from the queue.
    pub fn next_due(&mut self) -> Option<FrameRequest> {
        self.pending.pop_front()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn cancelled_count(&self) -> u64 {
        self.cancelled
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        self.pending.push_back(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        let before = self.pending.len();
        self.pending.retain(|r| *r != request);
        if self.pending.len() != before {
            self.cancelled += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Stopped,
    Running,
}

/// What a tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not the pending request, or the driver is stopped.
    Ignored,
    Rendered,
    /// The frame was updated but the backend failed to draw it.
    RenderFailed,
    /// The callback failed; the loop is stopped.
    Halted,
}

/// Elapsed time derived from host timestamps.
#[derive(Debug, Clone, Copy, Default)]
struct FrameClock {
    start: Option<f64>,
    last: Option<f64>,
}

impl FrameClock {
    /// Returns `(elapsed, delta)` in seconds.
    fn advance(&mut self, timestamp: f64) -> (f32, f32) {
        let start = *self.start.get_or_insert(timestamp);
        let delta = match self.last {
            Some(last) => (timestamp - last).clamp(0.0, MAX_FRAME_DELTA),
            None => 0.0,
        };
        self.last = Some(timestamp);
        ((timestamp - start).max(0.0) as f32, delta as f32)
    }
}

pub struct FrameDriver {
    state: DriverState,
    pending: Option<FrameRequest>,
    callback: Option<Box<dyn UpdateCallback>>,
    params: ParameterHandle,
    clock: FrameClock,
    elapsed: f32,
    frames: u64,
    halted: Option<ScriptDiagnostic>,
}

impl Default for FrameDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDriver {
    pub fn new() -> Self {
        Self {
            state: DriverState::Stopped,
            pending: None,
            callback: None,
            params: ParameterHandle::new(ParameterState::new()),
            clock: FrameClock::default(),
            elapsed: 0.0,
            frames: 0,
            halted: None,
        }
    }

    /// Begin driving `callback`. A running loop is stopped first.
    pub fn start(
        &mut self,
        scheduler: &mut dyn FrameScheduler,
        callback: Option<Box<dyn UpdateCallback>>,
        params: ParameterHandle,
    ) {
        if self.state == DriverState::Running {
            self.stop(scheduler);
        }
        if let Some(cb) = &callback {
            log::debug!("Frame loop starting with {} callback", cb.name());
        }
        self.callback = callback;
        self.params = params;
        self.clock = FrameClock::default();
        self.elapsed = 0.0;
        self.frames = 0;
        self.halted = None;
        self.state = DriverState::Running;
        self.pending = Some(scheduler.request_frame());
    }

    /// Cancel the pending frame and drop the callback. Safe to repeat.
    pub fn stop(&mut self, scheduler: &mut dyn FrameScheduler) {
        if let Some(request) = self.pending.take() {
            scheduler.cancel_frame(request);
        }
        self.callback = None;
        self.state = DriverState::Stopped;
    }

    /// Run one frame for `request` at host time `timestamp` (seconds).
    pub fn tick(
        &mut self,
        context: &mut SceneContext,
        scheduler: &mut dyn FrameScheduler,
        request: FrameRequest,
        timestamp: f64,
    ) -> TickOutcome {
        if self.state != DriverState::Running || self.pending != Some(request) {
            return TickOutcome::Ignored;
        }
        self.pending = None;
        reset_frame_log_count();

        let (elapsed, delta) = self.clock.advance(timestamp);
        self.elapsed = elapsed;

        context.update_controls(delta);

        if let Some(callback) = &self.callback {
            let params = self.params.snapshot();
            if let Err(err) = callback.update(elapsed, &params) {
                log::error!(
                    "Animation halted after {} frames: {}",
                    self.frames,
                    err.diagnostic
                );
                self.halted = Some(err.diagnostic);
                self.callback = None;
                self.state = DriverState::Stopped;
                return TickOutcome::Halted;
            }
        }

        let outcome = match context.render() {
            Ok(()) => TickOutcome::Rendered,
            Err(RenderError::Disposed) => {
                log::warn!("Frame loop stopped: context disposed");
                self.callback = None;
                self.state = DriverState::Stopped;
                return TickOutcome::RenderFailed;
            }
            Err(err) => {
                log::warn!("Frame render failed: {}", err);
                TickOutcome::RenderFailed
            }
        };
        self.frames += 1;
        self.pending = Some(scheduler.request_frame());
        outcome
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == DriverState::Running
    }

    pub fn pending(&self) -> Option<FrameRequest> {
        self.pending
    }

    /// Diagnostic of the callback failure that stopped the loop, if any.
    pub fn halted(&self) -> Option<&ScriptDiagnostic> {
        self.halted.as_ref()
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::config::SceneConfig;
    use crate::params::ParamValue;
    use crate::script_diagnostics::{ScriptDiagnosticKind, ScriptPhase};
    use crate::surface::{Dimensions, HostSurface};
    use crate::view_settings::ViewSettings;

    struct Recorder {
        seen: Rc<RefCell<Vec<(f32, Option<ParamValue>)>>>,
        fail_on: Option<usize>,
        calls: Cell<usize>,
    }

    impl UpdateCallback for Recorder {
        fn update(&self, elapsed: f32, params: &ParameterState) -> Result<(), ScriptError> {
            let n = self.calls.get() + 1;
            self.calls.set(n);
            if self.fail_on == Some(n) {
                return Err(ScriptError::from(ScriptDiagnostic {
                    kind: ScriptDiagnosticKind::RuntimeError,
                    phase: ScriptPhase::Animate,
                    message: "boom".to_string(),
                    location: None,
                    raw: None,
                }));
            }
            self.seen.borrow_mut().push((elapsed, params.get("speed")));
            Ok(())
        }
    }

    fn context() -> (SceneContext, Rc<RefCell<crate::backend::HeadlessLog>>) {
        let backend = HeadlessBackend::new(320, 240);
        let log = backend.log();
        let ctx = SceneContext::initialize(
            HostSurface::new(Dimensions::new(320, 240)),
            Box::new(backend),
            &ViewSettings::default(),
            &SceneConfig::default(),
        );
        (ctx, log)
    }

    fn recorder(fail_on: Option<usize>) -> (Box<Recorder>, Rc<RefCell<Vec<(f32, Option<ParamValue>)>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let cb = Box::new(Recorder {
            seen: seen.clone(),
            fail_on,
            calls: Cell::new(0),
        });
        (cb, seen)
    }

    #[test]
    fn test_ticks_render_and_reschedule() {
        let (mut ctx, log) = context();
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        let (cb, seen) = recorder(None);
        driver.start(&mut scheduler, Some(cb), ParameterHandle::new(ParameterState::new()));

        for i in 0..3 {
            let request = scheduler.next_due().unwrap();
            let outcome = driver.tick(&mut ctx, &mut scheduler, request, 10.0 + i as f64 * 0.5);
            assert_eq!(outcome, TickOutcome::Rendered);
        }
        assert_eq!(log.borrow().frames, 3);
        assert_eq!(scheduler.pending_count(), 1);
        let elapsed: Vec<f32> = seen.borrow().iter().map(|(t, _)| *t).collect();
        assert_eq!(elapsed, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_stale_request_is_ignored() {
        let (mut ctx, log) = context();
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        driver.start(&mut scheduler, None, ParameterHandle::new(ParameterState::new()));
        let first = scheduler.next_due().unwrap();

        driver.stop(&mut scheduler);
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, first, 0.0), TickOutcome::Ignored);
        assert_eq!(log.borrow().frames, 0);

        driver.start(&mut scheduler, None, ParameterHandle::new(ParameterState::new()));
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, first, 0.0), TickOutcome::Ignored);
        let current = scheduler.next_due().unwrap();
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, current, 0.0), TickOutcome::Rendered);
    }

    #[test]
    fn test_failure_halts_without_render() {
        let (mut ctx, log) = context();
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        let (cb, _seen) = recorder(Some(2));
        driver.start(&mut scheduler, Some(cb), ParameterHandle::new(ParameterState::new()));

        let r1 = scheduler.next_due().unwrap();
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, r1, 0.0), TickOutcome::Rendered);
        let r2 = scheduler.next_due().unwrap();
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, r2, 0.016), TickOutcome::Halted);

        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(log.borrow().frames, 1);
        assert_eq!(driver.halted().map(|d| d.message.as_str()), Some("boom"));
        assert!(!ctx.is_disposed());
    }

    #[test]
    fn test_parameters_read_fresh_each_tick() {
        let (mut ctx, _log) = context();
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        let (cb, seen) = recorder(None);
        let params = ParameterHandle::new(ParameterState::new());
        params.set("speed", ParamValue::Number(1.0));
        driver.start(&mut scheduler, Some(cb), params.clone());

        let r = scheduler.next_due().unwrap();
        driver.tick(&mut ctx, &mut scheduler, r, 0.0);
        params.set("speed", ParamValue::Number(3.0));
        let r = scheduler.next_due().unwrap();
        driver.tick(&mut ctx, &mut scheduler, r, 0.016);

        let values: Vec<_> = seen.borrow().iter().map(|(_, v)| *v).collect();
        assert_eq!(
            values,
            vec![Some(ParamValue::Number(1.0)), Some(ParamValue::Number(3.0))]
        );
    }

    #[test]
    fn test_render_error_keeps_looping() {
        let mut backend = HeadlessBackend::new(320, 240);
        backend.fail_next_frame(RenderError::SurfaceLost);
        let log = backend.log();
        let mut ctx = SceneContext::initialize(
            HostSurface::new(Dimensions::new(320, 240)),
            Box::new(backend),
            &ViewSettings::default(),
            &SceneConfig::default(),
        );
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        driver.start(&mut scheduler, None, ParameterHandle::new(ParameterState::new()));

        let r = scheduler.next_due().unwrap();
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, r, 0.0), TickOutcome::RenderFailed);
        let r = scheduler.next_due().unwrap();
        assert_eq!(driver.tick(&mut ctx, &mut scheduler, r, 0.016), TickOutcome::Rendered);
        assert_eq!(log.borrow().frames, 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut scheduler = ManualScheduler::new();
        let mut driver = FrameDriver::new();
        driver.stop(&mut scheduler);
        driver.start(&mut scheduler, None, ParameterHandle::new(ParameterState::new()));
        driver.stop(&mut scheduler);
        driver.stop(&mut scheduler);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.cancelled_count(), 1);
        assert!(!driver.is_running());
    }
}
