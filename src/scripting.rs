//! Sandboxed Rhai execution of payload code.
//!
//! Setup code runs once against a scope holding exactly `scene`, `camera`,
//! `renderer` and `gfx`. Animation code is compiled once and then run every
//! frame in a fresh scope that also holds `time` (seconds since the loop
//! started) and `params` (a map of the current control values).
//!
//! Compilation and execution are separate fallible steps and each produces a
//! [`ScriptDiagnostic`] on failure. The engine has `eval` disabled, no module
//! resolver, and bounded operations, call depth and container sizes.

use std::cell::Cell;

use rhai::{Dynamic, Engine, Map, Scope, AST};
use serde::{Deserialize, Serialize};

use crate::frame_driver::UpdateCallback;
use crate::params::{ParamValue, ParameterState};
use crate::script_api::{push_bindings, register_api, GfxApi};
use crate::script_diagnostics::{from_eval_error, from_parse_error, ScriptDiagnostic, ScriptPhase};
use crate::script_log::{script_log, ScriptLogLevel};
use crate::stage::Stage;

/// Sandbox limits applied to every engine built for payload code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    pub max_expr_depth: usize,
    pub max_function_expr_depth: usize,
    pub max_call_levels: usize,
    /// Operation budget for the one-off setup run.
    pub setup_max_operations: u64,
    /// Operation budget for a single animation frame.
    pub frame_max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_expr_depth: 64,
            max_function_expr_depth: 64,
            max_call_levels: 64,
            setup_max_operations: 5_000_000,
            frame_max_operations: 500_000,
            max_string_size: 10_000,
            max_array_size: 100_000,
            max_map_size: 500,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{diagnostic}")]
pub struct ScriptError {
    pub diagnostic: ScriptDiagnostic,
}

impl From<ScriptDiagnostic> for ScriptError {
    fn from(diagnostic: ScriptDiagnostic) -> Self {
        Self { diagnostic }
    }
}

/// Build an engine with the sandbox limits and the host bindings registered.
pub fn build_engine(limits: &ScriptLimits, max_operations: u64) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_function_expr_depth);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_operations(max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.disable_symbol("eval");

    engine.on_print(|text| script_log(ScriptLogLevel::Print, text));
    engine.on_debug(|text, _source, pos| {
        script_log(ScriptLogLevel::Debug, &format!("{} ({})", text, pos));
    });

    register_api(&mut engine);
    engine
}

fn compile(engine: &Engine, code: &str) -> Result<AST, ScriptError> {
    engine
        .compile(code)
        .map_err(|err| from_parse_error(&err).into())
}

/// Compile and run `code` once with the setup bindings.
pub fn run_setup(
    stage: &Stage,
    gfx: &GfxApi,
    code: &str,
    limits: &ScriptLimits,
) -> Result<(), ScriptError> {
    let engine = build_engine(limits, limits.setup_max_operations);
    let ast = compile(&engine, code)?;

    let mut scope = Scope::new();
    push_bindings(&mut scope, stage, gfx);
    engine
        .run_ast_with_scope(&mut scope, &ast)
        .map_err(|err| from_eval_error(ScriptPhase::Setup, &err).into())
}

fn params_map(params: &ParameterState) -> Map {
    params
        .iter()
        .map(|(id, value)| {
            let value = match value {
                ParamValue::Number(n) => Dynamic::from(*n),
                ParamValue::Bool(b) => Dynamic::from(*b),
            };
            (id.as_str().into(), value)
        })
        .collect()
}

/// Per-frame callback backed by compiled animation code.
pub struct ScriptAnimation {
    engine: Engine,
    ast: AST,
    stage: Stage,
    gfx: GfxApi,
    invocations: Cell<u64>,
}

impl ScriptAnimation {
    pub fn compile(
        code: &str,
        stage: &Stage,
        gfx: &GfxApi,
        limits: &ScriptLimits,
    ) -> Result<Self, ScriptError> {
        let engine = build_engine(limits, limits.frame_max_operations);
        let ast = compile(&engine, code)?;
        Ok(Self {
            engine,
            ast,
            stage: stage.clone(),
            gfx: gfx.clone(),
            invocations: Cell::new(0),
        })
    }

    /// Number of times the animation has been run.
    pub fn invocations(&self) -> u64 {
        self.invocations.get()
    }
}

impl UpdateCallback for ScriptAnimation {
    fn update(&self, elapsed: f32, params: &ParameterState) -> Result<(), ScriptError> {
        self.invocations.set(self.invocations.get() + 1);

        let mut scope = Scope::new();
        push_bindings(&mut scope, &self.stage, &self.gfx);
        scope.push("time", elapsed);
        scope.push("params", params_map(params));

        self.engine
            .run_ast_with_scope(&mut scope, &self.ast)
            .map_err(|err| from_eval_error(ScriptPhase::Animate, &err).into())
    }

    fn name(&self) -> &'static str {
        "script"
    }
}
