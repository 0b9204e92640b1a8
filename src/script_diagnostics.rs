//! Structured script diagnostics.
//!
//! Rhai errors (parse and runtime) carry positions. They are wrapped into a
//! stable, JSON-serializable shape so hosts can surface a failing payload
//! without reading logs.

use std::fmt;

use serde::Serialize;

use crate::script_log::stringify_dynamic;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptDiagnosticKind {
    /// Syntax errors.
    ParseError,
    /// Runtime errors in payload code.
    RuntimeError,
    /// Payload used a binding wrong (missing member, wrong argument type).
    HostApiMisuse,
    /// Operation, depth or size budget exhausted.
    LimitExceeded,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptPhase {
    Compile,
    Setup,
    Animate,
}

impl fmt::Display for ScriptPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScriptPhase::Compile => "compile",
            ScriptPhase::Setup => "setup",
            ScriptPhase::Animate => "animate",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptLocation {
    /// 1-based line in the payload's script.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScriptDiagnostic {
    pub kind: ScriptDiagnosticKind,
    pub phase: ScriptPhase,
    pub message: String,
    pub location: Option<ScriptLocation>,
    /// Raw engine error string.
    pub raw: Option<String>,
}

impl fmt::Display for ScriptDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(
                f,
                "{} error at line {}, column {}: {}",
                self.phase, loc.line, loc.column, self.message
            ),
            None => write!(f, "{} error: {}", self.phase, self.message),
        }
    }
}

impl std::error::Error for ScriptDiagnostic {}

fn classify_message(message: &str) -> ScriptDiagnosticKind {
    let lower = message.to_ascii_lowercase();

    if lower.contains("too many operations")
        || lower.contains("stack overflow")
        || lower.contains("too large")
        || lower.contains("exceeds maximum")
        || lower.contains("expression exceeds")
    {
        return ScriptDiagnosticKind::LimitExceeded;
    }

    if lower.contains("property not found")
        || lower.contains("variable not found")
        || lower.contains("function not found")
        || lower.contains("index")
        || lower.contains("map key")
        || lower.contains("mismatched types")
        || lower.contains("invalid")
    {
        return ScriptDiagnosticKind::HostApiMisuse;
    }

    ScriptDiagnosticKind::RuntimeError
}

fn location_of(pos: rhai::Position) -> Option<ScriptLocation> {
    let line = pos.line()? as u32;
    if line == 0 {
        return None;
    }
    Some(ScriptLocation {
        line,
        column: (pos.position().unwrap_or(0) as u32).max(1),
    })
}

pub fn from_parse_error(err: &rhai::ParseError) -> ScriptDiagnostic {
    let raw = err.to_string();
    ScriptDiagnostic {
        kind: ScriptDiagnosticKind::ParseError,
        phase: ScriptPhase::Compile,
        message: err.err_type().to_string(),
        location: location_of(err.position()),
        raw: Some(raw),
    }
}

pub fn from_eval_error(phase: ScriptPhase, err: &rhai::EvalAltResult) -> ScriptDiagnostic {
    let raw = err.to_string();
    // Values passed to `throw` are reported as the script wrote them.
    let (kind, message) = match err.unwrap_inner() {
        rhai::EvalAltResult::ErrorRuntime(value, _) => {
            (ScriptDiagnosticKind::RuntimeError, stringify_dynamic(value))
        }
        _ => (classify_message(&raw), raw.clone()),
    };
    ScriptDiagnostic {
        kind,
        phase,
        message,
        location: location_of(err.position()),
        raw: Some(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_location() {
        let engine = rhai::Engine::new();
        let err = engine.compile("let x = 1;\nlet y = ;").unwrap_err();
        let diag = from_parse_error(&err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::ParseError);
        assert_eq!(diag.phase, ScriptPhase::Compile);
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
    }

    #[test]
    fn test_runtime_error_classification() {
        let engine = rhai::Engine::new();
        let err = engine.run("let a = 1;\nthrow \"boom\";").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Setup, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::RuntimeError);
        assert!(diag.message.contains("boom"));
        assert_eq!(diag.location.as_ref().map(|l| l.line), Some(2));
        assert!(diag.to_string().starts_with("setup error at line 2"));
    }

    #[test]
    fn test_thrown_map_is_stringified() {
        let engine = rhai::Engine::new();
        let err = engine.run("throw #{ code: 7 };").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Animate, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::RuntimeError);
        assert_eq!(diag.message, "{code: 7}");
        assert!(diag.raw.is_some());
    }

    #[test]
    fn test_limit_classification() {
        let mut engine = rhai::Engine::new();
        engine.set_max_operations(50);
        let err = engine.run("loop { }").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Animate, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::LimitExceeded);
    }

    #[test]
    fn test_missing_function_is_api_misuse() {
        let engine = rhai::Engine::new();
        let err = engine.run("no_such_thing(1)").unwrap_err();
        let diag = from_eval_error(ScriptPhase::Setup, &err);
        assert_eq!(diag.kind, ScriptDiagnosticKind::HostApiMisuse);
    }
}
