//! Externally generated visualization payloads and the shared-bundle format.
//!
//! A payload arrives from the content-generation collaborator as JSON with
//! camelCase keys. Its script fields are untrusted and are only ever executed
//! inside the sandbox in [`crate::scripting`].

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::params::{ParamValue, ParameterState};
use crate::view_settings::ViewSettings;

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("duplicate control id '{0}'")]
    DuplicateControl(String),
    #[error("control '{id}' has min {min} greater than max {max}")]
    InvertedRange { id: String, min: f32, max: f32 },
    #[error("control '{id}' default value does not match its type")]
    DefaultTypeMismatch { id: String },
}

/// Kind of input widget a control describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlKind {
    /// Bounded numeric slider.
    Range,
    /// On/off toggle.
    Boolean,
}

/// One user-tunable parameter declared by a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSpec {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    pub default_value: ParamValue,
}

impl ControlSpec {
    pub fn range(id: &str, label: &str, min: f32, max: f32, step: f32, default: f32) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: ControlKind::Range,
            min: Some(min),
            max: Some(max),
            step: Some(step),
            default_value: ParamValue::Number(default),
        }
    }

    pub fn toggle(id: &str, label: &str, default: bool) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            kind: ControlKind::Boolean,
            min: None,
            max: None,
            step: None,
            default_value: ParamValue::Bool(default),
        }
    }

    /// Coerce an incoming value to this control's type and bounds.
    pub fn coerce(&self, value: ParamValue) -> ParamValue {
        match (self.kind, value) {
            (ControlKind::Range, ParamValue::Number(v)) => {
                let lo = self.min.unwrap_or(f32::NEG_INFINITY);
                let hi = self.max.unwrap_or(f32::INFINITY);
                if v.is_nan() {
                    self.default_value
                } else if lo <= hi {
                    ParamValue::Number(v.clamp(lo, hi))
                } else {
                    ParamValue::Number(v)
                }
            }
            (ControlKind::Range, ParamValue::Bool(b)) => {
                ParamValue::Number(if b { 1.0 } else { 0.0 })
            }
            (ControlKind::Boolean, ParamValue::Bool(b)) => ParamValue::Bool(b),
            (ControlKind::Boolean, ParamValue::Number(v)) => ParamValue::Bool(v != 0.0),
        }
    }
}

/// A generated scene description plus its animation behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub explanation: String,
    pub setup_code: String,
    #[serde(default)]
    pub animation_code: String,
    #[serde(default)]
    pub controls: Vec<ControlSpec>,
}

impl VisualizationPayload {
    pub fn new(title: &str, setup_code: &str, animation_code: &str) -> Self {
        Self {
            id: None,
            timestamp: None,
            title: title.to_string(),
            description: String::new(),
            explanation: String::new(),
            setup_code: setup_code.to_string(),
            animation_code: animation_code.to_string(),
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<ControlSpec>) -> Self {
        self.controls = controls;
        self
    }

    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Animation code, or `None` when the payload has no per-frame behavior.
    pub fn animation(&self) -> Option<&str> {
        let code = self.animation_code.trim();
        if code.is_empty() {
            None
        } else {
            Some(&self.animation_code)
        }
    }

    pub fn control(&self, id: &str) -> Option<&ControlSpec> {
        self.controls.iter().find(|c| c.id == id)
    }

    /// Check the structural invariants the runtime relies on.
    pub fn validate(&self) -> Result<(), PayloadError> {
        let mut seen = HashSet::new();
        for control in &self.controls {
            if !seen.insert(control.id.as_str()) {
                return Err(PayloadError::DuplicateControl(control.id.clone()));
            }
            if let (Some(min), Some(max)) = (control.min, control.max) {
                if min > max {
                    return Err(PayloadError::InvertedRange {
                        id: control.id.clone(),
                        min,
                        max,
                    });
                }
            }
            let type_matches = matches!(
                (control.kind, control.default_value),
                (ControlKind::Range, ParamValue::Number(_))
                    | (ControlKind::Boolean, ParamValue::Bool(_))
            );
            if !type_matches {
                return Err(PayloadError::DefaultTypeMismatch {
                    id: control.id.clone(),
                });
            }
        }
        Ok(())
    }

    /// Stable identifier derived from the payload's content.
    pub fn content_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.title.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.setup_code.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.animation_code.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        digest[..16].to_string()
    }
}

/// The unit exchanged by history and share links: `{ v, p, c }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedBundle {
    #[serde(rename = "v")]
    pub payload: VisualizationPayload,
    #[serde(rename = "p", default)]
    pub parameters: ParameterState,
    #[serde(rename = "c", default)]
    pub view_settings: ViewSettings,
}

impl SharedBundle {
    pub fn new(
        payload: VisualizationPayload,
        parameters: ParameterState,
        view_settings: ViewSettings,
    ) -> Self {
        Self {
            payload,
            parameters,
            view_settings,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, PayloadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, PayloadError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parameters to apply when the bundle is activated: payload defaults,
    /// overridden by any bundle value whose id the payload still declares.
    pub fn effective_parameters(&self) -> ParameterState {
        let mut state = ParameterState::seeded(&self.payload.controls);
        for (id, value) in self.parameters.iter() {
            if let Some(control) = self.payload.control(id) {
                state.set(id, control.coerce(*value));
            }
        }
        state
    }
}

/// Accept either a bare payload or a shared bundle.
pub fn parse_payload_or_bundle(json: &str) -> Result<SharedBundle, PayloadError> {
    if let Ok(bundle) = serde_json::from_str::<SharedBundle>(json) {
        return Ok(bundle);
    }
    let payload = VisualizationPayload::from_json(json)?;
    let parameters = ParameterState::seeded(&payload.controls);
    Ok(SharedBundle::new(payload, parameters, ViewSettings::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GENERATED: &str = r#"{
        "title": "Simple Harmonic Motion",
        "description": "A mass on a spring",
        "setupCode": "let m = gfx.mesh(gfx.sphere(1.0, 16), gfx.standard_material(#{}));",
        "animationCode": "",
        "explanation": "F = -kx",
        "controls": [
            {"id": "k", "label": "Spring constant", "type": "range", "min": 0.1, "max": 5, "step": 0.1, "defaultValue": 1},
            {"id": "trail", "label": "Show trail", "type": "boolean", "defaultValue": true}
        ]
    }"#;

    #[test]
    fn test_parse_generated_payload() {
        let payload = VisualizationPayload::from_json(GENERATED).unwrap();
        assert_eq!(payload.title, "Simple Harmonic Motion");
        assert_eq!(payload.controls.len(), 2);
        assert_eq!(payload.controls[0].kind, ControlKind::Range);
        assert_eq!(payload.controls[0].default_value, ParamValue::Number(1.0));
        assert_eq!(payload.controls[1].kind, ControlKind::Boolean);
        assert_eq!(payload.controls[1].default_value, ParamValue::Bool(true));
        assert!(payload.animation().is_none());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let payload = VisualizationPayload::new("t", "", "").with_controls(vec![
            ControlSpec::range("speed", "Speed", 0.0, 1.0, 0.1, 0.5),
            ControlSpec::range("speed", "Speed again", 0.0, 1.0, 0.1, 0.5),
        ]);
        assert!(matches!(
            payload.validate(),
            Err(PayloadError::DuplicateControl(id)) if id == "speed"
        ));
    }

    #[test]
    fn test_validate_inverted_range() {
        let payload = VisualizationPayload::new("t", "", "")
            .with_controls(vec![ControlSpec::range("x", "X", 5.0, 1.0, 0.1, 2.0)]);
        assert!(matches!(
            payload.validate(),
            Err(PayloadError::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_coerce_clamps_range() {
        let control = ControlSpec::range("speed", "Speed", 0.1, 5.0, 0.1, 1.0);
        assert_eq!(control.coerce(ParamValue::Number(10.0)), ParamValue::Number(5.0));
        assert_eq!(control.coerce(ParamValue::Number(-1.0)), ParamValue::Number(0.1));
        assert_eq!(control.coerce(ParamValue::Number(f32::NAN)), ParamValue::Number(1.0));
        let toggle = ControlSpec::toggle("on", "On", false);
        assert_eq!(toggle.coerce(ParamValue::Number(1.0)), ParamValue::Bool(true));
    }

    #[test]
    fn test_content_id_is_stable() {
        let a = VisualizationPayload::new("Orbit", "let a = 1;", "");
        let mut b = a.clone();
        b.id = Some("other".into());
        b.timestamp = Some(42);
        assert_eq!(a.content_id(), b.content_id());
        assert_eq!(a.content_id().len(), 16);
        let c = VisualizationPayload::new("Orbit", "let a = 2;", "");
        assert_ne!(a.content_id(), c.content_id());
    }

    #[test]
    fn test_bundle_wire_shape() {
        let payload = VisualizationPayload::from_json(GENERATED).unwrap();
        let params = ParameterState::seeded(&payload.controls);
        let bundle = SharedBundle::new(payload, params, ViewSettings::default());
        let value: serde_json::Value = serde_json::from_str(&bundle.to_json().unwrap()).unwrap();
        assert!(value.get("v").is_some());
        assert_eq!(value["p"]["k"], 1.0);
        assert_eq!(value["c"]["zoom"], 12.0);
    }

    #[test]
    fn test_bundle_effective_parameters() {
        let json = format!(r#"{{"v": {GENERATED}, "p": {{"k": 9.0, "gone": 3.0}}}}"#);
        let bundle = SharedBundle::from_json(&json).unwrap();
        let params = bundle.effective_parameters();
        // clamped to the control's max, unknown ids dropped
        assert_eq!(params.get("k"), Some(ParamValue::Number(5.0)));
        assert_eq!(params.get("trail"), Some(ParamValue::Bool(true)));
        assert_eq!(params.get("gone"), None);
    }

    #[test]
    fn test_parse_payload_or_bundle_accepts_both() {
        let bare = parse_payload_or_bundle(GENERATED).unwrap();
        assert_eq!(bare.payload.title, "Simple Harmonic Motion");
        assert_eq!(bare.view_settings, ViewSettings::default());

        let json = format!(
            r##"{{"v": {GENERATED}, "c": {{"zoom": 30, "autoRotate": true, "bloomStrength": 1.0, "color1": "#ffffff", "color2": "#000000"}}}}"##
        );
        let bundle = parse_payload_or_bundle(&json).unwrap();
        assert_eq!(bundle.view_settings.zoom_distance, 30.0);
        assert!(bundle.view_settings.auto_rotate);
    }
}
