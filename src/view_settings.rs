//! User-facing view settings: camera distance, auto-rotate, bloom and palette.

use serde::{Deserialize, Serialize};

use crate::color::Rgb;

/// Settings owned by the host UI and pushed into a live scene context.
///
/// Field names on the wire match the shared-bundle format (`zoom`, `color1`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSettings {
    #[serde(rename = "zoom")]
    pub zoom_distance: f32,
    pub auto_rotate: bool,
    pub bloom_strength: f32,
    #[serde(rename = "color1")]
    pub primary_color: Rgb,
    #[serde(rename = "color2")]
    pub secondary_color: Rgb,
}

/// The single source of truth for every "reset settings" path.
pub const DEFAULT_VIEW_SETTINGS: ViewSettings = ViewSettings {
    zoom_distance: 12.0,
    auto_rotate: false,
    bloom_strength: 0.8,
    // #00f3ff
    primary_color: Rgb::new(0.0, 243.0 / 255.0, 1.0),
    // #bc13fe
    secondary_color: Rgb::new(188.0 / 255.0, 19.0 / 255.0, 254.0 / 255.0),
};

impl Default for ViewSettings {
    fn default() -> Self {
        DEFAULT_VIEW_SETTINGS
    }
}

impl ViewSettings {
    /// Copy of these settings with zoom restored to the default distance.
    pub fn with_default_zoom(mut self) -> Self {
        self.zoom_distance = DEFAULT_VIEW_SETTINGS.zoom_distance;
        self
    }

    /// Clamp values that would make the scene context misbehave.
    pub fn sanitized(mut self) -> Self {
        if !self.zoom_distance.is_finite() || self.zoom_distance <= 0.0 {
            self.zoom_distance = DEFAULT_VIEW_SETTINGS.zoom_distance;
        }
        if !self.bloom_strength.is_finite() {
            self.bloom_strength = DEFAULT_VIEW_SETTINGS.bloom_strength;
        }
        self.bloom_strength = self.bloom_strength.max(0.0);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_constant() {
        let s = ViewSettings::default();
        assert_eq!(s, DEFAULT_VIEW_SETTINGS);
        assert_eq!(s.zoom_distance, 12.0);
        assert!(!s.auto_rotate);
        assert_eq!(s.primary_color.to_hex(), 0x00f3ff);
        assert_eq!(s.secondary_color.to_hex(), 0xbc13fe);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(DEFAULT_VIEW_SETTINGS).unwrap();
        assert_eq!(json["zoom"], 12.0);
        assert_eq!(json["autoRotate"], false);
        assert_eq!(json["color1"], "#00f3ff");
        assert_eq!(json["color2"], "#bc13fe");

        let parsed: ViewSettings = serde_json::from_str(
            r##"{"zoom":20,"autoRotate":true,"bloomStrength":1.5,"color1":"#ff0000","color2":"#00ff00"}"##,
        )
        .unwrap();
        assert_eq!(parsed.zoom_distance, 20.0);
        assert!(parsed.auto_rotate);
    }

    #[test]
    fn test_sanitized_rejects_bad_zoom() {
        let mut s = DEFAULT_VIEW_SETTINGS;
        s.zoom_distance = -3.0;
        s.bloom_strength = -1.0;
        let s = s.sanitized();
        assert_eq!(s.zoom_distance, 12.0);
        assert_eq!(s.bloom_strength, 0.0);
    }
}
