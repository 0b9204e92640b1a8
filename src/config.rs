//! Runtime configuration.
//!
//! Every field has a default that reproduces the stock look, so a config file
//! only needs the keys it wants to change.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::camera::{DEFAULT_FAR, DEFAULT_FOV_DEGREES, DEFAULT_NEAR};
use crate::color::Rgb;
use crate::orbit::{DEFAULT_DAMPING_FACTOR, IDLE_AUTO_ROTATE_SPEED, PAYLOAD_AUTO_ROTATE_SPEED};
use crate::post_processing::{DEFAULT_BLOOM_RADIUS, DEFAULT_BLOOM_THRESHOLD};
use crate::reclaimer::ReclaimPolicy;
use crate::scene_graph::{DEFAULT_BACKGROUND, DEFAULT_FOG_DENSITY};
use crate::scripting::ScriptLimits;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Camera, controller, lighting and post-processing constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub damping_factor: f32,
    pub payload_auto_rotate_speed: f32,
    pub bloom_radius: f32,
    pub bloom_threshold: f32,
    pub exposure: f32,
    pub background: Rgb,
    pub fog_density: f32,
    pub ambient_color: Rgb,
    pub ambient_intensity: f32,
    pub directional_color: Rgb,
    pub directional_intensity: f32,
    pub directional_position: [f32; 3],
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            fov: DEFAULT_FOV_DEGREES,
            near: DEFAULT_NEAR,
            far: DEFAULT_FAR,
            damping_factor: DEFAULT_DAMPING_FACTOR,
            payload_auto_rotate_speed: PAYLOAD_AUTO_ROTATE_SPEED,
            bloom_radius: DEFAULT_BLOOM_RADIUS,
            bloom_threshold: DEFAULT_BLOOM_THRESHOLD,
            exposure: 1.0,
            background: Rgb::from_hex(DEFAULT_BACKGROUND),
            fog_density: DEFAULT_FOG_DENSITY,
            ambient_color: Rgb::from_hex(0x404040),
            ambient_intensity: 2.0,
            directional_color: Rgb::WHITE,
            directional_intensity: 1.0,
            directional_position: [5.0, 10.0, 7.0],
        }
    }
}

/// Idle background constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    pub point_count: usize,
    pub point_size: f32,
    pub opacity: f32,
    /// Radians per second around Y.
    pub spin_y: f32,
    /// Radians per second around Z.
    pub spin_z: f32,
    pub auto_rotate_speed: f32,
    pub start_color: Rgb,
    pub end_color: Rgb,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            point_count: 3000,
            point_size: 0.05,
            opacity: 0.6,
            spin_y: 0.05,
            spin_z: 0.02,
            auto_rotate_speed: IDLE_AUTO_ROTATE_SPEED,
            start_color: Rgb::from_hex(0x00f3ff),
            end_color: Rgb::from_hex(0xbc13fe),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub scene: SceneConfig,
    pub idle: IdleConfig,
    pub scripts: ScriptLimits,
    pub reclaim: ReclaimPolicy,
}

impl RuntimeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reclaimer::LightRetention;

    #[test]
    fn test_empty_config_is_default() {
        let config = RuntimeConfig::from_json("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.idle.point_count, 3000);
        assert_eq!(config.scene.fov, 75.0);
        assert_eq!(config.scene.directional_position, [5.0, 10.0, 7.0]);
    }

    #[test]
    fn test_partial_override() {
        let config = RuntimeConfig::from_json(
            r#"{"idle": {"point_count": 500}, "reclaim": {"lights": "all"}}"#,
        )
        .unwrap();
        assert_eq!(config.idle.point_count, 500);
        assert_eq!(config.idle.opacity, 0.6);
        assert_eq!(config.reclaim.lights, LightRetention::All);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
