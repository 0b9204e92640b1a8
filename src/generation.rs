//! Content-generation collaborator contract.
//!
//! The runtime never talks to a model itself. A [`PayloadSource`] turns a topic
//! into a parsed [`VisualizationPayload`]; the file-backed source below is what
//! the CLI uses to feed payloads saved from a previous generation.

use std::path::{Path, PathBuf};

use crate::payload::VisualizationPayload;

/// Top-level keys every generated payload must carry.
pub const REQUIRED_FIELDS: [&str; 5] = [
    "title",
    "description",
    "setupCode",
    "animationCode",
    "explanation",
];

/// Keys every entry of `controls` must carry.
pub const REQUIRED_CONTROL_FIELDS: [&str; 6] = ["id", "label", "type", "min", "max", "defaultValue"];

/// Shown to the user when generation fails for any reason.
pub const GENERATION_FAILED_MESSAGE: &str =
    "Failed to visualize the concept. The cosmos is unclear.";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("generated content is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("generated content is missing '{0}'")]
    MissingField(String),
    #[error("no payload available for topic '{0}'")]
    NotFound(String),
}

pub trait PayloadSource {
    fn generate(&mut self, topic: &str) -> Result<VisualizationPayload, GenerationError>;
}

/// Check a raw response against the request contract, then parse it.
pub fn parse_generated(json: &str) -> Result<VisualizationPayload, GenerationError> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    for field in REQUIRED_FIELDS {
        if value.get(field).is_none() {
            return Err(GenerationError::MissingField(field.to_string()));
        }
    }
    if let Some(controls) = value.get("controls").and_then(|c| c.as_array()) {
        for (i, control) in controls.iter().enumerate() {
            for field in REQUIRED_CONTROL_FIELDS {
                if control.get(field).is_none() {
                    return Err(GenerationError::MissingField(format!("controls[{i}].{field}")));
                }
            }
        }
    }
    Ok(serde_json::from_value(value)?)
}

/// Lowercase, dash-separated form of a topic, used as a file stem.
pub fn topic_slug(topic: &str) -> String {
    let mut slug = String::with_capacity(topic.len());
    for ch in topic.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Serves payloads from disk.
///
/// Pointed at a file, every topic yields that file. Pointed at a directory,
/// topic `"Black Hole"` yields `black-hole.json`.
pub struct FilePayloadSource {
    path: PathBuf,
}

impl FilePayloadSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn resolve(&self, topic: &str) -> Result<PathBuf, GenerationError> {
        if self.path.is_dir() {
            let candidate = self.path.join(format!("{}.json", topic_slug(topic)));
            if candidate.is_file() {
                Ok(candidate)
            } else {
                Err(GenerationError::NotFound(topic.to_string()))
            }
        } else {
            Ok(self.path.clone())
        }
    }

    fn read(path: &Path) -> Result<String, GenerationError> {
        std::fs::read_to_string(path).map_err(|source| GenerationError::Io {
            path: path.display().to_string(),
            source,
        })
    }
}

impl PayloadSource for FilePayloadSource {
    fn generate(&mut self, topic: &str) -> Result<VisualizationPayload, GenerationError> {
        let path = self.resolve(topic)?;
        log::info!("Loading payload for '{}' from {}", topic, path.display());
        parse_generated(&Self::read(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "title": "Wave",
        "description": "d",
        "setupCode": "scene.add(gfx.group());",
        "animationCode": "",
        "explanation": "e",
        "controls": [{"id": "a", "label": "A", "type": "range", "min": 0, "max": 1, "defaultValue": 0.5}]
    }"#;

    #[test]
    fn test_parse_generated() {
        let payload = parse_generated(RESPONSE).unwrap();
        assert_eq!(payload.title, "Wave");
        assert_eq!(payload.controls.len(), 1);
    }

    #[test]
    fn test_missing_field() {
        let err = parse_generated(r#"{"title": "x", "setupCode": ""}"#).unwrap_err();
        assert!(matches!(err, GenerationError::MissingField(f) if f == "description"));

        let broken = RESPONSE.replace(r#""label": "A", "#, "");
        let err = parse_generated(&broken).unwrap_err();
        assert!(matches!(err, GenerationError::MissingField(f) if f == "controls[0].label"));
    }

    #[test]
    fn test_topic_slug() {
        assert_eq!(topic_slug("  Black Hole!! "), "black-hole");
        assert_eq!(topic_slug("Kaluza-Klein  theory"), "kaluza-klein-theory");
    }

    #[test]
    fn test_file_source() {
        let dir = std::env::temp_dir().join(format!("principia-gen-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("standing-waves.json"), RESPONSE).unwrap();

        let mut source = FilePayloadSource::new(&dir);
        assert_eq!(source.generate("Standing Waves").unwrap().title, "Wave");
        assert!(matches!(
            source.generate("Dark matter"),
            Err(GenerationError::NotFound(_))
        ));

        let mut single = FilePayloadSource::new(dir.join("standing-waves.json"));
        assert!(single.generate("anything").is_ok());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
