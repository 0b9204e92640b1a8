//! In-memory list of previously activated payloads, newest first.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::payload::VisualizationPayload;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: Vec<VisualizationPayload>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload` at the front, stamping its id and timestamp if unset.
    ///
    /// Content already present is moved to the front rather than duplicated.
    pub fn add(&mut self, mut payload: VisualizationPayload) -> &VisualizationPayload {
        let content_id = payload.content_id();
        if payload.id.is_none() {
            payload.id = Some(content_id.clone());
        }
        if payload.timestamp.is_none() {
            payload.timestamp = Some(Utc::now().timestamp_millis());
        }

        if let Some(pos) = self
            .entries
            .iter()
            .position(|entry| entry.content_id() == content_id)
        {
            let previous = self.entries.remove(pos);
            log::debug!("History entry '{}' moved to front", previous.title);
        }
        self.entries.insert(0, payload);
        &self.entries[0]
    }

    pub fn get(&self, id: &str) -> Option<&VisualizationPayload> {
        self.entries
            .iter()
            .find(|entry| entry.id.as_deref() == Some(id))
    }

    pub fn latest(&self) -> Option<&VisualizationPayload> {
        self.entries.first()
    }

    pub fn entries(&self) -> &[VisualizationPayload] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first_with_stamps() {
        let mut history = History::new();
        history.add(VisualizationPayload::new("A", "let a = 1;", ""));
        history.add(VisualizationPayload::new("B", "let b = 1;", ""));

        let titles: Vec<_> = history.entries().iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["B", "A"]);
        let latest = history.latest().unwrap();
        assert!(latest.timestamp.unwrap() > 0);
        assert_eq!(latest.id.as_deref(), Some(latest.content_id().as_str()));
    }

    #[test]
    fn test_readding_moves_to_front() {
        let mut history = History::new();
        let a = VisualizationPayload::new("A", "let a = 1;", "");
        history.add(a.clone());
        history.add(VisualizationPayload::new("B", "let b = 1;", ""));
        history.add(a);

        assert_eq!(history.len(), 2);
        assert_eq!(history.latest().unwrap().title, "A");
    }

    #[test]
    fn test_existing_stamps_are_kept() {
        let mut history = History::new();
        let mut payload = VisualizationPayload::new("A", "", "");
        payload.id = Some("custom".into());
        payload.timestamp = Some(7);
        history.add(payload);

        let entry = history.get("custom").unwrap();
        assert_eq!(entry.timestamp, Some(7));
        assert!(history.get("missing").is_none());
    }

    #[test]
    fn test_json_round_trip() {
        let mut history = History::new();
        history.add(VisualizationPayload::new("A", "let a = 1;", "a += 1;"));
        let restored = History::from_json(&history.to_json().unwrap()).unwrap();
        assert_eq!(restored, history);
        history.clear();
        assert!(history.is_empty());
    }
}
