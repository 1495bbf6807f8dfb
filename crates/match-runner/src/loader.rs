//! Entity snapshot loading.
//!
//! The runner reads offers and demands from one JSON document:
//!
//! ```json
//! { "offers": [ ... ], "demands": [ ... ] }
//! ```

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use matchmaking::{is_valid_entity_id, DemandEntity, InMemoryEntitySource, OfferEntity};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EntitySnapshot {
    pub offers: Vec<OfferEntity>,
    pub demands: Vec<DemandEntity>,
}

impl EntitySnapshot {
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(text).context("invalid entity snapshot")?;
        snapshot.check_ids()?;
        Ok(snapshot)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read entities from {}", path.display()))?;
        let snapshot = Self::from_json(&text)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(
            path = %path.display(),
            offers = snapshot.offers.len(),
            demands = snapshot.demands.len(),
            "Loaded entity snapshot"
        );
        Ok(snapshot)
    }

    /// Ids must be unique per side and usable as halves of a pair id.
    fn check_ids(&self) -> Result<()> {
        let offers = self.offers.iter().map(|o| o.id.as_str());
        let demands = self.demands.iter().map(|d| d.id.as_str());
        check_side("offer", offers)?;
        check_side("demand", demands)
    }

    pub fn into_source(self) -> InMemoryEntitySource {
        InMemoryEntitySource::with_entities(self.offers, self.demands)
    }
}

fn check_side<'a>(side: &str, ids: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !is_valid_entity_id(id) {
            bail!("invalid {side} id {id:?}: ids must be non-empty and must not contain ':'");
        }
        if !seen.insert(id) {
            bail!("duplicate {side} id {id}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use matchmaking::EntitySource;

    const SNAPSHOT: &str = r#"{
        "offers": [{
            "id": "f1",
            "name": "Northwind Growth III",
            "attributes": {"strategies": ["growth"], "size": 250.0, "geographies": ["us"]},
            "updated_at": "2026-01-05T10:00:00Z"
        }],
        "demands": [{
            "id": "a1",
            "name": "Lakeside Pension",
            "attributes": {
                "strategy_preferences": ["growth", "buyout"],
                "size_range": {"min": 100.0, "max": 500.0}
            },
            "updated_at": "2026-01-06T10:00:00Z"
        }]
    }"#;

    #[tokio::test]
    async fn test_snapshot_into_source() {
        let source = EntitySnapshot::from_json(SNAPSHOT).unwrap().into_source();
        let offers = source.offers().await.unwrap();
        assert_eq!(offers.len(), 1);
        assert!(offers[0].active);
        let demand = source.demand("a1").await.unwrap().unwrap();
        assert_eq!(demand.name, "Lakeside Pension");
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let snapshot = EntitySnapshot::from_json("{}").unwrap();
        assert!(snapshot.offers.is_empty());
        assert!(snapshot.demands.is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"{"demands": [
            {"id": "a1", "name": "A", "attributes": {}, "updated_at": "2026-01-01T00:00:00Z"},
            {"id": "a1", "name": "B", "attributes": {}, "updated_at": "2026-01-01T00:00:00Z"}
        ]}"#;
        let err = EntitySnapshot::from_json(text).unwrap_err();
        assert!(err.to_string().contains("duplicate demand id a1"));
    }

    #[test]
    fn test_id_with_pair_separator_rejected() {
        let text = r#"{"offers": [
            {"id": "fund:eu", "name": "A", "attributes": {"size": 10.0},
             "updated_at": "2026-01-01T00:00:00Z"}
        ]}"#;
        let err = EntitySnapshot::from_json(text).unwrap_err();
        assert!(err.to_string().contains("invalid offer id \"fund:eu\""));

        let text = r#"{"demands": [
            {"id": "", "name": "A", "attributes": {}, "updated_at": "2026-01-01T00:00:00Z"}
        ]}"#;
        assert!(EntitySnapshot::from_json(text).is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("entities.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = EntitySnapshot::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("entities.json"));
    }
}
