//! Collections config (`_data/collections.yml`).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// One collection entry from `_data/collections.yml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Default subject for annotation (e.g. the collection's deity).
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub subject_type: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Load the collections map. A missing file is a configuration error —
/// annotation cannot resolve a collection without it.
pub fn load_collections(path: &Path) -> Result<BTreeMap<String, CollectionConfig>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Collections config not found: {}", path.display()))?;
    let collections: BTreeMap<String, CollectionConfig> =
        serde_yaml::from_str(&content).with_context(|| "Failed to parse collections.yml")?;
    Ok(collections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_collections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collections.yml");
        std::fs::write(
            &path,
            "hanuman-chalisa:\n  title: Hanuman Chalisa\n  subject: Hanuman\n  subject_type: deity\nbajrang-baan:\n  enabled: false\n",
        )
        .unwrap();

        let collections = load_collections(&path).unwrap();
        assert_eq!(collections.len(), 2);
        let hc = &collections["hanuman-chalisa"];
        assert_eq!(hc.subject.as_deref(), Some("Hanuman"));
        assert!(hc.enabled);
        assert!(!collections["bajrang-baan"].enabled);
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(load_collections(Path::new("/nonexistent/collections.yml")).is_err());
    }
}
