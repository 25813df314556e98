//! Registry of indexed sources.
//!
//! The registry file (`registry.json`) maps each source key to a
//! lightweight descriptor. It is loaded as a value at the start of a run
//! and written atomically after a source has been fully indexed — never
//! mutated incrementally across a run. Because it is written only after
//! the source's index files are in place, every registry key is backed by
//! a complete index on disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::models::{Registry, SourceDescriptor};
use crate::store;

pub fn registry_path(index_dir: &Path) -> PathBuf {
    index_dir.join("registry.json")
}

/// Load the registry; a missing file is an empty registry.
pub fn load_registry(index_dir: &Path) -> Result<Registry> {
    let path = registry_path(index_dir);
    if !path.exists() {
        return Ok(Registry::new());
    }
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Register a source: load-modify-write, atomically.
pub fn register_source(index_dir: &Path, key: &str, descriptor: SourceDescriptor) -> Result<()> {
    let mut reg = load_registry(index_dir)?;
    reg.insert(key.to_string(), descriptor);
    store::write_json_atomic(&registry_path(index_dir), &reg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(indexed_at: &str) -> SourceDescriptor {
        SourceDescriptor {
            path: "sources/x.txt".into(),
            provider: "openai".into(),
            episode_count: 3,
            indexed_at: indexed_at.into(),
        }
    }

    #[test]
    fn test_empty_registry_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_registry(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_register_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        register_source(dir.path(), "sundar-kaand", descriptor("2026-01-01T00:00:00Z")).unwrap();
        register_source(dir.path(), "bhagavad-gita", descriptor("2026-01-02T00:00:00Z")).unwrap();

        let reg = load_registry(dir.path()).unwrap();
        assert_eq!(reg.len(), 2);
        assert_eq!(reg["sundar-kaand"].episode_count, 3);
    }

    #[test]
    fn test_reregister_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        register_source(dir.path(), "k", descriptor("2026-01-01T00:00:00Z")).unwrap();
        let mut d = descriptor("2026-02-01T00:00:00Z");
        d.episode_count = 9;
        register_source(dir.path(), "k", d).unwrap();

        let reg = load_registry(dir.path()).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg["k"].episode_count, 9);
        assert_eq!(reg["k"].indexed_at, "2026-02-01T00:00:00Z");
    }
}
