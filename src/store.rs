//! File-backed source index store.
//!
//! One indexed source occupies two files under the index directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `<key>.episodes.json` | [`SourceIndexEntry`]: `_meta` + ordered episodes (human-readable, diffable) |
//! | `<key>.embeddings.json` | episode id → embedding vector |
//!
//! The embeddings live in a separate file so the episode index stays
//! reviewable. Re-indexing a key overwrites both files wholesale.
//!
//! All writes go through [`atomic_write`]: the full contents are staged to
//! a temp file in the same directory and renamed into place, so a crash
//! mid-write cannot leave a partially written file. Output is pretty-printed
//! JSON with `BTreeMap` key order, which makes repeated runs byte-stable.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::models::{IndexedEpisode, LoadedSource, Registry, SourceIndexEntry};
use crate::registry;

pub fn index_path(index_dir: &Path, key: &str) -> PathBuf {
    index_dir.join(format!("{}.episodes.json", key))
}

pub fn embeddings_path(index_dir: &Path, key: &str) -> PathBuf {
    index_dir.join(format!("{}.embeddings.json", key))
}

/// Stage contents into a temp file next to `path`. Returns the temp path.
pub fn stage(path: &Path, contents: &[u8]) -> Result<PathBuf> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    std::fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    Ok(tmp)
}

/// Swap a staged temp file into place.
pub fn commit(tmp: &Path, path: &Path) -> Result<()> {
    std::fs::rename(tmp, path)
        .with_context(|| format!("Failed to rename {} into place", tmp.display()))
}

/// Write `contents` to `path` atomically (stage + rename).
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = stage(path, contents)?;
    commit(&tmp, path)
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)?;
    json.push('\n');
    atomic_write(path, json.as_bytes())
}

/// Persist one source: episodes file first, then embeddings file.
///
/// The caller updates the registry only after this returns, preserving the
/// invariant that every registry key has a complete index on disk.
pub fn write_source(
    index_dir: &Path,
    key: &str,
    entry: &SourceIndexEntry,
    vectors: &BTreeMap<String, Vec<f32>>,
) -> Result<()> {
    write_json_atomic(&index_path(index_dir, key), entry)?;
    write_json_atomic(&embeddings_path(index_dir, key), vectors)?;
    Ok(())
}

/// Load one source's index entry and join each episode with its vector.
pub fn load_source(index_dir: &Path, key: &str) -> Result<LoadedSource> {
    let index_file = index_path(index_dir, key);
    let content = std::fs::read_to_string(&index_file)
        .with_context(|| format!("Missing source index: {}", index_file.display()))?;
    let entry: SourceIndexEntry = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", index_file.display()))?;

    let emb_file = embeddings_path(index_dir, key);
    let emb_content = std::fs::read_to_string(&emb_file)
        .with_context(|| format!("Missing embeddings file: {}", emb_file.display()))?;
    let vectors: BTreeMap<String, Vec<f32>> = serde_json::from_str(&emb_content)
        .with_context(|| format!("Failed to parse {}", emb_file.display()))?;

    let mut episodes = Vec::with_capacity(entry.episodes.len());
    for episode in entry.episodes {
        let Some(vector) = vectors.get(&episode.id) else {
            bail!(
                "Source '{}' is corrupt: episode '{}' has no embedding",
                key,
                episode.id
            );
        };
        episodes.push(IndexedEpisode {
            vector: vector.clone(),
            episode,
        });
    }

    Ok(LoadedSource {
        key: key.to_string(),
        meta: entry.meta,
        episodes,
    })
}

/// Load every registered source, in registration order (`indexed_at`, then
/// key). A registry entry without its index files aborts with a corruption
/// error — that state violates the write ordering and must not be retrieved
/// over silently.
pub fn load_all_sources(index_dir: &Path) -> Result<Vec<LoadedSource>> {
    let reg: Registry = registry::load_registry(index_dir)?;

    let mut keys: Vec<(&String, &crate::models::SourceDescriptor)> = reg.iter().collect();
    keys.sort_by(|a, b| {
        a.1.indexed_at
            .cmp(&b.1.indexed_at)
            .then_with(|| a.0.cmp(b.0))
    });

    keys.into_iter()
        .map(|(key, _)| load_source(index_dir, key))
        .collect()
}
