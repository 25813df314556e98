//! `index-sources` orchestration.
//!
//! Pipeline: read source file → fingerprint → chunk → extract episodes per
//! segment → embed all episodes → write index + embeddings files → register.
//!
//! Extraction problems are recovered at segment/record granularity (the
//! run continues, with warnings). An embedding failure aborts the whole
//! source: a half-embedded source must never be registered, and because
//! all files are written only after every embedding succeeded — and
//! atomically — an abort leaves no partial state behind.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::extract::{extract_episodes, slugify};
use crate::generation::Generator;
use crate::models::{IndexMeta, SourceDescriptor, SourceIndexEntry};
use crate::registry;
use crate::store;

/// Counts reported by one indexing run.
#[derive(Debug, Default)]
pub struct IndexSummary {
    pub key: String,
    pub segments: usize,
    pub episodes: usize,
    pub skipped_records: usize,
    pub failed_segments: usize,
}

/// Index one source text file under the key derived from its file stem.
pub async fn run_index(
    config: &Config,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    file: &Path,
) -> Result<IndexSummary> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Source file not found: {}", file.display()))?;

    let key = slugify(
        file.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default(),
    );
    if key.is_empty() {
        bail!("Cannot derive a source key from {}", file.display());
    }

    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let fingerprint = format!("{:x}", hasher.finalize());

    let segments = chunk_text(&content, config.chunking.max_chars);
    if segments.is_empty() {
        bail!("Source file is empty: {}", file.display());
    }

    let mut summary = IndexSummary {
        key: key.clone(),
        segments: segments.len(),
        ..Default::default()
    };

    let mut episodes = Vec::new();
    let mut seen_ids = HashSet::new();
    for segment in &segments {
        eprintln!("  → segment {}/{}: extracting", segment.index + 1, segments.len());
        match extract_episodes(generator, segment, &key, &mut seen_ids).await {
            Ok(extraction) => {
                summary.skipped_records += extraction.skipped_records;
                episodes.extend(extraction.episodes);
            }
            Err(e) => {
                eprintln!("  ! segment {} failed: {}", segment.index, e);
                summary.failed_segments += 1;
            }
        }
    }

    if episodes.is_empty() {
        bail!("No episodes extracted from {}", file.display());
    }
    summary.episodes = episodes.len();

    // Embedding is all-or-nothing for the source; see module docs.
    let mut vectors: BTreeMap<String, Vec<f32>> = BTreeMap::new();
    for batch in episodes.chunks(config.embedding.batch_size) {
        let texts: Vec<String> = batch.iter().map(|e| e.embedding_text()).collect();
        let embedded = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("Embedding failed; source '{}' not registered", key))?;
        if embedded.len() != batch.len() {
            bail!(
                "Embedding returned {} vectors for {} episodes; source '{}' not registered",
                embedded.len(),
                batch.len(),
                key
            );
        }
        for (episode, vector) in batch.iter().zip(embedded) {
            if vector.len() != embedder.dims() {
                bail!(
                    "Embedding dimensionality {} does not match configured {}; source '{}' not registered",
                    vector.len(),
                    embedder.dims(),
                    key
                );
            }
            vectors.insert(episode.id.clone(), vector);
        }
    }

    let indexed_at = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let entry = SourceIndexEntry {
        meta: IndexMeta {
            provider: embedder.provider_id().to_string(),
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
            chunk_chars: config.chunking.max_chars,
            fingerprint,
            indexed_at: indexed_at.clone(),
        },
        episodes,
    };

    let index_dir = config.index_dir();
    store::write_source(&index_dir, &key, &entry, &vectors)?;
    registry::register_source(
        &index_dir,
        &key,
        SourceDescriptor {
            path: file.display().to_string(),
            provider: embedder.provider_id().to_string(),
            episode_count: entry.episodes.len(),
            indexed_at,
        },
    )?;

    println!("index {}", key);
    println!("  segments: {}", summary.segments);
    println!("  episodes: {}", summary.episodes);
    if summary.skipped_records > 0 {
        println!("  records skipped: {}", summary.skipped_records);
    }
    if summary.failed_segments > 0 {
        println!("  segments failed: {}", summary.failed_segments);
    }
    println!("ok");

    Ok(summary)
}
