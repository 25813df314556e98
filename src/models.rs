//! Core data models used throughout the annotation pipeline.
//!
//! These types represent the episodes, index metadata, and retrieval results
//! that flow from source indexing through retrieval to verse annotation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A localized string pair: primary language plus a secondary rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Localized {
    pub primary: String,
    #[serde(default)]
    pub secondary: String,
}

impl Localized {
    pub fn new(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }
}

/// Kind of episode extracted from a source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeKind {
    Story,
    Concept,
    Character,
    Etymology,
    Practice,
    CrossReference,
}

/// Editorial priority of an episode or annotation entry.
///
/// The derived ordering is high < medium < low, so an ascending sort puts
/// high-priority items first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Citation into a source text: the text's name plus a section locator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub text: String,
    pub section: String,
}

/// A discrete, citable unit of source knowledge.
///
/// Episodes are owned by their source index entry; re-indexing a source
/// replaces them wholesale. The embedding vector is persisted in a separate
/// file keyed by `id` (see `store`), keeping this record diffable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    /// Stable slug, unique within a source.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EpisodeKind,
    pub priority: Priority,
    pub title: Localized,
    pub summary: Localized,
    pub significance: Localized,
    pub application: Localized,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub source_reference: SourceRef,
}

impl Episode {
    /// Text that is embedded for this episode.
    ///
    /// Title and summary dominate similarity; keywords anchor subject terms.
    pub fn embedding_text(&self) -> String {
        if self.keywords.is_empty() {
            format!("{}. {}", self.title.primary, self.summary.primary)
        } else {
            format!(
                "{}. {} Keywords: {}",
                self.title.primary,
                self.summary.primary,
                self.keywords.join(", ")
            )
        }
    }

    /// All text considered by the lexical subject filter.
    pub fn filter_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.id,
            self.keywords.join(" "),
            self.title.primary,
            self.summary.primary,
            self.summary.secondary
        )
    }
}

/// Index metadata recorded alongside a source's episodes.
///
/// Provider, model, and dims form the compatibility fingerprint for
/// retrieval: episodes are only comparable against queries embedded with
/// the same provider and model. `fingerprint` is the SHA-256 of the raw
/// source text, so callers can detect staleness without re-embedding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub provider: String,
    pub model: String,
    pub dims: usize,
    pub chunk_chars: usize,
    pub fingerprint: String,
    pub indexed_at: String,
}

/// One indexed source text: its `_meta` block plus the ordered episode list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceIndexEntry {
    #[serde(rename = "_meta")]
    pub meta: IndexMeta,
    pub episodes: Vec<Episode>,
}

/// Lightweight registry descriptor for one indexed source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub path: String,
    pub provider: String,
    pub episode_count: usize,
    pub indexed_at: String,
}

/// The registry file: source key → descriptor.
///
/// Loaded as a value at the start of a run and written atomically after a
/// source is fully indexed; never mutated incrementally across a run.
pub type Registry = BTreeMap<String, SourceDescriptor>;

/// A fully loaded source: index entry joined with its embedding vectors,
/// in episode insertion order.
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub key: String,
    pub meta: IndexMeta,
    pub episodes: Vec<IndexedEpisode>,
}

/// An episode joined with its embedding vector.
#[derive(Debug, Clone)]
pub struct IndexedEpisode {
    pub episode: Episode,
    pub vector: Vec<f32>,
}

/// A retrieval result: an episode with its similarity score and provenance.
#[derive(Debug, Clone)]
pub struct ScoredEpisode {
    pub episode: Episode,
    pub score: f32,
    pub source_key: String,
}
