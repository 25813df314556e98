//! Retrieval engine: ranked episode lookup over all indexed sources.
//!
//! The engine is pure: the caller embeds the query once and passes the
//! vector in, together with the sources loaded in registration order (see
//! [`crate::store::load_all_sources`]). No I/O or configuration here.
//!
//! # Algorithm
//!
//! 1. Consider every episode of every source whose `_meta` provider and
//!    model match the query embedder. Mismatched sources are silently
//!    excluded — cross-provider vectors are not comparable, and this is a
//!    compatibility guard, not a failure.
//! 2. Score each candidate with cosine similarity.
//! 3. Sort descending by score; ties broken by source registration order,
//!    then episode insertion order (stable, deterministic).
//! 4. Truncate to `k`.
//!
//! Zero candidates (no sources registered, or all excluded) yields
//! [`Grounding::Unavailable`] — an explicit state, distinct from an empty
//! post-filter result, so downstream code cannot conflate the two.

use crate::embedding::cosine_similarity;
use crate::models::{LoadedSource, ScoredEpisode};

/// Outcome of a retrieval: either grounding material is available, or it
/// is not — and "not" is a tagged state, not an empty list.
#[derive(Debug, Clone)]
pub enum Grounding {
    /// No compatible episodes exist. Generation proceeds in no-grounding
    /// mode; this is degradation, not an error.
    Unavailable,
    /// Ranked episodes, best first, at most `k`.
    Ranked(Vec<ScoredEpisode>),
}

impl Grounding {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Grounding::Unavailable)
    }
}

/// Rank all compatible episodes against a query embedding.
pub fn retrieve(
    sources: &[LoadedSource],
    query_vec: &[f32],
    provider: &str,
    model: &str,
    k: usize,
) -> Grounding {
    struct Candidate<'a> {
        score: f32,
        source_idx: usize,
        episode_idx: usize,
        source: &'a LoadedSource,
    }

    let mut candidates: Vec<Candidate> = Vec::new();

    for (source_idx, source) in sources.iter().enumerate() {
        if source.meta.provider != provider || source.meta.model != model {
            continue;
        }
        for (episode_idx, indexed) in source.episodes.iter().enumerate() {
            if indexed.vector.len() != query_vec.len() {
                continue;
            }
            candidates.push(Candidate {
                score: cosine_similarity(query_vec, &indexed.vector),
                source_idx,
                episode_idx,
                source,
            });
        }
    }

    if candidates.is_empty() {
        return Grounding::Unavailable;
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.source_idx.cmp(&b.source_idx))
            .then(a.episode_idx.cmp(&b.episode_idx))
    });

    candidates.truncate(k);

    Grounding::Ranked(
        candidates
            .into_iter()
            .map(|c| ScoredEpisode {
                episode: c.source.episodes[c.episode_idx].episode.clone(),
                score: c.score,
                source_key: c.source.key.clone(),
            })
            .collect(),
    )
}
