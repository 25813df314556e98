//! Lexical subject filter over retrieved episodes.

use crate::models::ScoredEpisode;

/// Result of subject filtering, tagged so callers can tell a genuine match
/// from the graceful-degradation fallback.
#[derive(Debug, Clone)]
pub enum SubjectScope {
    /// Episodes naming the subject.
    Matched(Vec<ScoredEpisode>),
    /// The subject matched nothing; the full ranked set is passed through
    /// unchanged. The validator downstream still enforces subject relevance.
    Fallback(Vec<ScoredEpisode>),
    /// No subject was given; nothing was filtered.
    Unfiltered(Vec<ScoredEpisode>),
}

impl SubjectScope {
    pub fn episodes(&self) -> &[ScoredEpisode] {
        match self {
            SubjectScope::Matched(eps)
            | SubjectScope::Fallback(eps)
            | SubjectScope::Unfiltered(eps) => eps,
        }
    }
}

/// Case-insensitive containment: does `haystack` mention `needle`?
/// Lexical matching only, not semantic.
pub fn mentions(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Narrow `episodes` to those mentioning `subject` in their keywords, id,
/// or summary. If that removes every episode, the original sequence is
/// returned unchanged ([`SubjectScope::Fallback`]).
pub fn filter(episodes: Vec<ScoredEpisode>, subject: Option<&str>) -> SubjectScope {
    let Some(subject) = subject.filter(|s| !s.trim().is_empty()) else {
        return SubjectScope::Unfiltered(episodes);
    };

    let matched: Vec<ScoredEpisode> = episodes
        .iter()
        .filter(|e| mentions(&e.episode.filter_text(), subject))
        .cloned()
        .collect();

    if matched.is_empty() {
        SubjectScope::Fallback(episodes)
    } else {
        SubjectScope::Matched(matched)
    }
}
