//! Episode extraction from source segments.
//!
//! For each [`Segment`] the generation collaborator is asked for a JSON
//! array of episode records. This module's responsibility is schema
//! validation — malformed records are rejected and skipped with a warning,
//! never failing the whole source — and `id` collision resolution (a
//! numeric suffix within the same source). Embedding is a separate step so
//! extraction failures don't waste embedding calls.

use std::collections::HashSet;

use anyhow::{Context, Result};

use crate::chunk::Segment;
use crate::generation::{strip_fences, Generator};
use crate::models::{Episode, EpisodeKind, Localized, Priority, SourceRef};

/// System prompt for episode extraction.
const EXTRACT_SYSTEM_PROMPT: &str = "You are an expert in Hindu scriptures, Puranas, and devotional literature (bhakti). \
You read a passage from a sacred text and identify the discrete episodes it contains: \
stories, characters, concepts, etymologies, practices, and cross references.

Return ONLY a JSON array (no markdown fences, no explanation). Each element:
{
  \"id\": \"unique-kebab-case-slug\",
  \"type\": \"story\" | \"concept\" | \"character\" | \"etymology\" | \"practice\" | \"cross_reference\",
  \"priority\": \"high\" | \"medium\" | \"low\",
  \"title\": { \"primary\": \"English title\", \"secondary\": \"Hindi title in Devanagari\" },
  \"summary\": { \"primary\": \"2-4 sentence summary\", \"secondary\": \"Same in Hindi Devanagari\" },
  \"significance\": { \"primary\": \"Spiritual meaning\", \"secondary\": \"Same in Hindi\" },
  \"application\": { \"primary\": \"Practical use\", \"secondary\": \"Same in Hindi\" },
  \"keywords\": [\"names\", \"places\", \"concepts\"],
  \"section\": \"book/chapter/kanda within the source, if identifiable\"
}

Rules:
- Only include episodes actually grounded in the passage.
- Return [] if the passage contains no discrete episodes.
- Prioritise accuracy over quantity.
- All secondary text must be in Devanagari script.";

/// A record-level validation failure. These are caught and downgraded to
/// warnings; a bad record never fails the source.
#[derive(Debug)]
pub enum RecordError {
    NotAnObject,
    MissingField(&'static str),
    InvalidKind(String),
    InvalidPriority(String),
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::NotAnObject => write!(f, "record is not a JSON object"),
            RecordError::MissingField(name) => write!(f, "missing or empty field: {}", name),
            RecordError::InvalidKind(v) => write!(f, "invalid type: {}", v),
            RecordError::InvalidPriority(v) => write!(f, "invalid priority: {}", v),
        }
    }
}

impl std::error::Error for RecordError {}

/// Result of extracting one segment.
#[derive(Debug, Default)]
pub struct SegmentExtraction {
    pub episodes: Vec<Episode>,
    /// Malformed records rejected by schema validation.
    pub skipped_records: usize,
}

/// Extract episodes from one segment.
///
/// Returns `Err` only when the generation call itself fails; a response
/// that fails to parse as a JSON array yields zero episodes plus a warning,
/// and individually malformed records are skipped.
pub async fn extract_episodes(
    generator: &dyn Generator,
    segment: &Segment,
    source_key: &str,
    seen_ids: &mut HashSet<String>,
) -> Result<SegmentExtraction> {
    let user = format!(
        "Source text: {}\nPassage {}:\n\n{}\n\nIdentify the discrete episodes in this passage as a JSON array. Return [] if there are none.",
        source_key, segment.index, segment.text
    );

    let raw = generator
        .complete(EXTRACT_SYSTEM_PROMPT, &user)
        .await
        .with_context(|| format!("extraction call failed for segment {}", segment.index))?;

    let body = strip_fences(&raw);
    let values: Vec<serde_json::Value> = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "  ! segment {}: response is not a JSON array ({}), skipping",
                segment.index, e
            );
            return Ok(SegmentExtraction::default());
        }
    };

    let mut out = SegmentExtraction::default();
    for value in &values {
        match parse_record(value, source_key) {
            Ok(mut episode) => {
                episode.id = resolve_collision(episode.id, seen_ids);
                out.episodes.push(episode);
            }
            Err(e) => {
                eprintln!("  ! segment {}: bad record skipped: {}", segment.index, e);
                out.skipped_records += 1;
            }
        }
    }

    Ok(out)
}

/// Validate one raw record into an [`Episode`].
pub fn parse_record(value: &serde_json::Value, source_key: &str) -> Result<Episode, RecordError> {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .map(slugify)
        .filter(|s| !s.is_empty())
        .ok_or(RecordError::MissingField("id"))?;

    let kind = match obj.get("type").and_then(|v| v.as_str()) {
        Some("story") => EpisodeKind::Story,
        Some("concept") => EpisodeKind::Concept,
        Some("character") => EpisodeKind::Character,
        Some("etymology") => EpisodeKind::Etymology,
        Some("practice") => EpisodeKind::Practice,
        Some("cross_reference") => EpisodeKind::CrossReference,
        Some(other) => return Err(RecordError::InvalidKind(other.to_string())),
        None => return Err(RecordError::MissingField("type")),
    };

    let priority = match obj.get("priority").and_then(|v| v.as_str()) {
        Some("high") => Priority::High,
        Some("medium") => Priority::Medium,
        Some("low") => Priority::Low,
        Some(other) => return Err(RecordError::InvalidPriority(other.to_string())),
        None => return Err(RecordError::MissingField("priority")),
    };

    let title = localized(obj.get("title")).ok_or(RecordError::MissingField("title"))?;
    let summary = localized(obj.get("summary")).ok_or(RecordError::MissingField("summary"))?;
    let significance = localized(obj.get("significance")).unwrap_or_else(|| Localized::new("", ""));
    let application = localized(obj.get("application")).unwrap_or_else(|| Localized::new("", ""));

    let keywords = obj
        .get("keywords")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|k| k.as_str())
                .map(|k| k.to_string())
                .collect()
        })
        .unwrap_or_default();

    let section = obj
        .get("section")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(Episode {
        id,
        kind,
        priority,
        title,
        summary,
        significance,
        application,
        keywords,
        source_reference: SourceRef {
            text: source_key.to_string(),
            section,
        },
    })
}

/// Read a `{primary, secondary}` pair; `None` when `primary` is missing or
/// empty.
fn localized(value: Option<&serde_json::Value>) -> Option<Localized> {
    let obj = value?.as_object()?;
    let primary = obj.get("primary")?.as_str()?.trim();
    if primary.is_empty() {
        return None;
    }
    let secondary = obj
        .get("secondary")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim();
    Some(Localized::new(primary, secondary))
}

/// Normalize an id into a kebab-case slug.
pub fn slugify(s: &str) -> String {
    let mut slug = String::with_capacity(s.len());
    let mut last_dash = true;
    for c in s.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Resolve an id collision within a source by appending `-2`, `-3`, ….
fn resolve_collision(id: String, seen: &mut HashSet<String>) -> String {
    if seen.insert(id.clone()) {
        return id;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", id, n);
        if seen.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_json() -> serde_json::Value {
        serde_json::json!({
            "id": "Ocean Crossing",
            "type": "story",
            "priority": "high",
            "title": { "primary": "The ocean crossing", "secondary": "समुद्र लंघन" },
            "summary": { "primary": "Hanuman leaps across the ocean to Lanka.", "secondary": "..." },
            "significance": { "primary": "Faith overcomes obstacles.", "secondary": "..." },
            "application": { "primary": "Invoke before daunting tasks.", "secondary": "..." },
            "keywords": ["Hanuman", "Lanka", "ocean"],
            "section": "Sundar Kaand 1"
        })
    }

    #[test]
    fn test_parse_record_valid() {
        let ep = parse_record(&record_json(), "sundar-kaand").unwrap();
        assert_eq!(ep.id, "ocean-crossing");
        assert_eq!(ep.kind, EpisodeKind::Story);
        assert_eq!(ep.priority, Priority::High);
        assert_eq!(ep.source_reference.text, "sundar-kaand");
        assert_eq!(ep.source_reference.section, "Sundar Kaand 1");
        assert_eq!(ep.keywords.len(), 3);
    }

    #[test]
    fn test_parse_record_missing_title() {
        let mut value = record_json();
        value.as_object_mut().unwrap().remove("title");
        let err = parse_record(&value, "src").unwrap_err();
        assert!(matches!(err, RecordError::MissingField("title")));
    }

    #[test]
    fn test_parse_record_invalid_kind() {
        let mut value = record_json();
        value["type"] = serde_json::json!("legend");
        let err = parse_record(&value, "src").unwrap_err();
        assert!(matches!(err, RecordError::InvalidKind(_)));
    }

    #[test]
    fn test_parse_record_not_an_object() {
        let err = parse_record(&serde_json::json!("nope"), "src").unwrap_err();
        assert!(matches!(err, RecordError::NotAnObject));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("The Ocean  Crossing!"), "the-ocean-crossing");
        assert_eq!(slugify("  rama's-bow "), "rama-s-bow");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn test_resolve_collision_suffixes() {
        let mut seen = HashSet::new();
        assert_eq!(resolve_collision("a".into(), &mut seen), "a");
        assert_eq!(resolve_collision("a".into(), &mut seen), "a-2");
        assert_eq!(resolve_collision("a".into(), &mut seen), "a-3");
        assert_eq!(resolve_collision("b".into(), &mut seen), "b");
    }
}
