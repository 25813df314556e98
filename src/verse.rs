//! Verse record files and the annotation block.
//!
//! A verse record is a markdown file at `_verses/<collection>/<id>.md`
//! whose YAML frontmatter carries the verse metadata; the markdown body is
//! never interpreted and is preserved byte-for-byte on rewrite. The
//! annotation block lives under the `puranic_context` frontmatter key as
//! an ordered list of [`AnnotationEntry`] values.
//!
//! # Merge contract
//!
//! [`merge_annotations`] is the single mutation path for the block:
//!
//! - **Default mode** — union of existing entries and fresh entries not
//!   already present by `id`. Existing entries are never altered or
//!   reordered; fresh entries are appended in priority order (high → low,
//!   retrieval rank preserved within a tier).
//! - **Regenerate mode** — the block is replaced by the fresh set.
//!
//! Merging the same fresh set twice is a no-op the second time
//! (idempotence). Writes go through the atomic stage-and-rename path in
//! [`crate::store`], so a crash mid-write leaves the original record
//! intact.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{EpisodeKind, Localized, Priority, SourceRef};
use crate::store;

/// Frontmatter key owning the annotation block.
pub const ANNOTATION_KEY: &str = "puranic_context";

/// One annotation entry attached to a verse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EpisodeKind,
    pub priority: Priority,
    pub title: Localized,
    #[serde(default)]
    pub icon: String,
    pub story_summary: Localized,
    pub theological_significance: Localized,
    pub practical_application: Localized,
    #[serde(default)]
    pub source_texts: Vec<SourceRef>,
    #[serde(default)]
    pub related_verses: Vec<String>,
}

/// A parsed verse record: frontmatter mapping plus the untouched body.
#[derive(Debug, Clone)]
pub struct VerseFile {
    pub path: PathBuf,
    pub id: String,
    pub frontmatter: serde_yaml::Mapping,
    pub body: String,
}

/// Split `content` into (frontmatter YAML, body). Files without a
/// frontmatter block yield `None` and the whole content as body.
pub fn split_frontmatter(content: &str) -> (Option<&str>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    match rest.find("---") {
        Some(pos) => (Some(&rest[..pos]), &rest[pos + 3..]),
        None => (None, content),
    }
}

/// Parse a verse record from disk.
pub fn load_verse(path: &Path) -> Result<VerseFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read verse file: {}", path.display()))?;
    let id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    let (frontmatter, body) = match split_frontmatter(&content) {
        (Some(yaml), body) => {
            let mapping: serde_yaml::Mapping = if yaml.trim().is_empty() {
                serde_yaml::Mapping::new()
            } else {
                serde_yaml::from_str(yaml)
                    .with_context(|| format!("Invalid frontmatter in {}", path.display()))?
            };
            (mapping, body.to_string())
        }
        (None, body) => (serde_yaml::Mapping::new(), body.to_string()),
    };

    Ok(VerseFile {
        path: path.to_path_buf(),
        id,
        frontmatter,
        body,
    })
}

/// Write a verse record back to disk atomically, body preserved verbatim.
pub fn write_verse(verse: &VerseFile) -> Result<()> {
    let yaml = serde_yaml::to_string(&verse.frontmatter)?;
    let content = format!("---\n{}---{}", yaml, verse.body);
    store::atomic_write(&verse.path, content.as_bytes())
}

/// Read the current annotation block (missing key → empty).
pub fn annotation_block(verse: &VerseFile) -> Result<Vec<AnnotationEntry>> {
    match verse.frontmatter.get(ANNOTATION_KEY) {
        None | Some(serde_yaml::Value::Null) => Ok(Vec::new()),
        Some(value) => serde_yaml::from_value(value.clone())
            .with_context(|| format!("Malformed {} block in {}", ANNOTATION_KEY, verse.id)),
    }
}

/// Replace the annotation block in the frontmatter.
pub fn set_annotation_block(verse: &mut VerseFile, entries: &[AnnotationEntry]) -> Result<()> {
    let value = serde_yaml::to_value(entries)?;
    verse
        .frontmatter
        .insert(serde_yaml::Value::String(ANNOTATION_KEY.to_string()), value);
    Ok(())
}

/// Outcome of a merge.
#[derive(Debug)]
pub struct MergeOutcome {
    pub entries: Vec<AnnotationEntry>,
    /// Fresh entries actually taken into the block.
    pub added: usize,
    /// Whether the block differs from `existing`.
    pub changed: bool,
}

/// Stable sort: priority high → low, input order preserved within a tier.
pub fn sort_entries(entries: &mut [AnnotationEntry]) {
    entries.sort_by_key(|e| e.priority);
}

/// Merge freshly validated entries into the existing block. See the module
/// docs for the full contract.
pub fn merge_annotations(
    existing: &[AnnotationEntry],
    mut fresh: Vec<AnnotationEntry>,
    regenerate: bool,
) -> MergeOutcome {
    sort_entries(&mut fresh);

    if regenerate {
        let changed = existing != fresh.as_slice();
        return MergeOutcome {
            added: fresh.len(),
            entries: fresh,
            changed,
        };
    }

    let mut entries = existing.to_vec();
    let mut added = 0usize;
    for entry in fresh {
        if entries.iter().any(|e| e.id == entry.id) {
            continue;
        }
        entries.push(entry);
        added += 1;
    }

    MergeOutcome {
        entries,
        added,
        changed: added > 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, priority: Priority) -> AnnotationEntry {
        AnnotationEntry {
            id: id.to_string(),
            kind: EpisodeKind::Story,
            priority,
            title: Localized::new(id, ""),
            icon: "🪔".into(),
            story_summary: Localized::new("s", ""),
            theological_significance: Localized::new("t", ""),
            practical_application: Localized::new("p", ""),
            source_texts: vec![],
            related_verses: vec![],
        }
    }

    #[test]
    fn test_split_frontmatter() {
        let content = "---\ntitle_en: Chaupai 1\n---\n\nBody text.\n";
        let (fm, body) = split_frontmatter(content);
        assert_eq!(fm, Some("\ntitle_en: Chaupai 1\n"));
        assert_eq!(body, "\n\nBody text.\n");
    }

    #[test]
    fn test_split_no_frontmatter() {
        let content = "Just a body.";
        let (fm, body) = split_frontmatter(content);
        assert!(fm.is_none());
        assert_eq!(body, content);
    }

    #[test]
    fn test_verse_roundtrip_preserves_body_and_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chaupai-01.md");
        std::fs::write(
            &path,
            "---\ntitle_en: First Chaupai\ndevanagari: जय हनुमान\n---\n\nCommentary body.\n",
        )
        .unwrap();

        let mut verse = load_verse(&path).unwrap();
        assert_eq!(verse.id, "chaupai-01");
        set_annotation_block(&mut verse, &[entry("a", Priority::High)]).unwrap();
        write_verse(&verse).unwrap();

        let reloaded = load_verse(&path).unwrap();
        assert_eq!(reloaded.body, "\n\nCommentary body.\n");
        assert_eq!(
            reloaded
                .frontmatter
                .get("title_en")
                .and_then(|v| v.as_str()),
            Some("First Chaupai")
        );
        let block = annotation_block(&reloaded).unwrap();
        assert_eq!(block.len(), 1);
        assert_eq!(block[0].id, "a");
    }

    #[test]
    fn test_merge_default_unions_by_id() {
        let existing = vec![entry("a", Priority::High), entry("b", Priority::Low)];
        let fresh = vec![entry("b", Priority::High), entry("c", Priority::Medium)];
        let outcome = merge_annotations(&existing, fresh, false);
        let ids: Vec<&str> = outcome.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(outcome.added, 1);
        assert!(outcome.changed);
        // The colliding "b" kept its existing priority.
        assert_eq!(outcome.entries[1].priority, Priority::Low);
    }

    #[test]
    fn test_merge_idempotent() {
        let fresh = vec![entry("a", Priority::High), entry("b", Priority::Medium)];
        let first = merge_annotations(&[], fresh.clone(), false);
        let second = merge_annotations(&first.entries, fresh, false);
        assert_eq!(first.entries, second.entries);
        assert_eq!(second.added, 0);
        assert!(!second.changed);
    }

    #[test]
    fn test_merge_regenerate_replaces() {
        let existing = vec![entry("a", Priority::High), entry("b", Priority::Medium)];
        let outcome = merge_annotations(&existing, vec![entry("c", Priority::Low)], true);
        let ids: Vec<&str> = outcome.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(outcome.changed);
    }

    #[test]
    fn test_fresh_entries_sorted_by_priority() {
        let fresh = vec![
            entry("low", Priority::Low),
            entry("high", Priority::High),
            entry("med", Priority::Medium),
        ];
        let outcome = merge_annotations(&[], fresh, false);
        let ids: Vec<&str> = outcome.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["high", "med", "low"]);
    }

    #[test]
    fn test_existing_order_never_disturbed() {
        // Existing entries deliberately out of priority order; default
        // merge must not touch them.
        let existing = vec![entry("low", Priority::Low), entry("high", Priority::High)];
        let outcome = merge_annotations(&existing, vec![entry("new", Priority::High)], false);
        let ids: Vec<&str> = outcome.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["low", "high", "new"]);
    }
}
