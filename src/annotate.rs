//! Verse annotation pipeline.
//!
//! For each targeted verse: build the query text, retrieve grounding
//! episodes, narrow them to the subject, run the generation collaborator,
//! validate the returned entries, and merge them into the verse record.
//!
//! # Generation modes
//!
//! - **RAG mode** — grounding episodes were retrieved. The generation
//!   request passes the filtered episodes as the *only* permissible
//!   grounding material, with an explicit instruction that the subject must
//!   be a direct participant in every entry.
//! - **No-grounding mode** — no compatible sources are indexed
//!   ([`Grounding::Unavailable`]). Generation proceeds from the model's own
//!   knowledge under the same subject constraint. This is degradation, not
//!   an error, and is logged distinctly.
//!
//! # Validation
//!
//! The completion is never trusted. Entries are dropped when they are
//! off-subject (a subject is set and the entry does not name it),
//! ungrounded (RAG mode and no grounding episode corroborates the entry,
//! by lexical string/keyword overlap), duplicated within the batch, or
//! colliding with an existing entry's `id` (default mode only).
//!
//! # Failure granularity
//!
//! A failure on one verse (embedding call, generation call, unparseable
//! response, write error) marks that verse failed and the run continues to
//! the next; the final summary reports counts and the process exits
//! non-zero if any verse failed. Verses are processed strictly one at a
//! time — writes to verse records are never concurrent.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::collections;
use crate::config::Config;
use crate::embedding::{embed_query, Embedder};
use crate::extract::slugify;
use crate::generation::{strip_fences, Generator};
use crate::models::ScoredEpisode;
use crate::retrieval::{retrieve, Grounding};
use crate::store;
use crate::subject::{filter, mentions, SubjectScope};
use crate::verse::{
    annotation_block, load_verse, merge_annotations, set_annotation_block, write_verse,
    AnnotationEntry, VerseFile,
};

/// Options for one annotation run.
#[derive(Debug, Clone, Default)]
pub struct AnnotateOptions {
    pub collection: String,
    pub verse: Option<String>,
    pub all: bool,
    pub regenerate: bool,
    pub subject: Option<String>,
    pub subject_type: Option<String>,
}

/// Per-run outcome counts. A zero-entry result (`empty`) is always
/// distinguishable from a success with content.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub empty: usize,
    pub skipped: usize,
    pub failed: usize,
}

enum VerseStatus {
    Added(usize),
    Updated(usize),
    Unchanged,
    Empty,
    Skipped,
    Failed,
}

const ANNOTATE_SCHEMA: &str = "Return ONLY a JSON array (no markdown fences, no explanation). Each element:
{
  \"id\": \"unique-kebab-case-slug\",
  \"type\": \"story\" | \"concept\" | \"character\" | \"etymology\" | \"practice\" | \"cross_reference\",
  \"priority\": \"high\" | \"medium\" | \"low\",
  \"title\": { \"primary\": \"English title\", \"secondary\": \"Hindi title in Devanagari\" },
  \"icon\": \"single emoji\",
  \"story_summary\": { \"primary\": \"2-4 sentence summary\", \"secondary\": \"Same in Hindi Devanagari\" },
  \"theological_significance\": { \"primary\": \"2-4 sentences on spiritual meaning\", \"secondary\": \"Same in Hindi\" },
  \"practical_application\": { \"primary\": \"2-4 sentences on practical use\", \"secondary\": \"Same in Hindi\" },
  \"source_texts\": [ { \"text\": \"Scripture name\", \"section\": \"Book/chapter/kanda\" } ],
  \"related_verses\": []
}

Rules:
- Generate 1-3 entries per verse (only the most relevant references)
- For short invocations, closing verses, or verses with no meaningful content, return []
- Prioritise accuracy over quantity
- All secondary text must be in Devanagari script";

/// Run annotation for one collection. Returns per-verse counts; the caller
/// decides the exit code from `failed`.
pub async fn run_annotate(
    config: &Config,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    opts: &AnnotateOptions,
) -> Result<RunSummary> {
    let collections = collections::load_collections(&config.collections_path())?;
    let collection = collections
        .get(&opts.collection)
        .with_context(|| format!("Collection '{}' not found in collections.yml", opts.collection))?;

    let subject = opts
        .subject
        .clone()
        .or_else(|| collection.subject.clone());
    let subject_type = opts
        .subject_type
        .clone()
        .or_else(|| collection.subject_type.clone())
        .unwrap_or_else(|| "figure".to_string());

    let verse_files = target_verses(config, opts)?;

    // Read-only snapshot of every indexed source, in registration order.
    let sources = store::load_all_sources(&config.index_dir())?;

    let mut summary = RunSummary::default();

    for path in &verse_files {
        let status = annotate_verse(
            config,
            embedder,
            generator,
            &sources,
            path,
            subject.as_deref(),
            &subject_type,
            opts.regenerate,
        )
        .await;

        match status {
            VerseStatus::Added(_) => summary.added += 1,
            VerseStatus::Updated(_) => summary.updated += 1,
            VerseStatus::Unchanged => summary.unchanged += 1,
            VerseStatus::Empty => summary.empty += 1,
            VerseStatus::Skipped => summary.skipped += 1,
            VerseStatus::Failed => summary.failed += 1,
        }
    }

    println!("annotate {}", opts.collection);
    println!("  verses targeted: {}", verse_files.len());
    if summary.added > 0 {
        println!("  added: {}", summary.added);
    }
    if summary.updated > 0 {
        println!("  updated: {}", summary.updated);
    }
    if summary.unchanged > 0 {
        println!("  unchanged: {}", summary.unchanged);
    }
    if summary.empty > 0 {
        println!("  no content: {}", summary.empty);
    }
    if summary.skipped > 0 {
        println!("  skipped: {}", summary.skipped);
    }
    if summary.failed > 0 {
        println!("  failed: {}", summary.failed);
    } else {
        println!("ok");
    }

    Ok(summary)
}

/// Resolve the verse files targeted by this run.
fn target_verses(config: &Config, opts: &AnnotateOptions) -> Result<Vec<PathBuf>> {
    let verses_dir = config.verses_dir(&opts.collection);
    if !verses_dir.is_dir() {
        bail!("Collection directory not found: {}", verses_dir.display());
    }

    if opts.all {
        let mut files: Vec<PathBuf> = std::fs::read_dir(&verses_dir)
            .with_context(|| format!("Failed to read {}", verses_dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("md"))
            .collect();
        files.sort();
        if files.is_empty() {
            bail!("No verse files found in {}", verses_dir.display());
        }
        Ok(files)
    } else {
        let id = opts
            .verse
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Either --verse or --all is required"))?;
        let path = verses_dir.join(format!("{}.md", id));
        if !path.is_file() {
            bail!("Verse file not found: {}", path.display());
        }
        Ok(vec![path])
    }
}

#[allow(clippy::too_many_arguments)]
async fn annotate_verse(
    config: &Config,
    embedder: &dyn Embedder,
    generator: &dyn Generator,
    sources: &[crate::models::LoadedSource],
    path: &PathBuf,
    subject: Option<&str>,
    subject_type: &str,
    regenerate: bool,
) -> VerseStatus {
    let mut verse = match load_verse(path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("  ✗ {}: {}", path.display(), e);
            return VerseStatus::Failed;
        }
    };

    let existing = match annotation_block(&verse) {
        Ok(block) => block,
        Err(e) => {
            eprintln!("  ✗ {}: {}", verse.id, e);
            return VerseStatus::Failed;
        }
    };

    if !existing.is_empty() && !regenerate {
        eprintln!(
            "  ⊘ {}: already annotated, skipping (use --regenerate to overwrite)",
            verse.id
        );
        return VerseStatus::Skipped;
    }

    let query = build_query_text(&verse);
    let query_vec = match embed_query(embedder, &query).await {
        Ok(v) => v,
        Err(e) => {
            eprintln!("  ✗ {}: query embedding failed: {}", verse.id, e);
            return VerseStatus::Failed;
        }
    };

    let grounding = retrieve(
        sources,
        &query_vec,
        embedder.provider_id(),
        embedder.model_name(),
        config.retrieval.top_k,
    );

    let (system, user, grounding_episodes) = match grounding {
        Grounding::Ranked(episodes) => {
            let scope = filter(episodes, subject);
            match &scope {
                SubjectScope::Matched(eps) => {
                    eprintln!("  → {}: generating ({} grounding episodes)", verse.id, eps.len())
                }
                SubjectScope::Fallback(eps) => eprintln!(
                    "  → {}: subject matched nothing, using full retrieved set ({})",
                    verse.id,
                    eps.len()
                ),
                SubjectScope::Unfiltered(eps) => {
                    eprintln!("  → {}: generating ({} grounding episodes)", verse.id, eps.len())
                }
            }
            let episodes = scope.episodes().to_vec();
            let (system, user) = build_rag_request(&verse, &episodes, subject, subject_type);
            (system, user, Some(episodes))
        }
        Grounding::Unavailable => {
            eprintln!("  → {}: no indexed grounding, generating unassisted", verse.id);
            let (system, user) = build_unassisted_request(&verse, subject, subject_type);
            (system, user, None)
        }
    };

    let raw = match generator.complete(&system, &user).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("  ✗ {}: generation failed: {}", verse.id, e);
            return VerseStatus::Failed;
        }
    };

    let entries = match parse_entries(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("  ✗ {}: {}", verse.id, e);
            return VerseStatus::Failed;
        }
    };

    let validated = validate_entries(
        entries,
        subject,
        grounding_episodes.as_deref(),
        &existing,
        regenerate,
    );

    if validated.is_empty() {
        eprintln!("  ○ {}: no entries after validation, skipping", verse.id);
        return VerseStatus::Empty;
    }

    let had_entries = !existing.is_empty();
    let outcome = merge_annotations(&existing, validated, regenerate);
    if !outcome.changed {
        eprintln!("  = {}: annotation block already up to date", verse.id);
        return VerseStatus::Unchanged;
    }

    if let Err(e) = set_annotation_block(&mut verse, &outcome.entries) {
        eprintln!("  ✗ {}: {}", verse.id, e);
        return VerseStatus::Failed;
    }
    if let Err(e) = write_verse(&verse) {
        eprintln!("  ✗ {}: {}", verse.id, e);
        return VerseStatus::Failed;
    }

    if had_entries {
        eprintln!("  ✓ {}: {} entries written (regenerated)", verse.id, outcome.entries.len());
        VerseStatus::Updated(outcome.added)
    } else {
        eprintln!("  ✓ {}: {} entries added", verse.id, outcome.added);
        VerseStatus::Added(outcome.added)
    }
}

/// Read a frontmatter field that may be a plain string or a localized
/// mapping (`primary`/`en`).
fn field_text(verse: &VerseFile, key: &str) -> String {
    match verse.frontmatter.get(key) {
        Some(serde_yaml::Value::String(s)) => s.clone(),
        Some(serde_yaml::Value::Mapping(m)) => m
            .get("primary")
            .or_else(|| m.get("en"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        _ => String::new(),
    }
}

/// Build the retrieval query (and prompt header) from the verse record:
/// title, script, transliteration, the meaning fields, and a story excerpt.
pub fn build_query_text(verse: &VerseFile) -> String {
    let mut out = String::new();

    let title = field_text(verse, "title_en");
    out.push_str(&format!(
        "Verse: {}\n",
        if title.is_empty() { &verse.id } else { &title }
    ));

    for key in ["devanagari", "transliteration"] {
        let val = field_text(verse, key);
        if !val.is_empty() {
            out.push_str(&format!("{}: {}\n", key, val));
        }
    }

    for key in ["translation", "interpretive_meaning", "literal_translation"] {
        let val = field_text(verse, key);
        if !val.is_empty() {
            out.push_str(&format!("{}: {}\n", key, val));
        }
    }

    let story = field_text(verse, "story");
    if !story.is_empty() {
        let excerpt: String = story.chars().take(800).collect();
        out.push_str(&format!("Story/Context: {}\n", excerpt));
    }

    out
}

/// Build the RAG-mode request: the filtered episodes are the only
/// permissible grounding material.
fn build_rag_request(
    verse: &VerseFile,
    episodes: &[ScoredEpisode],
    subject: Option<&str>,
    subject_type: &str,
) -> (String, String) {
    let system = format!(
        "You are an expert in Hindu scriptures, Puranas, and devotional literature (bhakti). \
You write structured scriptural context entries for verses from sacred texts.\n\n\
You are given a set of source episodes. Use ONLY these episodes as factual grounding — \
do not introduce stories, characters, or claims that are not supported by them.{}\n\n{}",
        subject_clause(subject, subject_type),
        ANNOTATE_SCHEMA
    );

    let grounding: Vec<serde_json::Value> = episodes
        .iter()
        .map(|s| {
            serde_json::json!({
                "id": s.episode.id,
                "type": s.episode.kind,
                "title": s.episode.title.primary,
                "summary": s.episode.summary.primary,
                "significance": s.episode.significance.primary,
                "application": s.episode.application.primary,
                "keywords": s.episode.keywords,
                "source": s.episode.source_reference,
            })
        })
        .collect();

    let user = format!(
        "{}\nGrounding episodes (the only permissible sources):\n{}\n\n\
Generate scriptural context entries for this verse as a JSON array. Return [] if none of the episodes are relevant.",
        build_query_text(verse),
        serde_json::to_string_pretty(&grounding).unwrap_or_else(|_| "[]".to_string()),
    );

    (system, user)
}

/// Build the no-grounding request. Documented degradation mode: no indexed
/// sources are available, so the model's own knowledge is the only source
/// and the validator's grounding check is necessarily skipped.
fn build_unassisted_request(
    verse: &VerseFile,
    subject: Option<&str>,
    subject_type: &str,
) -> (String, String) {
    let system = format!(
        "You are an expert in Hindu scriptures, Puranas, and devotional literature (bhakti). \
You write structured scriptural context entries for verses from sacred texts.{}\n\n{}",
        subject_clause(subject, subject_type),
        ANNOTATE_SCHEMA
    );

    let user = format!(
        "{}\nGenerate scriptural context entries for this verse as a JSON array. \
Return [] if the verse has no meaningful scriptural content.",
        build_query_text(verse)
    );

    (system, user)
}

fn subject_clause(subject: Option<&str>, subject_type: &str) -> String {
    match subject {
        Some(s) => format!(
            " Every entry must present {} ({}) as a direct participant, not an incidental mention.",
            s, subject_type
        ),
        None => String::new(),
    }
}

/// Parse the completion into annotation entries. An unparseable response
/// fails the verse; individually malformed entries are skipped.
pub fn parse_entries(raw: &str) -> Result<Vec<AnnotationEntry>> {
    let body = strip_fences(raw);
    let values: Vec<serde_json::Value> = serde_json::from_str(body)
        .with_context(|| "response is not a JSON array".to_string())?;

    let mut entries = Vec::new();
    for value in values {
        match serde_json::from_value::<AnnotationEntry>(value) {
            Ok(mut entry) => {
                entry.id = slugify(&entry.id);
                if entry.id.is_empty() {
                    eprintln!("  ! entry with empty id skipped");
                    continue;
                }
                entries.push(entry);
            }
            Err(e) => eprintln!("  ! malformed entry skipped: {}", e),
        }
    }
    Ok(entries)
}

/// Drop ungrounded, off-subject, duplicate, and colliding entries.
///
/// Lexical corroboration is a strict belt on the prompt-based constraint,
/// not semantic verification: an entry survives the grounding check when at
/// least one grounding episode shares its id, appears in its text by title,
/// or contributes a keyword to it.
pub fn validate_entries(
    entries: Vec<AnnotationEntry>,
    subject: Option<&str>,
    grounding: Option<&[ScoredEpisode]>,
    existing: &[AnnotationEntry],
    regenerate: bool,
) -> Vec<AnnotationEntry> {
    let mut kept: Vec<AnnotationEntry> = Vec::new();

    for entry in entries {
        let entry_text = format!(
            "{} {} {}",
            entry.id, entry.title.primary, entry.story_summary.primary
        );

        if let Some(subject) = subject {
            if !mentions(&entry_text, subject) {
                eprintln!("  ! entry '{}' dropped: does not name {}", entry.id, subject);
                continue;
            }
        }

        if let Some(grounding) = grounding {
            if !corroborated(&entry, &entry_text, grounding) {
                eprintln!("  ! entry '{}' dropped: not corroborated by grounding", entry.id);
                continue;
            }
        }

        if kept.iter().any(|e| e.id == entry.id) {
            eprintln!("  ! entry '{}' dropped: duplicate id in batch", entry.id);
            continue;
        }

        if !regenerate && existing.iter().any(|e| e.id == entry.id) {
            eprintln!("  ! entry '{}' dropped: id already present", entry.id);
            continue;
        }

        kept.push(entry);
    }

    kept
}

fn corroborated(entry: &AnnotationEntry, entry_text: &str, grounding: &[ScoredEpisode]) -> bool {
    grounding.iter().any(|s| {
        let ep = &s.episode;
        entry.id == ep.id
            || mentions(entry_text, &ep.title.primary)
            || ep
                .keywords
                .iter()
                .any(|k| k.len() > 2 && mentions(entry_text, k))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Episode, EpisodeKind, Localized, Priority, SourceRef};

    fn entry(id: &str, title: &str, summary: &str) -> AnnotationEntry {
        AnnotationEntry {
            id: id.to_string(),
            kind: EpisodeKind::Story,
            priority: Priority::High,
            title: Localized::new(title, ""),
            icon: "🪔".into(),
            story_summary: Localized::new(summary, ""),
            theological_significance: Localized::new("t", ""),
            practical_application: Localized::new("p", ""),
            source_texts: vec![],
            related_verses: vec![],
        }
    }

    fn grounding_episode(id: &str, title: &str, keywords: Vec<&str>) -> ScoredEpisode {
        ScoredEpisode {
            episode: Episode {
                id: id.to_string(),
                kind: EpisodeKind::Story,
                priority: Priority::High,
                title: Localized::new(title, ""),
                summary: Localized::new("", ""),
                significance: Localized::new("", ""),
                application: Localized::new("", ""),
                keywords: keywords.into_iter().map(String::from).collect(),
                source_reference: SourceRef {
                    text: "src".into(),
                    section: "".into(),
                },
            },
            score: 0.9,
            source_key: "src".into(),
        }
    }

    #[test]
    fn test_parse_entries_with_fences() {
        let raw = "```json\n[{\"id\": \"Ocean Leap\", \"type\": \"story\", \"priority\": \"high\", \
\"title\": {\"primary\": \"t\"}, \"icon\": \"🌊\", \"story_summary\": {\"primary\": \"s\"}, \
\"theological_significance\": {\"primary\": \"x\"}, \"practical_application\": {\"primary\": \"y\"}}]\n```";
        let entries = parse_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "ocean-leap");
    }

    #[test]
    fn test_parse_entries_skips_malformed() {
        let raw = "[{\"id\": \"a\"}, {\"id\": \"b\", \"type\": \"story\", \"priority\": \"low\", \
\"title\": {\"primary\": \"t\"}, \"story_summary\": {\"primary\": \"s\"}, \
\"theological_significance\": {\"primary\": \"x\"}, \"practical_application\": {\"primary\": \"y\"}}]";
        let entries = parse_entries(raw).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "b");
    }

    #[test]
    fn test_parse_entries_rejects_non_array() {
        assert!(parse_entries("not json").is_err());
    }

    #[test]
    fn test_validate_drops_off_subject() {
        let entries = vec![
            entry("hanuman-leap", "Hanuman leaps", "Hanuman crosses the sea."),
            entry("ravana-court", "Ravana's court", "The demon king holds court."),
        ];
        let kept = validate_entries(entries, Some("Hanuman"), None, &[], false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "hanuman-leap");
    }

    #[test]
    fn test_validate_drops_ungrounded() {
        let grounding = vec![grounding_episode("ocean-leap", "The ocean leap", vec!["Hanuman"])];
        let entries = vec![
            entry("ocean-leap", "The ocean leap retold", "Hanuman leaps."),
            entry("unrelated", "A tale of Ganesha", "Ganesha writes."),
        ];
        let kept = validate_entries(entries, None, Some(&grounding), &[], false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "ocean-leap");
    }

    #[test]
    fn test_validate_keyword_corroboration() {
        let grounding = vec![grounding_episode("e1", "Some title", vec!["Sanjeevani"])];
        let entries = vec![entry(
            "mountain-of-herbs",
            "The Sanjeevani mountain",
            "The herb mountain is carried.",
        )];
        let kept = validate_entries(entries, None, Some(&grounding), &[], false);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_validate_drops_batch_duplicates() {
        let entries = vec![entry("a", "t", "s"), entry("a", "t2", "s2")];
        let kept = validate_entries(entries, None, None, &[], false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title.primary, "t");
    }

    #[test]
    fn test_validate_collision_with_existing() {
        let existing = vec![entry("a", "t", "s")];
        let entries = vec![entry("a", "new", "new"), entry("b", "t", "s")];

        let kept = validate_entries(entries.clone(), None, None, &existing, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "b");

        // Regenerate lifts the collision rule.
        let kept = validate_entries(entries, None, None, &existing, true);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_build_query_text_fields() {
        let mut fm = serde_yaml::Mapping::new();
        fm.insert("title_en".into(), "First Chaupai".into());
        fm.insert("devanagari".into(), "जय हनुमान".into());
        let mut translation = serde_yaml::Mapping::new();
        translation.insert("en".into(), "Victory to Hanuman".into());
        fm.insert(
            "translation".into(),
            serde_yaml::Value::Mapping(translation),
        );

        let verse = VerseFile {
            path: PathBuf::from("chaupai-01.md"),
            id: "chaupai-01".into(),
            frontmatter: fm,
            body: String::new(),
        };

        let query = build_query_text(&verse);
        assert!(query.contains("Verse: First Chaupai"));
        assert!(query.contains("devanagari: जय हनुमान"));
        assert!(query.contains("translation: Victory to Hanuman"));
    }
}
