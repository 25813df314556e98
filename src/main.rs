//! # Verse Context CLI (`vctx`)
//!
//! The `vctx` binary drives the retrieval-grounded annotation pipeline for
//! devotional verse collections.
//!
//! ## Usage
//!
//! ```bash
//! vctx --config ./config/vctx.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vctx index-sources --file PATH` | Index one source text into searchable episodes |
//! | `vctx annotate --collection KEY --verse ID` | Annotate a single verse |
//! | `vctx annotate --collection KEY --all` | Annotate every verse in a collection |
//!
//! ## Examples
//!
//! ```bash
//! # Index a source text (uses the configured embedding provider)
//! vctx index-sources --file sources/sundar-kaand.txt
//!
//! # Index with an explicit provider and chunk budget
//! vctx index-sources --file sources/sundar-kaand.txt --provider voyage --chunk-size 4000
//!
//! # Annotate one verse
//! vctx annotate --collection hanuman-chalisa --verse chaupai-15
//!
//! # Regenerate all verses, scoped to a subject
//! vctx annotate --collection sundar-kaand --all --regenerate --subject Hanuman --subject-type deity
//! ```
//!
//! Exit status is zero only when every targeted item succeeded; per-item
//! failures are reported in the summary, never silently swallowed.

mod annotate;
mod chunk;
mod collections;
mod config;
mod embedding;
mod extract;
mod generation;
mod index_cmd;
mod models;
mod registry;
mod retrieval;
mod store;
mod subject;
mod verse;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Verse Context CLI — retrieval-grounded scriptural context annotation
/// for devotional verse collections.
#[derive(Parser)]
#[command(
    name = "vctx",
    about = "Verse Context — retrieval-grounded scriptural context annotation for verse collections",
    version,
    long_about = "Verse Context indexes scripture source texts into discrete episodes with vector \
    embeddings, then annotates verse records by retrieving the most relevant episodes, constraining \
    generation to those episodes, validating the output, and merging it idempotently into each \
    verse's frontmatter."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/vctx.toml`; built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/vctx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Index one source text into searchable episodes.
    ///
    /// Chunks the file, extracts episodes via the generation provider,
    /// embeds them, and writes the per-source index, embeddings, and
    /// registry files. Re-indexing the same source overwrites it entirely.
    /// Fails if the file is missing or no episodes were extracted.
    IndexSources {
        /// Path to the source text file (plain text).
        #[arg(long)]
        file: PathBuf,

        /// Override the configured embedding provider for this run
        /// (`openai`, `gemini`, or `voyage`).
        #[arg(long)]
        provider: Option<String>,

        /// Override the configured chunk budget (characters per segment).
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Run retrieval + annotation for one or all verses in a collection.
    ///
    /// Verses that already carry annotations are skipped unless
    /// `--regenerate` is given, in which case their blocks are replaced.
    /// Exit status is zero only if every targeted verse succeeded.
    Annotate {
        /// Collection key from `_data/collections.yml`.
        #[arg(long)]
        collection: String,

        /// Verse id to process (e.g. `chaupai-15`).
        #[arg(long)]
        verse: Option<String>,

        /// Process all verses in the collection.
        #[arg(long, conflicts_with = "verse")]
        all: bool,

        /// Replace existing annotation blocks instead of skipping them.
        #[arg(long)]
        regenerate: bool,

        /// Subject to scope retrieval and validation to (defaults to the
        /// collection's configured subject).
        #[arg(long)]
        subject: Option<String>,

        /// Label for the subject (e.g. `deity`), used in the generation
        /// instruction.
        #[arg(long)]
        subject_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::IndexSources {
            file,
            provider,
            chunk_size,
        } => {
            let mut cfg = cfg;
            if let Some(provider) = provider {
                cfg.embedding.provider = provider;
            }
            if let Some(chunk_size) = chunk_size {
                if chunk_size == 0 {
                    anyhow::bail!("--chunk-size must be > 0");
                }
                cfg.chunking.max_chars = chunk_size;
            }

            // Credentials are checked here, before any processing starts.
            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let generator = generation::create_generator(&cfg.generation)?;

            index_cmd::run_index(&cfg, embedder.as_ref(), generator.as_ref(), &file).await?;
        }
        Commands::Annotate {
            collection,
            verse,
            all,
            regenerate,
            subject,
            subject_type,
        } => {
            if verse.is_none() && !all {
                anyhow::bail!("Either --verse or --all is required");
            }

            let embedder = embedding::create_embedder(&cfg.embedding)?;
            let generator = generation::create_generator(&cfg.generation)?;

            let opts = annotate::AnnotateOptions {
                collection,
                verse,
                all,
                regenerate,
                subject,
                subject_type,
            };
            let summary =
                annotate::run_annotate(&cfg, embedder.as_ref(), generator.as_ref(), &opts).await?;
            if summary.failed > 0 {
                anyhow::bail!("{} verse(s) failed", summary.failed);
            }
        }
    }

    Ok(())
}
