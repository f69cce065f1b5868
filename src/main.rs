use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::time::Instant;

use cww_tagger::cache::CacheStore;
use cww_tagger::config::Settings;
use cww_tagger::episodes::{episode_range, load_episodes, tracks};
use cww_tagger::library::{BeetsLibrary, TagOutcome};
use cww_tagger::matcher::{match_all, LibraryIndex};
use cww_tagger::models::{log_stats, LibraryEntry, MatchingStats};
use cww_tagger::preview::{build_preview, select, write_preview};
use cww_tagger::progress::{format_duration, OutputArgs};
use cww_tagger::safety::validate_output_path;

#[derive(Parser)]
#[command(name = "cww-tagger")]
#[command(about = "Match scraped radio-show tracks against a beets library and tag them")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scraped episodes JSON
    #[arg(long)]
    input: Option<PathBuf>,

    /// Artist cache file
    #[arg(long)]
    cache: Option<PathBuf>,

    /// beets library database (default: beets config dir)
    #[arg(long)]
    library: Option<PathBuf>,

    /// Preview output file
    #[arg(long)]
    preview: Option<PathBuf>,

    /// Genre tag to add
    #[arg(long)]
    tag: Option<String>,

    /// Write the preview only; leave the library untouched
    #[arg(long)]
    dry_run: bool,

    /// Also tag fuzzy matches in the ambiguous band
    #[arg(long)]
    include_ambiguous: bool,

    /// Matching threads (0 = all cores)
    #[arg(long, default_value = "0")]
    workers: usize,

    #[command(flatten)]
    output: OutputArgs,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.output.init();

    if args.workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.workers)
            .build_global()
            .context("Failed to set thread pool size")?;
    }

    let start = Instant::now();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(input) = args.input {
        settings.paths.episodes = input;
    }
    if let Some(cache) = args.cache {
        settings.paths.cache = cache;
    }
    if let Some(library) = args.library {
        settings.paths.library = Some(library);
    }
    if let Some(preview) = args.preview {
        settings.paths.preview = preview;
    }
    if let Some(tag) = args.tag {
        settings.tagging.tag = tag;
    }
    settings.validate()?;

    let library_path = settings
        .paths
        .library_path()
        .context("No beets library path configured and no config directory found")?;
    validate_output_path(
        &settings.paths.preview,
        "json",
        &[
            settings.paths.episodes.as_path(),
            settings.paths.cache.as_path(),
            library_path.as_path(),
        ],
    )?;

    info!("Loading episodes from {}", settings.paths.episodes.display());
    let episodes = load_episodes(&settings.paths.episodes)
        .with_context(|| format!("Failed to load {}", settings.paths.episodes.display()))?;
    if let Some((first, last)) = episode_range(&episodes) {
        info!("Episodes {} to {}", first, last);
    }
    let tracks = tracks(&episodes);
    info!("{} episodes, {} tracks", episodes.len(), tracks.len());

    let cache = CacheStore::new(&settings.paths.cache).load();
    info!("Artist cache: {} entries ({} verified)", cache.len(), cache.verified_count());

    let mut library = if args.dry_run {
        BeetsLibrary::open_read_only(&library_path)
    } else {
        BeetsLibrary::open(&library_path)
    }
    .with_context(|| format!("Failed to open beets library {}", library_path.display()))?;
    let index = LibraryIndex::new(library.entries()?);
    info!("Library: {} items, {} distinct artists", index.len(), index.artist_count());

    let match_start = Instant::now();
    let results = match_all(&tracks, &index, &cache, settings.thresholds);
    let mut stats = MatchingStats::default();
    for result in &results {
        stats.record(result);
    }
    stats.elapsed_seconds = match_start.elapsed().as_secs_f64();
    log_stats("MATCHING", &stats);
    info!("Match rate: {:.1}%", stats.match_rate());

    let selection = select(&results, args.include_ambiguous);
    if !selection.deferred.is_empty() {
        warn!(
            "{} ambiguous matches held back (see preview; --include-ambiguous to tag them)",
            selection.deferred.len()
        );
    }
    let to_tag: Vec<LibraryEntry> = selection
        .to_tag
        .iter()
        .filter_map(|r| r.library_entry.clone())
        .collect();
    info!("Library items to tag: {}", to_tag.len());

    let outcomes = library
        .apply_tag(&to_tag, &settings.tagging.tag, args.dry_run)
        .context("Failed to update beets library")?;
    let newly_tagged = outcomes
        .iter()
        .filter(|o| matches!(o, TagOutcome::Tagged { .. }))
        .count();

    let rows = build_preview(&selection, &outcomes);
    write_preview(&settings.paths.preview, &rows)
        .with_context(|| format!("Failed to write {}", settings.paths.preview.display()))?;
    info!("Preview written: {}", settings.paths.preview.display());

    if args.dry_run {
        info!(
            "Dry run complete - {} items would be tagged {:?}, library not modified",
            newly_tagged, settings.tagging.tag
        );
    } else {
        info!(
            "Tagged {} items {:?}; run `beet write` to update the files",
            newly_tagged, settings.tagging.tag
        );
    }
    info!("Elapsed: {}", format_duration(start.elapsed()));
    Ok(())
}
