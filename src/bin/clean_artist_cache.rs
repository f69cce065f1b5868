//! Re-verify the artist cache and prune entries that no longer look right.
//! Usage: cargo run --release --bin clean-artist-cache -- [--offline] [--dry-run]

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cww_tagger::cache::{write_json_atomic, CacheStore};
use cww_tagger::cleaner::{clean, CleanMode};
use cww_tagger::client::{MetadataClient, RetryPolicy};
use cww_tagger::config::ServiceArgs;
use cww_tagger::models::log_stats;
use cww_tagger::musicbrainz::MusicBrainzService;
use cww_tagger::pacer::Pacer;
use cww_tagger::progress::{format_duration, OutputArgs};
use cww_tagger::safety::validate_output_path;

#[derive(Parser)]
#[command(name = "clean-artist-cache")]
#[command(about = "Verify cached artist identities and remove bad matches")]
struct Args {
    /// Compare keys with cached names instead of re-querying MusicBrainz
    #[arg(long)]
    offline: bool,

    /// Report what would change without writing the cache
    #[arg(long)]
    dry_run: bool,

    /// Backup of the cache taken before cleaning
    #[arg(long)]
    backup: Option<PathBuf>,

    /// Where to write the removed entries for review
    #[arg(long)]
    removed: Option<PathBuf>,

    #[command(flatten)]
    service: ServiceArgs,

    #[command(flatten)]
    output: OutputArgs,
}

fn sibling(path: &Path, name: &str) -> PathBuf {
    path.with_file_name(name)
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.output.init();
    let start = Instant::now();

    let settings = args.service.resolve()?;
    let store = CacheStore::new(&settings.paths.cache);
    let backup = args
        .backup
        .unwrap_or_else(|| sibling(store.path(), "artist_cache.backup.json"));
    let removed_path = args
        .removed
        .unwrap_or_else(|| sibling(store.path(), "removed_entries.json"));
    validate_output_path(&backup, "json", &[store.path()])?;
    validate_output_path(&removed_path, "json", &[store.path(), backup.as_path()])?;

    let mut cache = store.load();
    if cache.is_empty() {
        info!("Cache {} is empty, nothing to clean", store.path().display());
        return Ok(());
    }
    info!("Loaded {} cache entries", cache.len());

    let mode = if args.offline {
        CleanMode::Offline
    } else {
        CleanMode::Online
    };
    let pacer = Arc::new(Pacer::per_second(settings.musicbrainz.effective_rate()));
    let client = MetadataClient::new(
        MusicBrainzService::new(&settings.musicbrainz),
        pacer,
        RetryPolicy::from(&settings.retry),
    );

    let report = clean(&mut cache, &client, settings.thresholds, mode);
    log_stats("CLEAN", &report.stats);

    if args.dry_run {
        for removed in &report.removed {
            info!(
                "Would remove {:?} -> {:?} ({:.2})",
                removed.key, removed.canonical_name, removed.similarity
            );
        }
        info!("Dry run - cache not modified");
        return Ok(());
    }

    if store.backup(&backup)? {
        info!("Backup written to {}", backup.display());
    }
    store
        .save(&cache)
        .with_context(|| format!("Failed to save {}", store.path().display()))?;

    if !report.removed.is_empty() {
        write_json_atomic(&removed_path, &report.removed)?;
        info!("Removed entries saved to {}", removed_path.display());
    }

    info!(
        "Cache now holds {} entries ({} verified) after {}",
        cache.len(),
        cache.verified_count(),
        format_duration(start.elapsed())
    );
    Ok(())
}
