//! Build the artist cache from MusicBrainz.
//! Usage: cargo run --release --bin build-artist-cache -- --input episodes.json --contact me@example.org

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use rustc_hash::FxHashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cww_tagger::builder::{build, plan, seed_from_library, BuildOptions};
use cww_tagger::cache::CacheStore;
use cww_tagger::client::{MetadataClient, RetryPolicy};
use cww_tagger::config::ServiceArgs;
use cww_tagger::episodes::{artist_frequencies, episode_range, load_episodes};
use cww_tagger::library::BeetsLibrary;
use cww_tagger::models::log_stats;
use cww_tagger::musicbrainz::MusicBrainzService;
use cww_tagger::normalize::{normalize, NormalizedKey};
use cww_tagger::pacer::Pacer;
use cww_tagger::progress::{format_duration, OutputArgs};

#[derive(Parser)]
#[command(name = "build-artist-cache")]
#[command(about = "Resolve scraped artist credits to MusicBrainz identities")]
struct Args {
    /// Scraped episodes JSON
    #[arg(long)]
    input: Option<PathBuf>,

    /// Look up at most this many new artists (0 = all)
    #[arg(long, default_value = "0")]
    limit: usize,

    /// Show what would be looked up without calling MusicBrainz
    #[arg(long)]
    dry_run: bool,

    /// Save the cache after this many new entries
    #[arg(long)]
    checkpoint_every: Option<usize>,

    /// Seed entries from artists the beets library already identifies
    #[arg(long)]
    seed_library: bool,

    /// beets library database (default: beets config dir)
    #[arg(long)]
    library: Option<PathBuf>,

    #[command(flatten)]
    service: ServiceArgs,

    #[command(flatten)]
    output: OutputArgs,
}

fn main() -> Result<()> {
    let args = Args::parse();
    args.output.init();
    let start = Instant::now();

    let mut settings = args.service.resolve()?;
    if let Some(input) = args.input {
        settings.paths.episodes = input;
    }
    if let Some(library) = args.library {
        settings.paths.library = Some(library);
    }
    if let Some(every) = args.checkpoint_every {
        settings.cache.checkpoint_every = every.max(1);
    }

    info!("Loading episodes from {}", settings.paths.episodes.display());
    let episodes = load_episodes(&settings.paths.episodes)
        .with_context(|| format!("Failed to load {}", settings.paths.episodes.display()))?;
    if let Some((first, last)) = episode_range(&episodes) {
        info!("Episodes {} to {}", first, last);
    }
    let frequencies = artist_frequencies(&episodes);
    info!(
        "Found {} unique artists across {} tracks",
        frequencies.len(),
        frequencies.iter().map(|(_, c)| c).sum::<usize>()
    );

    // Most-played first; several raw credits can share one key.
    let mut keys: Vec<NormalizedKey> = Vec::with_capacity(frequencies.len());
    let mut plays: FxHashMap<NormalizedKey, (String, usize)> = FxHashMap::default();
    for (artist, count) in &frequencies {
        let key = normalize(artist);
        plays
            .entry(key.clone())
            .and_modify(|(_, total)| *total += count)
            .or_insert_with(|| (artist.clone(), *count));
        keys.push(key);
    }

    let store = CacheStore::new(&settings.paths.cache);
    let mut cache = store.load();
    info!("Existing cache entries: {}", cache.len());

    if args.seed_library {
        let path = settings
            .paths
            .library_path()
            .context("No beets library path configured and no config directory found")?;
        let library = BeetsLibrary::open_read_only(&path)
            .with_context(|| format!("Failed to open beets library {}", path.display()))?;
        let entries = library.entries()?;
        seed_from_library(&mut cache, &keys, &entries);
    }

    let mut todo = plan(&cache, &keys);
    info!("Artists to look up: {}", todo.len());
    let limit = (args.limit > 0).then_some(args.limit);
    if let Some(limit) = limit {
        todo.truncate(limit);
        info!("Limited to: {}", todo.len());
    }

    if args.dry_run {
        info!("Dry run - top artists to look up:");
        for key in todo.iter().take(10) {
            if let Some((raw, count)) = plays.get(key) {
                info!("  {} ({} tracks)", raw, count);
            }
        }
        return Ok(());
    }

    if todo.is_empty() {
        if args.seed_library {
            store.save(&cache).context("Failed to save artist cache")?;
        }
        info!("No new artists to look up");
        return Ok(());
    }

    let pacer = Arc::new(Pacer::per_second(settings.musicbrainz.effective_rate()));
    info!(
        "Querying MusicBrainz at {} request(s)/s as {:?}",
        pacer.rate(),
        settings.musicbrainz.user_agent()
    );
    let client = MetadataClient::new(
        MusicBrainzService::new(&settings.musicbrainz),
        pacer,
        RetryPolicy::from(&settings.retry),
    );
    let options = BuildOptions {
        checkpoint_every: settings.cache.checkpoint_every,
        limit,
    };

    let stats = build(&mut cache, &keys, &client, &store, &options)
        .with_context(|| format!("Failed to save {}", store.path().display()))?;
    log_stats("BUILD", &stats);

    info!(
        "Cache saved to {} ({} entries) in {}",
        store.path().display(),
        cache.len(),
        format_duration(start.elapsed())
    );
    Ok(())
}
