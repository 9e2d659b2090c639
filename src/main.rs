use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use anirec::{
    config::Config,
    db::CheckpointStore,
    models::UserId,
    services::{
        crawler::FrontierCrawler,
        harvester::Harvester,
        providers::AniListSource,
        ranker,
        recommendations::get_recommendations,
        retry::with_retry,
        similarity::SimilarityEngine,
    },
};

#[derive(Parser)]
#[command(name = "anirec")]
#[command(about = "Anime recommendations from AniList ratings of like-minded users")]
struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find users who rated the seed's completed and planned anime
    Discover {
        /// AniList user id or username
        user: String,

        /// Where to write the candidate id list
        #[arg(long, default_value = "candidates.json")]
        out: PathBuf,

        #[arg(long)]
        raters_per_media: Option<usize>,

        /// Crawl depth in hops, even and at least 2
        #[arg(long)]
        hops: Option<usize>,
    },

    /// Fetch rating histories for candidates into a resumable checkpoint
    Harvest {
        #[arg(long)]
        checkpoint: PathBuf,

        /// Candidate id list; without it the checkpoint's pending ids are resumed
        #[arg(long)]
        candidates: Option<PathBuf>,

        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Predict and rank the seed's planned anime
    Rank {
        /// AniList user id or username
        user: String,

        #[arg(long)]
        checkpoint: PathBuf,

        /// Show only the top N
        #[arg(long)]
        limit: Option<usize>,

        /// Also write the ranking as JSON
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::from_env()?;
    let source = AniListSource::from_config(&config).context("Failed to build AniList client")?;

    match cli.command {
        Command::Discover {
            user,
            out,
            raters_per_media,
            hops,
        } => {
            if let Some(raters) = raters_per_media {
                config.raters_per_media = raters;
            }
            if let Some(hops) = hops {
                config.crawl_hops = hops;
            }

            let seed = resolve_seed(&source, &config, &user).await?;
            let crawler = FrontierCrawler::new(&source, config.crawl_policy());
            let outcome = crawler.crawl(seed).await.context("Crawl failed")?;

            write_json(&out, &outcome.candidates.to_vec()).await?;
            println!(
                "Found {} unique users from {} media ({} skipped). Saved to {}",
                outcome.candidates.len(),
                outcome.stats.media_visited,
                outcome.stats.media_skipped,
                out.display()
            );
        }

        Command::Harvest {
            checkpoint,
            candidates,
            concurrency,
        } => {
            if let Some(concurrency) = concurrency {
                config.harvest_concurrency = concurrency;
            }

            let store = CheckpointStore::new(checkpoint);
            let mut state = store.load().await;
            let harvester = Harvester::new(&source, &store, config.harvest_policy());

            let report = match candidates {
                Some(path) => {
                    let ids: Vec<UserId> = read_json(&path).await?;
                    harvester.harvest(&ids, &mut state).await
                }
                None => harvester.harvest_pending(&mut state).await,
            }
            .with_context(|| {
                format!(
                    "Harvest aborted; rerun to resume from {}",
                    store.path().display()
                )
            })?;

            println!(
                "Harvested {} profiles ({} not found, {} already present). Checkpoint: {}",
                report.fetched,
                report.not_found,
                report.skipped,
                store.path().display()
            );
        }

        Command::Rank {
            user,
            checkpoint,
            limit,
            out,
        } => {
            let seed = resolve_seed(&source, &config, &user).await?;
            let state = CheckpointStore::new(checkpoint).load().await;
            let engine = SimilarityEngine::new(config.similarity_policy());

            let recs = get_recommendations(
                &source,
                &state,
                seed,
                &engine,
                &config.retry_policy(),
                limit,
            )
            .await
            .context("Ranking failed")?;

            print!("{}", ranker::render_table(&recs.ranked));
            println!(
                "{} neighbors used, {} planned anime without neighbor support",
                recs.neighbors_used, recs.insufficient_support
            );

            if let Some(path) = out {
                write_json(&path, &recs).await?;
            }
        }
    }

    Ok(())
}

/// Accepts a numeric id as-is, otherwise looks the username up
async fn resolve_seed(source: &AniListSource, config: &Config, user: &str) -> anyhow::Result<UserId> {
    if let Ok(id) = user.parse::<UserId>() {
        return Ok(id);
    }

    let id = with_retry(&config.retry_policy(), &format!("username {}", user), || {
        source.resolve_user(user)
    })
    .await
    .with_context(|| format!("Could not resolve AniList user {}", user))?;

    tracing::info!(username = %user, user_id = id, "Seed user resolved");
    Ok(id)
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", path.display()))
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
