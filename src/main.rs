use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use newswire::config::Config;
use newswire::feed::FeedFetcher;
use newswire::ingest::Ingestor;
use newswire::refresh::RefreshCoordinator;
use newswire::scheduler::Scheduler;
use newswire::storage::Database;

#[derive(Parser, Debug)]
#[command(name = "newswire", about = "Feed ingestion service with periodic sweeps and per-user refreshes")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "newswire.toml")]
    config: PathBuf,

    /// Override the database path from the config file
    #[arg(long, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and refresh coordinator until SIGINT/SIGTERM
    Serve,

    /// Run one full sweep over every active source
    Sweep,

    /// Refresh one user's subscriptions and wait for the result
    Refresh {
        #[arg(long)]
        user: i64,
    },

    /// Register a feed source
    AddSource {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        /// Category name, created if missing
        #[arg(long)]
        category: Option<String>,
    },

    /// Subscribe a user to a source
    Subscribe {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        source: i64,
    },

    /// List news for a user, newest first
    News {
        #[arg(long)]
        user: i64,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = 20)]
        page_size: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let db_path = config
        .database_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?
        .to_string();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path))?;

    match args.command {
        Command::Serve => serve(db, &config).await,
        Command::Sweep => {
            let ingestor = build_ingestor(db, &config)?;
            let outcome = ingestor
                .run_full_sweep(&CancellationToken::new())
                .await
                .context("Sweep failed")?;
            println!(
                "Saved {} new items from {} sources ({} failed)",
                outcome.saved, outcome.sources, outcome.failed_sources
            );
            Ok(())
        }
        Command::Refresh { user } => refresh_once(db, &config, user).await,
        Command::AddSource { name, url, category } => {
            let category_id = match category {
                Some(category) => Some(
                    db.create_category(&category)
                        .await
                        .context("Failed to create category")?,
                ),
                None => None,
            };
            let id = db
                .add_source(&name, &url, category_id)
                .await
                .context("Failed to add source")?;
            println!("Source {} registered with id {}", name, id);
            Ok(())
        }
        Command::Subscribe { user, source } => {
            db.subscribe(user, source)
                .await
                .context("Failed to subscribe")?;
            println!("User {} subscribed to source {}", user, source);
            Ok(())
        }
        Command::News {
            user,
            page,
            page_size,
        } => {
            let (items, total) = db
                .news_for_user(user, page, page_size)
                .await
                .context("Failed to load news")?;
            for item in &items {
                println!(
                    "{}  {}\n    {}",
                    item.published_at.format("%Y-%m-%d %H:%M"),
                    item.title,
                    item.url
                );
            }
            println!("-- page {} ({} of {} items)", page.max(1), items.len(), total);
            Ok(())
        }
    }
}

fn build_ingestor(db: Database, config: &Config) -> Result<Ingestor> {
    let fetcher = FeedFetcher::new(config.retry_policy(), config.fetch_timeout())
        .context("Failed to build HTTP client")?;
    Ok(Ingestor::new(Arc::new(db), fetcher).with_workers(config.fetch_workers, config.saver_workers))
}

async fn serve(db: Database, config: &Config) -> Result<()> {
    let ingestor = Arc::new(build_ingestor(db, config)?);
    let root = CancellationToken::new();

    let coordinator = RefreshCoordinator::new(ingestor.clone(), config.refresh_settings(), &root);
    coordinator.start();

    let scheduler = Scheduler::new(ingestor, config.sweep_interval());
    scheduler.start(&root);

    wait_for_shutdown_signal().await?;

    root.cancel();
    scheduler.stop().await;
    coordinator.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn refresh_once(db: Database, config: &Config, user: i64) -> Result<()> {
    let ingestor = Arc::new(build_ingestor(db, config)?);
    let root = CancellationToken::new();
    let coordinator = RefreshCoordinator::new(ingestor, config.refresh_settings(), &root);
    coordinator.start();

    let request = coordinator.request_refresh(user)?;
    println!("Refresh request {} accepted", request.id);

    let mut poll = tokio::time::interval(Duration::from_millis(200));
    let finished = loop {
        poll.tick().await;
        match coordinator.get_request_status(request.id) {
            Some(current) if current.status.is_terminal() => break current,
            Some(_) => {}
            None => anyhow::bail!("Refresh request {} disappeared", request.id),
        }
    };

    coordinator.shutdown().await;
    match finished.result {
        Some(saved) => println!("Refresh {}: {} new items", finished.status, saved),
        None => println!("Refresh {}", finished.status),
    }
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down gracefully"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down gracefully"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, shutting down gracefully");
    }
    Ok(())
}
