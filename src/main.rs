//! bookwatch command-line entry point

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bookwatch::application::{daily_report, CrawlMode, CrawlOrchestrator, CrawlScope};
use bookwatch::domain::BookRepository;
use bookwatch::infrastructure::{init_logging, AppConfig, SqliteBookRepository};

#[derive(Parser)]
#[command(name = "bookwatch", version, about = "Catalog crawler and change tracker")]
struct Cli {
    /// Path to a configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the catalog and record detected changes.
    Crawl {
        /// Continue the most recent unfinished session instead of
        /// starting over.
        #[arg(long)]
        resume: bool,
        /// Restrict the crawl to one category listing URL.
        #[arg(long)]
        category: Option<String>,
    },
    /// Re-crawl the full catalog and print the changes it detected.
    DetectChanges,
    /// Summarize the change events recorded on one day.
    Report {
        /// Day to report on (YYYY-MM-DD), defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Directory to write the report JSON into.
        #[arg(long)]
        out: Option<String>,
    },
    /// Show the latest session and the stored book count.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&config.logging)?;

    let repo = SqliteBookRepository::connect(&config.database_path()).await?;
    let repo: Arc<dyn BookRepository> = Arc::new(repo);

    match cli.command {
        Command::Crawl { resume, category } => {
            let session = run_crawl(&config, Arc::clone(&repo), resume, category).await?;
            println!(
                "session {} finished: {} ({} found, {} crawled, {} failed)",
                session.session_id,
                session.status.as_str(),
                session.books_found,
                session.books_crawled,
                session.books_failed
            );
        }
        Command::DetectChanges => {
            let session = run_crawl(&config, Arc::clone(&repo), false, None).await?;
            let events = repo.change_events_between(session.started_at, Utc::now()).await?;
            let events: Vec<_> =
                events.into_iter().filter(|e| e.session_id == session.session_id).collect();
            if events.is_empty() {
                println!("no changes detected");
            }
            for event in events {
                print!("{} {}", event.kind.as_str(), event.book_upc);
                for (field, change) in &event.field_changes {
                    print!(
                        " {}: {} -> {}",
                        field,
                        change.old.as_deref().unwrap_or("-"),
                        change.new.as_deref().unwrap_or("-")
                    );
                }
                println!();
            }
        }
        Command::Report { date, out } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let report = daily_report(repo.as_ref(), date).await?;
            print!("{report}");
            if let Some(dir) = out {
                let dir = std::path::Path::new(&dir);
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating report directory {}", dir.display()))?;
                let path = dir.join(format!("report-{date}.json"));
                let json = serde_json::to_string_pretty(&report)?;
                std::fs::write(&path, json)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("written to {}", path.display());
            }
        }
        Command::Status => {
            let count = repo.count_books().await?;
            println!("{count} books stored");
            match repo.latest_session().await? {
                Some(session) => {
                    println!(
                        "latest session {}: {} (started {}, {} crawled, {} failed)",
                        session.session_id,
                        session.status.as_str(),
                        session.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        session.books_crawled,
                        session.books_failed
                    );
                }
                None => println!("no sessions yet"),
            }
        }
    }

    Ok(())
}

async fn run_crawl(
    config: &AppConfig,
    repo: Arc<dyn BookRepository>,
    resume: bool,
    category: Option<String>,
) -> Result<bookwatch::domain::CrawlSession> {
    let cancellation = CancellationToken::new();
    let ctrl_c_token = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight work");
            ctrl_c_token.cancel();
        }
    });

    let mode = if resume { CrawlMode::Resume } else { CrawlMode::Fresh };
    let scope = match category {
        Some(url) => CrawlScope::Category(url),
        None => CrawlScope::FullCatalog,
    };

    info!(base_url = %config.crawler.base_url, "starting crawl");
    let orchestrator =
        CrawlOrchestrator::new(config.crawler.clone(), repo, cancellation)?;
    orchestrator.run(mode, scope).await
}
