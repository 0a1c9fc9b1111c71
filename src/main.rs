mod classifier;
mod config;
mod discovery;
mod error;
mod loader;
mod models;
mod pipeline;
mod scoring;
mod scraper;
mod stats;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::models::{AdRecord, CandidateUrl};
use crate::pipeline::fallback::{FallbackConfig, FallbackOrchestrator};
use crate::pipeline::{Pipeline, RunRequest};
use crate::scraper::http_client::HttpClient;
use crate::scraper::{ExtractionEngine, Strategy};
use crate::stats::{filter_and_stats, AdFilter};
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "ad-harvest", about = "Vehicle ad discovery and normalization", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Find, extract and store ads for a vehicle (optionally two, for comparison)
    Discover {
        vehicle: String,

        /// Second vehicle to collect in the same session
        #[arg(long, conflicts_with = "urls_file")]
        compare: Option<String>,

        /// Use URLs from a file (.csv or free text) instead of searching
        #[arg(long)]
        urls_file: Option<PathBuf>,

        /// Skip live pages and generate synthetic ads
        #[arg(long)]
        synthetic: bool,

        #[arg(long)]
        quality_floor: Option<f64>,

        #[arg(long)]
        concurrency: Option<usize>,

        /// Candidate URLs per vehicle
        #[arg(long)]
        limit: Option<usize>,

        /// Write the ads JSON here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Extract and normalize the given ad URLs without storing them
    Extract {
        #[arg(required = true)]
        urls: Vec<String>,

        #[arg(long)]
        synthetic: bool,
    },

    /// Check whether a URL looks like a sale listing
    Classify {
        url: String,

        #[arg(long)]
        title: Option<String>,

        /// Fetch the page and use its title
        #[arg(long)]
        remote: bool,
    },

    /// Price statistics over stored ads
    Stats {
        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        vehicle: Option<String>,

        #[arg(long)]
        min_price: Option<u64>,

        #[arg(long)]
        max_price: Option<u64>,

        #[arg(long)]
        year: Option<String>,

        #[arg(long)]
        location: Option<String>,
    },

    /// List recorded analysis sessions
    Sessions,

    /// Apply schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "ad_harvest=info,warn",
        1 => "ad_harvest=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false).with_writer(std::io::stderr))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    match cli.command {
        Command::Discover {
            vehicle,
            compare,
            urls_file,
            synthetic,
            quality_floor,
            concurrency,
            limit,
            output,
        } => {
            let _t = utils::Timer::start(format!("Discovery for {}", vehicle));
            if synthetic {
                config.pipeline.force_synthetic = true;
            }
            if let Some(f) = quality_floor {
                config.pipeline.quality_floor = f;
            }
            if let Some(n) = concurrency {
                config.pipeline.concurrency = n;
            }
            let limit = limit.unwrap_or(config.pipeline.max_urls);
            let config = config.sanitized();

            let request = RunRequest { vehicle, compare_with: compare, urls_file, limit };
            let report = Pipeline::new(config).run(request).await?;

            let json = serde_json::to_string_pretty(&report.ads)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("Could not write {:?}", path))?;
                    info!("Wrote {} ads to {:?}", report.ads.len(), path);
                }
                None => println!("{}", json),
            }

            eprintln!("─────────────────────────────────");
            eprintln!("  Session {}", report.session_id);
            for v in &report.vehicles {
                eprintln!(
                    "  {:<16} {} ads | {} fields | {:?} | quality {:.2}",
                    v.vehicle, v.successful, v.fields_extracted, v.mode, v.quality_score
                );
                eprintln!("  {:<16} {}", "", v.recommendation);
            }
            eprintln!(
                "  Stored   : {} new, {} duplicate, {} failed",
                report.storage.created,
                report.storage.duplicates,
                report.storage.failed.len()
            );
            eprintln!("─────────────────────────────────");
        }

        Command::Extract { urls, synthetic } => {
            let _t = utils::Timer::start("Extraction");
            let urls: Vec<String> = urls
                .iter()
                .filter_map(|u| match CandidateUrl::parse(u, "cli") {
                    Ok(c) => Some(c.as_str().to_string()),
                    Err(e) => {
                        warn!("{}", e);
                        None
                    }
                })
                .collect();

            let engine = ExtractionEngine::new(&config.scraper, None);
            let orchestrator = FallbackOrchestrator::new(engine, FallbackConfig::from(&config.pipeline));
            let strategy = if synthetic { Strategy::Synthetic } else { Strategy::Real };
            let ads = orchestrator.extract_all(&urls, strategy).await;
            println!("{}", serde_json::to_string_pretty(&ads)?);
        }

        Command::Classify { url, title, remote } => {
            let candidate = CandidateUrl::parse(&url, "cli")?;
            let verdict = if remote {
                let client = HttpClient::new(&config.scraper)?;
                classifier::classify_remote(&client, &candidate).await
            } else {
                classifier::classify(candidate.as_str(), title.as_deref())
            };
            println!("{}", serde_json::to_string(&verdict)?);
        }

        Command::Stats {
            session,
            vehicle,
            min_price,
            max_price,
            year,
            location,
        } => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let stored = match session.as_deref() {
                Some(id) => repo.list_by_session(id, vehicle.as_deref())?,
                None => repo.list_ads(None, vehicle.as_deref())?,
            };
            let ads: Vec<AdRecord> = stored
                .into_iter()
                .map(AdRecord::from)
                .collect();

            let filter = AdFilter { min_price, max_price, year, location };
            let stats = filter_and_stats(ads, &filter);
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Sessions => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let sessions = repo.list_sessions()?;
            if sessions.is_empty() {
                println!("No sessions yet. Run `ad-harvest discover <VEHICLE>` first.");
            } else {
                println!("{} sessions:", sessions.len());
                for s in &sessions {
                    let mut vehicles = Vec::new();
                    for v in std::iter::once(&s.vehicle1).chain(s.vehicle2.as_ref()) {
                        let n = repo.count_by_session_and_vehicle(&s.id, v)?;
                        vehicles.push(format!("{} ({})", v, n));
                    }
                    let vehicles = vehicles.join(" vs ");
                    println!(
                        "  {}  {}  {:<8} {:<36} {} new / {} dup / {} failed",
                        s.id,
                        s.started_at.format("%Y-%m-%d %H:%M"),
                        s.status,
                        vehicles,
                        utils::group_thousands(s.ads_created.max(0) as u64),
                        s.ads_duplicate,
                        s.ads_failed
                    );
                }
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
