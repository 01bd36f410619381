mod config;
mod error;
mod events;
mod export;
mod extract;
mod fetch;
mod models;
mod pipeline;
mod registry;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::AppConfig;
use crate::events::{EventSink, JsonLinesSink, TracingSink};
use crate::extract::ExtractionPipeline;
use crate::fetch::{FetchPolicy, HttpFetcher};
use crate::models::{ResortFilter, RunSummary};
use crate::pipeline::Collector;
use crate::registry::ResortRegistry;
use crate::storage::{ReportStore, Repository};
use crate::utils::{fmt_number, or_dash};

#[derive(Parser)]
#[command(name = "snow-etl", about = "Daily ski resort snow report collector", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Resort registry CSV (overrides config)
    #[arg(long, global = true)]
    registry: Option<PathBuf>,

    /// DuckDB database file (overrides config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape today's snow reports
    Collect {
        /// Only resorts in these countries (comma separated)
        #[arg(long, value_delimiter = ',', conflicts_with = "resorts")]
        countries: Vec<String>,

        /// Only these resorts (comma separated)
        #[arg(long, value_delimiter = ',')]
        resorts: Vec<String>,
    },

    /// Show the newest stored report per resort
    Latest {
        #[arg(long)]
        resort: Option<String>,
    },

    /// Write the newest report per resort to CSV
    Export {
        #[arg(short, long, default_value = "data/latest_snow_data.csv")]
        out: PathBuf,
    },

    /// Show database statistics
    Stats,

    /// Show recent scrape attempts
    Log {
        #[arg(long)]
        resort: Option<String>,

        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// List registry resorts and the parsers that apply to them
    Resorts {
        #[arg(long)]
        country: Option<String>,
    },

    /// Apply schema migrations without collecting
    Migrate,
}

fn open_repo(config: &AppConfig) -> Result<Repository> {
    let repo = Repository::open(&config.storage.db_path)?;
    if config.storage.run_migrations {
        repo.run_migrations()?;
    }
    Ok(repo)
}

fn event_sink(config: &AppConfig) -> Result<Arc<dyn EventSink>> {
    Ok(match &config.events.log_path {
        Some(path) => {
            info!("Writing engine events to {:?}", path);
            Arc::new(JsonLinesSink::create(path)?)
        }
        None => Arc::new(TracingSink),
    })
}

fn print_summary(s: &RunSummary) {
    println!("─────────────────────────────────");
    println!("  Sweep summary{}", if s.cancelled { " (cancelled)" } else { "" });
    println!("─────────────────────────────────");
    println!("  Attempted : {}", s.attempted);
    println!("  Success   : {}", s.succeeded);
    println!("  Partial   : {}", s.partial);
    println!("  Failed    : {}", s.failed);
    println!("─────────────────────────────────");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "snow_etl=info,warn",
        1 => "snow_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;
    if let Some(path) = cli.registry {
        config.registry.path = path;
    }
    if let Some(path) = cli.db {
        config.storage.db_path = path;
    }

    match cli.command {
        Command::Collect { countries, resorts } => {
            let filter = ResortFilter::from_args(countries, resorts)?;
            let registry = ResortRegistry::load(&config.registry.path)?;
            if registry.is_empty() {
                warn!("Registry {:?} lists no resorts", config.registry.path);
            }

            let repo = Arc::new(open_repo(&config)?);
            repo.upsert_resorts(registry.resorts())?;

            let sink = event_sink(&config)?;
            let fetcher = HttpFetcher::new(FetchPolicy::from(&config.scraper), sink.clone())?;
            let collector =
                Collector::new(registry, Arc::new(fetcher), repo.clone(), repo.clone(), sink)?;

            let token = collector.cancel_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted: stopping after the current resort");
                    token.cancel();
                }
            });

            match collector.collect(&filter).await {
                Ok(sweep) => print_summary(&sweep.summary),
                Err(e) => {
                    error!("{:#}", e);
                    print_summary(&e.sweep.summary);
                    return Err(e.into());
                }
            }
        }

        Command::Latest { resort } => {
            let repo = open_repo(&config)?;
            let reports = repo.latest(resort.as_deref())?;
            if reports.is_empty() {
                println!("No reports — run `snow-etl collect` first.");
            }
            for r in &reports {
                let f = &r.fields;
                println!(
                    "{:<24} {}  base {:>4}  summit {:>4}  24h {:>3}  lifts {}/{}  runs {}/{}",
                    r.resort,
                    r.date,
                    or_dash(f.base_depth_cm),
                    or_dash(f.summit_depth_cm),
                    or_dash(f.new_snow_24h_cm),
                    or_dash(f.lifts_open),
                    or_dash(f.lifts_total),
                    or_dash(f.runs_open),
                    or_dash(f.runs_total),
                );
            }
        }

        Command::Export { out } => {
            let registry = ResortRegistry::load(&config.registry.path)?;
            let repo = open_repo(&config)?;
            let n = export::export_latest(&repo, &registry, &out)?;
            println!("{} resort(s) written to {:?}", n, out);
        }

        Command::Stats => {
            let repo = open_repo(&config)?;
            let reports = repo.report_count()?;
            let attempts = repo.attempt_count()?;
            let resorts = repo.resort_count()?;
            let (min, max) = repo.date_range().unwrap_or((None, None));
            println!("─────────────────────────────────");
            println!("  Snow ETL — Database Stats");
            println!("─────────────────────────────────");
            println!("  Resorts  : {}", fmt_number(resorts));
            println!("  Reports  : {}", fmt_number(reports));
            println!("  Attempts : {}", fmt_number(attempts));
            for (outcome, n) in repo.outcome_counts()? {
                println!("    {:<8} {}", outcome, fmt_number(n));
            }
            println!("  From     : {}", or_dash(min));
            println!("  To       : {}", or_dash(max));
            println!("─────────────────────────────────");
        }

        Command::Log { resort, limit } => {
            let repo = open_repo(&config)?;
            for a in repo.attempts(resort.as_deref(), limit)? {
                println!(
                    "{}  {:<24} {:<8} {:<20} {:>2} field(s)  {}",
                    a.attempted_at.format("%Y-%m-%d %H:%M:%S"),
                    a.resort,
                    a.outcome,
                    a.tier,
                    a.fields_recovered,
                    a.error_detail.or(a.url).unwrap_or_default(),
                );
            }
        }

        Command::Resorts { country } => {
            let registry = ResortRegistry::load(&config.registry.path)?;
            let filter = match country {
                Some(c) => ResortFilter::Countries(vec![c]),
                None => ResortFilter::All,
            };
            let pipeline = ExtractionPipeline::default();
            let resorts = registry.resolve(&filter);
            println!("Parsers: {}", pipeline.parsers().names().join(", "));
            println!(
                "{} of {} resort(s) ({} countries):",
                resorts.len(),
                registry.len(),
                registry.countries().len()
            );
            for r in resorts {
                let parsers: Vec<&str> = pipeline
                    .parsers()
                    .resolve(r)
                    .iter()
                    .map(|p| p.name())
                    .collect();
                println!("  {:<24} {:<14} [{}]", r.name, r.country, parsers.join(" → "));
            }
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}
