mod config;
mod db;
mod discovery;
mod error;
mod fetcher;
mod model;
mod parser;
mod pipeline;
mod query;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::config::Settings;
use crate::fetcher::{HttpFetcher, PageSource};
use crate::model::{Isin, SectionKind};

#[derive(Parser)]
#[command(name = "gpw_scraper", about = "GPW listed-company scraper")]
struct Cli {
    /// Settings file (default: ./gpw.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the company listing and record every ISIN found
    Discover,
    /// Fetch, extract and store company pages
    Scrape {
        /// Max companies to scrape (default: all due)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Also re-scrape companies fetched recently
        #[arg(short, long)]
        force: bool,
    },
    /// Discover + scrape in one go
    Run {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(short, long)]
        force: bool,
    },
    /// Re-extract stored pages without fetching
    Process {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Look up stored data, printed as JSON
    Query {
        #[command(subcommand)]
        what: QueryCommand,
    },
    /// Companies table, largest market cap first
    Overview {
        /// Filter by sector (e.g. "Banki")
        #[arg(short, long)]
        sector: Option<String>,
        /// Filter by index membership (e.g. "WIG20")
        #[arg(short, long)]
        index: Option<String>,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Show scraping statistics
    Stats,
}

#[derive(Subcommand)]
enum QueryCommand {
    /// Everything stored for one ISIN
    Isin { isin: String },
    /// Everything stored for one ticker
    Ticker { ticker: String },
    /// Search by ticker or name
    Search {
        text: String,
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// One stored section (profile, financials, indices, current_reports,
    /// periodic_reports, shareholders, notoria)
    Section { isin: String, section: String },
    /// Shareholders by share of votes
    Shareholders { isin: String },
    /// Sector names with company counts
    Sectors,
    /// Companies in one sector
    Sector { name: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let result = match cli.command {
        Commands::Discover => {
            let conn = open(&settings)?;
            discover(&conn, &settings).await
        }
        Commands::Scrape { limit, force } => {
            let conn = open(&settings)?;
            scrape(&conn, &settings, limit, force).await
        }
        Commands::Run { limit, force } => {
            let conn = open(&settings)?;

            // Phase 1: Discover
            let t_discover = Instant::now();
            discover(&conn, &settings).await?;
            println!("Discovered in {:.1}s", t_discover.elapsed().as_secs_f64());

            // Phase 2: Scrape
            scrape(&conn, &settings, limit, force).await
        }
        Commands::Process { limit } => {
            let conn = open(&settings)?;
            let pages = db::fetch_pages(&conn, limit)?;
            if pages.is_empty() {
                println!("No stored pages. Run 'scrape' first.");
                return Ok(());
            }
            println!("Processing {} pages...", pages.len());
            let summary = pipeline::reprocess(&conn, &pages)?;
            print!("{}", summary);
            Ok(())
        }
        Commands::Query { what } => {
            let conn = open(&settings)?;
            run_query(&conn, what)
        }
        Commands::Overview { sector, index, limit } => {
            let conn = open(&settings)?;
            let rows = db::fetch_overview(&conn, sector.as_deref(), index.as_deref(), limit)?;
            if rows.is_empty() {
                println!("No companies found.");
                return Ok(());
            }

            println!(
                "{:>3} | {:<12} | {:<6} | {:<20} | {:<16} | {:>10} | {:>9} | {:>7} | {:>3}",
                "#", "ISIN", "Ticker", "Company", "Sector", "Cap (mln)", "Price", "Chg %", "Idx"
            );
            println!("{}", "-".repeat(110));

            for (i, r) in rows.iter().enumerate() {
                println!(
                    "{:>3} | {:<12} | {:<6} | {:<20} | {:<16} | {:>10} | {:>9} | {:>7} | {:>3}",
                    i + 1,
                    r.isin,
                    truncate(&r.ticker, 6),
                    truncate(&r.name, 20),
                    truncate(&r.sector, 16),
                    number(r.market_cap_mln, 1),
                    number(r.last_price, 2),
                    number(r.change_percent, 2),
                    r.index_count
                );
            }

            println!("\n{} companies", rows.len());
            Ok(())
        }
        Commands::Stats => {
            let conn = open(&settings)?;
            let s = db::get_stats(&conn)?;
            println!("Companies:    {}", s.companies);
            println!("Scraped:      {}", s.scraped);
            println!("  ok:         {}", s.ok);
            println!("  partial:    {}", s.partial);
            println!("  failed:     {}", s.failed);
            println!("Unscraped:    {}", s.unscraped);
            println!("Profiles:     {}", s.profiles);
            println!("Shareholders: {}", s.shareholders);
            println!("Reports:      {}", s.reports);
            println!("Notoria:      {}", s.notoria_metrics);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open(settings: &Settings) -> anyhow::Result<Connection> {
    let conn = db::connect(&settings.db_path)
        .with_context(|| format!("opening {}", settings.db_path.display()))?;
    db::init_schema(&conn)?;
    Ok(conn)
}

async fn discover(conn: &Connection, settings: &Settings) -> anyhow::Result<()> {
    let fetcher = HttpFetcher::new(settings)?;
    let companies = discovery::discover(&fetcher, settings).await?;
    let inserted = db::insert_companies(conn, &companies)?;
    println!(
        "Inserted {} new companies ({} total found)",
        inserted,
        companies.len()
    );
    Ok(())
}

async fn scrape(
    conn: &Connection,
    settings: &Settings,
    limit: Option<usize>,
    force: bool,
) -> anyhow::Result<()> {
    let fresh_since =
        (!force).then(|| Utc::now() - chrono::Duration::hours(settings.skip_recent_hours));
    let targets = db::fetch_targets(conn, limit, fresh_since)?;
    if targets.is_empty() {
        println!("Nothing to scrape. Run 'discover' first, or pass --force.");
        return Ok(());
    }

    info!("Scraping {} companies with {} workers", targets.len(), settings.concurrency);
    let source: Arc<dyn PageSource> = Arc::new(HttpFetcher::new(settings)?);
    let t_scrape = Instant::now();
    let summary = pipeline::scrape(conn, source, targets, settings).await?;
    print!("{}", summary);
    println!("Scraped in {}", format_duration(t_scrape.elapsed()));
    Ok(())
}

fn run_query(conn: &Connection, what: QueryCommand) -> anyhow::Result<()> {
    match what {
        QueryCommand::Isin { isin } => {
            let isin: Isin = isin.parse()?;
            let view = query::company_by_isin(conn, &isin)?
                .with_context(|| format!("no company with ISIN {}", isin))?;
            print_json(&view)
        }
        QueryCommand::Ticker { ticker } => {
            let view = query::company_by_ticker(conn, &ticker)?
                .with_context(|| format!("no company with ticker {}", ticker))?;
            print_json(&view)
        }
        QueryCommand::Search { text, limit } => {
            print_json(&query::search_companies(conn, &text, limit)?)
        }
        QueryCommand::Section { isin, section } => {
            let isin: Isin = isin.parse()?;
            let kind: SectionKind = section.parse().map_err(anyhow::Error::msg)?;
            let entity = db::get(conn, &isin, kind)?
                .with_context(|| format!("no {} stored for {}", kind, isin))?;
            print_json(&entity)
        }
        QueryCommand::Shareholders { isin } => {
            let isin: Isin = isin.parse()?;
            let holders = query::shareholders(conn, &isin)?
                .with_context(|| format!("no shareholders stored for {}", isin))?;
            print_json(&holders)
        }
        QueryCommand::Sectors => print_json(&query::sectors(conn)?),
        QueryCommand::Sector { name } => print_json(&query::companies_in_sector(conn, &name)?),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn number(value: Option<f64>, decimals: usize) -> String {
    value
        .map(|v| format!("{:.*}", decimals, v))
        .unwrap_or_else(|| "-".into())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
