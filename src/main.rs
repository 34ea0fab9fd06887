mod attach;
mod db;
mod dedup;
mod error;
mod extras;
mod geocode;
mod identity;
mod normalize;
mod output;
mod pipeline;
mod raw;
mod report;
mod units;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::dedup::DedupConfig;
use crate::output::ParsedPaths;
use crate::pipeline::RunConfig;
use crate::report::QualityReport;

#[derive(Parser)]
#[command(
    name = "housing_pipeline",
    about = "RAW→PARSED resolution pipeline for public housing listings"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// Root of the RAW crawl tree
    #[arg(long, default_value = "data/raw")]
    raw_root: PathBuf,
    /// Root of the PARSED output tree
    #[arg(long, default_value = "data/parsed")]
    out_root: PathBuf,
    /// SQLite database path
    #[arg(long, default_value = "data/housing.sqlite")]
    db: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline for one crawl date
    Run {
        /// Crawl date (YYYY-MM-DD)
        #[arg(short, long)]
        date: String,
        #[command(flatten)]
        common: CommonArgs,
        /// Max records to process (default: all)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Attachment extraction workers
        #[arg(long, default_value = "4")]
        jobs: usize,
        /// Near-duplicate title similarity cutoff
        #[arg(long, default_value = "0.9")]
        similarity_threshold: f64,
        /// Near-duplicate posting-date window in days
        #[arg(long, default_value = "7")]
        date_window_days: i64,
    },
    /// Normalize records and report counts, writing nothing
    Normalize {
        #[arg(short, long)]
        date: String,
        #[command(flatten)]
        common: CommonArgs,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Extract attachment text only (skips already-extracted files)
    Extract {
        #[arg(short, long)]
        date: String,
        #[command(flatten)]
        common: CommonArgs,
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        #[arg(long, default_value = "4")]
        jobs: usize,
    },
    /// Print the stored quality report for a crawl date
    Report {
        #[arg(short, long)]
        date: String,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Show database statistics
    Stats {
        #[command(flatten)]
        common: CommonArgs,
    },
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

    let result = match cli.command {
        Commands::Run {
            date,
            common,
            limit,
            jobs,
            similarity_threshold,
            date_window_days,
        } => {
            let cfg = run_config(date, common, limit, jobs)?;
            let cfg = RunConfig {
                dedup: DedupConfig {
                    similarity_threshold,
                    date_window_days,
                },
                ..cfg
            };
            let report = pipeline::run_batch(&cfg).await?;
            report.print();
            Ok(())
        }
        Commands::Normalize { date, common, limit } => {
            let cfg = run_config(date, common, limit, 1)?;
            let report = pipeline::normalize_only(&cfg)?;
            report.print();
            Ok(())
        }
        Commands::Extract {
            date,
            common,
            limit,
            jobs,
        } => {
            let cfg = run_config(date, common, limit, jobs)?;
            let report = pipeline::extract_only(&cfg).await?;
            println!(
                "Extraction done: {} failed, {} via OCR.",
                report.extraction_failed, report.ocr_fallback_used
            );
            Ok(())
        }
        Commands::Report { date, common } => {
            let date = validate_date(&date)?;
            let paths = ParsedPaths::new(&common.out_root, &date);
            let report = QualityReport::read(&paths.report_json())?;
            report.print();
            Ok(())
        }
        Commands::Stats { common } => {
            let conn = db::connect(&common.db)?;
            db::init_schema(&conn)?;
            let s = db::get_stats(&conn)?;
            println!("Items:               {}", s.items);
            println!("Units:               {}", s.units);
            println!("Attachments:         {}", s.attachments);
            println!("  with text:         {}", s.attachments_with_text);
            println!("  via OCR:           {}", s.ocr_attachments);
            println!("Images:              {}", s.images);
            println!("Source map rows:     {}", s.source_map_rows);
            println!("Geocode cache:       {}", s.geocode_cache_entries);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_config(
    date: String,
    common: CommonArgs,
    limit: Option<usize>,
    jobs: usize,
) -> anyhow::Result<RunConfig> {
    Ok(RunConfig {
        date: validate_date(&date)?,
        raw_root: common.raw_root,
        out_root: common.out_root,
        db_path: common.db,
        limit,
        jobs,
        dedup: DedupConfig::default(),
    })
}

fn validate_date(date: &str) -> anyhow::Result<String> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .with_context(|| format!("`{date}` is not a YYYY-MM-DD date"))?;
    Ok(date.to_string())
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
