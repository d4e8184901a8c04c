use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ornotify::config::{Config, LogFormat};
use ornotify::dispatch::{parse_date, LogFilter, StatusQuery};

#[derive(Parser)]
#[command(
    name = "ornotify",
    about = "Operating-room schedule notifications with delivery reconciliation",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true, env = "ORNOTIFY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + daily trigger)
    Serve {
        /// Bind address, overrides the config file
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run the notification dispatch once, now
    Dispatch {
        /// Surgery date to notify about (YYYY-MM-DD); defaults to today + lead time
        #[arg(long)]
        date: Option<String>,
    },

    /// Show delivery status per ward for a date
    Status {
        /// Surgery date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,

        /// Day the job ran (YYYY-MM-DD); target is this plus the lead time
        #[arg(long)]
        execution_date: Option<String>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Resend the current surgery list to one ward
    Resend {
        /// Surgery date (YYYY-MM-DD)
        #[arg(long)]
        date: String,

        /// Ward name
        #[arg(long)]
        room: String,
    },

    /// List execution log rows
    Logs {
        #[arg(long)]
        date: Option<String>,

        #[arg(long)]
        job_name: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        page_size: u32,
    },

    /// Preview when the daily trigger fires in the next N hours
    SchedulePreview {
        #[arg(long, default_value = "72")]
        hours: u64,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));
    match cfg.logging.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn optional_date(field: &str, raw: Option<&str>) -> Result<Option<chrono::NaiveDate>> {
    Ok(raw.map(|s| parse_date(field, s)).transpose()?)
}

fn open_dispatcher(cfg: &Config) -> Result<ornotify::dispatch::Dispatcher> {
    let pool = ornotify::storage::open_pool(&cfg.server.db_path)?;
    ornotify::build_dispatcher(cfg, pool)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = Config::resolve(cli.config.as_deref())?;
    init_tracing(&cfg);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            tracing::info!(bind = %cfg.server.bind, "Starting ornotify daemon");
            ornotify::serve(cfg).await?;
        }
        Commands::SchedulePreview { hours } => {
            let trigger = ornotify::scheduler::DailyTrigger::from_config(&cfg.schedule)?;
            let runs = trigger.preview(chrono::Utc::now(), hours);
            if runs.is_empty() {
                println!("No runs scheduled in next {} hours.", hours);
            } else {
                println!("Upcoming dispatch runs (next {} hours, {}):", hours, cfg.schedule.timezone);
                for run in runs {
                    println!("  {}", run);
                }
            }
        }
        Commands::Dispatch { date } => {
            let dispatcher = open_dispatcher(&cfg)?;
            let outcome = match optional_date("date", date.as_deref())? {
                Some(d) => dispatcher.run_for(d).await,
                None => dispatcher.run().await,
            };
            println!("{}", outcome.summary);
            for room in &outcome.rooms {
                println!(
                    "  {:<20} {:<12} {:>3} surgeries  {}",
                    room.room,
                    format!("{:?}", room.status),
                    room.surgery_count,
                    room.reason.as_deref().unwrap_or("")
                );
            }
            if outcome.is_error() {
                anyhow::bail!("dispatch failed");
            }
        }
        Commands::Status {
            date,
            execution_date,
            json,
        } => {
            let dispatcher = open_dispatcher(&cfg)?;
            let query = StatusQuery {
                date: optional_date("date", date.as_deref())?,
                execution_date: optional_date("execution_date", execution_date.as_deref())?,
            };
            let report = dispatcher.status(&query)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "\nNotification status for {} ({} surgeries)",
                    report.target_date, report.total_surgeries
                );
                println!(
                    "{:<20} | {:>7} | {:>6} | {:<12} | {:<8} | Phone",
                    "Ward", "Current", "Logged", "Status", "Updates"
                );
                println!("{:-<20}-|-{:-<7}-|-{:-<6}-|-{:-<12}-|-{:-<8}-|-{:-<12}", "", "", "", "", "", "");
                for r in &report.rooms {
                    println!(
                        "{:<20} | {:>7} | {:>6} | {:<12} | {:<8} | {}",
                        r.room,
                        r.current_count,
                        r.logged_count,
                        format!("{:?}", r.status),
                        if r.has_updates { "yes" } else { "no" },
                        r.phone.as_deref().unwrap_or("-")
                    );
                }
                println!();
            }
        }
        Commands::Resend { date, room } => {
            let dispatcher = open_dispatcher(&cfg)?;
            let date = parse_date("date", &date)?;
            let outcome = dispatcher.resend(date, &room).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Logs {
            date,
            job_name,
            page,
            page_size,
        } => {
            let dispatcher = open_dispatcher(&cfg)?;
            let filter = LogFilter {
                date: optional_date("date", date.as_deref())?,
                job_name,
                page: Some(page),
                page_size: Some(page_size),
            };
            let page = dispatcher.logs().list(&filter)?;
            println!("{} rows (page {}, size {})", page.total, page.page, page.page_size);
            for row in page.rows {
                println!(
                    "#{:<5} {} {:<8} {:<24} {}",
                    row.id,
                    row.target_date,
                    row.status,
                    row.job_name,
                    row.summary.lines().next().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
