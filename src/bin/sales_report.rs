use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use stateset_sales_reports::{
    config, db, pooled_report_service, reports::window, to_text, ReportError, ReportWindow,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Parser)]
#[command(name = "sales-report", version, about = "Generate sales reports from the record store")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render the report as pretty JSON instead of CSV text"
    )]
    json: bool,
    #[arg(
        long,
        global = true,
        value_name = "SECS",
        help = "Abandon the report if it is not ready after this many seconds"
    )]
    cancel_after_secs: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sales for one day
    Daily {
        #[arg(help = "Day to report on (YYYY-MM-DD)")]
        date: NaiveDate,
    },
    /// Sales for the seven days starting on a date
    Weekly {
        #[arg(help = "First day of the week (YYYY-MM-DD)")]
        week_start: NaiveDate,
    },
    /// Sales for the Monday-to-Sunday week around a date
    Week {
        #[arg(help = "Any day of the week (YYYY-MM-DD)")]
        date: NaiveDate,
    },
    /// Sales for a calendar month
    Monthly {
        year: i32,
        #[arg(value_parser = clap::value_parser!(u32).range(1..=12))]
        month: u32,
    },
    /// Sales for an inclusive date range
    Custom {
        #[arg(help = "First day (YYYY-MM-DD)")]
        start: NaiveDate,
        #[arg(help = "Last day, inclusive (YYYY-MM-DD)")]
        end: NaiveDate,
    },
}

impl Commands {
    fn resolve(&self) -> Result<ReportWindow, ReportError> {
        match *self {
            Commands::Daily { date } => Ok(window::daily(date)),
            Commands::Weekly { week_start } => window::weekly(week_start),
            Commands::Week { date } => window::week_containing(date),
            Commands::Monthly { year, month } => window::monthly(year, month),
            Commands::Custom { start, end } => window::custom(start, end),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = config::load_config().context("failed to load reporting config")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    // Bad input is rejected before touching the database.
    let window = cli.command.resolve().context("invalid report period")?;

    let pool = db::establish_connection_from_config(&cfg)
        .await
        .context("failed to connect to database")?;
    let service = pooled_report_service(pool, cfg.retry_policy());

    let cancel = CancellationToken::new();
    if let Some(secs) = cli.cancel_after_secs {
        let deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(secs, "Report deadline reached, cancelling");
            deadline.cancel();
        });
    }

    debug!(
        kind = %window.kind(),
        start = %window.start(),
        end = %window.end(),
        days = window.days(),
        "Generating report"
    );
    let report = service
        .aggregate_with_cancel(window, &cancel)
        .await
        .context("failed to generate sales report")?;

    if cli.json {
        print_json(&report)?;
    } else {
        print!("{}", to_text(&report).context("failed to export report")?);
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
