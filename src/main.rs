use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use yfin_etl::models::{Frequency, Interval, StatementKind};
use yfin_etl::utils::Timer;
use yfin_etl::{AppConfig, Pipeline};

#[derive(Parser)]
#[command(name = "yfin-etl", about = "Yahoo Finance market data ETL", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Ticker symbols (comma separated)
    #[arg(short, long, global = true, value_delimiter = ',', default_value = "AAPL")]
    tickers: Vec<String>,

    /// Fan tickers out over the worker pool
    #[arg(short, long, global = true)]
    concurrent: bool,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Financial statements (income / balance / cash)
    Statements {
        /// annual, quarterly or trailing
        #[arg(short, long, default_value = "annual")]
        frequency: String,

        /// Statement kinds (comma separated): income, balance, cash
        #[arg(short, long, value_delimiter = ',', default_value = "income")]
        kinds: Vec<String>,
    },

    /// Summary detail data
    Summary,

    /// Current price and market state
    Price,

    /// Company profile
    Profile,

    /// Key statistics
    Keystats,

    /// Earnings history and estimates
    Earnings,

    /// Historical OHLCV series
    History {
        /// Start date, YYYY-MM-DD
        #[arg(long)]
        start: String,

        /// End date, YYYY-MM-DD
        #[arg(long)]
        end: String,

        /// daily, weekly or monthly
        #[arg(long, default_value = "daily")]
        interval: String,
    },

    /// Dividend history
    Dividends {
        #[arg(long)]
        start: String,

        #[arg(long)]
        end: String,
    },

    /// Analyst recommendations
    Recommendations,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "yfin_etl=info,warn",
        1 => "yfin_etl=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let config = AppConfig::load()?;
    let mut request = config.request;
    request.concurrent = request.concurrent || cli.concurrent;

    info!("{} ticker(s): {}", cli.tickers.len(), cli.tickers.join(", "));
    let pipeline = Pipeline::new(cli.tickers, request).context("Failed to build pipeline")?;

    let output = match cli.command {
        Command::Statements { frequency, kinds } => {
            let _t = Timer::start("Financial statements");
            let frequency = Frequency::parse(&frequency)
                .with_context(|| format!("Unknown frequency `{frequency}`"))?;
            let kinds = kinds
                .iter()
                .map(|kind| {
                    StatementKind::parse(kind)
                        .with_context(|| format!("Unknown statement kind `{kind}`"))
                })
                .collect::<Result<Vec<_>>>()?;
            if kinds.is_empty() {
                bail!("No statement kinds requested");
            }
            json!(pipeline.financial_statements(frequency, &kinds).await)
        }

        Command::Summary => {
            let _t = Timer::start("Summary data");
            json!(pipeline.summary_data().await)
        }

        Command::Price => {
            let _t = Timer::start("Price data");
            json!(pipeline.price_data().await)
        }

        Command::Profile => {
            let _t = Timer::start("Profile data");
            json!(pipeline.profile_data().await)
        }

        Command::Keystats => {
            let _t = Timer::start("Key statistics");
            json!(pipeline.key_statistics().await)
        }

        Command::Earnings => {
            let _t = Timer::start("Earnings data");
            json!(pipeline.earnings_data().await)
        }

        Command::History { start, end, interval } => {
            let _t = Timer::start("Historical prices");
            let interval = Interval::parse(&interval)
                .with_context(|| format!("Unknown interval `{interval}`"))?;
            json!(pipeline.historical_price_data(&start, &end, interval).await?)
        }

        Command::Dividends { start, end } => {
            let _t = Timer::start("Dividend history");
            json!(pipeline.daily_dividend_data(&start, &end).await?)
        }

        Command::Recommendations => {
            let _t = Timer::start("Recommendations");
            json!(pipeline.recommendations().await)
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
