//! Multi Martingale - Main Entry Point
//!
//! Replays historical ticks through the martingale engine and validates
//! configuration files.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use multi_martingale::backtest::{BacktestConfig, BacktestEngine, CsvTickSource, TickSource};
use multi_martingale::config::Config;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Multi Martingale CLI
#[derive(Parser)]
#[command(name = "multi-martingale")]
#[command(version, about = "Multi-strategy martingale engine with cycle analytics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a tick file through the configured strategies
    Backtest {
        /// Path to CSV tick file
        #[arg(short, long)]
        data: String,

        /// Config file (default: config.* in the working directory plus MMB__ env vars)
        #[arg(short, long)]
        config: Option<String>,

        /// Start date (YYYY-MM-DD), default: first tick
        #[arg(short, long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), default: last tick
        #[arg(short, long)]
        end: Option<String>,

        /// Initial balance, overriding the config
        #[arg(short = 'b', long)]
        initial_balance: Option<f64>,

        /// Output directory for equity curve and cycle table
        #[arg(short, long)]
        output: Option<String>,

        /// Keep cycles open at end of data instead of flattening them
        #[arg(long)]
        no_flatten: bool,

        /// Print the full result as JSON instead of the summary
        #[arg(long)]
        json: bool,
    },

    /// Load and validate a configuration
    CheckConfig {
        /// Config file (default: config.* in the working directory plus MMB__ env vars)
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match cli.command {
        Commands::Backtest {
            data,
            config,
            start,
            end,
            initial_balance,
            output,
            no_flatten,
            json,
        } => run_backtest(BacktestArgs {
            data_path: &data,
            config_path: config.as_deref(),
            start: start.as_deref(),
            end: end.as_deref(),
            initial_balance,
            output_dir: output.as_deref(),
            flatten_at_end: !no_flatten,
            json,
        }),
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

/// Initialize logging with stdout and hourly file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "multi-martingale.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("multi_martingale=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Initial Balance: ${}", config.engine.initial_balance);
    info!(
        "   Commission: {:.2}%",
        config.engine.commission_rate * dec!(100)
    );
    info!("   Order Type: {:?}", config.engine.order_type);
    info!(
        "   Max Concurrent Cycles: {}",
        config.admission.max_concurrent_cycles
    );
    info!(
        "   Daily Loss Limit: ${} | Profit Target: ${}",
        config.admission.daily_loss_limit, config.admission.daily_profit_target
    );
    for strategy in &config.strategies {
        info!(
            "   [{}] {} on {} | alloc {:.0}% | legs {} | {}",
            strategy.id,
            strategy.kind,
            strategy.instrument,
            strategy.capital_allocation * dec!(100),
            strategy.max_legs,
            if strategy.enabled { "enabled" } else { "disabled" }
        );
    }
}

fn check_config(path: Option<&str>) -> Result<()> {
    let config = load_config(path)?;
    log_config(&config);
    println!("Configuration OK: {} strategies", config.strategies.len());
    Ok(())
}

struct BacktestArgs<'a> {
    data_path: &'a str,
    config_path: Option<&'a str>,
    start: Option<&'a str>,
    end: Option<&'a str>,
    initial_balance: Option<f64>,
    output_dir: Option<&'a str>,
    flatten_at_end: bool,
    json: bool,
}

fn parse_date(raw: &str, hour: u32, minute: u32, second: u32) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("Invalid date '{}': {}", raw, e))?;
    date.and_hms_opt(hour, minute, second)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Invalid time for date '{}'", raw))
}

/// Run a single backtest.
fn run_backtest(args: BacktestArgs<'_>) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              BACKTEST MODE                                 ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let config = load_config(args.config_path)?;
    log_config(&config);

    info!("📊 Loading ticks from: {}", args.data_path);
    let source = CsvTickSource::new(args.data_path)?;
    let (data_start, data_end) = source
        .available_range()
        .context("Tick file contains no data")?;

    info!(
        "   Data range: {} to {}",
        data_start.format("%Y-%m-%d %H:%M"),
        data_end.format("%Y-%m-%d %H:%M")
    );
    info!("   Instruments: {}", source.instruments().join(", "));
    info!("   Ticks: {}", source.len());

    let start = match args.start {
        Some(raw) => parse_date(raw, 0, 0, 0)?,
        None => data_start,
    };
    let end = match args.end {
        Some(raw) => parse_date(raw, 23, 59, 59)?,
        None => data_end,
    };

    let mut backtest_config = BacktestConfig::from_engine(&config.engine);
    if let Some(balance) = args.initial_balance {
        backtest_config.initial_balance = Decimal::from_f64_retain(balance)
            .filter(|b| *b > Decimal::ZERO)
            .context("Initial balance must be a positive number")?;
    }
    backtest_config.flatten_at_end = args.flatten_at_end;
    backtest_config.output_path = args.output_dir.map(String::from);

    info!("💰 Initial balance: ${:.2}", backtest_config.initial_balance);

    let mut engine = BacktestEngine::new(source, config, backtest_config);
    let result = engine.run(start, end)?;

    if args.json {
        println!("{}", result.to_json()?);
    } else {
        println!("\n{}", result.summary());
    }

    if let Some(dir) = args.output_dir {
        std::fs::create_dir_all(dir)?;

        let equity_path = format!("{}/equity_curve.csv", dir);
        result.equity_to_csv(&equity_path)?;
        info!("📁 Equity curve saved to: {}", equity_path);

        let cycles_path = format!("{}/cycles.csv", dir);
        result.cycles_to_csv(&cycles_path)?;
        info!("📁 Cycle table saved to: {}", cycles_path);
    }

    Ok(())
}
