//! TrendGuard spot trading bot
//!
//! Runs one guarded trade lifecycle per symbol on a fixed cycle: indicator
//! entry checks, ATR-based layered exits, re-entry cooldowns and a drawdown
//! pause, with FIFO realized-P&L reporting.

mod accounting;
mod api;
mod bot;
mod db;
mod error;
mod features;
mod models;
mod trading;

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::accounting::{start_of_day, start_of_year, TradingReport};
use crate::api::{notifier_from_env, BinanceClient};
use crate::bot::Bot;
use crate::db::Database;
use crate::trading::{ExecutionGateway, Notifier, TradingConfig};

/// TrendGuard CLI.
#[derive(Parser)]
#[command(name = "trendguard")]
#[command(about = "Guarded per-symbol spot trading with layered exits", long_about = None)]
struct Cli {
    /// Database URL
    #[arg(short, long, env = "DATABASE_URL", default_value = "sqlite:trendguard.db?mode=rwc")]
    database: String,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Symbols to trade, comma separated
    #[arg(short, long, global = true, env = "TRENDGUARD_SYMBOLS", value_delimiter = ',')]
    symbols: Vec<String>,

    #[command(flatten)]
    risk: RiskArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Schedule and risk settings; unset values keep the built-in defaults.
#[derive(Args, Debug)]
struct RiskArgs {
    /// Seconds between trading cycles
    #[arg(long, global = true, env = "TRENDGUARD_CYCLE_SECS")]
    cycle_interval: Option<u64>,

    /// Minutes a symbol waits after a close before re-entry
    #[arg(long, global = true, env = "TRENDGUARD_COOLDOWN_MINS")]
    cooldown: Option<u64>,

    /// Hours a position may stay open
    #[arg(long, global = true, env = "TRENDGUARD_MAX_HOLD_HOURS")]
    max_hold: Option<u64>,

    /// Fraction of the free quote balance per entry, e.g. 0.1
    #[arg(long, global = true, env = "TRENDGUARD_ALLOCATION")]
    allocation: Option<Decimal>,

    /// Pause entries when recent realized P&L falls below this, e.g. -50
    #[arg(long, global = true, env = "TRENDGUARD_DRAWDOWN_FLOOR", allow_negative_numbers = true)]
    drawdown_floor: Option<Decimal>,

    /// Closed trades summed for the drawdown check
    #[arg(long, global = true, env = "TRENDGUARD_DRAWDOWN_LOOKBACK")]
    drawdown_lookback: Option<u32>,
}

impl RiskArgs {
    fn apply(&self, config: &mut TradingConfig) {
        if let Some(secs) = self.cycle_interval {
            config.cycle_interval = Duration::from_secs(secs);
        }
        if let Some(mins) = self.cooldown {
            config.cooldown = Duration::from_secs(mins * 60);
        }
        if let Some(hours) = self.max_hold {
            config.max_hold = Duration::from_secs(hours * 3600);
        }
        if let Some(fraction) = self.allocation {
            config.allocation_fraction = fraction;
        }
        if let Some(floor) = self.drawdown_floor {
            config.drawdown_floor = floor;
        }
        if let Some(trades) = self.drawdown_lookback {
            config.drawdown_lookback = trades;
        }
    }
}

impl Cli {
    fn trading_config(&self) -> TradingConfig {
        let mut config = TradingConfig {
            database_url: self.database.clone(),
            ..TradingConfig::default()
        };
        if !self.symbols.is_empty() {
            config.symbols = self.symbols.iter().map(|s| s.trim().to_uppercase()).collect();
        }
        self.risk.apply(&mut config);
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the trading loop
    Run {
        /// Simulate orders at the last price instead of sending them
        #[arg(long)]
        dry_run: bool,
    },

    /// Archive account fills and send the daily and year-to-date reports
    Report,

    /// Send the skipped-signal and success-rate summary
    Summary {
        /// Days to look back
        #[arg(long, default_value = "7")]
        days: i64,
    },

    /// Show open positions, cooldowns and the pause state
    Status,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = cli.trading_config();

    match cli.command {
        Commands::Run { dry_run } => {
            config.dry_run = dry_run;
            info!(symbols = ?config.symbols, dry_run = dry_run, "Starting trendguard");

            let mut bot = Bot::connect(config.clone()).await?;

            println!("\n=== TrendGuard ===");
            println!("Symbols:  {}", config.symbols.join(", "));
            println!("Cycle:    {}s", config.cycle_interval.as_secs());
            println!("Mode:     {}", if dry_run { "DRY RUN (simulated orders)" } else { "LIVE TRADING" });
            println!("\nPress Ctrl+C to stop.\n");

            bot.run().await?;
        }

        Commands::Report => {
            config.validate()?;
            let db = Database::new(&config.database_url).await?;
            let gateway = BinanceClient::from_env(true)?;

            for symbol in &config.symbols {
                match gateway.fetch_my_trades(symbol).await {
                    Ok(fills) => {
                        let added = db.archive_fills(&fills).await?;
                        info!(symbol = %symbol, fetched = fills.len(), added = added, "Fills archived");
                    }
                    Err(e) => warn!(symbol = %symbol, error = %e, "Failed to fetch trades, reporting from archive"),
                }
            }

            let notifier = notifier_from_env();
            let now = Utc::now();
            for (period, since) in [("Daily", start_of_day(now)), ("YTD", start_of_year(now))] {
                let fills = db.fills_since(since).await?;
                let report = TradingReport::build(period, &config.quote_asset, &fills);
                println!("{}", report);
                notifier.send(&report.to_string()).await;
            }
        }

        Commands::Summary { days } => {
            config.summary_days = days;
            let bot = Bot::connect(config).await?;
            println!("{}", bot.send_summary().await?);
        }

        Commands::Status => {
            let bot = Bot::connect(config).await?;
            println!("{}", bot.status().await?);
        }

        Commands::Config => {
            config.validate()?;

            println!("\n=== Trading Configuration ===\n");
            println!("Symbols:              {}", config.symbols.join(", "));
            println!("Quote Asset:          {}", config.quote_asset);
            println!("Database:             {}", config.database_url);

            println!("\nSchedule:");
            println!("  Cycle Interval:     {}s", config.cycle_interval.as_secs());
            println!("  Monitor Tick:       {}s", config.monitor_tick.as_secs());
            println!("  Stagger:            {}s", config.stagger.as_secs());
            println!("  Summary Every:      {}h", config.summary_interval.as_secs() / 3600);

            println!("\nEntry:");
            println!("  Timeframe:          {}", config.entry_timeframe);
            println!("  Confirm Timeframe:  {}", config.confirm_timeframe);
            println!("  Bars Fetched:       {}", config.bar_limit);
            println!("  Allocation:         {}%", config.allocation_fraction * Decimal::ONE_HUNDRED);

            println!("\nRisk:");
            println!("  Cooldown:           {}m", config.cooldown.as_secs() / 60);
            println!("  Max Hold:           {}h", config.max_hold.as_secs() / 3600);
            println!(
                "  Drawdown Pause:     last {} trades below {} {}",
                config.drawdown_lookback, config.drawdown_floor, config.quote_asset
            );

            println!("\nRetry:");
            println!("  Max Attempts:       {}", config.retry.max_attempts);
            println!("  Delay:              {}ms", config.retry.delay.as_millis());
        }
    }

    Ok(())
}
