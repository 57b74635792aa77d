//! Trading configuration.

use std::time::Duration;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::features::WARMUP_BARS;

use super::retry::RetryPolicy;

/// Configuration for the trading lifecycle and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols evaluated every cycle
    pub symbols: Vec<String>,

    /// Asset whose free balance funds new positions
    pub quote_asset: String,

    /// Time between orchestrator cycles
    pub cycle_interval: Duration,

    /// Time between monitoring checks of an open position
    pub monitor_tick: Duration,

    /// Delay between launching consecutive symbol runs in one cycle
    pub stagger: Duration,

    /// Wait after a close before the symbol may be re-entered
    pub cooldown: Duration,

    /// Maximum time a position may stay open
    pub max_hold: Duration,

    /// Fraction of the free quote balance allocated to one entry (0.0 to 1.0]
    pub allocation_fraction: Decimal,

    /// Entries pause while realized P&L over the lookback is below this (quote units)
    pub drawdown_floor: Decimal,

    /// Number of most recent closed trades summed for the pause check
    pub drawdown_lookback: u32,

    /// Bar interval for entry and exit signals
    pub entry_timeframe: String,

    /// Coarser bar interval for trend confirmation
    pub confirm_timeframe: String,

    /// Bars requested per fetch
    pub bar_limit: u32,

    /// Retry policy applied to every exchange call
    pub retry: RetryPolicy,

    /// Period between signal summaries
    pub summary_interval: Duration,

    /// Days covered by each signal summary
    pub summary_days: i64,

    /// Simulate fills instead of placing orders
    pub dry_run: bool,

    /// SQLite connection URL
    pub database_url: String,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["XRPUSDT".to_string()],
            quote_asset: "USDT".to_string(),
            cycle_interval: Duration::from_secs(300),        // 5 minutes
            monitor_tick: Duration::from_secs(30),
            stagger: Duration::from_secs(2),
            cooldown: Duration::from_secs(60 * 60),          // 1 hour
            max_hold: Duration::from_secs(24 * 60 * 60),     // 1 day
            allocation_fraction: dec!(0.1),                  // 10% of free balance
            drawdown_floor: dec!(-50),                       // -50 USDT
            drawdown_lookback: 5,
            entry_timeframe: "5m".to_string(),
            confirm_timeframe: "1h".to_string(),
            bar_limit: 100,
            retry: RetryPolicy::default(),
            summary_interval: Duration::from_secs(7 * 24 * 60 * 60), // weekly
            summary_days: 7,
            dry_run: false,
            database_url: "sqlite:trendguard.db?mode=rwc".to_string(),
        }
    }
}

impl TradingConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() || self.symbols.iter().any(|s| s.trim().is_empty()) {
            bail!("At least one non-empty symbol must be configured");
        }
        if self.quote_asset.trim().is_empty() {
            bail!("Quote asset must not be empty");
        }
        for (name, value) in [
            ("cycle interval", self.cycle_interval),
            ("monitor tick", self.monitor_tick),
            ("cooldown", self.cooldown),
            ("max hold", self.max_hold),
            ("summary interval", self.summary_interval),
        ] {
            if value.is_zero() {
                bail!("The {} must be greater than zero", name);
            }
        }
        if self.allocation_fraction <= Decimal::ZERO || self.allocation_fraction > Decimal::ONE {
            bail!(
                "Allocation fraction must be in (0, 1], got {}",
                self.allocation_fraction
            );
        }
        if self.drawdown_lookback == 0 {
            bail!("Drawdown lookback must cover at least one trade");
        }
        if self.retry.max_attempts == 0 {
            bail!("Retry policy must allow at least one attempt");
        }
        // One fetched bar is the forming candle and gets dropped
        if (self.bar_limit as usize) <= WARMUP_BARS {
            bail!(
                "Bar limit {} must exceed the {} closed bars indicators need",
                self.bar_limit,
                WARMUP_BARS
            );
        }
        if self.summary_days <= 0 {
            bail!("Summary window must be at least one day");
        }
        Ok(())
    }

    /// Cooldown as a wall-clock offset.
    pub fn cooldown_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::hours(1))
    }

    /// Max-hold ceiling as a wall-clock offset.
    pub fn max_hold_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.max_hold).unwrap_or(chrono::Duration::days(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TradingConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = TradingConfig::default();
        config.symbols.clear();
        assert!(config.validate().is_err());

        let mut config = TradingConfig::default();
        config.allocation_fraction = dec!(1.5);
        assert!(config.validate().is_err());

        let mut config = TradingConfig::default();
        config.cycle_interval = Duration::ZERO;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("cycle interval"));

        let mut config = TradingConfig::default();
        config.bar_limit = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_spans_match_durations() {
        let config = TradingConfig::default();
        assert_eq!(config.cooldown_span(), chrono::Duration::minutes(60));
        assert_eq!(config.max_hold_span(), chrono::Duration::hours(24));
    }
}
