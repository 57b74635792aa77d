//! Period trading reports built from archived fills.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::models::Fill;

use super::fifo::{compute_pnl, compute_win_loss, WinLossRatio};

/// Summary of one reporting period.
#[derive(Debug, Clone)]
pub struct TradingReport {
    /// Label such as "Daily" or "YTD"
    pub period: String,

    pub fills: usize,

    /// Sum of quantity * price over all fills
    pub volume: Decimal,

    /// FIFO realized P&L net of sell fees
    pub net_pnl: Decimal,

    pub fees: Decimal,
    pub wins: u32,
    pub losses: u32,
    pub ratio: WinLossRatio,

    /// Asset the money columns are denominated in
    pub quote_asset: String,
}

impl TradingReport {
    /// FIFO matching runs per symbol; the totals are summed across symbols.
    pub fn build(period: &str, quote_asset: &str, fills: &[Fill]) -> Self {
        let mut by_symbol: BTreeMap<&str, Vec<Fill>> = BTreeMap::new();
        for fill in fills {
            by_symbol.entry(fill.symbol.as_str()).or_default().push(fill.clone());
        }

        let mut net_pnl = Decimal::ZERO;
        let (mut wins, mut losses) = (0, 0);
        for symbol_fills in by_symbol.values() {
            net_pnl += compute_pnl(symbol_fills).total;
            let tally = compute_win_loss(symbol_fills);
            wins += tally.wins;
            losses += tally.losses;
        }

        Self {
            period: period.to_string(),
            fills: fills.len(),
            volume: fills.iter().map(Fill::notional).sum(),
            net_pnl,
            fees: fills.iter().map(|f| f.fee).sum(),
            wins,
            losses,
            ratio: WinLossRatio::new(wins, losses),
            quote_asset: quote_asset.to_string(),
        }
    }
}

impl std::fmt::Display for TradingReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "📊 {} Trading Report", self.period)?;
        writeln!(f, "----------------------------------------")?;
        writeln!(f, "🛒 Trades Executed: {}", self.fills)?;
        writeln!(f, "💰 Total Volume: {:.2} {}", self.volume, self.quote_asset)?;
        writeln!(f, "📈 Net PnL: {:.2} {}", self.net_pnl, self.quote_asset)?;
        writeln!(f, "💸 Total Fees: {:.2} {}", self.fees, self.quote_asset)?;
        writeln!(f, "✅ Wins: {} | ❌ Losses: {}", self.wins, self.losses)?;
        writeln!(f, "📊 Win/Loss Ratio: {}", self.ratio)?;
        Ok(())
    }
}

/// UTC midnight of the day containing `now`.
pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .single()
        .unwrap_or(now)
}

/// January 1st, 00:00 UTC, of the year containing `now`.
pub fn start_of_year(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
