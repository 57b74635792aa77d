//! Seams to the outside world: exchange, durable store, event log, notifier,
//! indicator provider.
//!
//! The lifecycle only talks to these traits so that each collaborator can be
//! swapped (live exchange vs. dry run, SQLite vs. in-memory) and faked in tests.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::GatewayError;
use crate::models::{Bar, FeatureSnapshot, Fill, LogicalFill, Position, Side};

/// Order placement and market data.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Most recent `limit` closed bars, oldest first.
    async fn fetch_ohlcv(&self, symbol: &str, timeframe: &str, limit: u32) -> Result<Vec<Bar>, GatewayError>;

    /// Last traded price.
    async fn fetch_ticker(&self, symbol: &str) -> Result<Decimal, GatewayError>;

    /// Free balance of an asset.
    async fn fetch_balance(&self, asset: &str) -> Result<Decimal, GatewayError>;

    /// Place a market order and return its fills aggregated into one record.
    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<LogicalFill, GatewayError>;

    /// Number of decimal places allowed in an order quantity.
    async fn quantity_precision(&self, symbol: &str) -> Result<u32, GatewayError>;

    /// Account fills for a symbol, oldest first.
    async fn fetch_my_trades(&self, symbol: &str) -> Result<Vec<Fill>, GatewayError>;
}

/// Durable per-symbol position records.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, Position>>;

    async fn load(&self, symbol: &str) -> Result<Option<Position>> {
        Ok(self.load_all().await?.remove(symbol))
    }

    async fn save(&self, symbol: &str, position: &Position) -> Result<()>;

    async fn mark_closed(&self, symbol: &str, closed_at: DateTime<Utc>) -> Result<()>;

    /// Re-entry deadlines that must survive a restart.
    async fn load_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>>;

    async fn save_cooldown(&self, symbol: &str, until: DateTime<Utc>) -> Result<()>;
}

/// Persisted signal and outcome events.
#[async_trait]
pub trait EventLogger: Send + Sync {
    async fn log_skip(&self, symbol: &str, reasons: &[String]) -> Result<()>;

    async fn log_entry(&self, symbol: &str, reasons: &[String]) -> Result<()>;

    /// Close the most recent open entry for `symbol` with its outcome.
    async fn log_exit(&self, symbol: &str, exit_price: Decimal, pnl: Decimal) -> Result<()>;

    /// Human-readable digest of skip reasons and entry success rate.
    async fn summarize(&self, days: i64) -> Result<String>;

    /// Sum of realized P&L over the most recent `trades` closed entries.
    async fn recent_realized_pnl(&self, trades: u32) -> Result<Decimal>;
}

/// Best-effort message delivery. Implementations log their own failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);
}

/// Indicator snapshots computed from raw bars.
pub trait FeatureSource: Send + Sync {
    /// Snapshot of the latest bar, or `None` when there are too few bars.
    fn snapshot(&self, symbol: &str, bars: &[Bar]) -> Option<FeatureSnapshot>;

    /// Fast EMA above slow EMA on a coarser timeframe.
    fn trend_confirmed(&self, bars: &[Bar]) -> bool;
}
