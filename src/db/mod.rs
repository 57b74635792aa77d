//! Database persistence for positions, cooldowns, signal events and fills.
//!
//! Stores everything needed to resume after restart:
//! - Open positions with their protective levels
//! - Re-entry cooldown deadlines
//! - Buy and skipped signals with their reasons and outcomes
//! - Archived exchange fills for reporting
//!
//! Money columns are stored as decimal text so nothing is lost to floats.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, warn};

use crate::models::{Fill, Position, PositionState, Side};
use crate::trading::{EventLogger, PositionStore};

/// Database connection pool.
pub struct Database {
    pool: SqlitePool,

    /// Bar interval recorded with each signal
    frame: String,
}

/// Stored position record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub symbol: String,
    pub entry_price: String,
    pub quantity: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub trailing_stop: String,
    pub entry_atr: String,
    pub entry_fee: String,
    pub opened_at: DateTime<Utc>,
    pub max_hold_secs: i64,
}

/// Stored exchange fill.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredFill {
    pub id: String,
    pub symbol: String,
    pub side: String,
    pub quantity: String,
    pub price: String,
    pub fee: String,
    pub order_id: String,
    pub timestamp: DateTime<Utc>,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal> {
    Decimal::from_str(value).with_context(|| format!("Invalid decimal in {}: {:?}", field, value))
}

impl TryFrom<StoredPosition> for Position {
    type Error = anyhow::Error;

    fn try_from(row: StoredPosition) -> Result<Self> {
        Ok(Position {
            entry_price: parse_decimal("entry_price", &row.entry_price)?,
            quantity: parse_decimal("quantity", &row.quantity)?,
            stop_loss: parse_decimal("stop_loss", &row.stop_loss)?,
            take_profit: parse_decimal("take_profit", &row.take_profit)?,
            trailing_stop: parse_decimal("trailing_stop", &row.trailing_stop)?,
            entry_atr: parse_decimal("entry_atr", &row.entry_atr)?,
            entry_fee: parse_decimal("entry_fee", &row.entry_fee)?,
            opened_at: row.opened_at,
            max_hold: Duration::seconds(row.max_hold_secs),
            state: PositionState::Open,
            symbol: row.symbol,
        })
    }
}

impl TryFrom<StoredFill> for Fill {
    type Error = anyhow::Error;

    fn try_from(row: StoredFill) -> Result<Self> {
        Ok(Fill {
            side: Side::parse(&row.side).with_context(|| format!("Invalid side: {}", row.side))?,
            quantity: parse_decimal("quantity", &row.quantity)?,
            price: parse_decimal("price", &row.price)?,
            fee: parse_decimal("fee", &row.fee)?,
            id: row.id,
            symbol: row.symbol,
            order_id: row.order_id,
            timestamp: row.timestamp,
        })
    }
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a separate database
        let in_memory = database_url.contains(":memory:");
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .idle_timeout(if in_memory { None } else { Some(std::time::Duration::from_secs(600)) })
            .max_lifetime(if in_memory { None } else { Some(std::time::Duration::from_secs(1800)) })
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self {
            pool,
            frame: "5m".to_string(),
        };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Record signals against a different bar interval.
    pub fn with_frame(mut self, frame: &str) -> Self {
        self.frame = frame.to_string();
        self
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        // Open positions, one row per symbol
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                symbol TEXT PRIMARY KEY,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                trailing_stop TEXT NOT NULL,
                entry_atr TEXT NOT NULL,
                entry_fee TEXT NOT NULL DEFAULT '0',
                opened_at TEXT NOT NULL,
                max_hold_secs INTEGER NOT NULL,
                closed_at TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Re-entry deadlines
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cooldowns (
                symbol TEXT PRIMARY KEY,
                until TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Executed entries and their outcomes
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS buy_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                reasons TEXT NOT NULL,
                frame TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                exit_price TEXT,
                pnl TEXT,
                close_time TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Entries that were evaluated and not taken
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skipped_signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                reasons TEXT NOT NULL,
                frame TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Archived exchange fills
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS fills (
                id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                fee TEXT NOT NULL,
                order_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                PRIMARY KEY (symbol, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_buy_signals_symbol ON buy_signals(symbol, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_skipped_signals_time ON skipped_signals(timestamp)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_fills_time ON fills(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Fills ====================

    /// Archive fills, ignoring ones already stored. Returns how many were new.
    pub async fn archive_fills(&self, fills: &[Fill]) -> Result<u64> {
        let mut inserted = 0;
        for fill in fills {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO fills (id, symbol, side, quantity, price, fee, order_id, timestamp)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&fill.id)
            .bind(&fill.symbol)
            .bind(fill.side.as_str())
            .bind(fill.quantity.to_string())
            .bind(fill.price.to_string())
            .bind(fill.fee.to_string())
            .bind(&fill.order_id)
            .bind(fill.timestamp)
            .execute(&self.pool)
            .await?;
            inserted += result.rows_affected();
        }

        debug!(received = fills.len(), inserted = inserted, "Fills archived");
        Ok(inserted)
    }

    /// Archived fills at or after `since`, oldest first.
    pub async fn fills_since(&self, since: DateTime<Utc>) -> Result<Vec<Fill>> {
        let rows = sqlx::query_as::<_, StoredFill>(
            r#"
            SELECT id, symbol, side, quantity, price, fee, order_id, timestamp
            FROM fills WHERE timestamp >= ?
            ORDER BY timestamp, rowid
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch fills")?;

        rows.into_iter().map(Fill::try_from).collect()
    }

    /// Get the connection pool (for advanced queries).
    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ==================== Positions & Cooldowns ====================

#[async_trait]
impl PositionStore for Database {
    async fn load_all(&self) -> Result<HashMap<String, Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            r#"
            SELECT symbol, entry_price, quantity, stop_loss, take_profit, trailing_stop,
                   entry_atr, entry_fee, opened_at, max_hold_secs
            FROM positions WHERE closed_at IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        let mut positions = HashMap::new();
        for row in rows {
            let symbol = row.symbol.clone();
            match Position::try_from(row) {
                Ok(position) => {
                    positions.insert(symbol, position);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "Skipping unreadable position"),
            }
        }
        Ok(positions)
    }

    async fn save(&self, symbol: &str, position: &Position) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO positions (
                symbol, entry_price, quantity, stop_loss, take_profit, trailing_stop,
                entry_atr, entry_fee, opened_at, max_hold_secs, closed_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, datetime('now'))
            ON CONFLICT(symbol) DO UPDATE SET
                entry_price = excluded.entry_price,
                quantity = excluded.quantity,
                stop_loss = excluded.stop_loss,
                take_profit = excluded.take_profit,
                trailing_stop = excluded.trailing_stop,
                entry_atr = excluded.entry_atr,
                entry_fee = excluded.entry_fee,
                opened_at = excluded.opened_at,
                max_hold_secs = excluded.max_hold_secs,
                closed_at = NULL,
                updated_at = datetime('now')
            "#,
        )
        .bind(symbol)
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.take_profit.to_string())
        .bind(position.trailing_stop.to_string())
        .bind(position.entry_atr.to_string())
        .bind(position.entry_fee.to_string())
        .bind(position.opened_at)
        .bind(position.max_hold.num_seconds())
        .execute(&self.pool)
        .await
        .context("Failed to save position")?;

        Ok(())
    }

    async fn mark_closed(&self, symbol: &str, closed_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE positions SET closed_at = ?, updated_at = datetime('now') WHERE symbol = ? AND closed_at IS NULL",
        )
        .bind(closed_at)
        .bind(symbol)
        .execute(&self.pool)
        .await
        .context("Failed to close position")?;

        Ok(())
    }

    async fn load_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        let rows: Vec<(String, DateTime<Utc>)> = sqlx::query_as("SELECT symbol, until FROM cooldowns")
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch cooldowns")?;

        Ok(rows.into_iter().collect())
    }

    async fn save_cooldown(&self, symbol: &str, until: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cooldowns (symbol, until) VALUES (?, ?)
            ON CONFLICT(symbol) DO UPDATE SET until = excluded.until
            "#,
        )
        .bind(symbol)
        .bind(until)
        .execute(&self.pool)
        .await
        .context("Failed to save cooldown")?;

        Ok(())
    }
}

// ==================== Signal Events ====================

#[async_trait]
impl EventLogger for Database {
    async fn log_skip(&self, symbol: &str, reasons: &[String]) -> Result<()> {
        sqlx::query("INSERT INTO skipped_signals (symbol, timestamp, reasons, frame) VALUES (?, ?, ?, ?)")
            .bind(symbol)
            .bind(Utc::now())
            .bind(serde_json::to_string(reasons)?)
            .bind(&self.frame)
            .execute(&self.pool)
            .await
            .context("Failed to log skipped signal")?;

        Ok(())
    }

    async fn log_entry(&self, symbol: &str, reasons: &[String]) -> Result<()> {
        sqlx::query(
            "INSERT INTO buy_signals (symbol, timestamp, reasons, frame, status) VALUES (?, ?, ?, ?, 'open')",
        )
        .bind(symbol)
        .bind(Utc::now())
        .bind(serde_json::to_string(reasons)?)
        .bind(&self.frame)
        .execute(&self.pool)
        .await
        .context("Failed to log buy signal")?;

        Ok(())
    }

    async fn log_exit(&self, symbol: &str, exit_price: Decimal, pnl: Decimal) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE buy_signals SET
                status = 'closed',
                exit_price = ?,
                pnl = ?,
                close_time = ?
            WHERE id = (
                SELECT id FROM buy_signals
                WHERE symbol = ? AND status = 'open'
                ORDER BY timestamp DESC, id DESC
                LIMIT 1
            )
            "#,
        )
        .bind(exit_price.to_string())
        .bind(pnl.to_string())
        .bind(Utc::now())
        .bind(symbol)
        .execute(&self.pool)
        .await
        .context("Failed to log trade outcome")?;

        if result.rows_affected() == 0 {
            warn!(symbol = %symbol, "No open buy signal to close");
        }
        Ok(())
    }

    async fn summarize(&self, days: i64) -> Result<String> {
        let since = Utc::now() - Duration::days(days);

        let skips: Vec<(String,)> = sqlx::query_as("SELECT reasons FROM skipped_signals WHERE timestamp >= ?")
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch skipped signals")?;

        let mut counts: HashMap<String, u32> = HashMap::new();
        for (raw,) in &skips {
            let reasons: Vec<String> = match serde_json::from_str(raw) {
                Ok(reasons) => reasons,
                Err(e) => {
                    warn!(reasons = %raw, error = %e, "Skipping malformed skip reasons");
                    continue;
                }
            };
            for reason in reasons {
                *counts.entry(reason).or_insert(0) += 1;
            }
        }

        let mut summary = String::new();
        if counts.is_empty() {
            summary.push_str(&format!("✅ No skipped signals in the last {} days.\n", days));
        } else {
            let mut ranked: Vec<_> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            summary.push_str(&format!("📉 Skipped Signal Reasons (last {} days):\n", days));
            for (reason, count) in ranked {
                summary.push_str(&format!("- {}: {} times\n", reason, count));
            }
        }
        summary.push('\n');

        let (buys,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM buy_signals WHERE timestamp >= ?")
            .bind(since)
            .fetch_one(&self.pool)
            .await?;
        let skipped = skips.len() as i64;
        let total = buys + skipped;

        if total == 0 {
            summary.push_str(&format!("📊 No buy or skipped signals in the last {} days.", days));
        } else {
            let success_rate = 100.0 * buys as f64 / total as f64;
            summary.push_str(&format!(
                "📊 Signal Summary (last {} days):\n✅ Buys Executed: {}\n❌ Skipped: {}\n📈 Success Rate: {:.2}%",
                days, buys, skipped, success_rate
            ));
        }

        Ok(summary)
    }

    async fn recent_realized_pnl(&self, trades: u32) -> Result<Decimal> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT pnl FROM buy_signals
            WHERE status = 'closed' AND pnl IS NOT NULL
            ORDER BY close_time DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(trades as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent P&L")?;

        rows.iter()
            .map(|(pnl,)| parse_decimal("pnl", pnl))
            .sum::<Result<Decimal>>()
    }
}
