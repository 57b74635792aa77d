//! In-memory fakes of the port traits for lifecycle and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex as StdMutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::Mutex;

use crate::error::GatewayError;
use crate::models::{Bar, FeatureSnapshot, Fill, LogicalFill, Position, Side};

use super::ports::{EventLogger, ExecutionGateway, FeatureSource, Notifier, PositionStore};
use super::signal::make_snapshot;

// ==================== Event Logger ====================

#[derive(Debug, Default)]
struct EventsState {
    skips: Vec<(String, Vec<String>)>,
    entries: Vec<(String, Vec<String>)>,
    exits: Vec<(String, Decimal, Decimal)>,
    closed_pnl: Vec<Decimal>,
    fail_reads: bool,
}

#[derive(Debug, Default)]
pub struct MemoryEvents {
    state: Mutex<EventsState>,
}

impl MemoryEvents {
    pub async fn push_closed_pnl(&self, pnl: Decimal) {
        self.state.lock().await.closed_pnl.push(pnl);
    }

    pub async fn fail_reads(&self, fail: bool) {
        self.state.lock().await.fail_reads = fail;
    }

    pub async fn skips(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().await.skips.clone()
    }

    pub async fn entries(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().await.entries.clone()
    }

    pub async fn exits(&self) -> Vec<(String, Decimal, Decimal)> {
        self.state.lock().await.exits.clone()
    }
}

#[async_trait]
impl EventLogger for MemoryEvents {
    async fn log_skip(&self, symbol: &str, reasons: &[String]) -> Result<()> {
        self.state.lock().await.skips.push((symbol.to_string(), reasons.to_vec()));
        Ok(())
    }

    async fn log_entry(&self, symbol: &str, reasons: &[String]) -> Result<()> {
        self.state.lock().await.entries.push((symbol.to_string(), reasons.to_vec()));
        Ok(())
    }

    async fn log_exit(&self, symbol: &str, exit_price: Decimal, pnl: Decimal) -> Result<()> {
        let mut state = self.state.lock().await;
        state.exits.push((symbol.to_string(), exit_price, pnl));
        state.closed_pnl.push(pnl);
        Ok(())
    }

    async fn summarize(&self, _days: i64) -> Result<String> {
        let state = self.state.lock().await;
        if state.fail_reads {
            bail!("event log unavailable");
        }
        Ok(format!("skips={} buys={}", state.skips.len(), state.entries.len()))
    }

    async fn recent_realized_pnl(&self, trades: u32) -> Result<Decimal> {
        let state = self.state.lock().await;
        if state.fail_reads {
            bail!("event log unavailable");
        }
        Ok(state.closed_pnl.iter().rev().take(trades as usize).sum())
    }
}

// ==================== Position Store ====================

#[derive(Debug, Default)]
struct StoreState {
    positions: HashMap<String, Position>,
    cooldowns: HashMap<String, DateTime<Utc>>,
    closed: Vec<(String, DateTime<Utc>)>,
    fail_writes: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub async fn fail_writes(&self, fail: bool) {
        self.state.lock().await.fail_writes = fail;
    }

    pub async fn insert(&self, position: Position) {
        self.state
            .lock()
            .await
            .positions
            .insert(position.symbol.clone(), position);
    }

    pub async fn closed(&self) -> Vec<(String, DateTime<Utc>)> {
        self.state.lock().await.closed.clone()
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn load_all(&self) -> Result<HashMap<String, Position>> {
        Ok(self.state.lock().await.positions.clone())
    }

    async fn save(&self, symbol: &str, position: &Position) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            bail!("disk full");
        }
        state.positions.insert(symbol.to_string(), position.clone());
        Ok(())
    }

    async fn mark_closed(&self, symbol: &str, closed_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            bail!("disk full");
        }
        state.positions.remove(symbol);
        state.closed.push((symbol.to_string(), closed_at));
        Ok(())
    }

    async fn load_cooldowns(&self) -> Result<HashMap<String, DateTime<Utc>>> {
        Ok(self.state.lock().await.cooldowns.clone())
    }

    async fn save_cooldown(&self, symbol: &str, until: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_writes {
            bail!("disk full");
        }
        state.cooldowns.insert(symbol.to_string(), until);
        Ok(())
    }
}

// ==================== Execution Gateway ====================

#[derive(Debug)]
struct GatewayState {
    /// Ticker script; the last price repeats once the script runs out
    prices: VecDeque<Decimal>,
    last_price: Decimal,
    balance: Decimal,
    precision: u32,
    fee: Decimal,
    /// Base-asset commission per buy; when set, sells are checked against holdings
    base_fee: Option<Decimal>,
    holdings: Decimal,
    ohlcv_failures: u32,
    order_error: Option<GatewayError>,
    orders: Vec<(Side, Decimal)>,
}

/// Scripted exchange. Orders fill in full at the current scripted price.
#[derive(Debug)]
pub struct FakeGateway {
    state: StdMutex<GatewayState>,
}

impl FakeGateway {
    pub fn new(balance: Decimal, prices: &[Decimal]) -> Self {
        Self {
            state: StdMutex::new(GatewayState {
                prices: prices.iter().copied().collect(),
                last_price: prices.first().copied().unwrap_or(dec!(100)),
                balance,
                precision: 1,
                fee: Decimal::ZERO,
                base_fee: None,
                holdings: Decimal::ZERO,
                ohlcv_failures: 0,
                order_error: None,
                orders: Vec::new(),
            }),
        }
    }

    pub fn with_fee(self, fee: Decimal) -> Self {
        self.state.lock().unwrap().fee = fee;
        self
    }

    /// Charge buys in the base asset, as the exchange does without BNB fees.
    pub fn with_base_fee(self, fee: Decimal) -> Self {
        self.state.lock().unwrap().base_fee = Some(fee);
        self
    }

    pub fn with_precision(self, precision: u32) -> Self {
        self.state.lock().unwrap().precision = precision;
        self
    }

    /// Fail the next `n` bar fetches with a transient error.
    pub fn fail_ohlcv(&self, n: u32) {
        self.state.lock().unwrap().ohlcv_failures = n;
    }

    pub fn reject_orders(&self, reason: &str) {
        self.state.lock().unwrap().order_error = Some(GatewayError::Rejected(reason.to_string()));
    }

    pub fn orders(&self) -> Vec<(Side, Decimal)> {
        self.state.lock().unwrap().orders.clone()
    }

    fn next_price(state: &mut GatewayState) -> Decimal {
        if let Some(price) = state.prices.pop_front() {
            state.last_price = price;
        }
        state.last_price
    }
}

pub fn flat_bars(count: usize) -> Vec<Bar> {
    let start = Utc::now() - Duration::minutes(5 * count as i64);
    (0..count)
        .map(|i| Bar {
            open_time: start + Duration::minutes(5 * i as i64),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 1_000.0,
        })
        .collect()
}

#[async_trait]
impl ExecutionGateway for FakeGateway {
    async fn fetch_ohlcv(&self, _symbol: &str, _timeframe: &str, limit: u32) -> Result<Vec<Bar>, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if state.ohlcv_failures > 0 {
            state.ohlcv_failures -= 1;
            return Err(GatewayError::Transport("connection reset".into()));
        }
        Ok(flat_bars(limit as usize))
    }

    async fn fetch_ticker(&self, _symbol: &str) -> Result<Decimal, GatewayError> {
        let mut state = self.state.lock().unwrap();
        Ok(Self::next_price(&mut state))
    }

    async fn fetch_balance(&self, _asset: &str) -> Result<Decimal, GatewayError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<LogicalFill, GatewayError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.order_error.take() {
            return Err(e);
        }

        let price = state.last_price;
        let (filled, fee) = match (state.base_fee, side) {
            (Some(base_fee), Side::Buy) => {
                state.holdings += quantity - base_fee;
                (quantity - base_fee, base_fee * price)
            }
            (Some(_), Side::Sell) => {
                if quantity > state.holdings {
                    return Err(GatewayError::Rejected(
                        "Account has insufficient balance for requested action.".to_string(),
                    ));
                }
                state.holdings -= quantity;
                (quantity, state.fee)
            }
            (None, _) => (quantity, state.fee),
        };

        state.orders.push((side, quantity));
        Ok(LogicalFill {
            order_id: format!("order-{}", state.orders.len()),
            symbol: symbol.to_string(),
            side,
            quantity: filled,
            avg_price: price,
            fee,
            timestamp: Utc::now(),
        })
    }

    async fn quantity_precision(&self, _symbol: &str) -> Result<u32, GatewayError> {
        Ok(self.state.lock().unwrap().precision)
    }

    async fn fetch_my_trades(&self, _symbol: &str) -> Result<Vec<Fill>, GatewayError> {
        Ok(Vec::new())
    }
}

// ==================== Features ====================

/// Returns the same snapshot for every call; the bars are ignored.
#[derive(Debug)]
pub struct ScriptedFeatures {
    snapshot: StdMutex<Option<FeatureSnapshot>>,
    confirmed: StdMutex<bool>,
}

impl ScriptedFeatures {
    /// Every entry check passes and the higher timeframe agrees.
    pub fn entering() -> Self {
        Self {
            snapshot: StdMutex::new(Some(make_snapshot())),
            confirmed: StdMutex::new(true),
        }
    }

    pub fn with_snapshot(snapshot: Option<FeatureSnapshot>) -> Self {
        Self {
            snapshot: StdMutex::new(snapshot),
            confirmed: StdMutex::new(true),
        }
    }

    pub fn unconfirmed(self) -> Self {
        *self.confirmed.lock().unwrap() = false;
        self
    }
}

impl FeatureSource for ScriptedFeatures {
    fn snapshot(&self, symbol: &str, _bars: &[Bar]) -> Option<FeatureSnapshot> {
        self.snapshot.lock().unwrap().clone().map(|mut snap| {
            snap.symbol = symbol.to_string();
            snap
        })
    }

    fn trend_confirmed(&self, _bars: &[Bar]) -> bool {
        *self.confirmed.lock().unwrap()
    }
}

// ==================== Notifier ====================

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub async fn messages(&self) -> Vec<String> {
        self.messages.lock().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) {
        self.messages.lock().await.push(text.to_string());
    }
}
