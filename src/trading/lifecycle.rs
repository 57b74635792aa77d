//! One symbol's trade lifecycle: evaluate, enter, monitor, exit.
//!
//! A run holds the symbol's lease from the first check until it returns, so
//! the position can only be mutated by the run that owns it. Open positions
//! found in the store are resumed straight into monitoring.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::LifecycleError;
use crate::models::{ExitReason, Position, Side};

use super::config::TradingConfig;
use super::guard::ConcurrencyGuard;
use super::ports::{EventLogger, ExecutionGateway, FeatureSource, Notifier, PositionStore};
use super::risk::{check_exit, RiskThrottle};
use super::signal::{evaluate_entry, Decision};

/// Reason recorded when the provider has too few bars.
pub const INSUFFICIENT_DATA: &str = "Insufficient market data";

/// How a lifecycle run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Another run holds the symbol
    Busy,

    /// Re-entry blocked until the given time
    CoolingDown(DateTime<Utc>),

    /// Entries are paused on recent drawdown
    Paused,

    /// Evaluated and not entered; carries the failed reasons
    Skipped(Vec<String>),

    /// The exchange refused the order or it sized to nothing
    Rejected(String),

    Closed { reason: ExitReason, pnl: Decimal },

    /// Shutdown requested while monitoring; the position stays open
    Interrupted,

    Failed(String),
}

enum Entry {
    Opened(Position),
    NotOpened(RunOutcome),
}

/// Quantity for an entry: `balance * fraction / price`, rounded down to
/// `precision` decimal places.
pub fn size_order(balance: Decimal, fraction: Decimal, price: Decimal, precision: u32) -> Decimal {
    if price <= Decimal::ZERO || balance <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (balance * fraction / price).round_dp_with_strategy(precision, RoundingStrategy::ToZero)
}

/// Collaborators shared by every lifecycle run.
pub struct Lifecycle {
    pub config: Arc<TradingConfig>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub store: Arc<dyn PositionStore>,
    pub events: Arc<dyn EventLogger>,
    pub notifier: Arc<dyn Notifier>,
    pub features: Arc<dyn FeatureSource>,
    pub guard: Arc<ConcurrencyGuard>,
    pub throttle: Arc<RiskThrottle>,
    pub shutdown: Arc<AtomicBool>,
}

impl Lifecycle {
    /// Run one full lifecycle for `symbol`. Never panics on gateway failure;
    /// errors are logged, notified and folded into the outcome.
    pub async fn run(&self, symbol: &str) -> RunOutcome {
        let Some(_lease) = self.guard.lease(symbol) else {
            debug!(symbol = %symbol, "Lifecycle already running, skipping");
            return RunOutcome::Busy;
        };

        match self.drive(symbol).await {
            Ok(outcome) => outcome,
            Err(LifecycleError::Rejected(reason)) => {
                warn!(symbol = %symbol, reason = %reason, "Order rejected");
                self.notifier
                    .send(&format!("⚠️ Order rejected for {}: {}", symbol, reason))
                    .await;
                RunOutcome::Rejected(reason)
            }
            Err(e) => {
                error!(symbol = %symbol, error = %e, "Lifecycle run failed");
                self.notifier
                    .send(&format!("❌ Error in {}: {}", symbol, e))
                    .await;
                RunOutcome::Failed(e.to_string())
            }
        }
    }

    async fn drive(&self, symbol: &str) -> Result<RunOutcome, LifecycleError> {
        let stored = match self.store.load(symbol).await {
            Ok(position) => position.filter(Position::is_open),
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Failed to load stored position");
                None
            }
        };

        let position = match stored {
            Some(position) => {
                info!(
                    symbol = %symbol,
                    entry = %position.entry_price,
                    quantity = %position.quantity,
                    "Resuming open position"
                );
                position
            }
            None => match self.try_enter(symbol).await? {
                Entry::Opened(position) => position,
                Entry::NotOpened(outcome) => return Ok(outcome),
            },
        };

        self.monitor(symbol, position).await
    }

    async fn try_enter(&self, symbol: &str) -> Result<Entry, LifecycleError> {
        let config = &self.config;
        let retry = &config.retry;

        let now = Utc::now();
        if self.guard.in_cooldown(symbol, now) {
            let until = self.guard.cooldown_until(symbol).unwrap_or(now);
            debug!(symbol = %symbol, until = %until, "Symbol in cooldown");
            return Ok(Entry::NotOpened(RunOutcome::CoolingDown(until)));
        }

        if self.throttle.is_paused().await {
            info!(symbol = %symbol, "Entries paused, skipping evaluation");
            return Ok(Entry::NotOpened(RunOutcome::Paused));
        }

        let bars = retry
            .run("fetch_ohlcv", || {
                self.gateway
                    .fetch_ohlcv(symbol, &config.entry_timeframe, config.bar_limit)
            })
            .await?;

        let Some(snapshot) = self.features.snapshot(symbol, &bars) else {
            let decision = Decision::skip(INSUFFICIENT_DATA);
            self.record_skip(symbol, &decision).await;
            return Ok(Entry::NotOpened(RunOutcome::Skipped(decision.failed)));
        };

        let decision = evaluate_entry(&snapshot, &[]);
        if !decision.is_enter() {
            self.record_skip(symbol, &decision).await;
            return Ok(Entry::NotOpened(RunOutcome::Skipped(decision.failed)));
        }

        let coarse = retry
            .run("fetch_ohlcv", || {
                self.gateway
                    .fetch_ohlcv(symbol, &config.confirm_timeframe, config.bar_limit)
            })
            .await?;
        if !self.features.trend_confirmed(&coarse) {
            let decision = decision.withhold_unconfirmed();
            self.record_skip(symbol, &decision).await;
            return Ok(Entry::NotOpened(RunOutcome::Skipped(decision.failed)));
        }

        let balance = retry
            .run("fetch_balance", || self.gateway.fetch_balance(&config.quote_asset))
            .await?;
        let price = retry.run("fetch_ticker", || self.gateway.fetch_ticker(symbol)).await?;
        let precision = retry
            .run("quantity_precision", || self.gateway.quantity_precision(symbol))
            .await?;

        let quantity = size_order(balance, config.allocation_fraction, price, precision);
        if quantity <= Decimal::ZERO {
            return Err(LifecycleError::Rejected(format!(
                "order size rounds to zero (balance {} {}, price {})",
                balance, config.quote_asset, price
            )));
        }

        let fill = retry
            .run("create_market_order", || {
                self.gateway.create_market_order(symbol, Side::Buy, quantity)
            })
            .await?;

        let atr = Decimal::try_from(snapshot.atr).unwrap_or(Decimal::ZERO);
        let position = Position::open(
            symbol,
            fill.avg_price,
            fill.quantity,
            atr,
            fill.fee,
            Utc::now(),
            config.max_hold_span(),
        );

        info!(
            symbol = %symbol,
            price = %position.entry_price,
            quantity = %position.quantity,
            stop_loss = %position.stop_loss,
            take_profit = %position.take_profit,
            "Position opened"
        );

        if let Err(e) = self.store.save(symbol, &position).await {
            warn!(symbol = %symbol, error = %e, "Failed to persist new position");
        }
        if let Err(e) = self.events.log_entry(symbol, &decision.passed).await {
            warn!(symbol = %symbol, error = %e, "Failed to log entry");
        }

        self.notifier
            .send(&format!(
                "🟢 BUY {}\nQty: {}\nEntry: {}\nSL: {} | TP: {}\nReasons:\n- {}",
                symbol,
                position.quantity,
                position.entry_price,
                position.stop_loss.round_dp(6),
                position.take_profit.round_dp(6),
                decision.passed.join("\n- ")
            ))
            .await;

        Ok(Entry::Opened(position))
    }

    async fn record_skip(&self, symbol: &str, decision: &Decision) {
        info!(symbol = %symbol, reasons = ?decision.failed, "Entry skipped");

        if let Err(e) = self.events.log_skip(symbol, &decision.failed).await {
            warn!(symbol = %symbol, error = %e, "Failed to log skip");
        }
        self.notifier
            .send(&format!(
                "⏭️ SKIP {}\nReasons:\n- {}",
                symbol,
                decision.failed.join("\n- ")
            ))
            .await;
    }

    async fn monitor(&self, symbol: &str, mut position: Position) -> Result<RunOutcome, LifecycleError> {
        let config = &self.config;
        let retry = &config.retry;

        let mut ticker = interval(config.monitor_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.shutdown.load(Ordering::SeqCst) {
                info!(symbol = %symbol, "Shutdown requested, leaving position open");
                return Ok(RunOutcome::Interrupted);
            }

            let price = retry.run("fetch_ticker", || self.gateway.fetch_ticker(symbol)).await?;
            let bars = retry
                .run("fetch_ohlcv", || {
                    self.gateway
                        .fetch_ohlcv(symbol, &config.entry_timeframe, config.bar_limit)
                })
                .await?;

            let snapshot = self.features.snapshot(symbol, &bars);
            if snapshot.is_none() {
                debug!(symbol = %symbol, "No snapshot this tick, signal exit skipped");
            }

            let trailing_before = position.trailing_stop;
            if let Some(reason) = check_exit(&mut position, price, snapshot.as_ref(), Utc::now()) {
                return self.close(symbol, position, reason).await;
            }

            if position.trailing_stop != trailing_before {
                if let Err(e) = self.store.save(symbol, &position).await {
                    warn!(symbol = %symbol, error = %e, "Failed to persist trailing stop");
                }
            }
        }
    }

    async fn close(
        &self,
        symbol: &str,
        mut position: Position,
        reason: ExitReason,
    ) -> Result<RunOutcome, LifecycleError> {
        let retry = &self.config.retry;
        let precision = retry
            .run("quantity_precision", || self.gateway.quantity_precision(symbol))
            .await?;

        // Held quantity may carry commission dust below the lot step
        let quantity = position
            .quantity
            .round_dp_with_strategy(precision, RoundingStrategy::ToZero);
        if quantity <= Decimal::ZERO {
            return Err(LifecycleError::Rejected(format!(
                "held quantity {} rounds to zero at {} decimals",
                position.quantity, precision
            )));
        }

        let fill = retry
            .run("create_market_order", || {
                self.gateway.create_market_order(symbol, Side::Sell, quantity)
            })
            .await?;

        let pnl = (fill.avg_price - position.entry_price) * fill.quantity
            - position.entry_fee
            - fill.fee;
        position.close();
        let closed_at = Utc::now();

        info!(
            symbol = %symbol,
            reason = %reason,
            exit_price = %fill.avg_price,
            pnl = %pnl,
            "Position closed"
        );

        if let Err(e) = self.events.log_exit(symbol, fill.avg_price, pnl).await {
            warn!(symbol = %symbol, error = %e, "Failed to log exit");
        }
        if let Err(e) = self.store.mark_closed(symbol, closed_at).await {
            warn!(symbol = %symbol, error = %e, "Failed to mark position closed");
        }

        let until = closed_at + self.config.cooldown_span();
        self.guard.set_cooldown(symbol, until);
        if let Err(e) = self.store.save_cooldown(symbol, until).await {
            warn!(symbol = %symbol, error = %e, "Failed to persist cooldown");
        }

        self.notifier
            .send(&format!(
                "🔴 SELL {} ({})\nExit: {}\nEntry: {}\nPnL: {:.4}",
                symbol, reason, fill.avg_price, position.entry_price, pnl
            ))
            .await;

        Ok(RunOutcome::Closed { reason, pnl })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Regime;
    use crate::trading::retry::RetryPolicy;
    use crate::trading::signal::{make_snapshot, HTF_NOT_CONFIRMED};
    use crate::trading::testing::{
        FakeGateway, MemoryEvents, MemoryStore, RecordingNotifier, ScriptedFeatures,
    };
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct Harness {
        lifecycle: Arc<Lifecycle>,
        gateway: Arc<FakeGateway>,
        store: Arc<MemoryStore>,
        events: Arc<MemoryEvents>,
        notifier: Arc<RecordingNotifier>,
    }

    fn test_config() -> TradingConfig {
        TradingConfig {
            monitor_tick: Duration::from_millis(1),
            allocation_fraction: dec!(0.5),
            retry: RetryPolicy {
                max_attempts: 3,
                delay: Duration::from_millis(1),
                multiplier: 1.0,
            },
            ..TradingConfig::default()
        }
    }

    fn harness(gateway: FakeGateway, features: ScriptedFeatures) -> Harness {
        let gateway = Arc::new(gateway);
        let store = Arc::new(MemoryStore::default());
        let events = Arc::new(MemoryEvents::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let config = test_config();

        let lifecycle = Arc::new(Lifecycle {
            throttle: Arc::new(RiskThrottle::new(config.drawdown_lookback, config.drawdown_floor)),
            config: Arc::new(config),
            gateway: gateway.clone(),
            store: store.clone(),
            events: events.clone(),
            notifier: notifier.clone(),
            features: Arc::new(features),
            guard: Arc::new(ConcurrencyGuard::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        Harness {
            lifecycle,
            gateway,
            store,
            events,
            notifier,
        }
    }

    #[test]
    fn test_size_order_rounds_down() {
        // 1000 * 0.1 / 3 = 33.333.. -> 33.3
        assert_eq!(size_order(dec!(1000), dec!(0.1), dec!(3), 1), dec!(33.3));
        assert_eq!(size_order(dec!(1000), dec!(0.1), dec!(3), 0), dec!(33));
        assert_eq!(size_order(dec!(1), dec!(0.1), dec!(3), 0), Decimal::ZERO);
        assert_eq!(size_order(dec!(1000), dec!(0.1), Decimal::ZERO, 2), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_enter_then_take_profit() {
        // make_snapshot has ATR 1.0: SL 98.5, TP 102.5 around a 100 entry
        let gateway = FakeGateway::new(dec!(1000), &[dec!(100), dec!(101), dec!(103)])
            .with_fee(dec!(0.1));
        let h = harness(gateway, ScriptedFeatures::entering());

        let outcome = h.lifecycle.run("XRPUSDT").await;
        // qty = 1000 * 0.5 / 100 = 5; pnl = 5 * (103 - 100) - 0.1 - 0.1
        assert_eq!(
            outcome,
            RunOutcome::Closed {
                reason: ExitReason::TakeProfit,
                pnl: dec!(14.8)
            }
        );

        assert_eq!(h.gateway.orders(), vec![(Side::Buy, dec!(5)), (Side::Sell, dec!(5))]);
        assert_eq!(h.events.entries().await.len(), 1);
        assert_eq!(h.events.exits().await[0].2, dec!(14.8));
        assert_eq!(h.store.closed().await.len(), 1);
        assert!(h.lifecycle.guard.in_cooldown("XRPUSDT", Utc::now()));
        assert!(!h.lifecycle.guard.is_active("XRPUSDT"));

        let messages = h.notifier.messages().await;
        assert!(messages[0].starts_with("🟢 BUY XRPUSDT"));
        assert!(messages[1].contains("take_profit"));
    }

    #[tokio::test]
    async fn test_skip_records_every_failed_reason() {
        let mut snap = make_snapshot();
        snap.regime = Regime::Ranging;
        snap.volume_spike = false;
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::with_snapshot(Some(snap)),
        );

        let outcome = h.lifecycle.run("XRPUSDT").await;
        let expected = vec![
            "Market regime not trending".to_string(),
            "No volume spike".to_string(),
        ];
        assert_eq!(outcome, RunOutcome::Skipped(expected.clone()));
        assert_eq!(h.events.skips().await, vec![("XRPUSDT".to_string(), expected)]);
        assert!(h.gateway.orders().is_empty());
        assert!(h.notifier.messages().await[0].starts_with("⏭️ SKIP XRPUSDT"));
    }

    #[tokio::test]
    async fn test_insufficient_data_is_a_skip() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::with_snapshot(None),
        );
        assert_eq!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Skipped(vec![INSUFFICIENT_DATA.to_string()])
        );
    }

    #[tokio::test]
    async fn test_unconfirmed_trend_withholds_entry() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::entering().unconfirmed(),
        );
        assert_eq!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Skipped(vec![HTF_NOT_CONFIRMED.to_string()])
        );
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_cooldown_blocks_reentry() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::entering(),
        );
        let until = Utc::now() + chrono::Duration::minutes(30);
        h.lifecycle.guard.set_cooldown("XRPUSDT", until);

        assert_eq!(h.lifecycle.run("XRPUSDT").await, RunOutcome::CoolingDown(until));
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_paused_throttle_blocks_entry() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::entering(),
        );
        h.events.push_closed_pnl(dec!(-80)).await;
        h.lifecycle.throttle.refresh(h.events.as_ref()).await;

        assert_eq!(h.lifecycle.run("XRPUSDT").await, RunOutcome::Paused);
    }

    #[tokio::test]
    async fn test_busy_symbol_is_left_alone() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::entering(),
        );
        let _held = h.lifecycle.guard.lease("XRPUSDT").unwrap();
        assert_eq!(h.lifecycle.run("XRPUSDT").await, RunOutcome::Busy);
    }

    #[tokio::test]
    async fn test_rejection_is_notified_and_releases_lock() {
        let gateway = FakeGateway::new(dec!(1000), &[dec!(100)]);
        gateway.reject_orders("MIN_NOTIONAL");
        let h = harness(gateway, ScriptedFeatures::entering());

        assert_eq!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Rejected("MIN_NOTIONAL".to_string())
        );
        assert!(!h.lifecycle.guard.is_active("XRPUSDT"));
        assert!(h.notifier.messages().await[0].contains("MIN_NOTIONAL"));
        assert!(h.store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_zero_size_is_rejected() {
        let h = harness(
            FakeGateway::new(dec!(0.5), &[dec!(100)]).with_precision(0),
            ScriptedFeatures::entering(),
        );
        assert!(matches!(h.lifecycle.run("XRPUSDT").await, RunOutcome::Rejected(_)));
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_run() {
        let gateway = FakeGateway::new(dec!(1000), &[dec!(100)]);
        gateway.fail_ohlcv(10);
        let h = harness(gateway, ScriptedFeatures::entering());

        let outcome = h.lifecycle.run("XRPUSDT").await;
        assert!(matches!(outcome, RunOutcome::Failed(ref msg) if msg.contains("3 attempt")));
        assert!(h.notifier.messages().await[0].starts_with("❌ Error in XRPUSDT"));
        assert!(!h.lifecycle.guard.is_active("XRPUSDT"));
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_within_bound() {
        let gateway = FakeGateway::new(dec!(1000), &[dec!(100), dec!(97)]);
        gateway.fail_ohlcv(2);
        let h = harness(gateway, ScriptedFeatures::entering());

        // SL at 98.5
        assert!(matches!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Closed { reason: ExitReason::StopLoss, .. }
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_does_not_stop_the_run() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100), dec!(103)]),
            ScriptedFeatures::entering(),
        );
        h.store.fail_writes(true).await;

        assert!(matches!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Closed { reason: ExitReason::TakeProfit, .. }
        ));
        // Cooldown still applies in memory
        assert!(h.lifecycle.guard.in_cooldown("XRPUSDT", Utc::now()));
    }

    #[tokio::test]
    async fn test_stored_position_is_resumed() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(90)]),
            ScriptedFeatures::entering(),
        );
        h.store
            .insert(Position::open(
                "XRPUSDT",
                dec!(100),
                dec!(2),
                dec!(2),
                Decimal::ZERO,
                Utc::now(),
                chrono::Duration::hours(24),
            ))
            .await;

        // SL at 97; no new buy is placed
        assert_eq!(
            h.lifecycle.run("XRPUSDT").await,
            RunOutcome::Closed {
                reason: ExitReason::StopLoss,
                pnl: dec!(-20)
            }
        );
        assert_eq!(h.gateway.orders(), vec![(Side::Sell, dec!(2))]);
    }

    #[tokio::test]
    async fn test_exits_fire_without_a_snapshot() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100.5)]),
            ScriptedFeatures::with_snapshot(None),
        );
        h.store
            .insert(Position::open(
                "XRPUSDT",
                dec!(100),
                dec!(2),
                dec!(2),
                Decimal::ZERO,
                Utc::now() - chrono::Duration::hours(48),
                chrono::Duration::hours(24),
            ))
            .await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), h.lifecycle.run("XRPUSDT"))
            .await
            .expect("monitor loop never closed the position");
        assert!(matches!(outcome, RunOutcome::Closed { reason: ExitReason::MaxHold, .. }));

        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(50)]),
            ScriptedFeatures::with_snapshot(None),
        );
        h.store
            .insert(Position::open(
                "XRPUSDT",
                dec!(100),
                dec!(2),
                dec!(2),
                Decimal::ZERO,
                Utc::now(),
                chrono::Duration::hours(24),
            ))
            .await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), h.lifecycle.run("XRPUSDT"))
            .await
            .expect("monitor loop never closed the position");
        assert!(matches!(outcome, RunOutcome::Closed { reason: ExitReason::StopLoss, .. }));
    }

    #[tokio::test]
    async fn test_base_asset_fee_sells_net_holding() {
        // 0.005 XRP commission on the buy leaves 4.995 held; lot step is 0.1
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100), dec!(103)]).with_base_fee(dec!(0.005)),
            ScriptedFeatures::entering(),
        );

        let outcome = h.lifecycle.run("XRPUSDT").await;
        // pnl = 4.9 * (103 - 100) - 0.005 * 100
        assert_eq!(
            outcome,
            RunOutcome::Closed {
                reason: ExitReason::TakeProfit,
                pnl: dec!(14.2)
            }
        );
        assert_eq!(h.gateway.orders(), vec![(Side::Buy, dec!(5)), (Side::Sell, dec!(4.9))]);
        assert!(h.store.load("XRPUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dust_position_is_rejected_not_sold() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(90)]).with_precision(0),
            ScriptedFeatures::entering(),
        );
        h.store
            .insert(Position::open(
                "XRPUSDT",
                dec!(100),
                dec!(0.4),
                dec!(2),
                Decimal::ZERO,
                Utc::now(),
                chrono::Duration::hours(24),
            ))
            .await;

        assert!(matches!(h.lifecycle.run("XRPUSDT").await, RunOutcome::Rejected(_)));
        assert!(h.gateway.orders().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_leaves_position_open() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100)]),
            ScriptedFeatures::entering(),
        );
        h.lifecycle.shutdown.store(true, Ordering::SeqCst);

        assert_eq!(h.lifecycle.run("XRPUSDT").await, RunOutcome::Interrupted);
        assert!(h.store.load("XRPUSDT").await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_runs_open_one_position() {
        let h = harness(
            FakeGateway::new(dec!(1000), &[dec!(100), dec!(100), dec!(100), dec!(103)]),
            ScriptedFeatures::entering(),
        );

        let a = tokio::spawn({
            let lifecycle = h.lifecycle.clone();
            async move { lifecycle.run("XRPUSDT").await }
        });
        let b = tokio::spawn({
            let lifecycle = h.lifecycle.clone();
            async move { lifecycle.run("XRPUSDT").await }
        });
        let outcomes = [a.await.unwrap(), b.await.unwrap()];

        let buys = h
            .gateway
            .orders()
            .into_iter()
            .filter(|(side, _)| *side == Side::Buy)
            .count();
        assert_eq!(buys, 1);
        assert!(outcomes.iter().any(|o| matches!(o, RunOutcome::Closed { .. })));
        // The loser either saw the lease held or arrived after the close
        assert!(outcomes
            .iter()
            .any(|o| matches!(o, RunOutcome::Busy | RunOutcome::CoolingDown(_))));
    }
}
