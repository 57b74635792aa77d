//! Bot runner: the fixed-interval orchestration loop.
//!
//! Handles:
//! - Refreshing the drawdown pause before each cycle
//! - Launching one staggered lifecycle run per symbol and awaiting them all
//! - The periodic signal summary
//! - Restoring cooldowns on startup and stopping cleanly on Ctrl-C

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::Notify;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::api::{notifier_from_env, BinanceClient};
use crate::db::Database;
use crate::features::FeatureProvider;
use crate::models::Position;
use crate::trading::{
    ConcurrencyGuard, EventLogger, ExecutionGateway, FeatureSource, Lifecycle, Notifier,
    PositionStore, RiskThrottle, RunOutcome, TradingConfig,
};

/// Main bot runner.
pub struct Bot {
    lifecycle: Arc<Lifecycle>,

    /// Pause state seen by the previous cycle, to notify on transitions only
    was_paused: bool,

    // Shutdown signal
    stop: Arc<Notify>,
}

impl Bot {
    /// Build the live bot: SQLite store, Binance gateway, Telegram notifier.
    pub async fn connect(config: TradingConfig) -> Result<Self> {
        config.validate()?;

        let db = Arc::new(
            Database::new(&config.database_url)
                .await?
                .with_frame(&config.entry_timeframe),
        );
        let gateway = Arc::new(BinanceClient::from_env(config.dry_run)?);
        if gateway.is_dry_run() {
            info!("Orders will be simulated");
        }

        Self::assemble(
            config,
            gateway,
            db.clone(),
            db,
            notifier_from_env(),
            Arc::new(FeatureProvider::new()),
        )
        .await
    }

    /// Wire the collaborators together and restore persisted cooldowns.
    pub async fn assemble(
        config: TradingConfig,
        gateway: Arc<dyn ExecutionGateway>,
        store: Arc<dyn PositionStore>,
        events: Arc<dyn EventLogger>,
        notifier: Arc<dyn Notifier>,
        features: Arc<dyn FeatureSource>,
    ) -> Result<Self> {
        let cooldowns = match store.load_cooldowns().await {
            Ok(cooldowns) => cooldowns,
            Err(e) => {
                warn!(error = %e, "Failed to restore cooldowns");
                HashMap::new()
            }
        };
        info!(cooldowns = cooldowns.len(), "Cooldowns restored");

        let lifecycle = Lifecycle {
            throttle: Arc::new(RiskThrottle::new(config.drawdown_lookback, config.drawdown_floor)),
            guard: Arc::new(ConcurrencyGuard::with_cooldowns(cooldowns)),
            config: Arc::new(config),
            gateway,
            store,
            events,
            notifier,
            features,
            shutdown: Arc::new(AtomicBool::new(false)),
        };

        Ok(Self {
            lifecycle: Arc::new(lifecycle),
            was_paused: false,
            stop: Arc::new(Notify::new()),
        })
    }

    /// Get shutdown signal for external control.
    pub fn shutdown_signal(&self) -> Arc<AtomicBool> {
        self.lifecycle.shutdown.clone()
    }

    fn is_shutting_down(&self) -> bool {
        self.lifecycle.shutdown.load(Ordering::SeqCst)
    }

    /// Main run loop.
    pub async fn run(&mut self) -> Result<()> {
        let config = self.lifecycle.config.clone();
        info!(
            symbols = ?config.symbols,
            cycle_secs = config.cycle_interval.as_secs(),
            "Starting bot run loop"
        );

        // Register shutdown handler
        let shutdown = self.shutdown_signal();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutdown signal received");
            shutdown.store(true, Ordering::SeqCst);
            stop.notify_one();
        });

        let summary = tokio::spawn(summary_loop(
            self.lifecycle.clone(),
            config.summary_interval,
            config.summary_days,
        ));

        let mut cycle = interval(config.cycle_interval);
        cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !self.is_shutting_down() {
            tokio::select! {
                _ = cycle.tick() => {}
                _ = self.stop.notified() => break,
            }

            let outcomes = self.run_cycle().await;
            debug!(outcomes = ?outcomes, "Cycle complete");
        }

        summary.abort();
        info!("Bot shutdown complete");
        Ok(())
    }

    /// One orchestration cycle. Returns each symbol's outcome in config order.
    pub async fn run_cycle(&mut self) -> Vec<(String, RunOutcome)> {
        let lifecycle = &self.lifecycle;

        // 1. Recompute the drawdown pause
        let paused = lifecycle.throttle.refresh(lifecycle.events.as_ref()).await;
        if paused != self.was_paused {
            let (recent_pnl, _) = lifecycle.throttle.last_reading().await;
            let message = if paused {
                format!(
                    "⛔ Trading paused: last {} trades P&L {} {} is below {}",
                    lifecycle.config.drawdown_lookback,
                    recent_pnl.round_dp(2),
                    lifecycle.config.quote_asset,
                    lifecycle.config.drawdown_floor
                )
            } else {
                "✅ Trading resumed".to_string()
            };
            lifecycle.notifier.send(&message).await;
            self.was_paused = paused;
        }

        // 2. One staggered run per symbol
        let symbols = lifecycle.config.symbols.clone();
        let stagger = lifecycle.config.stagger;
        let runs = symbols.iter().enumerate().map(|(i, symbol)| {
            let lifecycle = lifecycle.clone();
            let symbol = symbol.clone();
            let delay = stagger * i as u32;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                lifecycle.run(&symbol).await
            })
        });

        // 3. Wait for every run; a panicking run only fails its own symbol
        let results = join_all(runs).await;

        symbols
            .into_iter()
            .zip(results)
            .map(|(symbol, result)| {
                let outcome = result.unwrap_or_else(|e| {
                    error!(symbol = %symbol, error = %e, "Lifecycle task aborted");
                    RunOutcome::Failed(e.to_string())
                });
                info!(symbol = %symbol, outcome = ?outcome, "Lifecycle run finished");
                (symbol, outcome)
            })
            .collect()
    }

    /// Build and deliver the signal summary. Returns the text.
    pub async fn send_summary(&self) -> Result<String> {
        send_summary(&self.lifecycle, self.lifecycle.config.summary_days).await
    }

    /// Snapshot of persisted positions, cooldowns and the pause flag.
    pub async fn status(&self) -> Result<BotStatus> {
        let lifecycle = &self.lifecycle;
        let now = Utc::now();

        let mut open_positions: Vec<Position> = lifecycle.store.load_all().await?.into_values().collect();
        open_positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut cooldowns: Vec<(String, DateTime<Utc>)> = lifecycle
            .store
            .load_cooldowns()
            .await?
            .into_iter()
            .filter(|(_, until)| *until > now)
            .collect();
        cooldowns.sort();

        let paused = lifecycle.throttle.refresh(lifecycle.events.as_ref()).await;
        let (recent_pnl, _) = lifecycle.throttle.last_reading().await;

        Ok(BotStatus {
            open_positions,
            cooldowns,
            paused,
            recent_pnl,
            quote_asset: lifecycle.config.quote_asset.clone(),
        })
    }
}

async fn send_summary(lifecycle: &Lifecycle, days: i64) -> Result<String> {
    let summary = lifecycle.events.summarize(days).await?;
    lifecycle.notifier.send(&summary).await;
    Ok(summary)
}

/// Periodic signal summary, first sent one period after startup.
async fn summary_loop(lifecycle: Arc<Lifecycle>, period: Duration, days: i64) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        if lifecycle.shutdown.load(Ordering::SeqCst) {
            return;
        }
        match send_summary(&lifecycle, days).await {
            Ok(_) => info!(days = days, "Signal summary sent"),
            Err(e) => warn!(error = %e, "Failed to build signal summary"),
        }
    }
}

/// Point-in-time bot state for the status command.
#[derive(Debug, Clone)]
pub struct BotStatus {
    pub open_positions: Vec<Position>,
    pub cooldowns: Vec<(String, DateTime<Utc>)>,
    pub paused: bool,
    pub recent_pnl: Decimal,
    pub quote_asset: String,
}

impl std::fmt::Display for BotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Bot Status ===")?;
        writeln!(f, "Trading:          {}", if self.paused { "PAUSED" } else { "Active" })?;
        writeln!(f, "Recent P&L:       {:.2} {}", self.recent_pnl, self.quote_asset)?;

        writeln!(f, "\n=== Open Positions ({}) ===", self.open_positions.len())?;
        for pos in &self.open_positions {
            writeln!(
                f,
                "  {:<10} {} @ {} | SL {} TP {} Trail {} | since {}",
                pos.symbol,
                pos.quantity,
                pos.entry_price,
                pos.stop_loss,
                pos.take_profit,
                pos.trailing_stop,
                pos.opened_at.format("%Y-%m-%d %H:%M")
            )?;
        }

        writeln!(f, "\n=== Cooldowns ({}) ===", self.cooldowns.len())?;
        for (symbol, until) in &self.cooldowns {
            writeln!(f, "  {:<10} until {}", symbol, until.format("%Y-%m-%d %H:%M:%S UTC"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Bar, FeatureSnapshot};
    use crate::trading::testing::{FakeGateway, MemoryEvents, MemoryStore, RecordingNotifier, ScriptedFeatures};
    use crate::trading::INSUFFICIENT_DATA;
    use rust_decimal_macros::dec;

    struct Harness {
        bot: Bot,
        events: Arc<MemoryEvents>,
        store: Arc<MemoryStore>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness(features: Arc<dyn FeatureSource>) -> Harness {
        let config = TradingConfig {
            symbols: vec!["XRPUSDT".to_string(), "BTCUSDT".to_string()],
            stagger: Duration::ZERO,
            ..TradingConfig::default()
        };
        let events = Arc::new(MemoryEvents::default());
        let store = Arc::new(MemoryStore::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let bot = Bot::assemble(
            config,
            Arc::new(FakeGateway::new(dec!(1000), &[dec!(100)])),
            store.clone(),
            events.clone(),
            notifier.clone(),
            features,
        )
        .await
        .unwrap();

        Harness {
            bot,
            events,
            store,
            notifier,
        }
    }

    /// Panics while evaluating one symbol.
    struct PanicsOn(&'static str);

    impl FeatureSource for PanicsOn {
        fn snapshot(&self, symbol: &str, _bars: &[Bar]) -> Option<FeatureSnapshot> {
            if symbol == self.0 {
                panic!("provider blew up");
            }
            None
        }

        fn trend_confirmed(&self, _bars: &[Bar]) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_cycle_runs_every_symbol() {
        let mut h = harness(Arc::new(ScriptedFeatures::with_snapshot(None))).await;

        let outcomes = h.bot.run_cycle().await;
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].0, "XRPUSDT");
        assert_eq!(outcomes[1].0, "BTCUSDT");
        for (_, outcome) in &outcomes {
            assert_eq!(outcome, &RunOutcome::Skipped(vec![INSUFFICIENT_DATA.to_string()]));
        }
        assert_eq!(h.events.skips().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_symbol_does_not_abort_others() {
        let mut h = harness(Arc::new(PanicsOn("XRPUSDT"))).await;

        let outcomes = h.bot.run_cycle().await;
        assert!(matches!(outcomes[0].1, RunOutcome::Failed(_)));
        assert_eq!(outcomes[1].1, RunOutcome::Skipped(vec![INSUFFICIENT_DATA.to_string()]));

        // The lease was released during unwinding
        assert!(!h.bot.lifecycle.guard.is_active("XRPUSDT"));
    }

    #[tokio::test]
    async fn test_pause_notified_once() {
        let mut h = harness(Arc::new(ScriptedFeatures::entering())).await;
        h.events.push_closed_pnl(dec!(-120)).await;

        let outcomes = h.bot.run_cycle().await;
        assert!(outcomes.iter().all(|(_, o)| *o == RunOutcome::Paused));
        h.bot.run_cycle().await;

        let messages = h.notifier.messages().await;
        assert_eq!(messages.iter().filter(|m| m.starts_with("⛔ Trading paused")).count(), 1);

        let status = h.bot.status().await.unwrap();
        assert!(status.paused);
        assert_eq!(status.recent_pnl, dec!(-120));
    }

    #[tokio::test]
    async fn test_restores_cooldowns() {
        let store = Arc::new(MemoryStore::default());
        let until = Utc::now() + chrono::Duration::minutes(30);
        store.save_cooldown("XRPUSDT", until).await.unwrap();

        let bot = Bot::assemble(
            TradingConfig::default(),
            Arc::new(FakeGateway::new(dec!(1000), &[dec!(100)])),
            store,
            Arc::new(MemoryEvents::default()),
            Arc::new(RecordingNotifier::default()),
            Arc::new(ScriptedFeatures::entering()),
        )
        .await
        .unwrap();

        assert_eq!(bot.lifecycle.run("XRPUSDT").await, RunOutcome::CoolingDown(until));
        let status = bot.status().await.unwrap();
        assert_eq!(status.cooldowns, vec![("XRPUSDT".to_string(), until)]);
    }

    #[tokio::test]
    async fn test_summary_is_sent() {
        let h = harness(Arc::new(ScriptedFeatures::with_snapshot(None))).await;
        let text = h.bot.send_summary().await.unwrap();
        assert_eq!(h.notifier.messages().await, vec![text]);
        assert!(h.store.closed().await.is_empty());
    }
}
