//! Exit monitoring for an open position and the global pause-trading throttle.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::{ExitReason, FeatureSnapshot, Position};

use super::ports::EventLogger;
use super::signal::evaluate_exit;

/// Evaluate one monitoring tick against an open position.
///
/// The trailing stop is ratcheted first, then triggers are tested in fixed
/// priority order so exactly one reason fires: take-profit, stop-loss,
/// trailing stop, signal exit, max-hold timeout.
///
/// Without a snapshot the trailing stop ratchets on the entry ATR and only
/// the signal exit is skipped.
pub fn check_exit(
    position: &mut Position,
    price: Decimal,
    snapshot: Option<&FeatureSnapshot>,
    now: DateTime<Utc>,
) -> Option<ExitReason> {
    let atr = snapshot
        .and_then(|s| Decimal::try_from(s.atr).ok())
        .unwrap_or(position.entry_atr);
    position.ratchet_trailing(price, atr);

    let signal_exit = snapshot.is_some_and(|s| {
        evaluate_exit(
            s,
            position.entry_price.to_f64().unwrap_or(0.0),
            price.to_f64().unwrap_or(s.close),
        )
    });

    let reason = if price >= position.take_profit {
        Some(ExitReason::TakeProfit)
    } else if price <= position.stop_loss {
        Some(ExitReason::StopLoss)
    } else if price <= position.trailing_stop {
        Some(ExitReason::TrailingStop)
    } else if signal_exit {
        Some(ExitReason::Signal)
    } else if position.hold_expired(now) {
        Some(ExitReason::MaxHold)
    } else {
        None
    };

    debug!(
        symbol = %position.symbol,
        price = %price,
        stop_loss = %position.stop_loss,
        take_profit = %position.take_profit,
        trailing_stop = %position.trailing_stop,
        exit = ?reason,
        "Monitoring tick"
    );

    reason
}

#[derive(Debug, Clone, Copy)]
struct ThrottleState {
    paused: bool,
    recent_pnl: Decimal,
    checked_at: Option<DateTime<Utc>>,
}

/// Pauses new entries when recent realized P&L falls below a floor.
///
/// Open positions keep being monitored while paused.
#[derive(Debug)]
pub struct RiskThrottle {
    /// Number of most recent closed trades to sum
    lookback_trades: u32,

    /// Entries pause while the recent sum is below this (usually negative)
    drawdown_floor: Decimal,

    state: RwLock<ThrottleState>,
}

impl RiskThrottle {
    pub fn new(lookback_trades: u32, drawdown_floor: Decimal) -> Self {
        Self {
            lookback_trades,
            drawdown_floor,
            state: RwLock::new(ThrottleState {
                paused: false,
                recent_pnl: Decimal::ZERO,
                checked_at: None,
            }),
        }
    }

    /// Whether a recent P&L sum warrants a pause.
    pub fn breaches_floor(&self, recent_pnl: Decimal) -> bool {
        recent_pnl < self.drawdown_floor
    }

    /// Recompute the pause flag from the event log.
    ///
    /// A log read failure keeps the previous flag.
    pub async fn refresh(&self, events: &dyn EventLogger) -> bool {
        match events.recent_realized_pnl(self.lookback_trades).await {
            Ok(recent_pnl) => self.apply(recent_pnl, Utc::now()).await,
            Err(e) => {
                let paused = self.is_paused().await;
                warn!(error = %e, paused = paused, "Failed to read recent P&L, keeping pause state");
                paused
            }
        }
    }

    async fn apply(&self, recent_pnl: Decimal, now: DateTime<Utc>) -> bool {
        let paused = self.breaches_floor(recent_pnl);
        let mut state = self.state.write().await;

        if paused != state.paused {
            if paused {
                warn!(
                    recent_pnl = %recent_pnl,
                    floor = %self.drawdown_floor,
                    trades = self.lookback_trades,
                    "Trading paused on recent drawdown"
                );
            } else {
                info!(recent_pnl = %recent_pnl, "Trading resumed");
            }
        }

        *state = ThrottleState {
            paused,
            recent_pnl,
            checked_at: Some(now),
        };
        paused
    }

    pub async fn is_paused(&self) -> bool {
        self.state.read().await.paused
    }

    /// Last observed sum and when it was read.
    pub async fn last_reading(&self) -> (Decimal, Option<DateTime<Utc>>) {
        let state = self.state.read().await;
        (state.recent_pnl, state.checked_at)
    }
}
