//! Position model: one open long per symbol with its protective levels.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Stop-loss distance below entry, in ATR multiples.
pub const STOP_LOSS_ATR: Decimal = dec!(1.5);
/// Take-profit distance above entry, in ATR multiples.
pub const TAKE_PROFIT_ATR: Decimal = dec!(2.5);
/// Trailing-stop distance below price, in ATR multiples.
pub const TRAILING_ATR: Decimal = Decimal::ONE;

/// Lifecycle state of a position. There is no way back from `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionState {
    Open,
    Closed,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    StopLoss,
    TrailingStop,
    Signal,
    MaxHold,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::Signal => "signal_exit",
            ExitReason::MaxHold => "max_hold_timeout",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An open long position.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,

    /// Only ever moves up
    pub trailing_stop: Decimal,

    /// ATR at entry; stop-loss and take-profit are fixed from it
    pub entry_atr: Decimal,

    /// Fee paid on the entry order
    pub entry_fee: Decimal,

    pub opened_at: DateTime<Utc>,

    /// Maximum time the position may stay open
    pub max_hold: Duration,

    pub state: PositionState,
}

impl Position {
    /// Open a new position, deriving its protective levels from ATR.
    pub fn open(
        symbol: impl Into<String>,
        entry_price: Decimal,
        quantity: Decimal,
        atr: Decimal,
        entry_fee: Decimal,
        opened_at: DateTime<Utc>,
        max_hold: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            entry_price,
            quantity,
            stop_loss: entry_price - STOP_LOSS_ATR * atr,
            take_profit: entry_price + TAKE_PROFIT_ATR * atr,
            trailing_stop: entry_price - TRAILING_ATR * atr,
            entry_atr: atr,
            entry_fee,
            opened_at,
            max_hold,
            state: PositionState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Ratchet the trailing stop toward `price - atr`; never loosens it.
    pub fn ratchet_trailing(&mut self, price: Decimal, atr: Decimal) {
        let candidate = price - TRAILING_ATR * atr;
        if candidate > self.trailing_stop {
            self.trailing_stop = candidate;
        }
    }

    /// Time elapsed since entry.
    pub fn held_for(&self, now: DateTime<Utc>) -> Duration {
        now - self.opened_at
    }

    /// True once the holding ceiling has been exceeded.
    pub fn hold_expired(&self, now: DateTime<Utc>) -> bool {
        self.held_for(now) > self.max_hold
    }

    /// Mark the position terminal.
    pub fn close(&mut self) {
        self.state = PositionState::Closed;
    }
}
