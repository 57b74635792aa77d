//! Signal evaluation: pure entry and exit decisions over a feature snapshot.
//!
//! Entry is a conjunction of independent checks. Every check runs and records
//! a reason, so a skip carries the complete list of what failed. Exit rules
//! depend on the regime: trend exits fire on any one of five signals, range
//! exits use a tighter ATR band plus VWAP.

use serde::{Deserialize, Serialize};

use crate::models::{FeatureSnapshot, Regime};

/// Secondary trend-strength floor, looser than the regime gate.
pub const MIN_ADX: f64 = 20.0;

/// Stop distance for the trend-regime signal exit, in ATR.
pub const TREND_EXIT_ATR: f64 = 1.5;

/// Stop distance for the range-regime signal exit, in ATR.
pub const RANGE_EXIT_ATR: f64 = 1.0;

/// Reason recorded when the coarser timeframe disagrees with an entry.
pub const HTF_NOT_CONFIRMED: &str = "Higher timeframe trend not confirmed";

/// What the evaluator recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Enter,
    Skip,
    Exit,
    Hold,
}

/// A decision with the itemized reasons behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    pub passed: Vec<String>,
    pub failed: Vec<String>,
}

impl Decision {
    pub fn is_enter(&self) -> bool {
        self.action == Action::Enter
    }

    pub fn is_exit(&self) -> bool {
        self.action == Action::Exit
    }

    /// A skip that was never evaluated, e.g. too few bars.
    pub fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: Action::Skip,
            passed: Vec::new(),
            failed: vec![reason.into()],
        }
    }

    /// Turn an ENTER into a SKIP carrying the higher-timeframe reason only.
    pub fn withhold_unconfirmed(mut self) -> Self {
        self.action = Action::Skip;
        self.failed = vec![HTF_NOT_CONFIRMED.to_string()];
        self
    }
}

/// RSI bounds that tighten when volatility runs hot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RsiBand {
    pub lower: f64,
    pub upper: f64,
}

impl RsiBand {
    pub const CALM: RsiBand = RsiBand { lower: 40.0, upper: 70.0 };
    pub const VOLATILE: RsiBand = RsiBand { lower: 45.0, upper: 65.0 };

    /// Pick the band from ATR versus its rolling mean.
    pub fn adaptive(snapshot: &FeatureSnapshot) -> Self {
        if snapshot.volatility_elevated() {
            Self::VOLATILE
        } else {
            Self::CALM
        }
    }

    pub fn contains(&self, rsi: f64) -> bool {
        rsi > self.lower && rsi < self.upper
    }
}

struct Checks {
    passed: Vec<String>,
    failed: Vec<String>,
}

impl Checks {
    fn new() -> Self {
        Self {
            passed: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn check(&mut self, ok: bool, pass: impl Into<String>, fail: impl Into<String>) {
        if ok {
            self.passed.push(pass.into());
        } else {
            self.failed.push(fail.into());
        }
    }
}

/// Decide whether to open a position on the latest snapshot.
///
/// `history` holds the preceding snapshots, oldest first. When present, the
/// last one is the prior bar for the OBV comparison; otherwise the
/// provider-computed `obv_delta` is used.
pub fn evaluate_entry(snapshot: &FeatureSnapshot, history: &[FeatureSnapshot]) -> Decision {
    let band = RsiBand::adaptive(snapshot);
    let mut checks = Checks::new();

    checks.check(
        snapshot.regime == Regime::Trending,
        "Market regime trending",
        "Market regime not trending",
    );
    checks.check(
        snapshot.ema_fast > snapshot.ema_slow,
        "EMA fast above slow",
        "EMA fast not above slow",
    );
    checks.check(
        band.contains(snapshot.rsi),
        format!("RSI within adaptive band ({}-{})", band.lower, band.upper),
        format!("RSI outside adaptive band ({}-{})", band.lower, band.upper),
    );
    checks.check(
        snapshot.close > snapshot.vwap,
        "Price above VWAP",
        "Price not above VWAP",
    );
    checks.check(snapshot.adx > MIN_ADX, "ADX above 20", "ADX too weak");
    checks.check(snapshot.volume_spike, "Volume spike", "No volume spike");

    let obv_rising = match history.last() {
        Some(prev) => snapshot.obv > prev.obv,
        None => snapshot.obv_delta > 0.0,
    };
    checks.check(obv_rising, "OBV rising", "OBV not rising");

    let action = if checks.failed.is_empty() {
        Action::Enter
    } else {
        Action::Skip
    };

    Decision {
        action,
        passed: checks.passed,
        failed: checks.failed,
    }
}

/// Regime-conditional exit decision with the signals that fired.
///
/// `price` is the live price; indicator values come from the snapshot.
pub fn evaluate_exit_decision(snapshot: &FeatureSnapshot, entry_price: f64, price: f64) -> Decision {
    let band = RsiBand::adaptive(snapshot);
    let mut fired = Vec::new();

    match snapshot.regime {
        Regime::Trending => {
            if snapshot.ema_fast < snapshot.ema_slow {
                fired.push("EMA fast crossed below slow".to_string());
            }
            if snapshot.rsi > band.upper {
                fired.push(format!("RSI above {}", band.upper));
            }
            if price < entry_price - TREND_EXIT_ATR * snapshot.atr {
                fired.push("Price below entry - 1.5 ATR".to_string());
            }
            if snapshot.macd_hist < 0.0 {
                fired.push("MACD histogram negative".to_string());
            }
            if snapshot.adx < MIN_ADX {
                fired.push("ADX below 20".to_string());
            }
        }
        Regime::Ranging => {
            if snapshot.rsi > band.upper {
                fired.push(format!("RSI above {}", band.upper));
            }
            if price < entry_price - RANGE_EXIT_ATR * snapshot.atr {
                fired.push("Price below entry - 1.0 ATR".to_string());
            }
            if price < snapshot.vwap {
                fired.push("Price below VWAP".to_string());
            }
        }
    }

    let action = if fired.is_empty() {
        Action::Hold
    } else {
        Action::Exit
    };

    Decision {
        action,
        passed: Vec::new(),
        failed: fired,
    }
}

/// True when any exit signal for the snapshot's regime fires.
pub fn evaluate_exit(snapshot: &FeatureSnapshot, entry_price: f64, price: f64) -> bool {
    evaluate_exit_decision(snapshot, entry_price, price).is_exit()
}

#[cfg(test)]
pub(crate) fn make_snapshot() -> FeatureSnapshot {
    // Every entry check passes on this snapshot
    FeatureSnapshot {
        symbol: "XRPUSDT".to_string(),
        timestamp: chrono::Utc::now(),
        close: 101.0,
        ema_fast: 100.5,
        ema_slow: 100.0,
        rsi: 55.0,
        atr: 1.0,
        atr_mean: 1.2,
        vwap: 100.0,
        macd_hist: 0.2,
        adx: 30.0,
        obv: 5_000.0,
        obv_delta: 250.0,
        volume_spike: true,
        regime: Regime::Trending,
    }
}
