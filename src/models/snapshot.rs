//! Feature snapshot: the indicator vector a signal decision is made on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ADX level above which the market is considered trending.
pub const TRENDING_ADX: f64 = 25.0;

/// Market regime derived from ADX.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Trending,
    Ranging,
}

impl Regime {
    /// Classify a regime from an ADX reading.
    pub fn from_adx(adx: f64) -> Self {
        if adx > TRENDING_ADX {
            Regime::Trending
        } else {
            Regime::Ranging
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Trending => "trending",
            Regime::Ranging => "ranging",
        }
    }
}

impl std::fmt::Display for Regime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Indicator values for the most recent closed bar of a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub symbol: String,

    /// Open time of the bar the snapshot describes
    pub timestamp: DateTime<Utc>,

    pub close: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub atr: f64,

    /// Rolling mean of ATR over the volatility window
    pub atr_mean: f64,

    pub vwap: f64,
    pub macd_hist: f64,
    pub adx: f64,

    /// Cumulative on-balance volume
    pub obv: f64,

    /// OBV change versus the prior bar
    pub obv_delta: f64,

    /// Current volume exceeds 1.5x its rolling mean
    pub volume_spike: bool,

    pub regime: Regime,
}

impl FeatureSnapshot {
    /// True when ATR is running above its rolling mean.
    pub fn volatility_elevated(&self) -> bool {
        self.atr > self.atr_mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regime_boundary() {
        assert_eq!(Regime::from_adx(25.0), Regime::Ranging);
        assert_eq!(Regime::from_adx(25.01), Regime::Trending);
        assert_eq!(Regime::from_adx(10.0).to_string(), "ranging");
    }
}
