//! Feature snapshot provider: turns raw bars into the indicator vector the
//! signal evaluator consumes.

pub mod indicators;

use tracing::debug;

use crate::models::{Bar, FeatureSnapshot, Regime};
use crate::trading::FeatureSource;

use indicators::{adx, atr_series, ema, macd_histogram, obv_series, rsi, trailing_mean, vwap};

/// Bars required before every indicator window is populated.
pub const WARMUP_BARS: usize = 50;

/// Window for the ATR and volume rolling means.
pub const ROLLING_WINDOW: usize = 20;

/// Volume above this multiple of its rolling mean is a spike.
pub const VOLUME_SPIKE_FACTOR: f64 = 1.5;

/// Indicator periods.
#[derive(Debug, Clone)]
pub struct FeatureProvider {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
    pub adx_period: usize,
    pub macd: (usize, usize, usize),
}

impl Default for FeatureProvider {
    fn default() -> Self {
        Self {
            ema_fast: 9,
            ema_slow: 21,
            rsi_period: 14,
            atr_period: 14,
            adx_period: 14,
            macd: (12, 26, 9),
        }
    }
}

impl FeatureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the last bar, or `None` while indicators are still warming up.
    pub fn snapshot(&self, symbol: &str, bars: &[Bar]) -> Option<FeatureSnapshot> {
        if bars.len() < WARMUP_BARS {
            debug!(symbol = %symbol, bars = bars.len(), needed = WARMUP_BARS, "Not enough bars");
            return None;
        }

        let last = bars.last()?;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let ema_fast = *ema(&closes, self.ema_fast).last()?;
        let ema_slow = *ema(&closes, self.ema_slow).last()?;

        let atrs = atr_series(bars, self.atr_period);
        let atr = *atrs.last()?;
        let atr_mean = trailing_mean(&atrs, ROLLING_WINDOW)?;

        let (fast, slow, signal) = self.macd;
        let adx = adx(bars, self.adx_period)?;

        let obv = obv_series(bars);
        let obv_now = *obv.last()?;
        let obv_prev = obv[obv.len() - 2];

        let volume_mean = trailing_mean(&volumes, ROLLING_WINDOW)?;

        Some(FeatureSnapshot {
            symbol: symbol.to_string(),
            timestamp: last.open_time,
            close: last.close,
            ema_fast,
            ema_slow,
            rsi: rsi(&closes, self.rsi_period)?,
            atr,
            atr_mean,
            vwap: vwap(bars)?,
            macd_hist: macd_histogram(&closes, fast, slow, signal)?,
            adx,
            obv: obv_now,
            obv_delta: obv_now - obv_prev,
            volume_spike: last.volume > VOLUME_SPIKE_FACTOR * volume_mean,
            regime: Regime::from_adx(adx),
        })
    }

    /// Fast EMA above slow EMA on the given (coarser) bars.
    pub fn trend_confirmed(&self, bars: &[Bar]) -> bool {
        if bars.len() < self.ema_slow {
            return false;
        }
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        match (ema(&closes, self.ema_fast).last(), ema(&closes, self.ema_slow).last()) {
            (Some(fast), Some(slow)) => fast > slow,
            _ => false,
        }
    }
}

impl FeatureSource for FeatureProvider {
    fn snapshot(&self, symbol: &str, bars: &[Bar]) -> Option<FeatureSnapshot> {
        FeatureProvider::snapshot(self, symbol, bars)
    }

    fn trend_confirmed(&self, bars: &[Bar]) -> bool {
        FeatureProvider::trend_confirmed(self, bars)
    }
}

/// Bars with a fixed 2.0 high-low range around each close.
#[cfg(test)]
pub(crate) fn bars_from_closes(closes: &[f64], volume: f64) -> Vec<Bar> {
    use chrono::{Duration, Utc};

    let start = Utc::now() - Duration::minutes(5 * closes.len() as i64);
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| Bar {
            open_time: start + Duration::minutes(5 * i as i64),
            open: c,
            high: c + 1.0,
            low: c - 1.0,
            close: c,
            volume,
        })
        .collect()
}
